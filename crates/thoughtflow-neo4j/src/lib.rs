//! # Neo4j Graph Repository
//!
//! Neo4j implementation of ThoughtFlow's `GraphRepository` contract.
//!
//! ## Connection policy
//!
//! One long-lived driver per process; pool size capped at 50 connections;
//! 30-second acquisition timeout; TLS according to the connection URI scheme
//! (`neo4j+s://` / `bolt+s://`). Credentials never appear in logs or error
//! messages: every driver error is wrapped through the core sanitizer before
//! it surfaces.
//!
//! ## Requirements
//!
//! The stages issue parameterized UNWIND batch upserts and rely on the APOC
//! procedures `apoc.create.addLabels`, `apoc.path.subgraphNodes`, and
//! `apoc.merge.relationship`; install the APOC core plugin on the server.
//!
//! ## Example
//!
//! ```rust,no_run
//! use thoughtflow_neo4j::Neo4jRepository;
//! use thoughtflow::GraphRepository;
//!
//! # async fn example() -> thoughtflow::core::Result<()> {
//! let repo = Neo4jRepository::connect(
//!     "neo4j+s://graph.internal:7687",
//!     "svc_thoughtflow",
//!     "a-real-password",
//!     "research",
//! )
//! .await?;
//! assert!(repo.health_check().await);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use neo4rs::{
    BoltBoolean, BoltFloat, BoltInteger, BoltList, BoltMap, BoltString, BoltType, ConfigBuilder,
    Graph, Query,
};
use serde_json::{Map, Value};
use tracing::debug;

use thoughtflow::config::StoreSettings;
use thoughtflow::constants::MAX_STORE_POOL_SIZE;
use thoughtflow::core::error::{Error, Result};
use thoughtflow::repository::{
    validate_query_policy, GraphRepository, QueryMode, QueryRecord, Statement, WritePolicy,
};

/// Neo4j-backed graph repository.
pub struct Neo4jRepository {
    graph: Graph,
    database: String,
}

impl Neo4jRepository {
    /// Connect a long-lived driver.
    ///
    /// # Arguments
    ///
    /// * `uri` - connection URI (e.g. "<neo4j+s://host:7687>"); the scheme
    ///   decides TLS
    /// * `user` / `password` - credentials; never logged
    /// * `database` - target database name
    pub async fn connect(uri: &str, user: &str, password: &str, database: &str) -> Result<Self> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .db(database)
            .max_connections(MAX_STORE_POOL_SIZE)
            .build()
            .map_err(|e| Error::store(format!("Invalid Neo4j configuration: {e}")))?;

        let graph = Graph::connect(config)
            .await
            .map_err(|e| Error::store(format!("Failed to connect to Neo4j: {e}")))?;
        debug!(database, "connected Neo4j driver");

        Ok(Self {
            graph,
            database: database.to_string(),
        })
    }

    /// Connect from the settings document's store section.
    pub async fn from_settings(settings: &StoreSettings) -> Result<Self> {
        Self::connect(
            &settings.uri,
            &settings.user,
            &settings.password,
            &settings.database,
        )
        .await
    }

    /// The configured database name.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    fn build_query(query: &str, params: Map<String, Value>) -> Query {
        let mut q = Query::new(query.to_string());
        for (key, value) in params {
            q = q.param(&key, json_to_bolt(&value));
        }
        q
    }

    async fn run_single(
        &self,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<Vec<QueryRecord>> {
        let mut stream = self
            .graph
            .execute(Self::build_query(query, params))
            .await
            .map_err(|e| Error::store(format!("Neo4j query failed: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = stream
            .next()
            .await
            .map_err(|e| Error::store(format!("Failed to read Neo4j result row: {e}")))?
        {
            let record: QueryRecord = row
                .to::<Map<String, Value>>()
                .map_err(|e| Error::store(format!("Failed to decode Neo4j row: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }
}

#[async_trait]
impl GraphRepository for Neo4jRepository {
    async fn execute_query(
        &self,
        query: &str,
        params: Map<String, Value>,
        _mode: QueryMode,
    ) -> Result<Vec<QueryRecord>> {
        validate_query_policy(query, WritePolicy::Standard)?;
        self.run_single(query, params).await
    }

    async fn execute_pruning_write(
        &self,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<Vec<QueryRecord>> {
        validate_query_policy(query, WritePolicy::PruningWrites)?;
        self.run_single(query, params).await
    }

    async fn execute_in_transaction(
        &self,
        statements: Vec<Statement>,
        _mode: QueryMode,
    ) -> Result<Vec<Vec<QueryRecord>>> {
        for statement in &statements {
            validate_query_policy(&statement.query, WritePolicy::Standard)?;
        }

        let mut txn = self
            .graph
            .start_txn()
            .await
            .map_err(|e| Error::store(format!("Failed to open Neo4j transaction: {e}")))?;

        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            let mut stream = txn
                .execute(Self::build_query(&statement.query, statement.params))
                .await
                .map_err(|e| Error::store(format!("Neo4j transaction statement failed: {e}")))?;

            let mut records = Vec::new();
            while let Some(row) = stream
                .next(txn.handle())
                .await
                .map_err(|e| Error::store(format!("Failed to read transaction row: {e}")))?
            {
                let record: QueryRecord = row
                    .to::<Map<String, Value>>()
                    .map_err(|e| Error::store(format!("Failed to decode transaction row: {e}")))?;
                records.push(record);
            }
            results.push(records);
        }

        txn.commit()
            .await
            .map_err(|e| Error::store(format!("Failed to commit Neo4j transaction: {e}")))?;
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        self.graph.run(Query::new("RETURN 1".to_string())).await.is_ok()
    }
}

/// Convert a JSON value into a Bolt parameter value.
///
/// Property maps written by the stages are pre-flattened (scalars, strings,
/// and UNWIND row lists of flat maps); JSON nulls map to empty strings since
/// the write protocol never emits them.
#[must_use]
pub fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::String(BoltString::from("")),
        Value::Bool(b) => BoltType::Boolean(BoltBoolean::new(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                BoltType::Integer(BoltInteger::new(i))
            } else {
                BoltType::Float(BoltFloat::new(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => BoltType::String(BoltString::from(s.as_str())),
        Value::Array(items) => {
            let list = BoltList {
                value: items.iter().map(json_to_bolt).collect(),
            };
            BoltType::List(list)
        }
        Value::Object(map) => {
            let bolt: BoltMap = map
                .iter()
                .map(|(k, v)| (BoltString::from(k.as_str()), json_to_bolt(v)))
                .collect();
            BoltType::Map(bolt)
        }
    }
}
