//! Graph repository contract the stages consume.
//!
//! The store behind this trait must support labelled nodes, typed
//! relationships, property maps, parameterized UNWIND batch upserts, a
//! path-subgraph procedure, and a label-add procedure. Implementations wrap
//! every store error with a sanitized message; queries carrying
//! administrative verbs are rejected before execution unless the caller goes
//! through the explicit pruning-write entry point.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use crate::core::error::{Error, Result};
use crate::core::types::{EdgeType, NodeType};

/// One record returned by a query: column name → JSON value.
pub type QueryRecord = Map<String, Value>;

/// Read or write routing for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Routed to a read replica where available
    Read,
    /// Requires the leader
    Write,
}

/// A parameterized statement.
#[derive(Debug, Clone)]
pub struct Statement {
    /// The query text
    pub query: String,
    /// Bound parameters
    pub params: Map<String, Value>,
}

impl Statement {
    /// Build a statement with parameters.
    #[must_use]
    pub fn new(query: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }

    /// Build a statement without parameters.
    #[must_use]
    pub fn bare(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Map::new(),
        }
    }
}

/// What a caller is allowed to do on the store surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
    /// Upserts and reads only; destructive verbs rejected
    #[default]
    Standard,
    /// The pruning stage's permit: DELETE/DETACH/REMOVE allowed,
    /// database-management verbs still rejected
    PruningWrites,
}

fn destructive_verb_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?i)\b(DELETE|DETACH|REMOVE)\b").unwrap()
    })
}

fn admin_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"(?i)(\bDROP\b|\bdbms\s*\.|\bdb\.ms\b|CREATE\s+DATABASE|DROP\s+DATABASE)")
            .unwrap()
    })
}

/// Reject queries that exceed the caller's write policy.
///
/// Database-management verbs are never allowed through this surface;
/// destructive graph verbs require the pruning permit.
pub fn validate_query_policy(query: &str, policy: WritePolicy) -> Result<()> {
    if admin_pattern().is_match(query) {
        return Err(Error::invalid_input(
            "administrative query rejected by store policy",
        ));
    }
    if policy == WritePolicy::Standard && destructive_verb_pattern().is_match(query) {
        return Err(Error::invalid_input(
            "destructive query rejected outside the pruning write path",
        ));
    }
    Ok(())
}

/// Validate a relationship type against the closed edge-type set.
pub fn validate_relationship_type(rel_type: &str) -> Result<()> {
    if EdgeType::allow_list().contains(&rel_type) {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "relationship type '{rel_type}' is not in the allow-list"
        )))
    }
}

/// Contract between the stages and the graph store.
#[async_trait]
pub trait GraphRepository: Send + Sync {
    /// Execute one parameterized query under the standard write policy.
    async fn execute_query(
        &self,
        query: &str,
        params: Map<String, Value>,
        mode: QueryMode,
    ) -> Result<Vec<QueryRecord>>;

    /// Execute a destructive statement under the pruning permit.
    ///
    /// Only the pruning/merging stage goes through here.
    async fn execute_pruning_write(
        &self,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<Vec<QueryRecord>>;

    /// Atomically run a closure's worth of statements in one transaction,
    /// returning each statement's records in order.
    async fn execute_in_transaction(
        &self,
        statements: Vec<Statement>,
        mode: QueryMode,
    ) -> Result<Vec<Vec<QueryRecord>>>;

    /// Convenience for a write set whose results are not needed.
    async fn execute_batch(&self, statements: Vec<Statement>) -> Result<()> {
        self.execute_in_transaction(statements, QueryMode::Write)
            .await?;
        Ok(())
    }

    /// Connectivity probe; never raises.
    async fn health_check(&self) -> bool;
}

/// Declarative filter for seeding a subgraph extraction.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SeedCriterion {
    /// Criterion name, echoed into the extraction output
    pub name: String,
    /// Floor on `confidence_overall_avg`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_avg_confidence: Option<f64>,
    /// Floor on `metadata_impact_score`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_impact_score: Option<f64>,
    /// Allowed node type labels; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_types: Vec<NodeType>,
    /// Tags the node must carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_tags: Vec<String>,
    /// Tags the node must not carry
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forbidden_tags: Vec<String>,
    /// Restrict to these layers; empty means all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub layer_ids: Vec<String>,
    /// Filter on the knowledge-gap flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_knowledge_gap: Option<bool>,
}

impl SeedCriterion {
    /// Render the criterion as a parameterized WHERE clause over `node_var`.
    ///
    /// Labels cannot be parameterized in the query language, so the type
    /// allow-list is inlined from the closed enum; everything else binds
    /// through parameters.
    #[must_use]
    pub fn to_where_clause(&self, node_var: &str) -> (String, Map<String, Value>) {
        let mut conditions = Vec::new();
        let mut params = Map::new();

        if let Some(min_conf) = self.min_avg_confidence {
            conditions.push(format!(
                "coalesce({node_var}.confidence_overall_avg, 0.0) >= $min_avg_confidence"
            ));
            params.insert("min_avg_confidence".to_string(), json!(min_conf));
        }
        if let Some(min_impact) = self.min_impact_score {
            conditions.push(format!(
                "coalesce({node_var}.metadata_impact_score, 0.0) >= $min_impact_score"
            ));
            params.insert("min_impact_score".to_string(), json!(min_impact));
        }
        if !self.allowed_types.is_empty() {
            let labels = self
                .allowed_types
                .iter()
                .map(|t| format!("{node_var}:{}", t.label()))
                .collect::<Vec<_>>()
                .join(" OR ");
            conditions.push(format!("({labels})"));
        }
        for (i, tag) in self.required_tags.iter().enumerate() {
            let key = format!("required_tag_{i}");
            conditions.push(format!(
                "coalesce({node_var}.metadata_disciplinary_tags, '') CONTAINS ${key}"
            ));
            params.insert(key, json!(tag));
        }
        for (i, tag) in self.forbidden_tags.iter().enumerate() {
            let key = format!("forbidden_tag_{i}");
            conditions.push(format!(
                "NOT coalesce({node_var}.metadata_disciplinary_tags, '') CONTAINS ${key}"
            ));
            params.insert(key, json!(tag));
        }
        if !self.layer_ids.is_empty() {
            conditions.push(format!("{node_var}.metadata_layer_id IN $layer_ids"));
            params.insert("layer_ids".to_string(), json!(self.layer_ids));
        }
        if let Some(gap) = self.is_knowledge_gap {
            conditions.push(format!(
                "coalesce({node_var}.metadata_is_knowledge_gap, false) = $is_knowledge_gap"
            ));
            params.insert("is_knowledge_gap".to_string(), json!(gap));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}
