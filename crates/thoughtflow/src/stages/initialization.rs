//! Initialization stage: locate or create the ROOT node for the query.
//!
//! The graph is a durable knowledge base shared across queries: a prior root
//! for the verbatim query is reused, and its tag set only ever grows by
//! union. A fresh root starts as an assumption with the configured initial
//! confidence.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::core::confidence::ConfidenceVector;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::core::types::{EpistemicStatus, GraphNode, NodeType};
use crate::repository::{GraphRepository, QueryMode};
use crate::stage::{Stage, StageOutput};
use crate::stages::graph_ops;

const STAGE_NAME: &str = "initialization";

/// Locates or creates the session's ROOT node.
pub struct InitializationStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
}

impl InitializationStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    fn provided_tags(session: &Session) -> Vec<String> {
        session
            .operational_param("initial_disciplinary_tags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn find_existing_root(&self, query: &str) -> Result<Option<GraphNode>> {
        let mut params = Map::new();
        params.insert("query".to_string(), json!(query));
        let records = self
            .repo
            .execute_query(
                "MATCH (n:ROOT) WHERE n.metadata_query_context = $query \
                 RETURN properties(n) AS props, labels(n) AS labels LIMIT 1",
                params,
                QueryMode::Read,
            )
            .await?;
        records.first().map(graph_ops::node_from_record).transpose()
    }

    async fn update_root_tags(&self, root_id: &str, tags_wire: &str) -> Result<()> {
        let mut params = Map::new();
        params.insert("id".to_string(), json!(root_id));
        params.insert("tags".to_string(), json!(tags_wire));
        params.insert("now".to_string(), json!(Utc::now().to_rfc3339()));
        self.repo
            .execute_query(
                "MATCH (n:ROOT {id: $id}) \
                 SET n.metadata_disciplinary_tags = $tags, n.updated_at = $now",
                params,
                QueryMode::Write,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Stage for InitializationStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        if session.query.trim().is_empty() {
            return Ok(StageOutput::failure(
                "Initialization rejected the query",
                "Invalid initial query. It must be a non-empty string.",
            ));
        }
        let query = session.query.clone();
        let provided_tags = Self::provided_tags(session);

        if let Some(existing) = self.find_existing_root(&query).await? {
            debug!(root_id = %existing.id, "reusing existing root node");

            let before: BTreeSet<String> =
                existing.metadata.disciplinary_tags.iter().cloned().collect();
            let mut after = before.clone();
            after.extend(provided_tags.iter().cloned());

            let updated_tags = after != before;
            if updated_tags {
                let wire = after.iter().cloned().collect::<Vec<_>>().join(",");
                self.update_root_tags(&existing.id, &wire).await?;
                info!(root_id = %existing.id, "enlarged root tag set");
            }

            let output = StageOutput::success(format!(
                "Reused root node {} for the query",
                existing.id
            ))
            .with_slot(
                STAGE_NAME,
                json!({
                    "root_node_id": existing.id,
                    "initial_disciplinary_tags": after.iter().cloned().collect::<Vec<_>>(),
                    "used_existing_node": true,
                    "updated_existing_node_tags": updated_tags,
                    "nodes_created_in_store": 0,
                }),
            )
            .with_metrics(json!({"nodes_created": 0, "reused_root": true}));
            return Ok(output);
        }

        let tags = if provided_tags.is_empty() {
            self.settings.defaults.default_disciplinary_tags.clone()
        } else {
            provided_tags
        };
        let layer = session
            .operational_param("initial_layer")
            .and_then(Value::as_str)
            .map_or_else(|| self.settings.defaults.initial_layer.clone(), str::to_string);

        let mut root = GraphNode::new(NodeType::Root, format!("Root: {query}"));
        root.confidence = ConfidenceVector::from_components(
            &self.settings.defaults.initial_confidence,
        )?;
        root.metadata.query_context = Some(query.clone());
        root.metadata.description = Some(format!("Root reasoning node for the query: {query}"));
        root.metadata.epistemic_status = EpistemicStatus::Assumption;
        root.metadata.impact_score = 0.9;
        root.metadata.layer_id = Some(layer);
        root.metadata.disciplinary_tags = tags.clone();

        let root_id = root.id.clone();
        graph_ops::upsert_nodes(self.repo.as_ref(), &[root]).await?;

        // The whole flow must leave a root behind; read it back to be sure.
        let persisted = graph_ops::fetch_node(self.repo.as_ref(), &root_id).await?;
        if persisted.is_none() {
            return Err(crate::core::error::Error::store(
                "root node missing after initialization",
            ));
        }
        info!(root_id = %root_id, "created root node");

        Ok(StageOutput::success(format!("Created root node {root_id}"))
            .with_slot(
                STAGE_NAME,
                json!({
                    "root_node_id": root_id,
                    "initial_disciplinary_tags": tags,
                    "used_existing_node": false,
                    "updated_existing_node_tags": false,
                    "nodes_created_in_store": 1,
                }),
            )
            .with_metrics(json!({"nodes_created": 1, "reused_root": false})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::MockRepo;

    fn stage(repo: Arc<MockRepo>) -> InitializationStage {
        InitializationStage::new(repo, Arc::new(Settings::default()))
    }

    #[tokio::test]
    async fn test_empty_query_fails_without_store_writes() {
        let repo = Arc::new(MockRepo::new());
        let mut session = Session::new("");
        let output = stage(Arc::clone(&repo)).execute(&mut session).await.unwrap();
        assert!(!output.success);
        assert_eq!(
            output.error_message.as_deref(),
            Some("Invalid initial query. It must be a non-empty string.")
        );
        assert_eq!(repo.write_count(), 0);
    }

    #[tokio::test]
    async fn test_cold_start_creates_root() {
        let repo = Arc::new(MockRepo::new());
        let mut session = Session::new("Analyze the relationship between microbiome diversity and cancer progression.");
        let output = stage(Arc::clone(&repo)).execute(&mut session).await.unwrap();
        assert!(output.success);

        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["used_existing_node"], json!(false));
        assert_eq!(slot["nodes_created_in_store"], json!(1));
        let root_id = slot["root_node_id"].as_str().unwrap();
        assert_eq!(repo.nodes_with_label("ROOT").len(), 1);
        assert!(repo.node(root_id).is_some());
    }

    #[tokio::test]
    async fn test_warm_start_reuses_root_without_tag_update() {
        let repo = Arc::new(MockRepo::new());
        let query = "same query";

        let mut first = Session::new(query);
        stage(Arc::clone(&repo)).execute(&mut first).await.unwrap();

        let mut second = Session::new(query);
        let output = stage(Arc::clone(&repo)).execute(&mut second).await.unwrap();
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["used_existing_node"], json!(true));
        assert_eq!(slot["updated_existing_node_tags"], json!(false));
        assert_eq!(slot["nodes_created_in_store"], json!(0));
        assert_eq!(repo.nodes_with_label("ROOT").len(), 1);
    }

    #[tokio::test]
    async fn test_tag_enlargement_unions_sets() {
        let repo = Arc::new(MockRepo::new());
        let query = "tagged query";

        let mut params = Map::new();
        params.insert("initial_disciplinary_tags".to_string(), json!(["oncology"]));
        let mut first = Session::new(query).with_operational_params(params);
        stage(Arc::clone(&repo)).execute(&mut first).await.unwrap();

        let mut params = Map::new();
        params.insert("initial_disciplinary_tags".to_string(), json!(["genomics"]));
        let mut second = Session::new(query).with_operational_params(params);
        let output = stage(Arc::clone(&repo)).execute(&mut second).await.unwrap();

        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["updated_existing_node_tags"], json!(true));
        let tags: Vec<String> = slot["initial_disciplinary_tags"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t.as_str().unwrap().to_string())
            .collect();
        assert_eq!(tags, vec!["genomics".to_string(), "oncology".to_string()]);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let repo = Arc::new(MockRepo::new());
        repo.fail_next("store unavailable");
        let mut session = Session::new("q");
        let result = stage(repo).execute(&mut session).await;
        assert!(result.is_err());
    }
}
