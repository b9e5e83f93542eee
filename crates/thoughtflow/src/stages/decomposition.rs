//! Decomposition stage: fan the root out into dimension nodes.
//!
//! Dimension ids are deterministic (`dim-<root>-<slug>`), so re-running the
//! stage upserts the same nodes instead of duplicating them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::core::confidence::ConfidenceVector;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::core::types::{EdgeType, EpistemicStatus, GraphEdge, GraphNode, NodeType};
use crate::repository::GraphRepository;
use crate::stage::{Stage, StageOutput};
use crate::stages::graph_ops;

const STAGE_NAME: &str = "decomposition";

/// Creates one DECOMPOSITION_DIMENSION node per dimension and links each to
/// the root.
pub struct DecompositionStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
}

impl DecompositionStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    /// Dimensions from operational params when well-formed (a non-empty array
    /// of non-empty strings), else the configured defaults.
    fn resolve_dimensions(&self, session: &Session) -> Vec<String> {
        if let Some(value) = session.operational_param("decomposition_dimensions") {
            if let Some(entries) = value.as_array() {
                let dims: Vec<String> = entries
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect();
                if !dims.is_empty() && dims.len() == entries.len() {
                    return dims;
                }
            }
            warn!("ignoring malformed decomposition_dimensions override");
        }
        self.settings.defaults.default_decomposition_dimensions.clone()
    }

    fn slug(dimension: &str) -> String {
        dimension
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect()
    }
}

#[async_trait]
impl Stage for DecompositionStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        let Some(root_id) = session
            .stage_slot("initialization")
            .and_then(|slot| slot.get("root_node_id"))
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            return Ok(StageOutput::failure(
                "Decomposition found no root node id",
                "initialization did not provide a root node id",
            ));
        };

        let Some(root) = graph_ops::fetch_node(self.repo.as_ref(), &root_id).await? else {
            return Ok(StageOutput::failure(
                "Decomposition found no root node",
                format!("root node {root_id} does not exist in the store"),
            ));
        };

        let dimensions = self.resolve_dimensions(session);
        let dimension_confidence =
            ConfidenceVector::from_components(&self.settings.defaults.dimension_confidence)?;

        let mut nodes = Vec::with_capacity(dimensions.len());
        let mut edges = Vec::with_capacity(dimensions.len());
        for dimension in &dimensions {
            let dim_id = format!("dim-{}-{}", root.id, Self::slug(dimension));
            let mut node = GraphNode::new(NodeType::DecompositionDimension, dimension.clone());
            node.id = dim_id.clone();
            node.confidence = dimension_confidence;
            node.metadata.description = Some(format!(
                "Dimension '{dimension}' of the query: {}",
                session.query
            ));
            node.metadata.query_context = Some(session.query.clone());
            node.metadata.epistemic_status = EpistemicStatus::Inferred;
            node.metadata.impact_score = 0.7;
            node.metadata.disciplinary_tags = root.metadata.disciplinary_tags.clone();
            node.metadata.layer_id = root.metadata.layer_id.clone();
            nodes.push(node);

            let mut edge = GraphEdge::new(EdgeType::DecompositionOf, dim_id.clone(), root.id.clone(), 0.95);
            edge.id = format!("edge-decomp-{dim_id}");
            edge.description = Some(format!("'{dimension}' decomposes the root question"));
            edges.push(edge);
        }

        // Node batch first; the relationship batch relies on its success.
        graph_ops::upsert_nodes(self.repo.as_ref(), &nodes).await?;
        graph_ops::upsert_edges(self.repo.as_ref(), &edges).await?;

        let dimension_node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let decomposition_results: Vec<Value> = nodes
            .iter()
            .map(|n| json!({"id": n.id, "label": n.label}))
            .collect();
        info!(count = dimensions.len(), "decomposed query into dimensions");

        Ok(StageOutput::success(format!(
            "Decomposed the query into {} dimensions",
            dimensions.len()
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "dimension_node_ids": dimension_node_ids,
                "decomposition_results": decomposition_results,
            }),
        )
        .with_metrics(json!({
            "nodes_created": nodes.len(),
            "edges_created": edges.len(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::initialization::InitializationStage;
    use crate::stages::testing::MockRepo;
    use serde_json::Map;

    async fn initialized_session(repo: &Arc<MockRepo>) -> Session {
        let settings = Arc::new(Settings::default());
        let mut session = Session::new("how does sleep affect memory consolidation");
        let init = InitializationStage::new(Arc::clone(repo) as Arc<dyn GraphRepository>, settings);
        let output = init.execute(&mut session).await.unwrap();
        session.merge_context_update(output.context_update);
        session
    }

    fn stage(repo: &Arc<MockRepo>) -> DecompositionStage {
        DecompositionStage::new(
            Arc::clone(repo) as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
        )
    }

    #[tokio::test]
    async fn test_creates_default_dimensions_with_edges() {
        let repo = Arc::new(MockRepo::new());
        let mut session = initialized_session(&repo).await;
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert!(output.success);

        let defaults = Settings::default().defaults.default_decomposition_dimensions;
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(
            slot["dimension_node_ids"].as_array().unwrap().len(),
            defaults.len()
        );
        assert_eq!(
            repo.nodes_with_label("DECOMPOSITION_DIMENSION").len(),
            defaults.len()
        );
        assert_eq!(repo.edges_of_type("DECOMPOSITION_OF").len(), defaults.len());
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let repo = Arc::new(MockRepo::new());
        let mut session = initialized_session(&repo).await;
        let stage = stage(&repo);
        stage.execute(&mut session).await.unwrap();
        let before = repo.nodes_with_label("DECOMPOSITION_DIMENSION").len();
        stage.execute(&mut session).await.unwrap();
        assert_eq!(repo.nodes_with_label("DECOMPOSITION_DIMENSION").len(), before);
    }

    #[tokio::test]
    async fn test_custom_dimensions_override_defaults() {
        let repo = Arc::new(MockRepo::new());
        let settings = Arc::new(Settings::default());
        let mut params = Map::new();
        params.insert(
            "decomposition_dimensions".to_string(),
            json!(["Mechanisms", "Interventions"]),
        );
        let mut session = Session::new("q").with_operational_params(params);
        let init =
            InitializationStage::new(Arc::clone(&repo) as Arc<dyn GraphRepository>, settings);
        let output = init.execute(&mut session).await.unwrap();
        session.merge_context_update(output.context_update);

        let output = stage(&repo).execute(&mut session).await.unwrap();
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["dimension_node_ids"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_override_falls_back() {
        let repo = Arc::new(MockRepo::new());
        let mut params = Map::new();
        params.insert("decomposition_dimensions".to_string(), json!([1, 2, 3]));
        let mut session = Session::new("q").with_operational_params(params);
        let init = InitializationStage::new(
            Arc::clone(&repo) as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
        );
        let output = init.execute(&mut session).await.unwrap();
        session.merge_context_update(output.context_update);

        let output = stage(&repo).execute(&mut session).await.unwrap();
        let defaults = Settings::default().defaults.default_decomposition_dimensions;
        assert_eq!(
            output.context_update[STAGE_NAME]["dimension_node_ids"]
                .as_array()
                .unwrap()
                .len(),
            defaults.len()
        );
    }

    #[tokio::test]
    async fn test_missing_root_slot_fails_gracefully() {
        let repo = Arc::new(MockRepo::new());
        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert!(!output.success);
        assert!(output.error_message.unwrap().contains("root node id"));
    }
}
