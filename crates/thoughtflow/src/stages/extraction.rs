//! Subgraph extraction stage: pull out the regions of the graph worth
//! composing over.
//!
//! An ordered list of criteria (caller-supplied when well-formed, otherwise
//! the configured defaults) seeds each extraction; seeds are expanded through
//! the store's path-subgraph procedure and the induced edge set between the
//! returned nodes is retained. Empty subgraphs are dropped.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::core::types::NodeType;
use crate::repository::{GraphRepository, QueryMode, SeedCriterion};
use crate::stage::{Stage, StageOutput};

const STAGE_NAME: &str = "subgraph_extraction";
const SEED_LIMIT: usize = 100;

const EXPANSION_QUERY: &str = "\
MATCH (seed:Node) WHERE seed.id IN $seed_ids
CALL apoc.path.subgraphNodes(seed, {maxLevel: $max_level}) YIELD node
RETURN DISTINCT node.id AS id, labels(node) AS labels, properties(node) AS props";

const INDUCED_EDGES_QUERY: &str = "\
MATCH (a:Node)-[r]->(b:Node)
WHERE a.id IN $node_ids AND b.id IN $node_ids
RETURN r.id AS id, type(r) AS type, a.id AS start, b.id AS end, properties(r) AS props";

/// One extracted subgraph in wire form.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExtractedSubgraphData {
    /// Criterion name that produced this subgraph
    pub name: String,
    /// How many seeds matched the criterion
    pub seed_count: usize,
    /// `{id, labels, properties}` records
    pub nodes: Vec<Value>,
    /// `{id, type, start, end, properties}` records
    pub edges: Vec<Value>,
}

/// Extracts criterion-driven subgraphs for composition.
pub struct SubgraphExtractionStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
}

impl SubgraphExtractionStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    fn default_criteria(&self) -> Vec<SeedCriterion> {
        let defaults = &self.settings.defaults;
        vec![
            SeedCriterion {
                name: "high_confidence_core".to_string(),
                min_avg_confidence: Some(defaults.high_confidence_threshold),
                min_impact_score: Some(defaults.high_impact_threshold),
                ..Default::default()
            },
            SeedCriterion {
                name: "key_hypotheses_and_support".to_string(),
                min_avg_confidence: Some(defaults.subgraph_min_confidence_threshold),
                min_impact_score: Some(defaults.subgraph_min_impact_threshold),
                allowed_types: vec![
                    NodeType::Hypothesis,
                    NodeType::Evidence,
                    NodeType::InterdisciplinaryBridge,
                ],
                ..Default::default()
            },
            SeedCriterion {
                name: "knowledge_gaps_focus".to_string(),
                is_knowledge_gap: Some(true),
                allowed_types: vec![
                    NodeType::PlaceholderGap,
                    NodeType::Hypothesis,
                    NodeType::ResearchQuestion,
                ],
                ..Default::default()
            },
        ]
    }

    /// Caller-supplied criteria when every entry parses and carries a name;
    /// any parse failure falls back to the defaults.
    fn resolve_criteria(&self, session: &Session) -> Vec<SeedCriterion> {
        let Some(raw) = session.operational_param("subgraph_extraction_criteria") else {
            return self.default_criteria();
        };
        match serde_json::from_value::<Vec<SeedCriterion>>(raw.clone()) {
            Ok(criteria)
                if !criteria.is_empty() && criteria.iter().all(|c| !c.name.trim().is_empty()) =>
            {
                criteria
            }
            Ok(_) => {
                warn!("custom extraction criteria missing names; using defaults");
                self.default_criteria()
            }
            Err(e) => {
                warn!(error = %e, "failed to parse custom extraction criteria; using defaults");
                self.default_criteria()
            }
        }
    }

    async fn seed_ids(&self, criterion: &SeedCriterion) -> Result<Vec<String>> {
        let (clause, params) = criterion.to_where_clause("n");
        let query = format!("MATCH (n:Node) {clause} RETURN n.id AS id LIMIT {SEED_LIMIT}");
        let records = self
            .repo
            .execute_query(&query, params, QueryMode::Read)
            .await?;
        Ok(records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    async fn extract(&self, criterion: &SeedCriterion) -> Result<ExtractedSubgraphData> {
        let seeds = self.seed_ids(criterion).await?;
        if seeds.is_empty() {
            return Ok(ExtractedSubgraphData {
                name: criterion.name.clone(),
                seed_count: 0,
                nodes: Vec::new(),
                edges: Vec::new(),
            });
        }

        let mut params = Map::new();
        params.insert("seed_ids".to_string(), json!(seeds));
        params.insert(
            "max_level".to_string(),
            json!(self.settings.defaults.include_neighbors_depth),
        );
        let node_records = self
            .repo
            .execute_query(EXPANSION_QUERY, params, QueryMode::Read)
            .await?;

        let node_ids: Vec<String> = node_records
            .iter()
            .filter_map(|r| r.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();

        let edges = if node_ids.is_empty() {
            Vec::new()
        } else {
            let mut params = Map::new();
            params.insert("node_ids".to_string(), json!(node_ids));
            self.repo
                .execute_query(INDUCED_EDGES_QUERY, params, QueryMode::Read)
                .await?
                .into_iter()
                .map(Value::Object)
                .collect()
        };

        Ok(ExtractedSubgraphData {
            name: criterion.name.clone(),
            seed_count: seeds.len(),
            nodes: node_records.into_iter().map(Value::Object).collect(),
            edges,
        })
    }
}

#[async_trait]
impl Stage for SubgraphExtractionStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        let criteria = self.resolve_criteria(session);

        let mut subgraphs = Vec::new();
        for criterion in &criteria {
            let extracted = self.extract(criterion).await?;
            if extracted.nodes.is_empty() {
                debug!(criterion = %criterion.name, "criterion produced an empty subgraph");
                continue;
            }
            subgraphs.push(extracted);
        }

        info!(
            criteria = criteria.len(),
            subgraphs = subgraphs.len(),
            "subgraph extraction finished"
        );

        let payload: Vec<Value> = subgraphs
            .iter()
            .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
            .collect();

        Ok(StageOutput::success(format!(
            "Extracted {} non-empty subgraphs from {} criteria",
            subgraphs.len(),
            criteria.len()
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "subgraphs": payload,
                "subgraph_count": subgraphs.len(),
            }),
        )
        .with_metrics(json!({"subgraphs": subgraphs.len()})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::confidence::ConfidenceVector;
    use crate::core::types::{EdgeType, GraphEdge, GraphNode};
    use crate::stages::graph_ops;
    use crate::stages::testing::MockRepo;

    fn stage(repo: &Arc<MockRepo>) -> SubgraphExtractionStage {
        SubgraphExtractionStage::new(
            Arc::clone(repo) as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
        )
    }

    async fn seed_graph(repo: &Arc<MockRepo>) -> (GraphNode, GraphNode) {
        let mut strong = GraphNode::new(NodeType::Hypothesis, "strong hypothesis");
        strong.confidence = ConfidenceVector::uniform(0.9);
        strong.metadata.impact_score = 0.9;
        let mut neighbor = GraphNode::new(NodeType::Evidence, "supporting evidence");
        neighbor.confidence = ConfidenceVector::uniform(0.3);
        neighbor.metadata.impact_score = 0.3;
        graph_ops::upsert_nodes(
            repo.as_ref() as &dyn GraphRepository,
            &[strong.clone(), neighbor.clone()],
        )
        .await
        .unwrap();
        let edge = GraphEdge::new(EdgeType::Supportive, &neighbor.id, &strong.id, 0.8);
        graph_ops::upsert_edges(repo.as_ref() as &dyn GraphRepository, &[edge])
            .await
            .unwrap();
        (strong, neighbor)
    }

    #[tokio::test]
    async fn test_extraction_expands_seed_neighborhood() {
        let repo = Arc::new(MockRepo::new());
        let (strong, neighbor) = seed_graph(&repo).await;

        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert!(output.success);

        let subgraphs = output.context_update[STAGE_NAME]["subgraphs"]
            .as_array()
            .unwrap()
            .clone();
        // empty criteria are dropped; the high-confidence core must be there
        let core = subgraphs
            .iter()
            .find(|s| s["name"] == "high_confidence_core")
            .expect("high confidence core subgraph");
        let ids: Vec<&str> = core["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&strong.id.as_str()));
        // depth-1 expansion pulls the weak neighbor in
        assert!(ids.contains(&neighbor.id.as_str()));
        // the induced edge between them is retained
        assert_eq!(core["edges"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_store_emits_no_subgraphs() {
        let repo = Arc::new(MockRepo::new());
        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert_eq!(output.context_update[STAGE_NAME]["subgraph_count"], json!(0));
    }

    #[tokio::test]
    async fn test_custom_criteria_used_when_well_formed() {
        let repo = Arc::new(MockRepo::new());
        seed_graph(&repo).await;

        let mut params = Map::new();
        params.insert(
            "subgraph_extraction_criteria".to_string(),
            json!([{"name": "everything"}]),
        );
        let mut session = Session::new("q").with_operational_params(params);
        let output = stage(&repo).execute(&mut session).await.unwrap();

        let subgraphs = output.context_update[STAGE_NAME]["subgraphs"]
            .as_array()
            .unwrap()
            .clone();
        assert_eq!(subgraphs.len(), 1);
        assert_eq!(subgraphs[0]["name"], "everything");
        assert_eq!(subgraphs[0]["nodes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_criteria_fall_back_to_defaults() {
        let repo = Arc::new(MockRepo::new());
        seed_graph(&repo).await;

        let mut params = Map::new();
        params.insert(
            "subgraph_extraction_criteria".to_string(),
            json!("not an array"),
        );
        let mut session = Session::new("q").with_operational_params(params);
        let output = stage(&repo).execute(&mut session).await.unwrap();

        let subgraphs = output.context_update[STAGE_NAME]["subgraphs"]
            .as_array()
            .unwrap()
            .clone();
        assert!(subgraphs
            .iter()
            .any(|s| s["name"] == "high_confidence_core"));
    }
}
