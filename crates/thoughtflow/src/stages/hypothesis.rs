//! Hypothesis stage: generate testable propositions for each dimension.
//!
//! Counts, plan types, bias flags, and impact scores are drawn from the
//! session's RNG, so a seeded session generates the same hypotheses (ids
//! included) on every run.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::core::confidence::ConfidenceVector;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::core::types::{
    BiasFlag, BiasSeverity, EdgeType, EpistemicStatus, FalsificationCriteria, GraphEdge,
    GraphNode, NodeType, Plan,
};
use crate::repository::GraphRepository;
use crate::stage::{Stage, StageOutput};
use crate::stages::graph_ops;

const STAGE_NAME: &str = "hypothesis";

const BIAS_TYPES: [&str; 3] = ["confirmation_bias", "selection_bias", "publication_bias"];
const BIAS_PROBABILITY: f64 = 0.15;
const PLAN_RESOURCES: [&str; 4] = [
    "domain expertise",
    "literature access",
    "compute time",
    "annotated datasets",
];

/// Generates hypotheses for every decomposition dimension.
pub struct HypothesisStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
}

impl HypothesisStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    fn count_bounds(&self, session: &Session) -> (u32, u32) {
        let defaults = self.settings.defaults.hypotheses_per_dimension;
        let min = session
            .operational_param("hypotheses_per_dimension_min")
            .and_then(Value::as_u64)
            .map_or(defaults.min, |v| v as u32)
            .max(1);
        let max = session
            .operational_param("hypotheses_per_dimension_max")
            .and_then(Value::as_u64)
            .map_or(defaults.max, |v| v as u32)
            .max(min);
        (min, max)
    }

    fn generate_for_dimension(
        &self,
        session: &mut Session,
        dimension: &GraphNode,
        count: u32,
    ) -> (Vec<GraphNode>, Vec<GraphEdge>) {
        let query = session.query.clone();
        let hypothesis_confidence = ConfidenceVector::from_components(
            &self.settings.defaults.hypothesis_confidence,
        )
        .unwrap_or_default();
        let plan_types = &self.settings.defaults.default_plan_types;
        let config_tags = &self.settings.defaults.default_disciplinary_tags;

        let mut nodes = Vec::with_capacity(count as usize);
        let mut edges = Vec::with_capacity(count as usize);
        for index in 0..count {
            let rng = session.rng();
            let hyp_id = format!("hyp-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>());
            let label = format!(
                "Hypothesis {} on {}: a testable proposition about '{}'",
                index + 1,
                dimension.label,
                query
            );

            let plan_type = if plan_types.is_empty() {
                "literature_review".to_string()
            } else {
                plan_types[rng.gen_range(0..plan_types.len())].clone()
            };
            let resource = PLAN_RESOURCES[rng.gen_range(0..PLAN_RESOURCES.len())].to_string();
            let plan = Plan {
                plan_type,
                estimated_cost: rng.gen_range(0.2..=0.8),
                estimated_duration: rng.gen_range(1.0..=5.0),
                required_resources: vec![resource],
                query: Some(format!("{} {}", dimension.label, query)),
            };

            let falsification = FalsificationCriteria {
                description: format!(
                    "Conditions under which hypothesis {} on {} would be rejected",
                    index + 1,
                    dimension.label
                ),
                testable_conditions: vec![
                    format!(
                        "A controlled comparison shows no effect along '{}'",
                        dimension.label
                    ),
                    format!(
                        "Replication across independent datasets contradicts the proposed link for '{}'",
                        dimension.label
                    ),
                ],
            };

            let bias_flags = if rng.gen_bool(BIAS_PROBABILITY) {
                let bias_type = BIAS_TYPES[rng.gen_range(0..BIAS_TYPES.len())];
                let severity = if rng.gen_bool(0.5) {
                    BiasSeverity::Low
                } else {
                    BiasSeverity::Medium
                };
                vec![BiasFlag {
                    bias_type: bias_type.to_string(),
                    description: format!("Potential {bias_type} in framing this hypothesis"),
                    severity,
                }]
            } else {
                Vec::new()
            };

            let impact = rng.gen_range(0.2..=0.9);
            let subset: Vec<String> = {
                let rng = session.rng();
                config_tags
                    .iter()
                    .filter(|_| rng.gen_bool(0.5))
                    .cloned()
                    .collect()
            };
            let mut tags: BTreeSet<String> = subset.into_iter().collect();
            tags.extend(dimension.metadata.disciplinary_tags.iter().cloned());

            let mut node = GraphNode::new(NodeType::Hypothesis, label);
            node.id = hyp_id.clone();
            node.confidence = hypothesis_confidence;
            node.metadata.description = Some(format!(
                "Generated for dimension '{}' of the query",
                dimension.label
            ));
            node.metadata.query_context = Some(query.clone());
            node.metadata.epistemic_status = EpistemicStatus::Hypothesis;
            node.metadata.impact_score = impact;
            node.metadata.disciplinary_tags = tags.into_iter().collect();
            node.metadata.layer_id = dimension.metadata.layer_id.clone();
            node.metadata.plan = Some(plan);
            node.metadata.falsification_criteria = Some(falsification);
            node.metadata.bias_flags = bias_flags;
            nodes.push(node);

            let mut edge =
                GraphEdge::new(EdgeType::GeneratesHypothesis, dimension.id.clone(), hyp_id.clone(), 0.95);
            edge.id = format!("edge-genhyp-{hyp_id}");
            edges.push(edge);
        }
        (nodes, edges)
    }
}

#[async_trait]
impl Stage for HypothesisStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        let dimension_ids: Vec<String> = session
            .stage_slot("decomposition")
            .and_then(|slot| slot.get("dimension_node_ids"))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if dimension_ids.is_empty() {
            return Ok(StageOutput::failure(
                "Hypothesis generation found no dimensions",
                "decomposition did not provide dimension node ids",
            ));
        }

        let dimensions = graph_ops::fetch_nodes(self.repo.as_ref(), &dimension_ids).await?;
        let (k_min, k_max) = self.count_bounds(session);

        let mut all_nodes = Vec::new();
        let mut all_edges = Vec::new();
        let mut per_dimension = Vec::new();
        for dimension in &dimensions {
            let count = session.rng().gen_range(k_min..=k_max);
            let (nodes, edges) = self.generate_for_dimension(session, dimension, count);
            per_dimension.push(json!({
                "dimension_id": dimension.id,
                "hypothesis_ids": nodes.iter().map(|n| n.id.clone()).collect::<Vec<_>>(),
            }));
            all_nodes.extend(nodes);
            all_edges.extend(edges);
        }

        // One batched upsert for the hypotheses, one for their edges.
        graph_ops::upsert_nodes(self.repo.as_ref(), &all_nodes).await?;
        graph_ops::upsert_edges(self.repo.as_ref(), &all_edges).await?;

        let hypothesis_node_ids: Vec<String> = all_nodes.iter().map(|n| n.id.clone()).collect();
        info!(
            hypotheses = hypothesis_node_ids.len(),
            dimensions = dimensions.len(),
            "generated hypotheses"
        );

        Ok(StageOutput::success(format!(
            "Generated {} hypotheses across {} dimensions",
            hypothesis_node_ids.len(),
            dimensions.len()
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "hypothesis_node_ids": hypothesis_node_ids,
                "hypotheses_results": per_dimension,
            }),
        )
        .with_metrics(json!({
            "nodes_created": all_nodes.len(),
            "edges_created": all_edges.len(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::decomposition::DecompositionStage;
    use crate::stages::initialization::InitializationStage;
    use crate::stages::testing::MockRepo;
    use serde_json::Map;

    async fn prepared_session(repo: &Arc<MockRepo>, seed: Option<u64>) -> Session {
        let settings = Arc::new(Settings::default());
        let mut session = match seed {
            Some(seed) => {
                let mut params = Map::new();
                params.insert("random_seed".to_string(), json!(seed));
                Session::new("what drives coral bleaching").with_operational_params(params)
            }
            None => Session::new("what drives coral bleaching"),
        };
        for stage in [
            Box::new(InitializationStage::new(
                Arc::clone(repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )) as Box<dyn Stage>,
            Box::new(DecompositionStage::new(
                Arc::clone(repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )),
        ] {
            let output = stage.execute(&mut session).await.unwrap();
            session.merge_context_update(output.context_update);
        }
        session
    }

    fn stage(repo: &Arc<MockRepo>) -> HypothesisStage {
        HypothesisStage::new(
            Arc::clone(repo) as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
        )
    }

    #[tokio::test]
    async fn test_generates_within_bounds() {
        let repo = Arc::new(MockRepo::new());
        let mut session = prepared_session(&repo, Some(3)).await;
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert!(output.success);

        let defaults = Settings::default().defaults;
        let dims = defaults.default_decomposition_dimensions.len();
        let bounds = defaults.hypotheses_per_dimension;
        let count = output.context_update[STAGE_NAME]["hypothesis_node_ids"]
            .as_array()
            .unwrap()
            .len();
        assert!(count >= dims * bounds.min as usize);
        assert!(count <= dims * bounds.max as usize);
        assert_eq!(repo.nodes_with_label("HYPOTHESIS").len(), count);
        assert_eq!(repo.edges_of_type("GENERATES_HYPOTHESIS").len(), count);
    }

    #[tokio::test]
    async fn test_seeded_generation_is_reproducible() {
        let repo_a = Arc::new(MockRepo::new());
        let mut session_a = prepared_session(&repo_a, Some(99)).await;
        let out_a = stage(&repo_a).execute(&mut session_a).await.unwrap();

        let repo_b = Arc::new(MockRepo::new());
        let mut session_b = prepared_session(&repo_b, Some(99)).await;
        let out_b = stage(&repo_b).execute(&mut session_b).await.unwrap();

        assert_eq!(
            out_a.context_update[STAGE_NAME]["hypothesis_node_ids"],
            out_b.context_update[STAGE_NAME]["hypothesis_node_ids"]
        );
    }

    #[tokio::test]
    async fn test_hypotheses_carry_plans_and_falsification() {
        let repo = Arc::new(MockRepo::new());
        let mut session = prepared_session(&repo, Some(5)).await;
        stage(&repo).execute(&mut session).await.unwrap();

        for node in repo.nodes_with_label("HYPOTHESIS") {
            let plan: Plan = serde_json::from_str(
                node.props["metadata_plan"].as_str().unwrap(),
            )
            .unwrap();
            assert!((0.2..=0.8).contains(&plan.estimated_cost));
            assert!((1.0..=5.0).contains(&plan.estimated_duration));
            assert!(plan.query.is_some());

            let fc: FalsificationCriteria = serde_json::from_str(
                node.props["metadata_falsification_criteria"].as_str().unwrap(),
            )
            .unwrap();
            assert_eq!(fc.testable_conditions.len(), 2);

            let impact = node.props["metadata_impact_score"].as_f64().unwrap();
            assert!((0.2..=0.9).contains(&impact));
        }
    }

    #[tokio::test]
    async fn test_operational_bounds_override() {
        let repo = Arc::new(MockRepo::new());
        let settings = Arc::new(Settings::default());
        let mut params = Map::new();
        params.insert("random_seed".to_string(), json!(11));
        params.insert("hypotheses_per_dimension_min".to_string(), json!(1));
        params.insert("hypotheses_per_dimension_max".to_string(), json!(1));
        let mut session = Session::new("q").with_operational_params(params);
        for stage_box in [
            Box::new(InitializationStage::new(
                Arc::clone(&repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )) as Box<dyn Stage>,
            Box::new(DecompositionStage::new(
                Arc::clone(&repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )),
        ] {
            let output = stage_box.execute(&mut session).await.unwrap();
            session.merge_context_update(output.context_update);
        }

        let output = stage(&repo).execute(&mut session).await.unwrap();
        let dims = Settings::default().defaults.default_decomposition_dimensions.len();
        assert_eq!(
            output.context_update[STAGE_NAME]["hypothesis_node_ids"]
                .as_array()
                .unwrap()
                .len(),
            dims
        );
    }

    #[tokio::test]
    async fn test_missing_dimensions_fails_gracefully() {
        let repo = Arc::new(MockRepo::new());
        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert!(!output.success);
    }
}
