//! Pruning and merging stage: drop low-value structure, fold duplicates.
//!
//! The combined node prune and the edge prune run through the repository's
//! pruning-write entry point; ROOT and DECOMPOSITION_DIMENSION nodes are
//! never deleted. Merging folds near-duplicate hypothesis/evidence pairs:
//! confidence components are averaged, the longer label wins, and the dropped
//! node's relationships are copied over deduplicated by endpoint and type.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Settings;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::core::types::{GraphNode, NodeType};
use crate::repository::{GraphRepository, QueryMode, Statement};
use crate::stage::{Stage, StageOutput};
use crate::stages::graph_ops;
use crate::stages::similarity;

const STAGE_NAME: &str = "pruning_merging";
const MAX_PAIR_SCAN: usize = 100;

const NODE_PRUNE_QUERY: &str = "\
MATCH (n:Node)
WHERE NOT n:ROOT AND NOT n:DECOMPOSITION_DIMENSION
  AND (
    ((n:HYPOTHESIS OR n:EVIDENCE OR n:INTERDISCIPLINARY_BRIDGE)
      AND apoc.coll.min([
        coalesce(n.confidence_empirical_support, 0.0),
        coalesce(n.confidence_theoretical_basis, 0.0),
        coalesce(n.confidence_methodological_rigor, 0.0),
        coalesce(n.confidence_consensus_alignment, 0.0)
      ]) < $confidence_threshold
      AND coalesce(n.metadata_impact_score, 0.0) < $impact_threshold)
    OR NOT (n)--()
  )
WITH n
DETACH DELETE n
RETURN count(*) AS pruned_nodes";

const EDGE_PRUNE_QUERY: &str = "\
MATCH (:Node)-[r]->(:Node)
WHERE coalesce(r.confidence, 1.0) < $edge_threshold
DELETE r
RETURN count(*) AS pruned_edges";

const MERGE_CANDIDATES_QUERY: &str = "\
MATCH (n:Node)
WHERE (n:HYPOTHESIS OR n:EVIDENCE)
  AND NOT n:ROOT AND NOT n:DECOMPOSITION_DIMENSION
RETURN properties(n) AS props, labels(n) AS labels";

/// Prunes weak nodes/edges and merges near-duplicates.
pub struct PruningMergingStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
}

impl PruningMergingStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    async fn prune_nodes(&self) -> Result<u64> {
        let mut params = Map::new();
        params.insert(
            "confidence_threshold".to_string(),
            json!(self.settings.defaults.pruning_confidence_threshold),
        );
        params.insert(
            "impact_threshold".to_string(),
            json!(self.settings.defaults.pruning_impact_threshold),
        );
        let records = self
            .repo
            .execute_pruning_write(NODE_PRUNE_QUERY, params)
            .await?;
        Ok(count_from(&records, "pruned_nodes"))
    }

    async fn prune_edges(&self) -> Result<u64> {
        let mut params = Map::new();
        params.insert(
            "edge_threshold".to_string(),
            json!(self.settings.defaults.pruning_edge_confidence_threshold),
        );
        let records = self
            .repo
            .execute_pruning_write(EDGE_PRUNE_QUERY, params)
            .await?;
        Ok(count_from(&records, "pruned_edges"))
    }

    /// Similarity for the merge decision: word overlap dominates, tags refine.
    fn pair_similarity(a: &GraphNode, b: &GraphNode) -> f64 {
        0.7 * similarity::word_jaccard(&a.label, &b.label)
            + 0.3 * similarity::tag_jaccard(
                &a.metadata.disciplinary_tags,
                &b.metadata.disciplinary_tags,
            )
    }

    async fn merge_pair(&self, keep: &GraphNode, drop: &GraphNode) -> Result<()> {
        let merged = keep.confidence.midpoint(&drop.confidence);
        let label = if drop.label.len() > keep.label.len() {
            drop.label.clone()
        } else {
            keep.label.clone()
        };

        let mut set_params = Map::new();
        set_params.insert("keep_id".to_string(), json!(keep.id));
        set_params.insert("empirical".to_string(), json!(merged.empirical_support));
        set_params.insert("theoretical".to_string(), json!(merged.theoretical_basis));
        set_params.insert(
            "methodological".to_string(),
            json!(merged.methodological_rigor),
        );
        set_params.insert("consensus".to_string(), json!(merged.consensus_alignment));
        set_params.insert("overall".to_string(), json!(merged.average()));
        set_params.insert("label".to_string(), json!(label));
        set_params.insert("now".to_string(), json!(Utc::now().to_rfc3339()));

        let mut copy_out_params = Map::new();
        copy_out_params.insert("keep_id".to_string(), json!(keep.id));
        copy_out_params.insert("drop_id".to_string(), json!(drop.id));
        let copy_in_params = copy_out_params.clone();

        self.repo
            .execute_in_transaction(
                vec![
                    Statement::new(
                        "MATCH (n1:Node {id: $keep_id})\n\
                         SET n1.confidence_empirical_support = $empirical,\n\
                             n1.confidence_theoretical_basis = $theoretical,\n\
                             n1.confidence_methodological_rigor = $methodological,\n\
                             n1.confidence_consensus_alignment = $consensus,\n\
                             n1.confidence_overall_avg = $overall,\n\
                             n1.label = $label,\n\
                             n1.updated_at = $now",
                        set_params,
                    ),
                    Statement::new(
                        "MATCH (n2:Node {id: $drop_id})-[r]->(m:Node)\n\
                         WHERE m.id <> $keep_id\n\
                         MATCH (n1:Node {id: $keep_id})\n\
                         CALL apoc.merge.relationship(n1, type(r), {}, properties(r), m) YIELD rel\n\
                         RETURN count(*) AS copied",
                        copy_out_params,
                    ),
                    Statement::new(
                        "MATCH (m:Node)-[r]->(n2:Node {id: $drop_id})\n\
                         WHERE m.id <> $keep_id\n\
                         MATCH (n1:Node {id: $keep_id})\n\
                         CALL apoc.merge.relationship(m, type(r), {}, properties(r), n1) YIELD rel\n\
                         RETURN count(*) AS copied",
                        copy_in_params,
                    ),
                ],
                QueryMode::Write,
            )
            .await?;

        let mut drop_params = Map::new();
        drop_params.insert("drop_id".to_string(), json!(drop.id));
        self.repo
            .execute_pruning_write(
                "MATCH (n2:Node {id: $drop_id}) DETACH DELETE n2",
                drop_params,
            )
            .await?;
        Ok(())
    }

    async fn merge_similar_nodes(&self) -> Result<u64> {
        let records = self
            .repo
            .execute_query(MERGE_CANDIDATES_QUERY, Map::new(), QueryMode::Read)
            .await?;
        let mut nodes: Vec<GraphNode> = records
            .iter()
            .filter_map(|r| graph_ops::node_from_record(r).ok())
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        let threshold = self.settings.defaults.merging_semantic_overlap_threshold;
        let mut merged_away: HashSet<String> = HashSet::new();
        let mut pairs_scanned = 0usize;
        let mut merged_pairs = 0u64;

        'outer: for i in 0..nodes.len() {
            for j in (i + 1)..nodes.len() {
                if pairs_scanned >= MAX_PAIR_SCAN {
                    break 'outer;
                }
                let (a, b) = (&nodes[i], &nodes[j]);
                if a.node_type != b.node_type {
                    continue;
                }
                if !matches!(a.node_type, NodeType::Hypothesis | NodeType::Evidence) {
                    continue;
                }
                if merged_away.contains(&a.id) || merged_away.contains(&b.id) {
                    continue;
                }
                pairs_scanned += 1;

                let sim = Self::pair_similarity(a, b);
                if sim >= threshold {
                    debug!(keep = %a.id, drop = %b.id, similarity = sim, "merging duplicate nodes");
                    self.merge_pair(a, b).await?;
                    merged_away.insert(b.id.clone());
                    merged_pairs += 1;
                }
            }
        }
        Ok(merged_pairs)
    }

    async fn remaining_counts(&self) -> Result<(u64, u64)> {
        let nodes = self
            .repo
            .execute_query(
                "MATCH (n:Node) RETURN count(n) AS remaining_nodes",
                Map::new(),
                QueryMode::Read,
            )
            .await?;
        let edges = self
            .repo
            .execute_query(
                "MATCH (:Node)-[r]->(:Node) RETURN count(r) AS remaining_edges",
                Map::new(),
                QueryMode::Read,
            )
            .await?;
        Ok((
            count_from(&nodes, "remaining_nodes"),
            count_from(&edges, "remaining_edges"),
        ))
    }
}

fn count_from(records: &[Map<String, Value>], key: &str) -> u64 {
    records
        .first()
        .and_then(|r| r.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

#[async_trait]
impl Stage for PruningMergingStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, _session: &mut Session) -> Result<StageOutput> {
        let nodes_pruned = self.prune_nodes().await?;
        let edges_pruned = self.prune_edges().await?;
        let pairs_merged = self.merge_similar_nodes().await?;
        let (remaining_nodes, remaining_edges) = self.remaining_counts().await?;

        info!(
            nodes_pruned,
            edges_pruned, pairs_merged, remaining_nodes, remaining_edges, "pruning finished"
        );

        Ok(StageOutput::success(format!(
            "Pruned {nodes_pruned} nodes and {edges_pruned} edges, merged {pairs_merged} pairs"
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "nodes_pruned": nodes_pruned,
                "edges_pruned": edges_pruned,
                "pairs_merged": pairs_merged,
                "remaining_nodes": remaining_nodes,
                "remaining_edges": remaining_edges,
            }),
        )
        .with_metrics(json!({
            "nodes_pruned": nodes_pruned,
            "edges_pruned": edges_pruned,
            "pairs_merged": pairs_merged,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::confidence::ConfidenceVector;
    use crate::core::types::{EdgeType, GraphEdge};
    use crate::stages::testing::MockRepo;

    fn stage(repo: &Arc<MockRepo>) -> PruningMergingStage {
        PruningMergingStage::new(
            Arc::clone(repo) as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
        )
    }

    async fn seed_node(
        repo: &Arc<MockRepo>,
        node_type: NodeType,
        label: &str,
        confidence: ConfidenceVector,
        impact: f64,
        tags: &[&str],
    ) -> GraphNode {
        let mut node = GraphNode::new(node_type, label);
        node.confidence = confidence;
        node.metadata.impact_score = impact;
        node.metadata.disciplinary_tags = tags.iter().map(|t| (*t).to_string()).collect();
        graph_ops::upsert_nodes(repo.as_ref() as &dyn GraphRepository, &[node.clone()])
            .await
            .unwrap();
        node
    }

    async fn link(repo: &Arc<MockRepo>, edge_type: EdgeType, from: &str, to: &str, conf: f64) {
        let edge = GraphEdge::new(edge_type, from, to, conf);
        graph_ops::upsert_edges(repo.as_ref() as &dyn GraphRepository, &[edge])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_prunes_weak_connected_node_and_isolated_node() {
        let repo = Arc::new(MockRepo::new());
        let root = seed_node(&repo, NodeType::Root, "root", ConfidenceVector::uniform(0.9), 0.9, &[]).await;
        let weak = seed_node(
            &repo,
            NodeType::Hypothesis,
            "weak claim",
            ConfidenceVector::uniform(0.05),
            0.05,
            &[],
        )
        .await;
        link(&repo, EdgeType::GeneratesHypothesis, &root.id, &weak.id, 0.95).await;
        // isolated non-root node of a type outside the weak-prune list
        seed_node(
            &repo,
            NodeType::ResearchQuestion,
            "orphan",
            ConfidenceVector::uniform(0.9),
            0.9,
            &[],
        )
        .await;

        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["nodes_pruned"], json!(2));
        assert!(repo.node(&weak.id).is_none());
        assert!(repo.node(&root.id).is_some());
    }

    #[tokio::test]
    async fn test_never_prunes_root_or_dimensions() {
        let repo = Arc::new(MockRepo::new());
        // isolated root and isolated dimension would match the degree-0 rule
        let root = seed_node(&repo, NodeType::Root, "root", ConfidenceVector::uniform(0.1), 0.0, &[]).await;
        let dim = seed_node(
            &repo,
            NodeType::DecompositionDimension,
            "scope",
            ConfidenceVector::uniform(0.1),
            0.0,
            &[],
        )
        .await;
        link(&repo, EdgeType::DecompositionOf, &dim.id, &root.id, 0.95).await;

        let mut session = Session::new("q");
        stage(&repo).execute(&mut session).await.unwrap();
        assert!(repo.node(&root.id).is_some());
        assert!(repo.node(&dim.id).is_some());
    }

    #[tokio::test]
    async fn test_prunes_low_confidence_edges() {
        let repo = Arc::new(MockRepo::new());
        let a = seed_node(&repo, NodeType::Hypothesis, "a strong claim", ConfidenceVector::uniform(0.8), 0.8, &[]).await;
        let b = seed_node(&repo, NodeType::Evidence, "b strong evidence", ConfidenceVector::uniform(0.8), 0.8, &[]).await;
        link(&repo, EdgeType::Supportive, &b.id, &a.id, 0.1).await;

        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        assert_eq!(output.context_update[STAGE_NAME]["edges_pruned"], json!(1));
        assert!(repo.edges_of_type("SUPPORTIVE").is_empty());
    }

    #[tokio::test]
    async fn test_merges_near_duplicates_and_copies_links() {
        let repo = Arc::new(MockRepo::new());
        let root = seed_node(&repo, NodeType::Root, "root", ConfidenceVector::uniform(0.9), 0.9, &[]).await;
        let keep = seed_node(
            &repo,
            NodeType::Hypothesis,
            "microbiome diversity slows tumor growth",
            ConfidenceVector::uniform(0.6),
            0.8,
            &["oncology"],
        )
        .await;
        let drop = seed_node(
            &repo,
            NodeType::Hypothesis,
            "microbiome diversity slows tumor growth substantially",
            ConfidenceVector::uniform(0.4),
            0.8,
            &["oncology"],
        )
        .await;
        link(&repo, EdgeType::GeneratesHypothesis, &root.id, &keep.id, 0.95).await;
        link(&repo, EdgeType::GeneratesHypothesis, &root.id, &drop.id, 0.95).await;

        let mut session = Session::new("q");
        let output = stage(&repo).execute(&mut session).await.unwrap();
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["pairs_merged"], json!(1));

        let (kept_id, dropped_id) = if keep.id < drop.id {
            (keep.id.clone(), drop.id.clone())
        } else {
            (drop.id.clone(), keep.id.clone())
        };
        assert!(repo.node(&dropped_id).is_none());
        let kept = repo.node(&kept_id).unwrap();
        // averaged confidence
        assert!(
            (kept.props["confidence_empirical_support"].as_f64().unwrap() - 0.5).abs() < 1e-9
        );
        // longer label wins
        assert_eq!(
            kept.props["label"].as_str().unwrap(),
            "microbiome diversity slows tumor growth substantially"
        );
        // duplicate inbound link deduplicated by endpoint+type
        assert_eq!(repo.edges_of_type("GENERATES_HYPOTHESIS").len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let repo = Arc::new(MockRepo::new());
        let root = seed_node(&repo, NodeType::Root, "root", ConfidenceVector::uniform(0.9), 0.9, &[]).await;
        let weak = seed_node(
            &repo,
            NodeType::Hypothesis,
            "weak",
            ConfidenceVector::uniform(0.05),
            0.05,
            &[],
        )
        .await;
        link(&repo, EdgeType::GeneratesHypothesis, &root.id, &weak.id, 0.95).await;

        let mut session = Session::new("q");
        let stage = stage(&repo);
        stage.execute(&mut session).await.unwrap();
        let output = stage.execute(&mut session).await.unwrap();
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["nodes_pruned"], json!(0));
        assert_eq!(slot["edges_pruned"], json!(0));
        assert_eq!(slot["pairs_merged"], json!(0));
    }
}
