//! Evidence stage: gather external evidence for the most promising
//! hypotheses and fold it into their confidence.
//!
//! Each iteration selects one hypothesis (highest impact, least settled
//! confidence), fans out to every available retriever under the bounded
//! search gate, classifies each record as supportive or contradictory with a
//! weighted lexicon, persists evidence nodes and typed links, and applies a
//! Bayesian update to the hypothesis. Interdisciplinary bridges and hyperedge
//! centers are synthesized when their preconditions hold. Re-running the
//! stage on the same session re-uses existing ids via upsert.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use crate::bayes::{update_confidence, EvidenceType};
use crate::config::Settings;
use crate::core::confidence::ConfidenceVector;
use crate::core::error::{Error, Result};
use crate::core::session::Session;
use crate::core::types::{
    EdgeType, EpistemicStatus, GraphEdge, GraphNode, NodeType, StatisticalPower,
};
use crate::repository::{GraphRepository, QueryMode};
use crate::retriever::{ArticleRecord, EvidenceRetriever, RetrieverKind, SearchGate};
use crate::stage::{Stage, StageOutput};
use crate::stages::graph_ops;
use crate::stages::similarity;
use crate::stats::proportion_ci;

const STAGE_NAME: &str = "evidence";
const RESULTS_PER_ADAPTER: usize = 2;
const CANDIDATE_LIMIT: usize = 10;

const CANDIDATES_QUERY: &str = "\
MATCH (h:HYPOTHESIS) WHERE h.id IN $ids AND NOT h.id IN $processed
RETURN properties(h) AS props, labels(h) AS labels
ORDER BY h.metadata_impact_score DESC, h.confidence_empirical_support ASC
LIMIT 10";

const CONFIDENCE_WRITEBACK_QUERY: &str = "\
MATCH (n:Node {id: $id})
SET n.confidence_empirical_support = $empirical,
    n.confidence_theoretical_basis = $theoretical,
    n.confidence_methodological_rigor = $methodological,
    n.confidence_consensus_alignment = $consensus,
    n.confidence_overall_avg = $overall,
    n.metadata_epistemic_status = $status,
    n.updated_at = $now";

/// Gathers and integrates evidence for hypotheses.
pub struct EvidenceStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
    retrievers: Vec<Arc<dyn EvidenceRetriever>>,
    gate: SearchGate,
}

impl EvidenceStage {
    /// Build the stage from the retrievers that constructed successfully.
    ///
    /// Individual adapter failures at construction time are non-fatal; an
    /// empty adapter set is fatal to stage construction.
    pub fn new(
        repo: Arc<dyn GraphRepository>,
        settings: Arc<Settings>,
        retrievers: Vec<Arc<dyn EvidenceRetriever>>,
    ) -> Result<Self> {
        if retrievers.is_empty() {
            return Err(Error::Configuration(
                "evidence stage requires at least one retrieval adapter".to_string(),
            ));
        }
        Ok(Self {
            repo,
            settings,
            retrievers,
            gate: SearchGate::default(),
        })
    }

    fn max_iterations(&self, session: &Session) -> u32 {
        session
            .operational_param("evidence_max_iterations")
            .and_then(Value::as_u64)
            .map_or(self.settings.defaults.evidence_max_iterations, |v| v as u32)
    }

    async fn select_hypothesis(
        &self,
        hypothesis_ids: &[String],
        processed: &HashSet<String>,
    ) -> Result<Option<GraphNode>> {
        let mut params = Map::new();
        params.insert("ids".to_string(), json!(hypothesis_ids));
        params.insert(
            "processed".to_string(),
            json!(processed.iter().cloned().collect::<Vec<_>>()),
        );
        let records = self
            .repo
            .execute_query(CANDIDATES_QUERY, params, QueryMode::Read)
            .await?;

        let mut candidates: Vec<GraphNode> = records
            .iter()
            .take(CANDIDATE_LIMIT)
            .filter_map(|r| graph_ops::node_from_record(r).ok())
            .collect();

        // Re-rank in memory: prefer high impact and unsettled confidence.
        candidates.sort_by(|a, b| {
            let score = |n: &GraphNode| {
                n.metadata.impact_score + n.confidence.variance_around(0.5)
            };
            score(b)
                .partial_cmp(&score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(candidates.into_iter().next())
    }

    fn search_query_for(hypothesis: &GraphNode) -> String {
        hypothesis
            .metadata
            .plan
            .as_ref()
            .and_then(|plan| plan.query.clone())
            .unwrap_or_else(|| hypothesis.label.clone())
    }

    /// Fan out to every adapter in parallel under the search gate. Per-adapter
    /// failures are logged and skipped; an unexpected response shape from the
    /// scholarly adapter surfaces as a warning, not an error.
    async fn retrieve(&self, query: &str) -> Vec<(RetrieverKind, &'static str, ArticleRecord)> {
        let searches = self.retrievers.iter().map(|retriever| {
            let gate = self.gate.clone();
            let retriever = Arc::clone(retriever);
            let query = query.to_string();
            async move {
                let _permit = gate.acquire().await;
                let outcome = retriever.search(&query, RESULTS_PER_ADAPTER).await;
                (retriever.kind(), retriever.name(), outcome)
            }
        });

        let mut articles = Vec::new();
        for (kind, name, outcome) in join_all(searches).await {
            match outcome {
                Ok(records) => {
                    for record in records {
                        articles.push((kind, name, record));
                    }
                }
                Err(e) => {
                    warn!(adapter = name, error = %e, "retrieval adapter failed; skipping");
                }
            }
        }
        articles
    }

    async fn write_back_confidence(
        &self,
        id: &str,
        confidence: &ConfidenceVector,
        status: EpistemicStatus,
    ) -> Result<()> {
        let mut params = Map::new();
        params.insert("id".to_string(), json!(id));
        params.insert("empirical".to_string(), json!(confidence.empirical_support));
        params.insert("theoretical".to_string(), json!(confidence.theoretical_basis));
        params.insert(
            "methodological".to_string(),
            json!(confidence.methodological_rigor),
        );
        params.insert("consensus".to_string(), json!(confidence.consensus_alignment));
        params.insert("overall".to_string(), json!(confidence.average()));
        params.insert("status".to_string(), json!(status.as_str()));
        params.insert("now".to_string(), json!(Utc::now().to_rfc3339()));
        self.repo
            .execute_query(CONFIDENCE_WRITEBACK_QUERY, params, QueryMode::Write)
            .await?;
        Ok(())
    }

    fn build_evidence_node(
        session: &mut Session,
        hypothesis: &GraphNode,
        kind: RetrieverKind,
        adapter_name: &str,
        article: &ArticleRecord,
        assessment: &SupportAssessment,
    ) -> GraphNode {
        let rng = session.rng();
        let id = format!("ev-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>());

        let mut title = article.title.clone();
        if title.len() > 120 {
            title.truncate(120);
        }
        let power = statistical_power_from_citations(article.cited_by_count);

        let mut node = GraphNode::new(NodeType::Evidence, format!("Evidence: {title}"));
        node.id = id;
        node.confidence = ConfidenceVector::new(
            assessment.strength,
            0.5,
            assessment.strength * 0.8,
            0.5,
        );
        node.metadata.description = Some(article.snippet.clone());
        node.metadata.source_description = Some(format!("{adapter_name} ({})", article.url));
        node.metadata.epistemic_status = if assessment.supports {
            EpistemicStatus::EvidenceSupported
        } else {
            EpistemicStatus::EvidenceContradicted
        };
        node.metadata.impact_score = assessment.strength * power.value;
        node.metadata.doi = article.doi.clone();
        node.metadata.authors = article.authors.clone();
        node.metadata.publication_date = article.publication_date.clone();
        node.metadata.statistical_power = Some(power);

        let mut tags: Vec<String> = hypothesis.metadata.disciplinary_tags.clone();
        tags.push(kind.as_str().to_string());
        tags.sort();
        tags.dedup();
        node.metadata.disciplinary_tags = tags;
        node.metadata.layer_id = hypothesis.metadata.layer_id.clone();
        node
    }

    fn maybe_bridge(
        session: &mut Session,
        hypothesis: &GraphNode,
        evidence: &GraphNode,
        threshold: f64,
    ) -> Option<(GraphNode, Vec<GraphEdge>)> {
        let hyp_tags: HashSet<&String> = hypothesis.metadata.disciplinary_tags.iter().collect();
        let ev_tags: HashSet<&String> = evidence.metadata.disciplinary_tags.iter().collect();
        if hyp_tags.is_empty() || ev_tags.is_empty() || hyp_tags.is_disjoint(&ev_tags) {
            return None;
        }
        let sim = similarity::label_cosine(&hypothesis.label, &evidence.label);
        if sim < threshold {
            return None;
        }

        let rng = session.rng();
        let ibn_id = format!("ibn-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>());
        let mut bridge = GraphNode::new(
            NodeType::InterdisciplinaryBridge,
            format!("Bridge: {} <-> {}", evidence.label, hypothesis.label),
        );
        bridge.id = ibn_id.clone();
        bridge.confidence = ConfidenceVector::new(sim, 0.4, 0.5, 0.3);
        bridge.metadata.epistemic_status = EpistemicStatus::Inferred;
        bridge.metadata.impact_score = 0.6;
        let mut tags: Vec<String> = hyp_tags.union(&ev_tags).map(|t| (*t).clone()).collect();
        tags.sort();
        bridge.metadata.disciplinary_tags = tags;

        let mut source_link =
            GraphEdge::new(EdgeType::IbnSourceLink, evidence.id.clone(), ibn_id.clone(), sim);
        source_link.id = format!("edge-ibnsrc-{ibn_id}");
        let mut target_link =
            GraphEdge::new(EdgeType::IbnTargetLink, ibn_id.clone(), hypothesis.id.clone(), sim);
        target_link.id = format!("edge-ibntgt-{ibn_id}");

        Some((bridge, vec![source_link, target_link]))
    }

    fn build_hyperedge(
        session: &mut Session,
        hypothesis: &GraphNode,
        hypothesis_empirical: f64,
        evidence_nodes: &[GraphNode],
    ) -> (GraphNode, Vec<GraphEdge>) {
        let rng = session.rng();
        let center_id = format!("hyper-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>());

        let mut empiricals: Vec<f64> = evidence_nodes
            .iter()
            .map(|n| n.confidence.empirical_support)
            .collect();
        empiricals.push(hypothesis_empirical);
        let mean_empirical = empiricals.iter().sum::<f64>() / empiricals.len() as f64;

        let mut center = GraphNode::new(
            NodeType::HyperedgeCenter,
            format!("Evidence group for: {}", hypothesis.label),
        );
        center.id = center_id.clone();
        center.confidence = ConfidenceVector::new(mean_empirical, 0.5, 0.5, 0.5);
        center.metadata.epistemic_status = EpistemicStatus::Inferred;
        center.metadata.impact_score = hypothesis.metadata.impact_score;
        center.metadata.disciplinary_tags = hypothesis.metadata.disciplinary_tags.clone();

        let mut edges = Vec::with_capacity(evidence_nodes.len() + 1);
        let mut member = GraphEdge::new(
            EdgeType::HasMember,
            center_id.clone(),
            hypothesis.id.clone(),
            0.9,
        );
        member.id = format!("edge-member-{center_id}-{}", hypothesis.id);
        edges.push(member);
        for evidence in evidence_nodes {
            let mut member = GraphEdge::new(
                EdgeType::HasMember,
                center_id.clone(),
                evidence.id.clone(),
                0.9,
            );
            member.id = format!("edge-member-{center_id}-{}", evidence.id);
            edges.push(member);
        }
        (center, edges)
    }

    /// Placeholder kept for contract parity: temporal decay of stale
    /// confidence is not applied.
    fn apply_temporal_decay(&self) {
        debug!("temporal decay pass skipped (not implemented)");
    }

    /// Placeholder kept for contract parity: graph topology is not adapted.
    fn adapt_graph_topology(&self) {
        debug!("topology adaptation pass skipped (not implemented)");
    }
}

#[async_trait]
impl Stage for EvidenceStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    #[allow(clippy::too_many_lines)]
    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        let hypothesis_ids: Vec<String> = session
            .stage_slot("hypothesis")
            .and_then(|slot| slot.get("hypothesis_node_ids"))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        if hypothesis_ids.is_empty() {
            return Ok(StageOutput::success(
                "No hypotheses available; evidence gathering skipped",
            )
            .with_slot(
                STAGE_NAME,
                json!({
                    "evidence_nodes_created_in_store": 0,
                    "iterations_completed": 0,
                    "updated_hypotheses": [],
                    "evidence_node_ids": [],
                    "ibn_nodes_created": 0,
                    "hyperedges_created": 0,
                }),
            ));
        }

        let max_iterations = self.max_iterations(session);
        let ibn_threshold = self.settings.defaults.ibn_similarity_threshold;
        let min_hyperedge_members = self.settings.defaults.min_nodes_for_hyperedge;

        let mut processed: HashSet<String> = HashSet::new();
        let mut evidence_node_ids: Vec<String> = Vec::new();
        let mut updated_hypotheses: Vec<String> = Vec::new();
        let mut iterations_completed = 0u32;
        let mut ibn_count = 0usize;
        let mut hyperedge_count = 0usize;

        for iteration in 0..max_iterations {
            let Some(hypothesis) = self
                .select_hypothesis(&hypothesis_ids, &processed)
                .await?
            else {
                debug!(iteration, "no unprocessed hypotheses remain");
                break;
            };
            processed.insert(hypothesis.id.clone());
            iterations_completed += 1;

            let query = Self::search_query_for(&hypothesis);
            debug!(hypothesis = %hypothesis.id, %query, "gathering evidence");
            let articles = self.retrieve(&query).await;
            if articles.is_empty() {
                continue;
            }

            // Classify and build evidence nodes plus their typed links.
            let mut iteration_nodes: Vec<GraphNode> = Vec::new();
            let mut iteration_edges: Vec<GraphEdge> = Vec::new();
            let mut assessments: Vec<(RetrieverKind, SupportAssessment, Option<u64>)> = Vec::new();
            for (kind, adapter_name, article) in &articles {
                let assessment =
                    classify_support(&hypothesis.label, &article.combined_text());
                let node = Self::build_evidence_node(
                    session,
                    &hypothesis,
                    *kind,
                    adapter_name,
                    article,
                    &assessment,
                );
                let edge_type = if assessment.supports {
                    EdgeType::Supportive
                } else {
                    EdgeType::Contradictory
                };
                let mut edge = GraphEdge::new(
                    edge_type,
                    node.id.clone(),
                    hypothesis.id.clone(),
                    assessment.strength,
                );
                edge.id = format!("edge-ev-{}", node.id);
                iteration_edges.push(edge);
                assessments.push((*kind, assessment, article.cited_by_count));
                iteration_nodes.push(node);
            }

            graph_ops::upsert_nodes(self.repo.as_ref(), &iteration_nodes).await?;
            graph_ops::upsert_edges(self.repo.as_ref(), &iteration_edges).await?;
            evidence_node_ids.extend(iteration_nodes.iter().map(|n| n.id.clone()));

            // Fold every assessment into the hypothesis confidence.
            let mut confidence = hypothesis.confidence;
            for (kind, assessment, cited_by) in &assessments {
                let evidence_type = match kind {
                    RetrieverKind::Biomedical => EvidenceType::Observational,
                    RetrieverKind::Scholarly => EvidenceType::Empirical,
                    RetrieverKind::NeuralWeb => EvidenceType::ExpertOpinion,
                };
                let update = update_confidence(
                    &confidence,
                    assessment.strength,
                    assessment.supports,
                    evidence_type,
                    cited_by.unwrap_or(1).max(1),
                );
                confidence = update.posterior;
            }
            let status = if confidence.empirical_support > 0.6 {
                EpistemicStatus::EvidenceSupported
            } else if confidence.empirical_support < 0.4 {
                EpistemicStatus::EvidenceContradicted
            } else {
                EpistemicStatus::Hypothesis
            };
            self.write_back_confidence(&hypothesis.id, &confidence, status)
                .await?;
            updated_hypotheses.push(hypothesis.id.clone());

            // Interdisciplinary bridges where the preconditions hold.
            let mut bridge_nodes = Vec::new();
            let mut bridge_edges = Vec::new();
            for evidence in &iteration_nodes {
                if let Some((bridge, edges)) =
                    Self::maybe_bridge(session, &hypothesis, evidence, ibn_threshold)
                {
                    bridge_nodes.push(bridge);
                    bridge_edges.extend(edges);
                }
            }
            if !bridge_nodes.is_empty() {
                ibn_count += bridge_nodes.len();
                graph_ops::upsert_nodes(self.repo.as_ref(), &bridge_nodes).await?;
                graph_ops::upsert_edges(self.repo.as_ref(), &bridge_edges).await?;
            }

            // Reify the iteration's evidence group when it is large enough.
            if iteration_nodes.len() >= min_hyperedge_members {
                let (center, member_edges) = Self::build_hyperedge(
                    session,
                    &hypothesis,
                    confidence.empirical_support,
                    &iteration_nodes,
                );
                graph_ops::upsert_nodes(self.repo.as_ref(), &[center]).await?;
                graph_ops::upsert_edges(self.repo.as_ref(), &member_edges).await?;
                hyperedge_count += 1;
            }
        }

        self.apply_temporal_decay();
        self.adapt_graph_topology();

        info!(
            evidence = evidence_node_ids.len(),
            iterations = iterations_completed,
            bridges = ibn_count,
            hyperedges = hyperedge_count,
            "evidence gathering finished"
        );

        Ok(StageOutput::success(format!(
            "Integrated {} evidence records across {} iterations",
            evidence_node_ids.len(),
            iterations_completed
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "evidence_nodes_created_in_store": evidence_node_ids.len(),
                "evidence_node_ids": evidence_node_ids,
                "iterations_completed": iterations_completed,
                "updated_hypotheses": updated_hypotheses,
                "ibn_nodes_created": ibn_count,
                "hyperedges_created": hyperedge_count,
            }),
        )
        .with_metrics(json!({
            "nodes_created": evidence_node_ids.len() + ibn_count + hyperedge_count,
            "adapters": self.retrievers.len(),
        })))
    }

    async fn cleanup(&self) {
        for retriever in &self.retrievers {
            retriever.close().await;
        }
    }
}

// ============================================================================
// Support classification
// ============================================================================

/// Outcome of classifying one piece of evidence against a hypothesis.
#[derive(Debug, Clone, PartialEq)]
pub struct SupportAssessment {
    /// Direction of the evidence
    pub supports: bool,
    /// Edge/update strength in [0.1, 0.9]
    pub strength: f64,
    /// Raw weighted net score
    pub net_score: f64,
    /// Whether the score cleared the decision threshold
    pub decisive: bool,
}

const NEGATIONS: [&str; 8] = ["not", "no", "never", "fail", "fails", "failed", "cannot", "without"];
const NEGATION_WINDOW: usize = 3;

fn lexicon() -> &'static HashMap<&'static str, (f64, bool)> {
    static LEXICON: OnceLock<HashMap<&'static str, (f64, bool)>> = OnceLock::new();
    LEXICON.get_or_init(|| {
        let mut map = HashMap::new();
        let contradictory_strong = [
            "refute", "refutes", "refuted", "disprove", "disproves", "disproven", "contradict",
            "contradicts", "contradicted", "falsify", "falsifies", "falsified",
        ];
        let contradictory_moderate = [
            "challenge", "challenges", "dispute", "disputes", "against", "oppose", "opposes",
            "inconsistent",
        ];
        let contradictory_weak = ["question", "questions", "doubt", "doubts", "unlikely"];
        let supportive_strong = [
            "confirm", "confirms", "confirmed", "prove", "proves", "proven", "demonstrate",
            "demonstrates", "demonstrated", "validate", "validates", "validated",
        ];
        let supportive_moderate = [
            "support", "supports", "supported", "corroborate", "corroborates", "consistent",
            "aligns", "agree", "agrees",
        ];
        let supportive_weak = [
            "suggest", "suggests", "suggested", "indicate", "indicates", "indicated", "may",
            "might", "possible",
        ];

        for word in contradictory_strong {
            map.insert(word, (3.0, false));
        }
        for word in contradictory_moderate {
            map.insert(word, (2.0, false));
        }
        for word in contradictory_weak {
            map.insert(word, (1.0, false));
        }
        for word in supportive_strong {
            map.insert(word, (3.0, true));
        }
        for word in supportive_moderate {
            map.insert(word, (2.0, true));
        }
        for word in supportive_weak {
            map.insert(word, (1.0, true));
        }
        map
    })
}

/// Score evidence text against a hypothesis label.
///
/// Contradictory terms subtract their weight, supportive terms add theirs
/// unless negated within the preceding three tokens (a negated supportive
/// verb counts as contradictory weight 2), and a semantic overlap boost in
/// [0, 2] is added on top.
#[must_use]
pub fn classify_support(hypothesis_label: &str, evidence_text: &str) -> SupportAssessment {
    let tokens = similarity::tokenize(evidence_text);
    let mut net = 0.0;

    for (i, token) in tokens.iter().enumerate() {
        let Some((weight, supportive)) = lexicon().get(token.as_str()) else {
            continue;
        };
        if *supportive {
            let window_start = i.saturating_sub(NEGATION_WINDOW);
            let negated = tokens[window_start..i]
                .iter()
                .any(|t| NEGATIONS.contains(&t.as_str()));
            if negated {
                net -= 2.0;
            } else {
                net += weight;
            }
        } else {
            net -= weight;
        }
    }

    net += similarity::overlap_ratio(hypothesis_label, evidence_text) * 2.0;

    let (supports, strength, decisive) = if net > 1.5 {
        (true, (0.5 + net / 10.0).min(0.9), true)
    } else if net < -1.5 {
        (false, (0.5 + net.abs() / 10.0).min(0.9), true)
    } else {
        (net >= 0.0, 0.3, false)
    };

    SupportAssessment {
        supports,
        strength: strength.max(0.1),
        net_score: net,
        decisive,
    }
}

/// Statistical power proxy from a citation count: the narrower the Wilson
/// interval a sample of that size would give, the higher the power.
#[must_use]
pub fn statistical_power_from_citations(cited_by: Option<u64>) -> StatisticalPower {
    let trials = cited_by.unwrap_or(0).max(10);
    let interval = proportion_ci(trials / 2, trials, 0.95);
    let width = interval.map_or(1.0, |ci| ci.upper - ci.lower);
    let mut power = StatisticalPower::new((1.0 - width).clamp(0.1, 0.95));
    power.method = Some("wilson_interval_width".to_string());
    power
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{FailingRetriever, MockRepo, StaticRetriever};
    use crate::stages::{
        decomposition::DecompositionStage, hypothesis::HypothesisStage,
        initialization::InitializationStage,
    };

    async fn session_with_hypotheses(repo: &Arc<MockRepo>) -> Session {
        let settings = Arc::new(Settings::default());
        let mut params = Map::new();
        params.insert("random_seed".to_string(), json!(21));
        params.insert("hypotheses_per_dimension_min".to_string(), json!(1));
        params.insert("hypotheses_per_dimension_max".to_string(), json!(1));
        params.insert(
            "decomposition_dimensions".to_string(),
            json!(["Mechanisms"]),
        );
        let mut session =
            Session::new("does microbiome diversity slow cancer progression")
                .with_operational_params(params);
        for stage in [
            Box::new(InitializationStage::new(
                Arc::clone(repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )) as Box<dyn Stage>,
            Box::new(DecompositionStage::new(
                Arc::clone(repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )),
            Box::new(HypothesisStage::new(
                Arc::clone(repo) as Arc<dyn GraphRepository>,
                Arc::clone(&settings),
            )),
        ] {
            let output = stage.execute(&mut session).await.unwrap();
            session.merge_context_update(output.context_update);
        }
        session
    }

    fn supportive_article() -> ArticleRecord {
        ArticleRecord {
            title: "Study confirms microbiome diversity slows cancer progression".to_string(),
            snippet: "Results demonstrate and validate that higher diversity supports slower \
                      progression in cancer cohorts."
                .to_string(),
            url: "https://example.org/a1".to_string(),
            cited_by_count: Some(120),
            ..Default::default()
        }
    }

    fn stage_with(
        repo: &Arc<MockRepo>,
        retrievers: Vec<Arc<dyn EvidenceRetriever>>,
    ) -> EvidenceStage {
        EvidenceStage::new(
            Arc::clone(repo) as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
            retrievers,
        )
        .unwrap()
    }

    #[test]
    fn test_construction_requires_an_adapter() {
        let repo = Arc::new(MockRepo::new());
        let result = EvidenceStage::new(
            repo as Arc<dyn GraphRepository>,
            Arc::new(Settings::default()),
            Vec::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_classify_clear_support() {
        let assessment = classify_support(
            "microbiome diversity slows cancer progression",
            "results confirm and demonstrate that microbiome diversity slows cancer progression",
        );
        assert!(assessment.supports);
        assert!(assessment.decisive);
        assert!(assessment.strength > 0.5);
        assert!(assessment.strength <= 0.9);
    }

    #[test]
    fn test_classify_clear_contradiction() {
        let assessment = classify_support(
            "vitamin megadoses cure influenza",
            "trials refute and contradict the claim; results are inconsistent and dispute it",
        );
        assert!(!assessment.supports);
        assert!(assessment.decisive);
        assert!(assessment.strength > 0.5);
    }

    #[test]
    fn test_classify_negated_support_counts_against() {
        let positive = classify_support("exercise improves mood", "the study supports it");
        let negated = classify_support("exercise improves mood", "the study does not support it");
        assert!(negated.net_score < positive.net_score);
    }

    #[test]
    fn test_classify_neutral_floor() {
        let assessment = classify_support("quantum gravity unification", "weather report for tuesday");
        assert!(!assessment.decisive);
        assert!(assessment.strength >= 0.1);
        assert_eq!(assessment.strength, 0.3);
    }

    #[test]
    fn test_power_grows_with_citations() {
        let low = statistical_power_from_citations(Some(5));
        let high = statistical_power_from_citations(Some(5000));
        assert!(high.value > low.value);
        assert!((0.1..=0.95).contains(&low.value));
        assert!((0.1..=0.95).contains(&high.value));
    }

    #[tokio::test]
    async fn test_evidence_creates_nodes_edges_and_updates_confidence() {
        let repo = Arc::new(MockRepo::new());
        let mut session = session_with_hypotheses(&repo).await;
        let hyp_id = session.stage_slot("hypothesis").unwrap()["hypothesis_node_ids"][0]
            .as_str()
            .unwrap()
            .to_string();
        let before = repo.node(&hyp_id).unwrap().props["confidence_empirical_support"]
            .as_f64()
            .unwrap();

        let retriever: Arc<dyn EvidenceRetriever> =
            Arc::new(StaticRetriever::new(RetrieverKind::Biomedical, "pubmed", vec![
                supportive_article(),
            ]));
        let stage = stage_with(&repo, vec![retriever]);
        let output = stage.execute(&mut session).await.unwrap();
        assert!(output.success);

        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["evidence_nodes_created_in_store"], json!(1));
        assert!(slot["iterations_completed"].as_u64().unwrap() >= 1);
        assert_eq!(repo.nodes_with_label("EVIDENCE").len(), 1);
        assert_eq!(repo.edges_of_type("SUPPORTIVE").len(), 1);

        let after = repo.node(&hyp_id).unwrap().props["confidence_empirical_support"]
            .as_f64()
            .unwrap();
        assert!(after > before, "supportive evidence must raise empirical support");
    }

    #[tokio::test]
    async fn test_adapter_outage_is_not_fatal() {
        let repo = Arc::new(MockRepo::new());
        let mut session = session_with_hypotheses(&repo).await;
        let hyp_id = session.stage_slot("hypothesis").unwrap()["hypothesis_node_ids"][0]
            .as_str()
            .unwrap()
            .to_string();
        let before = repo.node(&hyp_id).unwrap().props["confidence_empirical_support"]
            .as_f64()
            .unwrap();

        let retrievers: Vec<Arc<dyn EvidenceRetriever>> = vec![
            Arc::new(FailingRetriever::new(RetrieverKind::Biomedical, "pubmed")),
            Arc::new(FailingRetriever::new(RetrieverKind::Scholarly, "scholar")),
            Arc::new(FailingRetriever::new(RetrieverKind::NeuralWeb, "exa")),
        ];
        let stage = stage_with(&repo, retrievers);
        let output = stage.execute(&mut session).await.unwrap();

        assert!(output.success);
        let slot = &output.context_update[STAGE_NAME];
        assert_eq!(slot["evidence_nodes_created_in_store"], json!(0));
        assert!(slot["iterations_completed"].as_u64().unwrap() > 0);

        let after = repo.node(&hyp_id).unwrap().props["confidence_empirical_support"]
            .as_f64()
            .unwrap();
        assert_eq!(before, after, "confidence must be unchanged with no evidence");
    }

    #[tokio::test]
    async fn test_hyperedge_created_when_enough_members() {
        let repo = Arc::new(MockRepo::new());
        let mut session = session_with_hypotheses(&repo).await;

        // Two adapters x 1 article each -> hypothesis + 2 evidence members.
        let retrievers: Vec<Arc<dyn EvidenceRetriever>> = vec![
            Arc::new(StaticRetriever::new(
                RetrieverKind::Biomedical,
                "pubmed",
                vec![supportive_article()],
            )),
            Arc::new(StaticRetriever::new(
                RetrieverKind::Scholarly,
                "scholar",
                vec![supportive_article()],
            )),
        ];
        let stage = stage_with(&repo, retrievers);
        let output = stage.execute(&mut session).await.unwrap();

        let slot = &output.context_update[STAGE_NAME];
        assert!(slot["hyperedges_created"].as_u64().unwrap() >= 1);
        let centers = repo.nodes_with_label("HYPEREDGE_CENTER");
        assert!(!centers.is_empty());
        // hypothesis + 2 evidence members per center
        let member_edges = repo.edges_of_type("HAS_MEMBER");
        assert!(member_edges.len() >= 3);
    }

    #[tokio::test]
    async fn test_missing_hypotheses_is_success_noop() {
        let repo = Arc::new(MockRepo::new());
        let mut session = Session::new("q");
        let retriever: Arc<dyn EvidenceRetriever> =
            Arc::new(StaticRetriever::new(RetrieverKind::Biomedical, "pubmed", vec![]));
        let stage = stage_with(&repo, vec![retriever]);
        let output = stage.execute(&mut session).await.unwrap();
        assert!(output.success);
        assert_eq!(
            output.context_update[STAGE_NAME]["iterations_completed"],
            json!(0)
        );
    }
}
