//! Reflection stage: audit the finished analysis and settle the final
//! confidence vector.
//!
//! A fixed checklist runs over the hypotheses, evidence, and composed output;
//! three checks (causal claim validity, temporal consistency, collaboration
//! attributions) are reported as NOT_RUN by contract. The final vector starts
//! from the configured baseline and receives additive adjustments per check
//! outcome, clamped into [0, 1].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::config::Settings;
use crate::core::confidence::ConfidenceVector;
use crate::core::error::Result;
use crate::core::session::Session;
use crate::core::types::{BiasSeverity, EpistemicStatus, GraphNode};
use crate::repository::GraphRepository;
use crate::stage::{Stage, StageOutput};
use crate::stages::graph_ops;
use crate::stats::{
    chi_square_test, cohens_d, correlation_test, shannon_entropy, welch_t_test,
};

const STAGE_NAME: &str = "reflection";

/// Outcome status of one audit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditStatus {
    /// The check is defined but intentionally not executed
    NotRun,
    /// The check passed
    Pass,
    /// The check passed with reservations
    Warning,
    /// The check failed
    Fail,
    /// The check had nothing to evaluate
    NotApplicable,
    /// The check itself errored
    Error,
}

/// One entry of the audit checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Stable check name
    pub check_name: String,
    /// Outcome
    pub status: AuditStatus,
    /// Human-readable result
    pub message: String,
    /// Optional structured detail payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl AuditRecord {
    fn new(check_name: &str, status: AuditStatus, message: impl Into<String>) -> Self {
        Self {
            check_name: check_name.to_string(),
            status,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Runs the audit checklist and computes the final confidence vector.
pub struct ReflectionStage {
    repo: Arc<dyn GraphRepository>,
    settings: Arc<Settings>,
}

impl ReflectionStage {
    /// Build the stage.
    #[must_use]
    pub fn new(repo: Arc<dyn GraphRepository>, settings: Arc<Settings>) -> Self {
        Self { repo, settings }
    }

    fn ids_from_slot(session: &Session, slot: &str, key: &str) -> Vec<String> {
        session
            .stage_slot(slot)
            .and_then(|s| s.get(key))
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn coverage_check(&self, nodes: &[GraphNode]) -> AuditRecord {
        const NAME: &str = "confidence_impact_coverage";
        if nodes.is_empty() {
            return AuditRecord::new(NAME, AuditStatus::NotApplicable, "no nodes to assess");
        }
        let high_threshold = self.settings.defaults.high_confidence_threshold;
        let impact_threshold = self.settings.defaults.high_impact_threshold;
        let covered = nodes
            .iter()
            .filter(|n| {
                n.confidence.average() >= high_threshold
                    || n.metadata.impact_score >= impact_threshold
            })
            .count();
        let ratio = covered as f64 / nodes.len() as f64;
        let impact_entropy =
            shannon_entropy(&nodes.iter().map(|n| n.metadata.impact_score).collect::<Vec<_>>());

        let status = if ratio >= 0.5 {
            AuditStatus::Pass
        } else if ratio >= 0.25 {
            AuditStatus::Warning
        } else {
            AuditStatus::Fail
        };
        AuditRecord::new(
            NAME,
            status,
            format!("{covered}/{} nodes clear the confidence or impact bar", nodes.len()),
        )
        .with_details(json!({
            "coverage_ratio": ratio,
            "impact_entropy": impact_entropy,
        }))
    }

    fn bias_check(&self, hypotheses: &[GraphNode]) -> AuditRecord {
        const NAME: &str = "bias_flags_assessment";
        if hypotheses.is_empty() {
            return AuditRecord::new(NAME, AuditStatus::NotApplicable, "no hypotheses to assess");
        }
        let flagged = hypotheses
            .iter()
            .filter(|h| !h.metadata.bias_flags.is_empty())
            .count();
        let severe = hypotheses
            .iter()
            .filter(|h| {
                h.metadata
                    .bias_flags
                    .iter()
                    .any(|f| f.severity == BiasSeverity::Medium)
            })
            .count();
        let tolerated = self.settings.defaults.max_high_severity_bias_nodes;

        let (status, message) = if severe > tolerated {
            (
                AuditStatus::Fail,
                format!("{severe} hypotheses carry medium-severity bias flags (tolerated: {tolerated})"),
            )
        } else if flagged > 0 {
            (
                AuditStatus::Warning,
                format!("{flagged} hypotheses carry low-severity bias flags"),
            )
        } else {
            (AuditStatus::Pass, "no bias flags recorded".to_string())
        };
        AuditRecord::new(NAME, status, message)
            .with_details(json!({"flagged": flagged, "severe": severe}))
    }

    fn knowledge_gap_check(nodes: &[GraphNode], composed: Option<&Value>) -> AuditRecord {
        const NAME: &str = "knowledge_gap_coverage";
        let gaps: Vec<&GraphNode> = nodes.iter().filter(|n| n.metadata.is_knowledge_gap).collect();
        if gaps.is_empty() {
            return AuditRecord::new(NAME, AuditStatus::NotApplicable, "no knowledge gaps marked");
        }
        let Some(composed) = composed else {
            return AuditRecord::new(
                NAME,
                AuditStatus::Warning,
                "knowledge gaps exist but no composed output to check against",
            );
        };
        let text = composed.to_string();
        let mentioned = gaps.iter().filter(|g| text.contains(&g.id)).count();
        let status = if mentioned == gaps.len() {
            AuditStatus::Pass
        } else {
            AuditStatus::Warning
        };
        AuditRecord::new(
            NAME,
            status,
            format!("{mentioned}/{} knowledge gaps surfaced in the composed output", gaps.len()),
        )
    }

    fn falsifiability_check(&self, hypotheses: &[GraphNode]) -> AuditRecord {
        const NAME: &str = "hypothesis_falsifiability";
        if hypotheses.is_empty() {
            return AuditRecord::new(NAME, AuditStatus::NotApplicable, "no hypotheses to assess");
        }
        let falsifiable = hypotheses
            .iter()
            .filter(|h| {
                h.metadata
                    .falsification_criteria
                    .as_ref()
                    .is_some_and(|fc| !fc.testable_conditions.is_empty())
            })
            .count();
        let ratio = falsifiable as f64 / hypotheses.len() as f64;
        let required = self.settings.defaults.min_falsifiable_hypothesis_ratio;

        let status = if ratio >= required {
            AuditStatus::Pass
        } else if ratio >= required / 2.0 {
            AuditStatus::Warning
        } else {
            AuditStatus::Fail
        };
        AuditRecord::new(
            NAME,
            status,
            format!(
                "{falsifiable}/{} hypotheses carry testable falsification criteria",
                hypotheses.len()
            ),
        )
        .with_details(json!({"ratio": ratio, "required": required}))
    }

    fn statistical_check(&self, evidence: &[GraphNode]) -> AuditRecord {
        const NAME: &str = "statistical_rigor";
        if evidence.is_empty() {
            return AuditRecord::new(NAME, AuditStatus::NotApplicable, "no evidence to assess");
        }
        let powered = evidence
            .iter()
            .filter(|e| {
                e.metadata
                    .statistical_power
                    .as_ref()
                    .is_some_and(|p| p.value >= 0.5)
            })
            .count();
        let ratio = powered as f64 / evidence.len() as f64;
        let required = self.settings.defaults.min_powered_evidence_ratio;

        // Contrast the supported and contradicted groups where both exist.
        let supported: Vec<f64> = evidence
            .iter()
            .filter(|e| e.metadata.epistemic_status == EpistemicStatus::EvidenceSupported)
            .map(|e| e.confidence.empirical_support)
            .collect();
        let contradicted: Vec<f64> = evidence
            .iter()
            .filter(|e| e.metadata.epistemic_status == EpistemicStatus::EvidenceContradicted)
            .map(|e| e.confidence.empirical_support)
            .collect();

        let mut details = json!({"powered_ratio": ratio, "required": required});
        if let Some(test) = welch_t_test(&supported, &contradicted) {
            details["direction_t_test"] = json!(test);
            if let Some(d) = cohens_d(&supported, &contradicted) {
                details["direction_effect_size"] = json!(d);
            }
        }
        let contingency = vec![
            vec![
                supported.len() as f64,
                evidence.len() as f64 - supported.len() as f64,
            ],
            vec![powered as f64, (evidence.len() - powered) as f64],
        ];
        if let Some(test) = chi_square_test(&contingency) {
            details["power_direction_chi_square"] = json!(test);
        }
        let impacts: Vec<f64> = evidence.iter().map(|e| e.metadata.impact_score).collect();
        let empiricals: Vec<f64> = evidence
            .iter()
            .map(|e| e.confidence.empirical_support)
            .collect();
        if let Some((r, test)) = correlation_test(&impacts, &empiricals) {
            details["impact_support_correlation"] = json!({"r": r, "test": test});
        }

        let status = if ratio >= required {
            AuditStatus::Pass
        } else if ratio >= required / 2.0 {
            AuditStatus::Warning
        } else {
            AuditStatus::Fail
        };
        AuditRecord::new(
            NAME,
            status,
            format!("{powered}/{} evidence nodes are adequately powered", evidence.len()),
        )
        .with_details(details)
    }

    fn final_vector(&self, records: &[AuditRecord]) -> ConfidenceVector {
        let [e, t, m, c] = self.settings.defaults.reflection_baseline_confidence;
        let mut empirical = e;
        let mut methodological = m;
        let mut consensus = c;

        let status_of = |name: &str| {
            records
                .iter()
                .find(|r| r.check_name == name)
                .map(|r| r.status)
        };

        match status_of("hypothesis_falsifiability") {
            Some(AuditStatus::Pass) => methodological += 0.15,
            Some(AuditStatus::Warning) => methodological += 0.05,
            Some(AuditStatus::Fail) => methodological -= 0.20,
            _ => {}
        }
        match status_of("bias_flags_assessment") {
            Some(AuditStatus::Pass) => methodological += 0.10,
            Some(AuditStatus::Fail) => methodological -= 0.15,
            _ => {}
        }
        match status_of("statistical_rigor") {
            Some(AuditStatus::Pass) => empirical += 0.20,
            Some(AuditStatus::Warning) => empirical -= 0.05,
            Some(AuditStatus::Fail) => empirical -= 0.10,
            _ => {}
        }

        let active: Vec<AuditStatus> = records
            .iter()
            .map(|r| r.status)
            .filter(|s| matches!(s, AuditStatus::Pass | AuditStatus::Warning | AuditStatus::Fail))
            .collect();
        if !active.is_empty() {
            let pass_count = active.iter().filter(|s| **s == AuditStatus::Pass).count();
            consensus += (pass_count as f64 / active.len() as f64 - 0.5) * 0.2;
        }

        ConfidenceVector::new(empirical, t, methodological, consensus)
    }
}

#[async_trait]
impl Stage for ReflectionStage {
    fn name(&self) -> &'static str {
        STAGE_NAME
    }

    async fn execute(&self, session: &mut Session) -> Result<StageOutput> {
        let hypothesis_ids = Self::ids_from_slot(session, "hypothesis", "hypothesis_node_ids");
        let evidence_ids = Self::ids_from_slot(session, "evidence", "evidence_node_ids");

        let hypotheses = graph_ops::fetch_nodes(self.repo.as_ref(), &hypothesis_ids).await?;
        let evidence = graph_ops::fetch_nodes(self.repo.as_ref(), &evidence_ids).await?;
        let mut all_nodes = hypotheses.clone();
        all_nodes.extend(evidence.iter().cloned());

        let composed = session
            .stage_slot("composition")
            .and_then(|slot| slot.get("composed_output"))
            .cloned();

        let records = vec![
            self.coverage_check(&all_nodes),
            self.bias_check(&hypotheses),
            Self::knowledge_gap_check(&all_nodes, composed.as_ref()),
            self.falsifiability_check(&hypotheses),
            self.statistical_check(&evidence),
            AuditRecord::new(
                "causal_claim_validity",
                AuditStatus::NotRun,
                "causal claim validation is not executed",
            ),
            AuditRecord::new(
                "temporal_consistency",
                AuditStatus::NotRun,
                "temporal consistency validation is not executed",
            ),
            AuditRecord::new(
                "collaboration_attributions",
                AuditStatus::NotRun,
                "collaboration attribution validation is not executed",
            ),
        ];

        let final_vector = self.final_vector(&records);
        session.final_confidence_vector = final_vector.to_wire();

        let pass_count = records
            .iter()
            .filter(|r| r.status == AuditStatus::Pass)
            .count();
        info!(
            checks = records.len(),
            passed = pass_count,
            final_confidence = %session.final_confidence_vector,
            "reflection finished"
        );

        Ok(StageOutput::success(format!(
            "Audit finished: {pass_count}/{} checks passed",
            records.len()
        ))
        .with_slot(
            STAGE_NAME,
            json!({
                "audit_results": serde_json::to_value(&records)?,
                "final_confidence_vector": session.final_confidence_vector,
            }),
        )
        .with_metrics(json!({
            "checks": records.len(),
            "passed": pass_count,
        })))
    }
}
