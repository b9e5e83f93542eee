//! Stage kernel: the contract every pipeline stage implements.
//!
//! A stage reads the session, consults its collaborators, writes its results
//! back into the session's accumulated context via its output slot, and
//! returns a [`StageOutput`]. The orchestrator guarantees `cleanup` runs after
//! execution whether the stage succeeded or raised.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::core::error::Result;
use crate::core::session::Session;

/// Declared execution order of the built-in pipeline.
pub const DEFAULT_STAGE_ORDER: [&str; 8] = [
    "initialization",
    "decomposition",
    "hypothesis",
    "evidence",
    "pruning_merging",
    "subgraph_extraction",
    "composition",
    "reflection",
];

/// What a stage hands back to the orchestrator.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StageOutput {
    /// Whether the stage achieved its goal (partial success counts)
    pub success: bool,
    /// One-line human-readable summary for the trace
    pub summary: String,
    /// Update merged into `accumulated_context`, keyed by stage name
    pub context_update: Map<String, Value>,
    /// Error message for failed or degraded runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Structured metrics recorded into the trace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
}

impl StageOutput {
    /// A successful output with a summary and no payload yet.
    #[must_use]
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
            context_update: Map::new(),
            error_message: None,
            metrics: None,
        }
    }

    /// A failed output carrying an error message.
    #[must_use]
    pub fn failure(summary: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
            context_update: Map::new(),
            error_message: Some(error.into()),
            metrics: None,
        }
    }

    /// Attach the stage's payload under its context slot.
    #[must_use]
    pub fn with_slot(mut self, stage_name: &str, payload: Value) -> Self {
        self.context_update.insert(stage_name.to_string(), payload);
        self
    }

    /// Attach a metrics payload.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Value) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// A pipeline stage.
///
/// Stages hold their collaborators (`Arc<dyn GraphRepository>`, retrievers,
/// settings) and stay immutable across sessions; all per-query state lives on
/// the [`Session`].
#[async_trait]
pub trait Stage: Send + Sync {
    /// The registered stage name; also the context slot key.
    fn name(&self) -> &'static str;

    /// Run the stage against the session.
    async fn execute(&self, session: &mut Session) -> Result<StageOutput>;

    /// Release per-stage resources (open client connections). Always invoked
    /// by the orchestrator after execution, success or not. Idempotent.
    async fn cleanup(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_order_has_eight_distinct_stages() {
        let mut names = DEFAULT_STAGE_ORDER.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 8);
    }

    #[test]
    fn test_success_output_shape() {
        let out = StageOutput::success("did the thing")
            .with_slot("initialization", json!({"root_node_id": "r1"}))
            .with_metrics(json!({"nodes_created": 1}));
        assert!(out.success);
        assert!(out.error_message.is_none());
        assert_eq!(out.context_update["initialization"]["root_node_id"], "r1");
        assert_eq!(out.metrics.unwrap()["nodes_created"], 1);
    }

    #[test]
    fn test_failure_output_shape() {
        let out = StageOutput::failure("no root", "store unavailable");
        assert!(!out.success);
        assert_eq!(out.error_message.as_deref(), Some("store unavailable"));
        assert!(out.context_update.is_empty());
    }

    #[test]
    fn test_output_serializes_without_empty_options() {
        let out = StageOutput::success("ok");
        let wire = serde_json::to_string(&out).unwrap();
        assert!(!wire.contains("error_message"));
        assert!(!wire.contains("metrics"));
    }
}
