//! Per-query session state threaded through the pipeline stages.
//!
//! A [`Session`] is a plain mutable record: stages read it, write their output
//! slot into `accumulated_context`, and append a trace entry. Checkpoints are
//! deep copies (`Clone`); the wire form is the serde serialization with the
//! RNG skipped.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::confidence::ConfidenceVector;
use crate::core::error::{Error, Result};

/// Reserved context key for caller-supplied operational parameters.
pub const OPERATIONAL_PARAMS_KEY: &str = "operational_params";
/// Reserved context key for the initial context snapshot.
pub const INITIAL_CONTEXT_KEY: &str = "initial_context";
/// Reserved context key for the finalization metadata record.
pub const PROCESSING_METADATA_KEY: &str = "processing_metadata";

/// One entry of the per-stage execution trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// 1-based position in the executed pipeline
    pub stage_number: usize,
    /// Stage name as registered
    pub stage_name: String,
    /// Wall-clock duration of the stage in milliseconds
    pub duration_ms: u64,
    /// Stage-provided one-line summary
    pub summary: String,
    /// When the stage finished
    pub timestamp: DateTime<Utc>,
    /// Error message, for failed or partially failed stages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stage-provided metrics payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    /// What the orchestrator did to recover, if anything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<String>,
}

/// Mutable per-query state carried end-to-end through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id
    pub session_id: String,
    /// The research query under analysis
    pub query: String,
    /// Composed answer; empty until finalization
    pub final_answer: String,
    /// Final confidence in `"e,t,m,c"` wire form
    pub final_confidence_vector: String,
    /// Stage name → output slot, plus the reserved keys
    pub accumulated_context: Map<String, Value>,
    /// Ordered trace of executed stages
    pub stage_outputs_trace: Vec<TraceRecord>,
    /// Session-owned RNG; seeded from `operational_params.random_seed` when
    /// present so runs are reproducible
    #[serde(skip, default = "entropy_rng")]
    pub rng: StdRng,
}

fn entropy_rng() -> StdRng {
    StdRng::from_entropy()
}

impl Session {
    /// Create a session for a query with a generated id.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            session_id: format!("session-{}", Uuid::new_v4()),
            query: query.into(),
            final_answer: String::new(),
            final_confidence_vector: ConfidenceVector::default().to_wire(),
            accumulated_context: Map::new(),
            stage_outputs_trace: Vec::new(),
            rng: entropy_rng(),
        }
    }

    /// Attach operational parameters under the reserved key and re-seed the
    /// RNG if `random_seed` is provided.
    #[must_use]
    pub fn with_operational_params(mut self, params: Map<String, Value>) -> Self {
        if let Some(seed) = params.get("random_seed").and_then(Value::as_u64) {
            self.rng = StdRng::seed_from_u64(seed);
        }
        self.accumulated_context
            .insert(OPERATIONAL_PARAMS_KEY.to_string(), Value::Object(params));
        self
    }

    /// The operational parameters map, if one was attached.
    #[must_use]
    pub fn operational_params(&self) -> Option<&Map<String, Value>> {
        self.accumulated_context
            .get(OPERATIONAL_PARAMS_KEY)
            .and_then(Value::as_object)
    }

    /// A single operational parameter by key.
    #[must_use]
    pub fn operational_param(&self, key: &str) -> Option<&Value> {
        self.operational_params().and_then(|p| p.get(key))
    }

    /// A stage's output slot from the accumulated context.
    #[must_use]
    pub fn stage_slot(&self, stage_name: &str) -> Option<&Value> {
        self.accumulated_context.get(stage_name)
    }

    /// Merge a stage's context update into the accumulated context.
    ///
    /// Conflict policy: arrays concatenate, objects shallow-merge (new keys
    /// win), scalars keep the old value under `<key>_previous` and overwrite.
    pub fn merge_context_update(&mut self, update: Map<String, Value>) {
        for (key, new_value) in update {
            match self.accumulated_context.remove(&key) {
                None => {
                    self.accumulated_context.insert(key, new_value);
                }
                Some(Value::Array(mut old)) if new_value.is_array() => {
                    if let Value::Array(new) = new_value {
                        old.extend(new);
                    }
                    self.accumulated_context.insert(key, Value::Array(old));
                }
                Some(Value::Object(mut old)) if new_value.is_object() => {
                    if let Value::Object(new) = new_value {
                        for (k, v) in new {
                            old.insert(k, v);
                        }
                    }
                    self.accumulated_context.insert(key, Value::Object(old));
                }
                Some(old) => {
                    self.accumulated_context
                        .insert(format!("{key}_previous"), old);
                    self.accumulated_context.insert(key, new_value);
                }
            }
        }
    }

    /// Append a trace record.
    pub fn push_trace(&mut self, record: TraceRecord) {
        self.stage_outputs_trace.push(record);
    }

    /// Validate the session invariants the orchestrator relies on.
    ///
    /// Non-empty id and query, and a final confidence vector that parses to
    /// exactly four components. The context map and trace sequence are
    /// guaranteed by the type.
    pub fn validate_integrity(&self) -> Result<()> {
        if self.session_id.trim().is_empty() {
            return Err(Error::IntegrityCorruption("empty session id".to_string()));
        }
        if self.query.trim().is_empty() {
            return Err(Error::IntegrityCorruption("empty query".to_string()));
        }
        ConfidenceVector::from_wire(&self.final_confidence_vector).map_err(|e| {
            Error::IntegrityCorruption(format!("final confidence vector unparseable: {e}"))
        })?;
        Ok(())
    }

    /// The session's RNG. All stage randomness flows through here so a seeded
    /// session replays deterministically.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use serde_json::json;

    fn params(seed: u64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("random_seed".to_string(), json!(seed));
        m
    }

    #[test]
    fn test_new_session_passes_integrity() {
        let s = Session::new("why is the sky blue");
        assert!(s.validate_integrity().is_ok());
    }

    #[test]
    fn test_empty_query_fails_integrity() {
        let s = Session::new("   ");
        assert!(s.validate_integrity().is_err());
    }

    #[test]
    fn test_bad_confidence_wire_fails_integrity() {
        let mut s = Session::new("q");
        s.final_confidence_vector = "0.5,0.5".to_string();
        assert!(s.validate_integrity().is_err());
    }

    #[test]
    fn test_seeded_rng_is_reproducible() {
        let mut a = Session::new("q").with_operational_params(params(42));
        let mut b = Session::new("q").with_operational_params(params(42));
        let xs: Vec<u32> = (0..5).map(|_| a.rng().gen()).collect();
        let ys: Vec<u32> = (0..5).map(|_| b.rng().gen()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_checkpoint_clone_replays_rng() {
        let mut s = Session::new("q").with_operational_params(params(7));
        let checkpoint = s.clone();
        let before: u32 = s.rng().gen();
        let mut restored = checkpoint;
        let after: u32 = restored.rng().gen();
        assert_eq!(before, after);
    }

    #[test]
    fn test_merge_inserts_new_keys() {
        let mut s = Session::new("q");
        let mut update = Map::new();
        update.insert("initialization".to_string(), json!({"root_node_id": "r1"}));
        s.merge_context_update(update);
        assert_eq!(
            s.stage_slot("initialization").unwrap()["root_node_id"],
            json!("r1")
        );
    }

    #[test]
    fn test_merge_concats_arrays() {
        let mut s = Session::new("q");
        let mut u1 = Map::new();
        u1.insert("warnings".to_string(), json!(["a"]));
        s.merge_context_update(u1);
        let mut u2 = Map::new();
        u2.insert("warnings".to_string(), json!(["b", "c"]));
        s.merge_context_update(u2);
        assert_eq!(
            s.accumulated_context["warnings"],
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn test_merge_shallow_merges_objects() {
        let mut s = Session::new("q");
        let mut u1 = Map::new();
        u1.insert("slot".to_string(), json!({"kept": 1, "replaced": 1}));
        s.merge_context_update(u1);
        let mut u2 = Map::new();
        u2.insert("slot".to_string(), json!({"replaced": 2, "added": 3}));
        s.merge_context_update(u2);
        assert_eq!(
            s.accumulated_context["slot"],
            json!({"kept": 1, "replaced": 2, "added": 3})
        );
    }

    #[test]
    fn test_merge_scalar_keeps_previous() {
        let mut s = Session::new("q");
        let mut u1 = Map::new();
        u1.insert("counter".to_string(), json!(1));
        s.merge_context_update(u1);
        let mut u2 = Map::new();
        u2.insert("counter".to_string(), json!(2));
        s.merge_context_update(u2);
        assert_eq!(s.accumulated_context["counter"], json!(2));
        assert_eq!(s.accumulated_context["counter_previous"], json!(1));
    }

    #[test]
    fn test_wire_form_skips_rng_and_round_trips() {
        let mut s = Session::new("q").with_operational_params(params(1));
        s.final_answer = "done".to_string();
        let wire = serde_json::to_string(&s).unwrap();
        assert!(!wire.contains("rng"));
        let parsed: Session = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed.session_id, s.session_id);
        assert_eq!(parsed.final_answer, "done");
    }

    #[test]
    fn test_operational_param_lookup() {
        let mut p = Map::new();
        p.insert("evidence_max_iterations".to_string(), json!(2));
        let s = Session::new("q").with_operational_params(p);
        assert_eq!(
            s.operational_param("evidence_max_iterations"),
            Some(&json!(2))
        );
        assert!(s.operational_param("missing").is_none());
    }
}
