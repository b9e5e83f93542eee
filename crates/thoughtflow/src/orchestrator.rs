//! Pipeline orchestrator: sequences the stages, guards concurrency, and owns
//! the recovery machinery.
//!
//! Per query the orchestrator walks the stage list in declared order. Before
//! each stage it consults the resource monitor, captures a checkpoint, and
//! validates session integrity (one rollback, then fatal). Execution gets up
//! to three attempts with progressive backoff, restoring the previous stage
//! boundary's checkpoint between attempts. After execution the stage's
//! context update is merged, a trace entry is recorded, and critical error
//! patterns halt the walk with a cautionary final answer. One orchestrator
//! instance processes at most one session at a time.

use chrono::Utc;
use serde_json::{json, Map};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointRing, RollbackStack, SessionCheckpoint};
use crate::constants::{MAX_STAGE_ATTEMPTS, STAGE_RETRY_BACKOFF};
use crate::core::confidence::ConfidenceVector;
use crate::core::error::{is_critical_message, Error, Result};
use crate::core::session::{Session, TraceRecord, INITIAL_CONTEXT_KEY, PROCESSING_METADATA_KEY};
use crate::repository::GraphRepository;
use crate::stage::{Stage, StageOutput};

/// Hook consulted before every stage; a `false` halts the pipeline.
pub trait ResourceMonitor: Send + Sync {
    /// Whether the process has headroom to continue.
    fn check_resources(&self) -> bool;
}

/// Monitor that never halts the pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysAvailable;

impl ResourceMonitor for AlwaysAvailable {
    fn check_resources(&self) -> bool {
        true
    }
}

const ZERO_CONFIDENCE: &str = "0.0,0.0,0.0,0.0";
const FALLBACK_CONFIDENCE: &str = "0.5,0.5,0.5,0.5";
const DEFAULT_FINAL_ANSWER: &str = "Processing completed, but no final answer was generated.";
const RESOURCE_HALT_ANSWER: &str = "Processing halted due to server resource limits";

/// Drives a session through the registered stages.
pub struct PipelineOrchestrator {
    stages: Vec<Arc<dyn Stage>>,
    repo: Arc<dyn GraphRepository>,
    resource_monitor: Arc<dyn ResourceMonitor>,
    cancellation: CancellationToken,
    active_session: Mutex<Option<String>>,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over a stage list and a store handle.
    #[must_use]
    pub fn new(stages: Vec<Arc<dyn Stage>>, repo: Arc<dyn GraphRepository>) -> Self {
        Self {
            stages,
            repo,
            resource_monitor: Arc::new(AlwaysAvailable),
            cancellation: CancellationToken::new(),
            active_session: Mutex::new(None),
        }
    }

    /// Replace the resource monitor.
    #[must_use]
    pub fn with_resource_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.resource_monitor = monitor;
        self
    }

    /// Use an externally owned cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A clone of the cancellation token, for callers that abort the walk.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Readiness probe delegating to the store.
    pub async fn ready(&self) -> bool {
        self.repo.health_check().await
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.active_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Process one query end-to-end, returning the finalized session.
    ///
    /// Fails immediately with a busy error when another session is active on
    /// this instance.
    pub async fn process_query(
        &self,
        query: &str,
        operational_params: Option<Map<String, serde_json::Value>>,
    ) -> Result<Session> {
        if query.trim().is_empty() {
            return Err(Error::invalid_input(
                "Invalid initial query. It must be a non-empty string.",
            ));
        }
        let mut session = Session::new(query);
        if let Some(params) = operational_params {
            session = session.with_operational_params(params);
        }
        session.accumulated_context.insert(
            INITIAL_CONTEXT_KEY.to_string(),
            json!({
                "query": query,
                "received_at": Utc::now().to_rfc3339(),
            }),
        );

        {
            let mut active = self.lock_active();
            if let Some(current) = active.as_ref() {
                return Err(Error::invalid_input(format!(
                    "already processing session {current}"
                )));
            }
            *active = Some(session.session_id.clone());
        }
        info!(session_id = %session.session_id, "pipeline started");

        let outcome = self.run_pipeline(&mut session).await;
        *self.lock_active() = None;

        outcome?;
        Ok(session)
    }

    async fn run_pipeline(&self, session: &mut Session) -> Result<()> {
        let started = Instant::now();
        let mut ring = CheckpointRing::new();
        let mut rollback = RollbackStack::new();
        let mut rolled_back_for: Option<usize> = None;
        let mut stage_index = 0usize;

        while stage_index < self.stages.len() {
            if self.cancellation.is_cancelled() {
                warn!(session_id = %session.session_id, "cancellation observed between stages");
                self.release_stage_resources().await;
                session.final_answer = "Processing aborted by cancellation request.".to_string();
                session.final_confidence_vector = ZERO_CONFIDENCE.to_string();
                break;
            }

            let stage = Arc::clone(&self.stages[stage_index]);

            if !self.resource_monitor.check_resources() {
                warn!(stage = stage.name(), "resource monitor halted the pipeline");
                session.final_answer = RESOURCE_HALT_ANSWER.to_string();
                session.final_confidence_vector = ZERO_CONFIDENCE.to_string();
                break;
            }

            let snapshot = SessionCheckpoint::capture(stage_index, session);
            ring.push(snapshot.clone());
            rollback.push(snapshot);

            if let Err(violation) = session.validate_integrity() {
                if rolled_back_for == Some(stage_index) {
                    error!(stage = stage.name(), %violation, "integrity still broken after rollback");
                    return Err(violation);
                }
                let mut restored = false;
                while let Some(candidate) = rollback.pop() {
                    if candidate.session.validate_integrity().is_ok() {
                        *session = candidate.session;
                        restored = true;
                        break;
                    }
                }
                if !restored {
                    return Err(violation);
                }
                warn!(stage = stage.name(), "session restored from rollback stack");
                rolled_back_for = Some(stage_index);
                continue;
            }

            let stage_started = Instant::now();
            let mut recovery_action: Option<String> = None;
            let mut attempt = 1u32;
            let output: StageOutput = loop {
                match stage.execute(session).await {
                    Ok(output) => break output,
                    Err(e) if e.is_retryable() && attempt < MAX_STAGE_ATTEMPTS => {
                        warn!(
                            stage = stage.name(),
                            attempt,
                            error = %e,
                            "stage failed; backing off before retry"
                        );
                        tokio::time::sleep(STAGE_RETRY_BACKOFF * attempt).await;
                        if let Some(previous) = stage_index.checked_sub(1) {
                            if let Some(checkpoint) = ring.latest_for_stage(previous) {
                                *session = checkpoint.session.clone();
                                recovery_action = Some(format!(
                                    "restored checkpoint {} before attempt {}",
                                    checkpoint.checkpoint_id,
                                    attempt + 1
                                ));
                            }
                        }
                        attempt += 1;
                    }
                    Err(e) => {
                        error!(stage = stage.name(), attempt, error = %e, "stage failed for good");
                        recovery_action = Some(format!("gave up after {attempt} attempt(s)"));
                        break StageOutput::failure(
                            format!("Stage '{}' raised an error", stage.name()),
                            stage_error_message(&e, stage.name(), stage_index),
                        );
                    }
                }
            };
            // The kernel guarantees cleanup runs whether execution succeeded
            // or raised.
            stage.cleanup().await;

            session.merge_context_update(output.context_update.clone());
            session.push_trace(TraceRecord {
                stage_number: session.stage_outputs_trace.len() + 1,
                stage_name: stage.name().to_string(),
                duration_ms: stage_started.elapsed().as_millis() as u64,
                summary: output.summary.clone(),
                timestamp: Utc::now(),
                error: output.error_message.clone(),
                metrics: output.metrics.clone(),
                recovery_action,
            });
            debug!(
                stage = stage.name(),
                success = output.success,
                "stage finished"
            );

            if let Some(message) = &output.error_message {
                if is_critical_message(message) {
                    error!(stage = stage.name(), %message, "critical error pattern; halting");
                    session.final_answer =
                        format!("The pipeline halted on a critical error: {message}");
                    session.final_confidence_vector = ZERO_CONFIDENCE.to_string();
                    break;
                }
            }

            stage_index += 1;
        }

        self.finalize(session, started);
        Ok(())
    }

    fn finalize(&self, session: &mut Session, started: Instant) {
        if session.final_answer.trim().is_empty() {
            session.final_answer = DEFAULT_FINAL_ANSWER.to_string();
        }
        if ConfidenceVector::from_wire(&session.final_confidence_vector).is_err() {
            session.final_confidence_vector = FALLBACK_CONFIDENCE.to_string();
        }

        let lowered = session.final_answer.to_lowercase();
        let success = !lowered.contains("error") && !lowered.contains("failed");
        session.accumulated_context.insert(
            PROCESSING_METADATA_KEY.to_string(),
            json!({
                "total_duration_ms": started.elapsed().as_millis() as u64,
                "stages_executed": session.stage_outputs_trace.len(),
                "completion_time": Utc::now().to_rfc3339(),
                "success": success,
            }),
        );
        info!(
            session_id = %session.session_id,
            stages = session.stage_outputs_trace.len(),
            success,
            "pipeline finalized"
        );
    }

    async fn release_stage_resources(&self) {
        for stage in &self.stages {
            stage.cleanup().await;
        }
    }

    /// Release every stage's resources and clear the active-session slot.
    ///
    /// Proceeds with a warning when called mid-run.
    pub async fn shutdown(&self) {
        if let Some(current) = self.lock_active().as_ref() {
            warn!(session_id = %current, "shutdown requested while a session is active");
        }
        self.release_stage_resources().await;
        *self.lock_active() = None;
        info!("orchestrator shut down");
    }
}

fn stage_error_message(error: &Error, stage: &str, checkpoint_stage: usize) -> String {
    Error::StageExecution {
        stage: stage.to_string(),
        checkpoint_stage,
        message: error.to_string(),
    }
    .to_string()
}
