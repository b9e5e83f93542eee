//! Session checkpoints for the orchestrator's recovery paths.
//!
//! A checkpoint is a whole-session deep copy tagged with the stage index it
//! was taken before. The ring keeps the most recent snapshots for retry
//! restores; the rollback stack keeps a shorter history for integrity
//! recovery. Both are strictly bounded.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::constants::{CHECKPOINT_RING_CAPACITY, ROLLBACK_STACK_CAPACITY};
use crate::core::session::Session;

/// A deep snapshot of the session at a stage boundary.
#[derive(Debug, Clone)]
pub struct SessionCheckpoint {
    /// Snapshot id
    pub checkpoint_id: String,
    /// Stage index the snapshot was taken before
    pub stage_index: usize,
    /// The copied session
    pub session: Session,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}

impl SessionCheckpoint {
    /// Deep-copy the session at `stage_index`.
    #[must_use]
    pub fn capture(stage_index: usize, session: &Session) -> Self {
        Self {
            checkpoint_id: format!("ckpt-{}", Uuid::new_v4()),
            stage_index,
            session: session.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Bounded ring of the most recent checkpoints (capacity 10).
#[derive(Debug, Default)]
pub struct CheckpointRing {
    entries: VecDeque<SessionCheckpoint>,
}

impl CheckpointRing {
    /// Empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a snapshot, evicting the oldest beyond capacity.
    pub fn push(&mut self, checkpoint: SessionCheckpoint) {
        if self.entries.len() == CHECKPOINT_RING_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(checkpoint);
    }

    /// The most recent snapshot taken before `stage_index`.
    #[must_use]
    pub fn latest_for_stage(&self, stage_index: usize) -> Option<&SessionCheckpoint> {
        self.entries
            .iter()
            .rev()
            .find(|c| c.stage_index == stage_index)
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bounded stack of snapshots for integrity rollback (capacity 5).
#[derive(Debug, Default)]
pub struct RollbackStack {
    entries: Vec<SessionCheckpoint>,
}

impl RollbackStack {
    /// Empty stack.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a snapshot, evicting the oldest beyond capacity.
    pub fn push(&mut self, checkpoint: SessionCheckpoint) {
        if self.entries.len() == ROLLBACK_STACK_CAPACITY {
            self.entries.remove(0);
        }
        self.entries.push(checkpoint);
    }

    /// Pop the most recent snapshot.
    pub fn pop(&mut self) -> Option<SessionCheckpoint> {
        self.entries.pop()
    }

    /// Number of retained snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the stack is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(stage_index: usize) -> SessionCheckpoint {
        SessionCheckpoint::capture(stage_index, &Session::new("q"))
    }

    #[test]
    fn test_capture_is_a_deep_copy() {
        let mut session = Session::new("q");
        let snapshot = SessionCheckpoint::capture(2, &session);
        session.final_answer = "mutated".to_string();
        assert!(snapshot.session.final_answer.is_empty());
        assert_eq!(snapshot.stage_index, 2);
    }

    #[test]
    fn test_ring_bounded_at_capacity() {
        let mut ring = CheckpointRing::new();
        for i in 0..25 {
            ring.push(checkpoint(i));
            assert!(ring.len() <= CHECKPOINT_RING_CAPACITY);
        }
        assert_eq!(ring.len(), CHECKPOINT_RING_CAPACITY);
        // oldest entries were evicted
        assert!(ring.latest_for_stage(0).is_none());
        assert!(ring.latest_for_stage(24).is_some());
    }

    #[test]
    fn test_ring_latest_wins_for_duplicate_stage() {
        let mut ring = CheckpointRing::new();
        let first = checkpoint(3);
        let first_id = first.checkpoint_id.clone();
        ring.push(first);
        let second = checkpoint(3);
        let second_id = second.checkpoint_id.clone();
        ring.push(second);
        let found = ring.latest_for_stage(3).unwrap();
        assert_eq!(found.checkpoint_id, second_id);
        assert_ne!(found.checkpoint_id, first_id);
    }

    #[test]
    fn test_stack_bounded_at_capacity() {
        let mut stack = RollbackStack::new();
        for i in 0..12 {
            stack.push(checkpoint(i));
            assert!(stack.len() <= ROLLBACK_STACK_CAPACITY);
        }
        assert_eq!(stack.len(), ROLLBACK_STACK_CAPACITY);
        // LIFO order, newest first
        assert_eq!(stack.pop().unwrap().stage_index, 11);
        assert_eq!(stack.pop().unwrap().stage_index, 10);
    }

    #[test]
    fn test_empty_collections() {
        assert!(CheckpointRing::new().is_empty());
        assert!(RollbackStack::new().is_empty());
        assert!(RollbackStack::new().pop().is_none());
    }
}
