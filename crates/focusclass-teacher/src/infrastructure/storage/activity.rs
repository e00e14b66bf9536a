//! In-memory activity store.
//!
//! Holds the session's violation stream and session records in bounded
//! memory.  This is the store the shipped binary runs with; the
//! [`ActivityStore`] trait exists so a database-backed implementation can
//! replace it without touching the violation pipeline.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use focusclass_core::{ParticipantId, ViolationEvent};

use crate::application::violations::{ActivityStore, SessionRecord, StoreError};

/// Upper bound on retained violation events.  Oldest entries are evicted
/// first; a full afternoon of classes stays far below this.
const VIOLATION_RETENTION_CAP: usize = 10_000;

/// Bounded in-memory activity log.
#[derive(Default)]
pub struct MemoryActivityStore {
    inner: Mutex<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    violations: VecDeque<ViolationEvent>,
    sessions: Vec<SessionRecord>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total violations currently retained, across all participants.
    pub fn violation_count(&self) -> usize {
        self.inner.lock().expect("lock poisoned").violations.len()
    }

    /// All session records in append order.
    pub fn session_records(&self) -> Vec<SessionRecord> {
        self.inner.lock().expect("lock poisoned").sessions.clone()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn append_violation(&self, event: &ViolationEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if inner.violations.len() == VIOLATION_RETENTION_CAP {
            inner.violations.pop_front();
        }
        inner.violations.push_back(event.clone());
        Ok(())
    }

    async fn append_session_record(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.sessions.push(record.clone());
        Ok(())
    }

    async fn query_history(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ViolationEvent>, StoreError> {
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(inner
            .violations
            .iter()
            .filter(|e| e.participant_id == participant_id)
            .cloned()
            .collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
