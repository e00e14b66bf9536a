//! ViolationsUseCase: recording, persistence, and live-view throttling.
//!
//! Every violation report is remembered (bounded per-participant history plus
//! the activity store), but not every report is *shown*.  A student whose
//! laptop fires `focus_loss` twenty times a second must not scroll the
//! presenter's view off the screen, so live notification goes through a
//! per-(participant, kind) throttle.
//!
//! # Throttle algorithm
//!
//! Each (participant, kind) pair has a window (default 5 s) that starts at
//! its first event.  Within a window the first N events (default 3) are
//! visible, carrying `display_count` = occurrence number; everything past N
//! is suppressed and only counted.  Once the window has elapsed, the next
//! event starts a fresh window and is visible with `display_count` 1.
//!
//! ```text
//! t=0.0  focus_loss   visible, display_count 1   (window opens)
//! t=0.4  focus_loss   visible, display_count 2
//! t=0.9  focus_loss   visible, display_count 3
//! t=1.3  focus_loss   suppressed
//! t=2.0  focus_loss   suppressed
//! t=6.1  focus_loss   visible, display_count 1   (window elapsed, reset)
//! ```
//!
//! Throttling affects only the live view.  History and the activity store
//! receive every event, so the permanent record is complete.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use focusclass_core::{ParticipantId, ViolationEvent, ViolationKind};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::events::TeacherEvent;
use crate::application::roster::ClientRegistry;

// ── Persistence collaborator ──────────────────────────────────────────────────

/// Error type for activity store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not accept the write.
    #[error("activity store unavailable: {0}")]
    Unavailable(String),
}

/// One session's summary row in the activity log.
///
/// Appended twice per session: once at start (`ended_at` absent) and once at
/// stop, so the log shows sessions that were cut short by a crash.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub session_id: uuid::Uuid,
    pub name: String,
    pub code: String,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub participant_count: u32,
}

/// The persistence collaborator.
///
/// The live session never depends on reads from this store for correctness;
/// `query_history` exists for reporting.  Implementations must not block the
/// caller for long — a slow store delays violation display, nothing else.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn append_violation(&self, event: &ViolationEvent) -> Result<(), StoreError>;

    async fn append_session_record(&self, record: &SessionRecord) -> Result<(), StoreError>;

    async fn query_history(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<ViolationEvent>, StoreError>;
}

// ── Throttle ──────────────────────────────────────────────────────────────────

/// Tunables for the live-view throttle.
#[derive(Debug, Clone, Copy)]
pub struct ThrottlePolicy {
    /// Window length per (participant, kind).
    pub window: Duration,
    /// Visible events per window before suppression starts.
    pub visible_per_window: u32,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(5),
            visible_per_window: 3,
        }
    }
}

/// Outcome of one throttle consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleDecision {
    /// Whether the event should be shown live.
    pub visible: bool,
    /// Occurrence number within the current window; meaningful when visible.
    pub display_count: u32,
}

/// Per-(participant, kind) window state.
#[derive(Debug)]
struct ThrottleEntry {
    window_start: Instant,
    count: u32,
    suppressed: u32,
}

/// The live-view throttle.
///
/// Callers pass `Instant::now()` in production; tests pass fabricated
/// instants so window expiry is deterministic.
pub struct ViolationThrottler {
    policy: ThrottlePolicy,
    entries: HashMap<(ParticipantId, ViolationKind), ThrottleEntry>,
}

impl ViolationThrottler {
    pub fn new(policy: ThrottlePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Records one event at `now` and decides its visibility.
    pub fn record_at(
        &mut self,
        participant_id: ParticipantId,
        kind: ViolationKind,
        now: Instant,
    ) -> ThrottleDecision {
        let key = (participant_id, kind);
        match self.entries.get_mut(&key) {
            Some(entry)
                if now.saturating_duration_since(entry.window_start) <= self.policy.window =>
            {
                entry.count += 1;
                if entry.count <= self.policy.visible_per_window {
                    ThrottleDecision {
                        visible: true,
                        display_count: entry.count,
                    }
                } else {
                    entry.suppressed += 1;
                    ThrottleDecision {
                        visible: false,
                        display_count: entry.count,
                    }
                }
            }
            _ => {
                // First event for this key, or the window has elapsed.
                self.entries.insert(
                    key,
                    ThrottleEntry {
                        window_start: now,
                        count: 1,
                        suppressed: 0,
                    },
                );
                ThrottleDecision {
                    visible: true,
                    display_count: 1,
                }
            }
        }
    }

    /// Suppressed-so-far count for a key's current window.  Zero for unknown
    /// keys.
    pub fn suppressed_in_window(&self, participant_id: ParticipantId, kind: &ViolationKind) -> u32 {
        self.entries
            .get(&(participant_id, kind.clone()))
            .map(|e| e.suppressed)
            .unwrap_or(0)
    }

    /// Drops all window state for a participant.  Called when they leave so
    /// a rejoin starts clean.
    pub fn forget(&mut self, participant_id: ParticipantId) {
        self.entries.retain(|(id, _), _| *id != participant_id);
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// The full violation pipeline: history, persistence, throttle, live event.
///
/// Shared by every connection task, so interior mutability throughout:
/// the throttle map behind a sync mutex (never held across an await), the
/// registry behind the session-wide async mutex.
pub struct ViolationPipeline {
    registry: Arc<tokio::sync::Mutex<ClientRegistry>>,
    throttler: std::sync::Mutex<ViolationThrottler>,
    store: Arc<dyn ActivityStore>,
    events: mpsc::Sender<TeacherEvent>,
    /// Set once a store failure has been surfaced; later failures only log.
    store_fault_reported: AtomicBool,
}

impl ViolationPipeline {
    pub fn new(
        registry: Arc<tokio::sync::Mutex<ClientRegistry>>,
        store: Arc<dyn ActivityStore>,
        events: mpsc::Sender<TeacherEvent>,
        policy: ThrottlePolicy,
    ) -> Self {
        Self {
            registry,
            throttler: std::sync::Mutex::new(ViolationThrottler::new(policy)),
            store,
            events,
            store_fault_reported: AtomicBool::new(false),
        }
    }

    /// Processes one violation report end to end.
    ///
    /// Returns the throttle decision, or `None` when the participant is not
    /// in the roster (they disconnected while the report was in flight), in
    /// which case nothing is recorded.
    pub async fn report(
        &self,
        participant_id: ParticipantId,
        kind: ViolationKind,
        detail: String,
        timestamp: SystemTime,
    ) -> Option<ThrottleDecision> {
        let event = ViolationEvent {
            participant_id,
            kind: kind.clone(),
            detail,
            timestamp,
        };

        // 1. Bounded history plus counter, unconditional.
        {
            let mut registry = self.registry.lock().await;
            if !registry.record_violation(event.clone()) {
                debug!(participant = %participant_id, "violation from unknown participant dropped");
                return None;
            }
        }

        // 2. Activity store, unconditional.  A store fault is surfaced once
        //    per session; the pipeline keeps going either way.
        if let Err(e) = self.store.append_violation(&event).await {
            if !self.store_fault_reported.swap(true, Ordering::Relaxed) {
                warn!("activity store rejected a violation: {e}");
                let _ = self
                    .events
                    .send(TeacherEvent::PersistenceFault {
                        detail: e.to_string(),
                    })
                    .await;
            } else {
                debug!("activity store still failing: {e}");
            }
        }

        // 3. Throttle decides live visibility.
        let decision = self
            .throttler
            .lock()
            .expect("lock poisoned")
            .record_at(participant_id, kind, Instant::now());

        if decision.visible {
            let _ = self
                .events
                .send(TeacherEvent::ViolationObserved {
                    event,
                    display_count: decision.display_count,
                })
                .await;
        }

        Some(decision)
    }

    /// Records the session summary; same single-fault policy as violations.
    pub async fn append_session_record(&self, record: &SessionRecord) {
        if let Err(e) = self.store.append_session_record(record).await {
            if !self.store_fault_reported.swap(true, Ordering::Relaxed) {
                warn!("activity store rejected a session record: {e}");
                let _ = self
                    .events
                    .send(TeacherEvent::PersistenceFault {
                        detail: e.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Clears a departed participant's throttle windows.
    pub fn forget(&self, participant_id: ParticipantId) {
        self.throttler
            .lock()
            .expect("lock poisoned")
            .forget(participant_id);
    }

    /// Re-arms the one-fault-per-session latch.  Called at session start.
    pub fn reset_fault_latch(&self) {
        self.store_fault_reported.store(false, Ordering::Relaxed);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use focusclass_core::Role;
    use uuid::Uuid;

    // ── Throttler ─────────────────────────────────────────────────────────────

    fn throttler() -> ViolationThrottler {
        ViolationThrottler::new(ThrottlePolicy::default())
    }

    #[test]
    fn test_first_event_is_visible_with_count_one() {
        // Arrange
        let mut t = throttler();

        // Act
        let decision = t.record_at(Uuid::new_v4(), ViolationKind::FocusLoss, Instant::now());

        // Assert
        assert!(decision.visible);
        assert_eq!(decision.display_count, 1);
    }

    #[test]
    fn test_ten_events_in_one_window_show_three_then_suppress() {
        // Arrange
        let mut t = throttler();
        let id = Uuid::new_v4();
        let base = Instant::now();

        // Act – all ten land within one second
        let decisions: Vec<ThrottleDecision> = (0..10)
            .map(|i| {
                t.record_at(
                    id,
                    ViolationKind::FocusLoss,
                    base + Duration::from_millis(i * 100),
                )
            })
            .collect();

        // Assert – exactly 1, 2, 3 visible, the rest suppressed
        let visible: Vec<u32> = decisions
            .iter()
            .filter(|d| d.visible)
            .map(|d| d.display_count)
            .collect();
        assert_eq!(visible, vec![1, 2, 3]);
        assert_eq!(decisions.iter().filter(|d| !d.visible).count(), 7);
        assert_eq!(t.suppressed_in_window(id, &ViolationKind::FocusLoss), 7);
    }

    #[test]
    fn test_window_lapse_resets_to_display_count_one() {
        // Arrange – exhaust a window
        let mut t = throttler();
        let id = Uuid::new_v4();
        let base = Instant::now();
        for i in 0..5 {
            t.record_at(id, ViolationKind::TabSwitch, base + Duration::from_millis(i * 200));
        }

        // Act – next event lands after the 5 s window has elapsed
        let decision = t.record_at(id, ViolationKind::TabSwitch, base + Duration::from_secs(6));

        // Assert
        assert!(decision.visible);
        assert_eq!(decision.display_count, 1);
        assert_eq!(
            t.suppressed_in_window(id, &ViolationKind::TabSwitch),
            0,
            "reset clears the suppressed counter"
        );
    }

    #[test]
    fn test_four_low_battery_in_two_seconds_show_three() {
        // 4 same-kind events inside one window: three notifications, the
        // third carrying display_count 3, the fourth suppressed.
        let mut t = throttler();
        let id = Uuid::new_v4();
        let base = Instant::now();

        let decisions: Vec<ThrottleDecision> = (0..4)
            .map(|i| {
                t.record_at(
                    id,
                    ViolationKind::LowBattery,
                    base + Duration::from_millis(i * 500),
                )
            })
            .collect();

        assert!(decisions[0].visible && decisions[0].display_count == 1);
        assert!(decisions[1].visible && decisions[1].display_count == 2);
        assert!(decisions[2].visible && decisions[2].display_count == 3);
        assert!(!decisions[3].visible);
    }

    #[test]
    fn test_throttle_keys_are_independent_per_kind_and_participant() {
        // Arrange – saturate (a, FocusLoss)
        let mut t = throttler();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Instant::now();
        for _ in 0..5 {
            t.record_at(a, ViolationKind::FocusLoss, base);
        }

        // Act / Assert – other keys are untouched
        let other_kind = t.record_at(a, ViolationKind::TabSwitch, base);
        assert!(other_kind.visible);
        assert_eq!(other_kind.display_count, 1);

        let other_participant = t.record_at(b, ViolationKind::FocusLoss, base);
        assert!(other_participant.visible);
        assert_eq!(other_participant.display_count, 1);
    }

    #[test]
    fn test_custom_policy_is_honoured() {
        // Arrange – tight policy: 1 s window, 2 visible
        let mut t = ViolationThrottler::new(ThrottlePolicy {
            window: Duration::from_secs(1),
            visible_per_window: 2,
        });
        let id = Uuid::new_v4();
        let base = Instant::now();

        // Act / Assert
        assert!(t.record_at(id, ViolationKind::FocusLoss, base).visible);
        assert!(t
            .record_at(id, ViolationKind::FocusLoss, base + Duration::from_millis(100))
            .visible);
        assert!(
            !t.record_at(id, ViolationKind::FocusLoss, base + Duration::from_millis(200))
                .visible
        );
        // 1.5 s later the 1 s window has lapsed
        assert!(t
            .record_at(id, ViolationKind::FocusLoss, base + Duration::from_millis(1700))
            .visible);
    }

    #[test]
    fn test_forget_clears_only_that_participant() {
        // Arrange
        let mut t = throttler();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let base = Instant::now();
        t.record_at(a, ViolationKind::FocusLoss, base);
        t.record_at(a, ViolationKind::TabSwitch, base);
        t.record_at(b, ViolationKind::FocusLoss, base);
        assert_eq!(t.tracked_keys(), 3);

        // Act
        t.forget(a);

        // Assert – b's window survives, so their next event is occurrence 2
        assert_eq!(t.tracked_keys(), 1);
        let decision = t.record_at(b, ViolationKind::FocusLoss, base + Duration::from_millis(10));
        assert_eq!(decision.display_count, 2);
    }

    // ── Pipeline ──────────────────────────────────────────────────────────────

    fn registry_with_one() -> (Arc<tokio::sync::Mutex<ClientRegistry>>, ParticipantId) {
        let mut registry = ClientRegistry::new();
        let id = registry.register("Sam", "10.0.0.9:40000".parse().unwrap(), Role::Observer);
        (Arc::new(tokio::sync::Mutex::new(registry)), id)
    }

    fn pipeline_with(
        store: MockActivityStore,
    ) -> (
        ViolationPipeline,
        ParticipantId,
        mpsc::Receiver<TeacherEvent>,
        Arc<tokio::sync::Mutex<ClientRegistry>>,
    ) {
        let (registry, id) = registry_with_one();
        let (tx, rx) = mpsc::channel(64);
        let pipeline = ViolationPipeline::new(
            Arc::clone(&registry),
            Arc::new(store),
            tx,
            ThrottlePolicy::default(),
        );
        (pipeline, id, rx, registry)
    }

    #[tokio::test]
    async fn test_report_records_persists_and_emits() {
        // Arrange
        let mut store = MockActivityStore::new();
        store
            .expect_append_violation()
            .withf(|e| e.kind == ViolationKind::TabSwitch && e.detail == "reddit")
            .times(1)
            .returning(|_| Ok(()));
        let (pipeline, id, mut rx, registry) = pipeline_with(store);

        // Act
        let decision = pipeline
            .report(id, ViolationKind::TabSwitch, "reddit".into(), SystemTime::now())
            .await
            .expect("known participant");

        // Assert
        assert!(decision.visible);
        match rx.try_recv().unwrap() {
            TeacherEvent::ViolationObserved { event, display_count } => {
                assert_eq!(event.participant_id, id);
                assert_eq!(display_count, 1);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let reg = registry.lock().await;
        assert_eq!(reg.get(id).unwrap().telemetry.violation_count, 1);
    }

    #[tokio::test]
    async fn test_suppressed_reports_still_reach_history_and_store() {
        // Arrange
        let mut store = MockActivityStore::new();
        store.expect_append_violation().times(10).returning(|_| Ok(()));
        let (pipeline, id, mut rx, registry) = pipeline_with(store);

        // Act – 10 same-kind reports back to back
        for i in 0..10 {
            pipeline
                .report(
                    id,
                    ViolationKind::FocusLoss,
                    format!("burst {i}"),
                    SystemTime::now(),
                )
                .await;
        }

        // Assert – 3 live events, full history
        let mut live = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, TeacherEvent::ViolationObserved { .. }) {
                live += 1;
            }
        }
        assert_eq!(live, 3);

        let reg = registry.lock().await;
        let participant = reg.get(id).unwrap();
        assert_eq!(participant.telemetry.violation_count, 10);
        assert_eq!(participant.history.len(), 10);
    }

    #[tokio::test]
    async fn test_store_fault_is_surfaced_once_per_session() {
        // Arrange – the store rejects everything
        let mut store = MockActivityStore::new();
        store
            .expect_append_violation()
            .times(5)
            .returning(|_| Err(StoreError::Unavailable("disk full".into())));
        let (pipeline, id, mut rx, _registry) = pipeline_with(store);

        // Act
        for _ in 0..5 {
            pipeline
                .report(id, ViolationKind::FocusLoss, "x".into(), SystemTime::now())
                .await;
        }

        // Assert – exactly one PersistenceFault, and violations still shown
        let mut faults = 0;
        let mut visible = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                TeacherEvent::PersistenceFault { .. } => faults += 1,
                TeacherEvent::ViolationObserved { .. } => visible += 1,
                _ => {}
            }
        }
        assert_eq!(faults, 1);
        assert_eq!(visible, 3, "store faults must not mute live display");
    }

    #[tokio::test]
    async fn test_fault_latch_rearms_for_a_new_session() {
        // Arrange
        let mut store = MockActivityStore::new();
        store
            .expect_append_violation()
            .times(2)
            .returning(|_| Err(StoreError::Unavailable("offline".into())));
        let (pipeline, id, mut rx, _registry) = pipeline_with(store);

        // Act – fault, re-arm (as a session restart would), fault again
        pipeline
            .report(id, ViolationKind::FocusLoss, "a".into(), SystemTime::now())
            .await;
        pipeline.reset_fault_latch();
        pipeline
            .report(id, ViolationKind::FocusLoss, "b".into(), SystemTime::now())
            .await;

        // Assert
        let faults = std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, TeacherEvent::PersistenceFault { .. }))
            .count();
        assert_eq!(faults, 2);
    }

    #[tokio::test]
    async fn test_unknown_participant_is_dropped_entirely() {
        // Arrange – store must never be called
        let store = MockActivityStore::new();
        let (pipeline, _id, mut rx, _registry) = pipeline_with(store);

        // Act
        let decision = pipeline
            .report(
                Uuid::new_v4(),
                ViolationKind::FocusLoss,
                "ghost".into(),
                SystemTime::now(),
            )
            .await;

        // Assert
        assert!(decision.is_none());
        assert!(rx.try_recv().is_err());
    }
}
