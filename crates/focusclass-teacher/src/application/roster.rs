//! RosterUseCase: the in-memory registry of session participants.
//!
//! The `ClientRegistry` is the teacher's in-memory database of everyone in
//! the current session.  Each entry tracks:
//!
//! - The participant's server-assigned UUID, display name, and socket address.
//! - Telemetry (battery, focus compliance, keystrokes) updated as reports
//!   arrive.
//! - The bounded violation history and a liveness clock refreshed by any
//!   inbound traffic.
//!
//! # HashMap plus insertion order
//!
//! A `HashMap<ParticipantId, Participant>` gives O(1) lookup by UUID, but
//! iteration order of a `HashMap` is arbitrary and the class list must not
//! reshuffle every refresh.  A parallel `Vec<ParticipantId>` records join
//! order; all listing operations walk that vector, so a student keeps their
//! row for the whole lesson.
//!
//! The registry is stored behind an `Arc<Mutex<…>>` so that connection
//! tasks, the heartbeat sweep, and control operations can share it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use focusclass_core::domain::participant::Participant;
use focusclass_core::{ParticipantId, Role, Telemetry, TelemetryPatch, ViolationEvent};
use uuid::Uuid;

/// In-memory registry of all participants in the current session.
#[derive(Default)]
pub struct ClientRegistry {
    participants: HashMap<ParticipantId, Participant>,
    /// Join order; drives every listing so the class view is stable.
    order: Vec<ParticipantId>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly authenticated connection and returns the
    /// server-assigned participant id.
    ///
    /// The id is always generated here; a client-supplied identity is never
    /// trusted.  `remote_addr` comes from the accepted socket.
    pub fn register(
        &mut self,
        display_name: impl Into<String>,
        remote_addr: SocketAddr,
        role: Role,
    ) -> ParticipantId {
        let id = Uuid::new_v4();
        self.participants
            .insert(id, Participant::new(id, display_name, remote_addr, role));
        self.order.push(id);
        id
    }

    /// Removes a participant, returning their final state so the caller can
    /// build the leave notification (name, last telemetry).
    pub fn deregister(&mut self, id: ParticipantId) -> Option<Participant> {
        let participant = self.participants.remove(&id)?;
        self.order.retain(|entry| *entry != id);
        Some(participant)
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Merges a telemetry report into the participant's state and returns
    /// the merged result.  `None` for an unknown id.
    pub fn update_telemetry(
        &mut self,
        id: ParticipantId,
        patch: &TelemetryPatch,
    ) -> Option<Telemetry> {
        let participant = self.participants.get_mut(&id)?;
        participant.telemetry.apply(patch);
        Some(participant.telemetry)
    }

    /// Appends a violation to the participant's bounded history and bumps
    /// their counter.  Returns `false` for an unknown id.
    pub fn record_violation(&mut self, event: ViolationEvent) -> bool {
        match self.participants.get_mut(&event.participant_id) {
            Some(participant) => {
                participant.record_violation(event);
                true
            }
            None => false,
        }
    }

    /// Refreshes a participant's liveness clock at `now`.  Any inbound
    /// message counts as proof of life, not just heartbeats.
    pub fn touch_at(&mut self, id: ParticipantId, now: Instant) -> bool {
        match self.participants.get_mut(&id) {
            Some(participant) => {
                participant.touch_at(now);
                true
            }
            None => false,
        }
    }

    /// All participants in join order.
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.order
            .iter()
            .filter_map(move |id| self.participants.get(id))
    }

    /// Participants with the given role, in join order.
    pub fn list_by_role(&self, role: Role) -> Vec<&Participant> {
        self.iter().filter(|p| p.role == role).collect()
    }

    /// Ids of participants with the given role, in join order.  Used by the
    /// transport fan-out, which only needs ids.
    pub fn ids_by_role(&self, role: Role) -> Vec<ParticipantId> {
        self.iter()
            .filter(|p| p.role == role)
            .map(|p| p.id)
            .collect()
    }

    /// Ids of participants silent for longer than `threshold` as of `now`.
    pub fn stale_participants(&self, now: Instant, threshold: Duration) -> Vec<ParticipantId> {
        self.iter()
            .filter(|p| p.is_stale(now, threshold))
            .map(|p| p.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Empties the registry at session end, returning how many entries were
    /// dropped.
    pub fn clear(&mut self) -> usize {
        let count = self.participants.len();
        self.participants.clear();
        self.order.clear();
        count
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
