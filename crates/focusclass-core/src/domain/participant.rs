//! Participants: identity, roles, telemetry, and the bounded violation history.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Instant, SystemTime};
use uuid::Uuid;

/// Server-assigned participant identity, valid for one session.
pub type ParticipantId = Uuid;

/// How many violations are remembered per participant.  Older entries are
/// evicted first; a student with a wild afternoon does not grow memory
/// without bound.
pub const VIOLATION_HISTORY_CAP: usize = 50;

// ── Roles and auth ────────────────────────────────────────────────────────────

/// What a participant is allowed to do in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    /// Runs the session, sees violations, shares the screen. There is exactly
    /// one: the local teacher process.
    Presenter = 0x01,
    /// Joins remotely, reports telemetry and violations, views frames.
    Observer = 0x02,
}

impl TryFrom<u8> for Role {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Role::Presenter),
            0x02 => Ok(Role::Observer),
            _ => Err(()),
        }
    }
}

/// Authentication progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Connected, join not yet validated. Never stored in the registry.
    PendingAuth,
    Authenticated,
    Rejected,
}

// ── Violations ────────────────────────────────────────────────────────────────

/// Category of a focus violation.
///
/// The set is open-ended: enforcers ship their own detectors, so unknown
/// kinds travel as [`ViolationKind::Other`] rather than failing decode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    /// The monitored window lost focus.
    FocusLoss,
    /// Switched browser tabs while locked.
    TabSwitch,
    /// Minimized or hid the monitored window.
    WindowMinimize,
    /// Launched a process on the blocklist.
    ForbiddenProcess,
    /// Battery below the warning threshold while not charging.
    LowBattery,
    /// Anything this build does not know by name.
    Other(String),
}

impl ViolationKind {
    /// Canonical snake_case name used on the wire and in logs.
    pub fn as_str(&self) -> &str {
        match self {
            ViolationKind::FocusLoss => "focus_loss",
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::WindowMinimize => "window_minimize",
            ViolationKind::ForbiddenProcess => "forbidden_process",
            ViolationKind::LowBattery => "low_battery",
            ViolationKind::Other(s) => s,
        }
    }

    /// Parses a wire name, mapping unknown names to [`ViolationKind::Other`].
    pub fn from_wire(s: &str) -> Self {
        match s {
            "focus_loss" => ViolationKind::FocusLoss,
            "tab_switch" => ViolationKind::TabSwitch,
            "window_minimize" => ViolationKind::WindowMinimize,
            "forbidden_process" => ViolationKind::ForbiddenProcess,
            "low_battery" => ViolationKind::LowBattery,
            other => ViolationKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded violation.
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationEvent {
    pub participant_id: ParticipantId,
    pub kind: ViolationKind,
    pub detail: String,
    pub timestamp: SystemTime,
}

/// FIFO ring of the most recent violations for one participant.
#[derive(Debug, Clone)]
pub struct ViolationHistory {
    entries: VecDeque<ViolationEvent>,
    capacity: usize,
}

impl ViolationHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an event, evicting the oldest entry when full.
    pub fn push(&mut self, event: ViolationEvent) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest → newest.
    pub fn iter(&self) -> impl Iterator<Item = &ViolationEvent> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&ViolationEvent> {
        self.entries.back()
    }
}

impl Default for ViolationHistory {
    fn default() -> Self {
        Self::new(VIOLATION_HISTORY_CAP)
    }
}

// ── Telemetry ─────────────────────────────────────────────────────────────────

/// Rolled-up device status for one participant as last reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Telemetry {
    pub battery_percent: u8,
    pub charging: bool,
    pub focus_compliant: bool,
    /// Running total across the session.
    pub keystroke_count: u32,
    /// Total violations recorded, including throttled ones.
    pub violation_count: u32,
}

impl Default for Telemetry {
    fn default() -> Self {
        // Optimistic defaults: a student is assumed fine until a report says
        // otherwise.
        Self {
            battery_percent: 100,
            charging: true,
            focus_compliant: true,
            keystroke_count: 0,
            violation_count: 0,
        }
    }
}

impl Telemetry {
    /// Merges a report into the current state.  Absent fields leave the
    /// existing value untouched; the keystroke delta accumulates.
    pub fn apply(&mut self, patch: &TelemetryPatch) {
        if let Some(battery) = patch.battery_percent {
            self.battery_percent = battery;
        }
        if let Some(charging) = patch.charging {
            self.charging = charging;
        }
        if let Some(focus) = patch.focus_compliant {
            self.focus_compliant = focus;
        }
        if let Some(delta) = patch.keystroke_delta {
            self.keystroke_count = self.keystroke_count.saturating_add(delta);
        }
    }
}

/// Partial telemetry update.  `None` means "not reported this time", never
/// "reset to default" — students report batteries and keystrokes on
/// different timers, so most patches are sparse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryPatch {
    pub battery_percent: Option<u8>,
    pub charging: Option<bool>,
    pub focus_compliant: Option<bool>,
    /// Keystrokes observed since the previous report.
    pub keystroke_delta: Option<u32>,
}

// ── Participant ───────────────────────────────────────────────────────────────

/// A registered member of the session.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    /// Taken from the accepted socket, never from a payload.
    pub remote_addr: SocketAddr,
    pub role: Role,
    pub auth: AuthState,
    pub joined_at: SystemTime,
    /// Monotonic instant of the last inbound traffic from this participant.
    last_seen: Instant,
    pub telemetry: Telemetry,
    pub history: ViolationHistory,
}

impl Participant {
    /// Only validated connections become participants, so registration
    /// implies `Authenticated`.
    pub fn new(
        id: ParticipantId,
        display_name: impl Into<String>,
        remote_addr: SocketAddr,
        role: Role,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            remote_addr,
            role,
            auth: AuthState::Authenticated,
            joined_at: SystemTime::now(),
            last_seen: Instant::now(),
            telemetry: Telemetry::default(),
            history: ViolationHistory::default(),
        }
    }

    /// Refreshes the liveness clock at `now`.  Callers pass `Instant::now()`
    /// in production and fabricated instants in tests.
    pub fn touch_at(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// True when no traffic arrived for longer than `threshold` as of `now`.
    pub fn is_stale(&self, now: Instant, threshold: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > threshold
    }

    /// Records a violation in the bounded history and bumps the counter.
    pub fn record_violation(&mut self, event: ViolationEvent) {
        self.telemetry.violation_count = self.telemetry.violation_count.saturating_add(1);
        self.history.push(event);
    }
}
