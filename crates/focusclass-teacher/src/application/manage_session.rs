//! ManageSessionUseCase: the session lifecycle state machine.
//!
//! The `SessionManager` owns the teacher's current [`Session`], if any.
//! It enforces the one-live-session rule and is the single authority for
//! join-credential validation.
//!
//! # Session lifecycle (for beginners)
//!
//! ```text
//! (none)  ──begin()──▶  Created  ──mark_active()──▶  Active  ──end()──▶  Ended
//!                          │                            ▲
//!                          └──── begin() again ─────────┘  (retry after a
//!                                                           failed bind)
//! ```
//!
//! - `begin` builds a `Created` session with fresh credentials.  It refuses
//!   only while an `Active` session exists; a leftover `Created` session
//!   (a previous start whose transport bind failed) or an `Ended` one is
//!   simply replaced.
//! - `mark_active` flips `Created` to `Active` once the transports are
//!   bound.  Joins are only accepted from that point.
//! - `end` is idempotent and returns the ended session exactly once, so the
//!   caller can persist a session record without double-writing.

use focusclass_core::{Session, SessionError, SessionSnapshot, SessionStatus};

/// Owns the current session and its lifecycle transitions.
///
/// The manager is stored behind an `Arc<Mutex<…>>` in the service so that
/// connection tasks (credential checks) and control operations (start/stop)
/// can share it.
#[derive(Default)]
pub struct SessionManager {
    current: Option<Session>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh `Created` session, replacing any non-active leftover.
    ///
    /// Returns a clone of the new session so the caller can read the
    /// generated credentials without holding the lock.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyActive`] while a session is `Active`.
    pub fn begin(&mut self, name: impl Into<String>) -> Result<Session, SessionError> {
        if self.status() == Some(SessionStatus::Active) {
            return Err(SessionError::AlreadyActive);
        }
        let session = Session::new(name);
        self.current = Some(session.clone());
        Ok(session)
    }

    /// Marks the current session live.  Called after the control and
    /// metadata transports have bound successfully.
    ///
    /// # Errors
    ///
    /// Propagates [`SessionError`] from the transition; with no current
    /// session there is nothing to bring live, which behaves like `Ended`.
    pub fn mark_active(&mut self) -> Result<(), SessionError> {
        match self.current.as_mut() {
            Some(session) => session.activate(),
            None => Err(SessionError::Ended),
        }
    }

    /// Ends the current session.
    ///
    /// Idempotent: the first call on a live session returns the session in
    /// its final state (for the activity record); repeat calls and calls
    /// with no session return `None`.
    pub fn end(&mut self) -> Option<Session> {
        let session = self.current.as_mut()?;
        if session.status == SessionStatus::Ended {
            return None;
        }
        session.end();
        Some(session.clone())
    }

    /// Exact credential check against the current session.  Anything other
    /// than an `Active` session with matching code and password fails.
    pub fn validate_join(&self, code: &str, password: &str) -> bool {
        self.current
            .as_ref()
            .map(|s| s.validate_join(code, password))
            .unwrap_or(false)
    }

    /// True while a session is `Active`.
    pub fn is_active(&self) -> bool {
        self.status() == Some(SessionStatus::Active)
    }

    pub fn status(&self) -> Option<SessionStatus> {
        self.current.as_ref().map(|s| s.status)
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Flips the class-wide focus-mode flag on the active session.
    ///
    /// Returns the new value, or `None` when no session is active (the flag
    /// is meaningless outside a live session).
    pub fn set_focus_mode(&mut self, enabled: bool) -> Option<bool> {
        match self.current.as_mut() {
            Some(session) if session.status == SessionStatus::Active => {
                session.focus_mode = enabled;
                Some(enabled)
            }
            _ => None,
        }
    }

    /// Snapshot of the current session for `Welcome` payloads and the
    /// metadata endpoint.  `None` when no session exists.
    pub fn snapshot(
        &self,
        participant_count: u32,
        sharing_active: bool,
    ) -> Option<SessionSnapshot> {
        self.current
            .as_ref()
            .map(|s| s.snapshot(participant_count, sharing_active))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
