//! The classroom session: lifecycle, join credentials, and snapshots.
//!
//! A session moves through exactly three states:
//!
//! ```text
//! Created ──activate()──▶ Active ──end()──▶ Ended (terminal)
//! ```
//!
//! `Ended` is a dead end.  Starting class again always builds a fresh
//! [`Session`] with a new id and new credentials; old codes and passwords
//! must never come back to life.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Length of the join code shown to the class.
pub const CODE_LEN: usize = 8;

/// Length of the session password. Longer and mixed-case: unlike the code it
/// is pasted, not typed from a projector.
pub const PASSWORD_LEN: usize = 12;

/// Join codes avoid lowercase so they read unambiguously on a projector.
const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Errors raised by session lifecycle transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// A session is already active; stop it before starting another.
    #[error("a session is already active")]
    AlreadyActive,

    /// The session has ended and cannot be restarted; create a fresh one.
    #[error("session has ended")]
    Ended,
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SessionStatus {
    /// Built but not yet accepting joins (transport not bound yet).
    Created = 0x01,
    /// Accepting joins and traffic.
    Active = 0x02,
    /// Terminal. Credentials are invalid from this point on.
    Ended = 0x03,
}

impl TryFrom<u8> for SessionStatus {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(SessionStatus::Created),
            0x02 => Ok(SessionStatus::Active),
            0x03 => Ok(SessionStatus::Ended),
            _ => Err(()),
        }
    }
}

/// One run of a class: identity, credentials, and lifecycle state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Fresh v4 uuid per session.
    pub id: Uuid,
    /// The presenter's display label ("Ms Okafor — Year 9 Chemistry").
    pub name: String,
    /// Short join code the class types in.
    pub code: String,
    /// Password distributed alongside the code.
    pub password: String,
    pub created_at: SystemTime,
    pub status: SessionStatus,
    /// Whether focus enforcement is currently demanded of the class.
    pub focus_mode: bool,
}

impl Session {
    /// Builds a `Created` session with freshly generated credentials.
    pub fn new(name: impl Into<String>) -> Self {
        let mut rng = rand::thread_rng();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            code: random_string(&mut rng, CODE_CHARSET, CODE_LEN),
            password: random_string(&mut rng, PASSWORD_CHARSET, PASSWORD_LEN),
            created_at: SystemTime::now(),
            status: SessionStatus::Created,
            focus_mode: false,
        }
    }

    /// Marks the session live once the transport is bound.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyActive`] when already live,
    /// [`SessionError::Ended`] when the session is terminal.
    pub fn activate(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Created => {
                self.status = SessionStatus::Active;
                Ok(())
            }
            SessionStatus::Active => Err(SessionError::AlreadyActive),
            SessionStatus::Ended => Err(SessionError::Ended),
        }
    }

    /// Ends the session. Idempotent: ending an ended session is a no-op.
    pub fn end(&mut self) {
        self.status = SessionStatus::Ended;
    }

    /// Exact, case-sensitive credential check. Only an `Active` session
    /// admits anyone.
    pub fn validate_join(&self, code: &str, password: &str) -> bool {
        self.status == SessionStatus::Active && self.code == code && self.password == password
    }

    /// Snapshot for `Welcome` payloads and the metadata endpoint.
    ///
    /// Participant count and sharing state live outside the session (registry
    /// and broadcaster respectively), so the caller supplies them.
    pub fn snapshot(&self, participant_count: u32, sharing_active: bool) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            code: self.code.clone(),
            status: self.status,
            focus_mode: self.focus_mode,
            sharing_active,
            participant_count,
        }
    }
}

/// Serializable summary of a session, safe to hand to students and dashboards.
/// Deliberately excludes the password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub code: String,
    pub status: SessionStatus,
    pub focus_mode: bool,
    pub sharing_active: bool,
    pub participant_count: u32,
}

fn random_string(rng: &mut impl Rng, charset: &[u8], len: usize) -> String {
    (0..len)
        .map(|_| charset[rng.gen_range(0..charset.len())] as char)
        .collect()
}
