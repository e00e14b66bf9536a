//! All FocusClass protocol message types.
//!
//! A session runs over a single TCP connection per student.  Control traffic
//! (join, heartbeat, violations, directives) and screen frames share that
//! connection; frames are marked droppable so transport queues can shed them
//! under pressure without ever shedding control messages.

use crate::domain::participant::{Role, TelemetryPatch, ViolationKind};
use crate::domain::quality::QualityPreset;
use crate::domain::session::SessionSnapshot;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Total size of the common message header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on a single payload.  A full-resolution JPEG frame stays well
/// under this; anything larger is a corrupt or hostile header.
pub const MAX_PAYLOAD_LEN: u32 = 8 * 1024 * 1024;

// ── Message kind codes ────────────────────────────────────────────────────────

/// All message kind codes defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    // Handshake and liveness (0x00–0x1F)
    Join = 0x01,
    Welcome = 0x02,
    Reject = 0x03,
    Heartbeat = 0x04,
    SessionEnded = 0x05,
    // Teacher directives (0x20–0x3F)
    FocusMode = 0x20,
    Kick = 0x21,
    ScreenRequest = 0x22,
    ScreenSharing = 0x23,
    // Student reports (0x40–0x5F)
    Violation = 0x40,
    Telemetry = 0x41,
    ScreenResponse = 0x42,
    // Media (0x60–0x6F)
    Frame = 0x60,
}

impl TryFrom<u8> for MessageKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageKind::Join),
            0x02 => Ok(MessageKind::Welcome),
            0x03 => Ok(MessageKind::Reject),
            0x04 => Ok(MessageKind::Heartbeat),
            0x05 => Ok(MessageKind::SessionEnded),
            0x20 => Ok(MessageKind::FocusMode),
            0x21 => Ok(MessageKind::Kick),
            0x22 => Ok(MessageKind::ScreenRequest),
            0x23 => Ok(MessageKind::ScreenSharing),
            0x40 => Ok(MessageKind::Violation),
            0x41 => Ok(MessageKind::Telemetry),
            0x42 => Ok(MessageKind::ScreenResponse),
            0x60 => Ok(MessageKind::Frame),
            _ => Err(()),
        }
    }
}

// ── Common message header ─────────────────────────────────────────────────────

/// 16-byte header prepended to every message on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    /// Protocol version; always [`PROTOCOL_VERSION`].
    pub version: u8,
    /// Identifies the payload type.
    pub kind: MessageKind,
    /// Length of the payload in bytes (not including this header).
    pub payload_length: u32,
    /// Monotonically increasing per-connection counter, stamped by the sender.
    pub sequence_number: u64,
}

// ── Per-message payload structs ───────────────────────────────────────────────

/// JOIN (0x01): sent by a student to authenticate against the active session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinMessage {
    /// Short session code as shown by the teacher (8 chars, A–Z / 0–9).
    pub code: String,
    /// Session password distributed alongside the code.
    pub password: String,
    /// Human-readable name shown in the roster.
    pub display_name: String,
    /// Requested role.  Only [`Role::Observer`] is accepted over the wire.
    pub role: Role,
}

/// Reason code carried by a REJECT (0x03).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RejectReason {
    /// Code or password did not match the active session.
    InvalidCredentials = 0x01,
    /// No session is currently active on this teacher.
    NoActiveSession = 0x02,
    /// Only observers may join remotely.
    UnsupportedRole = 0x03,
}

impl TryFrom<u8> for RejectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(RejectReason::InvalidCredentials),
            0x02 => Ok(RejectReason::NoActiveSession),
            0x03 => Ok(RejectReason::UnsupportedRole),
            _ => Err(()),
        }
    }
}

/// WELCOME (0x02): teacher accepts a join and assigns the participant id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WelcomeMessage {
    /// Server-assigned identity for the rest of the session.
    pub participant_id: Uuid,
    /// Snapshot of the session the student just entered.
    pub session: SessionSnapshot,
}

/// FOCUS_MODE (0x20): enable or disable focus enforcement.
///
/// `target` narrows the directive to a single participant; `None` addresses
/// every authenticated observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FocusModeMessage {
    pub enabled: bool,
    pub target: Option<Uuid>,
}

/// Start/stop marker inside a SCREEN_SHARING (0x23) notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SharingAction {
    Start = 0x01,
    Stop = 0x02,
}

impl TryFrom<u8> for SharingAction {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(SharingAction::Start),
            0x02 => Ok(SharingAction::Stop),
            _ => Err(()),
        }
    }
}

/// SCREEN_SHARING (0x23): broadcast notice that the teacher's stream changed
/// state, so students can show or tear down their viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSharingMessage {
    pub action: SharingAction,
    /// Monitor being shared (zero-based).
    pub monitor: u8,
    pub quality: QualityPreset,
}

/// VIOLATION (0x40): student reports a focus violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationMessage {
    pub kind: ViolationKind,
    /// Free-form description from the enforcer (window title, process name…).
    pub detail: String,
    /// Milliseconds since Unix epoch at the moment the enforcer fired.
    pub timestamp_ms: u64,
}

/// FRAME (0x60): one encoded screen frame.
///
/// `sequence` is the stream sequence (distinct from the header's connection
/// counter); receivers discard any frame that does not advance it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameMessage {
    pub sequence: u64,
    /// Monitor the frame was captured from (zero-based).
    pub monitor: u8,
    /// Pixel width after scaling.
    pub width: u32,
    /// Pixel height after scaling.
    pub height: u32,
    /// JPEG-encoded image data.
    pub data: Vec<u8>,
}

// ── Top-level message enum ────────────────────────────────────────────────────

/// All valid FocusClass messages, discriminated by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassMessage {
    Join(JoinMessage),
    Welcome(WelcomeMessage),
    Reject { reason: RejectReason },
    /// Liveness ping carrying the student's current focus-compliance flag.
    Heartbeat { focus_active: bool },
    SessionEnded,
    FocusMode(FocusModeMessage),
    Kick { participant_id: Uuid },
    /// Ask one student to start streaming its screen to the teacher.
    ScreenRequest { target: Uuid },
    ScreenSharing(ScreenSharingMessage),
    Violation(ViolationMessage),
    /// Periodic status report (0x41).  Fields absent from the patch leave the
    /// teacher-side value untouched.
    Telemetry(TelemetryPatch),
    /// Student's answer to a [`ClassMessage::ScreenRequest`].
    ScreenResponse { approved: bool },
    Frame(FrameMessage),
}

impl ClassMessage {
    /// Returns the [`MessageKind`] discriminant for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            ClassMessage::Join(_) => MessageKind::Join,
            ClassMessage::Welcome(_) => MessageKind::Welcome,
            ClassMessage::Reject { .. } => MessageKind::Reject,
            ClassMessage::Heartbeat { .. } => MessageKind::Heartbeat,
            ClassMessage::SessionEnded => MessageKind::SessionEnded,
            ClassMessage::FocusMode(_) => MessageKind::FocusMode,
            ClassMessage::Kick { .. } => MessageKind::Kick,
            ClassMessage::ScreenRequest { .. } => MessageKind::ScreenRequest,
            ClassMessage::ScreenSharing(_) => MessageKind::ScreenSharing,
            ClassMessage::Violation(_) => MessageKind::Violation,
            ClassMessage::Telemetry(_) => MessageKind::Telemetry,
            ClassMessage::ScreenResponse { .. } => MessageKind::ScreenResponse,
            ClassMessage::Frame(_) => MessageKind::Frame,
        }
    }

    /// Frames may be shed by a congested transport queue; control messages
    /// never are.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ClassMessage::Frame(_))
    }
}
