//! # focusclass-core
//!
//! Shared library for FocusClass containing the network protocol codec,
//! domain entities, and the frame media helpers used on both ends of a
//! screen-sharing stream.
//!
//! This crate is used by both the teacher and student applications.
//! It has zero dependencies on OS APIs, UI frameworks, or network sockets.
//!
//! # Architecture overview (for beginners)
//!
//! FocusClass is a LAN classroom coordinator: one **teacher** (the
//! presenter) runs a session that many **students** (observers) join with a
//! short code and password.  Once joined, students stream telemetry and
//! focus violations up to the teacher, and the teacher can push its screen
//! down to the class, all over plain TCP on the local network.
//!
//! This crate (`focusclass-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How bytes travel over the network.  Messages are
//!   encoded into a compact binary format (16-byte header + payload) and
//!   decoded back into typed Rust structs on the other end.
//!
//! - **`domain`** – Pure business logic with no OS dependencies: the
//!   session lifecycle and its credentials, participant state with
//!   telemetry and bounded violation history, and the quality presets that
//!   govern frame cadence.
//!
//! - **`media`** – JPEG encode/decode for shared frames and the
//!   `FrameSource` seam behind which real screen capture lives.  The crate
//!   ships a deterministic synthetic source so everything above the seam
//!   can run headless.

pub mod domain;
pub mod media;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `focusclass_core::ClassMessage` instead of the full module path.
pub use domain::participant::{
    AuthState, ParticipantId, Role, Telemetry, TelemetryPatch, ViolationEvent, ViolationHistory,
    ViolationKind,
};
pub use domain::quality::QualityPreset;
pub use domain::session::{Session, SessionError, SessionSnapshot, SessionStatus};
pub use media::{CodecError, EncodedFrame, FrameSource, PixelBuffer};
pub use protocol::codec::{decode_message, encode_message, ProtocolError};
pub use protocol::messages::ClassMessage;
pub use protocol::sequence::{FrameGate, SequenceCounter};
