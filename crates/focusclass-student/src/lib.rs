//! focusclass-student library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does focusclass-student do? (for beginners)
//!
//! The *student* is the observer side of a FocusClass session.  The teacher
//! shows a session code and password on the classroom screen; the student
//! application joins with them and then stays quietly connected for the
//! rest of the lesson.
//!
//! The student application:
//!
//! 1. Connects to the teacher over TCP and completes the Join handshake,
//!    receiving its server-assigned participant id and a session snapshot.
//! 2. Sends a heartbeat every few seconds so the teacher knows the machine
//!    is alive and whether its focus state is acceptable.
//! 3. Reports telemetry on slower cadences: battery level from a probe,
//!    keystroke deltas from the enforcer's counters.
//! 4. Forwards focus violations observed by the enforcer, debounced locally
//!    so a flapping window does not flood the wire.
//! 5. Reacts to teacher directives: `FocusMode` toggles enforcement, `Kick`
//!    and `SessionEnded` shut the link down, `ScreenSharing` and `Frame`
//!    carry the teacher's broadcast, and `ScreenRequest` asks this machine
//!    to stream its own screen back.

/// Application layer: use cases for the student.
pub mod application;

/// Infrastructure layer: network I/O, enforcement adapters, probes.
pub mod infrastructure;
