//! Application layer use cases for the student application.
//!
//! # What use cases does the student have?
//!
//! - **`enforce_focus`** – The seam to whatever watches this machine for
//!   focus violations.  The watcher itself is a black box behind the
//!   [`enforce_focus::FocusEnforcer`] trait; this module also owns the
//!   local debounce that keeps a flapping violation from flooding the wire.
//!
//! - **`reporting`** – The periodic chatter every connected student owes
//!   the teacher: heartbeats, battery telemetry, keystroke deltas, and the
//!   violations drained from the enforcer.
//!
//! - **`respond_screen`** – Answers the teacher's request to view this
//!   screen and, when approved, runs the student-to-teacher frame stream.
//!
//! All outbound traffic goes through the [`link::TeacherLink`] trait so no
//! use case ever touches a socket; the network layer implements it.

pub mod enforce_focus;
pub mod link;
pub mod reporting;
pub mod respond_screen;
