//! Infrastructure layer for the student application.
//!
//! Contains the OS-facing adapters: the TCP connection to the teacher,
//! focus-enforcement watchers, and hardware probes.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `focusclass_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – TCP client that joins the teacher's session, reads
//!   framed messages from the socket, and surfaces them as events.
//!
//! - **`enforcement`** – Implementations of the `FocusEnforcer` seam.  Real
//!   platform watchers (window-focus hooks, process scans) would live here;
//!   the crate ships a passive watcher and a scripted one for tests.
//!
//! - **`battery`** – Implementations of the `BatteryProbe` seam.

pub mod battery;
pub mod enforcement;
pub mod network;
