//! Application layer use cases for the teacher application.
//!
//! # What is the "application" layer? (for beginners)
//!
//! In Clean Architecture the *application* layer sits between the domain
//! (pure business rules) and the infrastructure (OS/network/storage).
//!
//! Use cases in this layer:
//!
//! - **Orchestrate** domain objects to fulfil a user goal (e.g., "decide
//!   whether this violation report is shown live or silently archived").
//! - **Depend on abstractions** (traits) rather than concrete implementations,
//!   so the infrastructure can be swapped without changing this code.
//! - **Contain no OS calls, no network I/O, no file system access**.
//!
//! # Sub-modules
//!
//! - **`manage_session`** – The session lifecycle state machine: start, stop,
//!   credential validation, focus-mode flag.  There is at most one live
//!   session at a time.
//!
//! - **`roster`** – Maintains the in-memory registry of every participant in
//!   the current session: identity, telemetry, liveness, violation history.
//!
//! - **`violations`** – The violation pipeline: unconditional recording plus
//!   the per-(participant, kind) throttle that keeps a misbehaving laptop
//!   from flooding the presenter's view.
//!
//! - **`sharing`** – The frame broadcaster: periodic capture/encode/fan-out
//!   of screen frames to the class, with live quality switching and directed
//!   single-student streams.
//!
//! - **`events`** – The event vocabulary the application layer emits towards
//!   whatever front end is attached (the CLI binary logs them).

pub mod events;
pub mod manage_session;
pub mod roster;
pub mod sharing;
pub mod violations;
