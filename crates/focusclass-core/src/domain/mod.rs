//! Domain entities for FocusClass.
//!
//! This module contains pure business logic with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! Clean Architecture organises code into concentric layers.  The innermost
//! layer is called the **domain** (or "entities" layer).  Domain code:
//!
//! - Contains the core business rules of the application.
//! - Has **no** imports from OS APIs, network libraries, database drivers, or UI
//!   frameworks.
//! - Can be compiled and tested on any platform without any external setup.
//! - Defines the data types and operations that make the system uniquely what it
//!   is: in this case, a classroom session with credentials, the participants
//!   inside it, and the rules that govern their telemetry and violations.
//!
//! Code in outer layers (infrastructure, application, UI) depends on the domain,
//! but the domain never depends on them.  This makes the domain easy to unit-test
//! in isolation.

/// Session lifecycle, join credentials, and the shareable snapshot.
pub mod session;

/// Participants, their telemetry, and the bounded violation history.
pub mod participant;

/// Quality presets governing frame cadence, scale, and compression.
pub mod quality;
