//! Storage infrastructure: configuration and the activity log.
//!
//! Two adapters live here:
//!
//! - **`config`** – the TOML configuration file under the platform config
//!   directory, with per-field defaults so a missing or older file still
//!   loads.
//! - **`activity`** – the in-memory implementation of the activity store
//!   that the violation pipeline appends to.  A future build can swap in a
//!   SQLite-backed store behind the same trait without touching the
//!   application layer.

pub mod activity;
pub mod config;
