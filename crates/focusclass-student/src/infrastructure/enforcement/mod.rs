//! Focus-enforcement watchers.
//!
//! Platform watchers implement `FocusEnforcer` with real OS hooks: window
//! focus change notifications, foreground process scans, virtual-desktop
//! checks.  Those are per-OS and land here behind `#[cfg(target_os)]` when
//! they exist.  The crate ships two portable implementations:
//!
//! - [`passive::PassiveEnforcer`] – observes nothing and never objects;
//!   the default for machines without a platform watcher.
//! - [`scripted::ScriptedEnforcer`] – driven entirely by the test that
//!   owns it.

pub mod passive;
pub mod scripted;
