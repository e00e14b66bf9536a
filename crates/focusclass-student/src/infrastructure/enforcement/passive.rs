//! The enforcer that enforces nothing.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::application::enforce_focus::{FocusEnforcer, ObservedViolation};

/// Tracks the teacher's enable/disable directive and nothing else.
///
/// With no OS hooks there are no violations to observe and no keystrokes
/// to count, and the machine is always reported compliant.  This keeps the
/// whole reporting pipeline honest on platforms where no watcher is wired
/// up yet.
#[derive(Default)]
pub struct PassiveEnforcer {
    enabled: AtomicBool,
}

impl PassiveEnforcer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FocusEnforcer for PassiveEnforcer {
    async fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if enabled {
            info!("focus enforcement enabled");
        } else {
            info!("focus enforcement disabled");
        }
    }

    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn focus_active(&self) -> bool {
        true
    }

    async fn drain_violations(&self) -> Vec<ObservedViolation> {
        Vec::new()
    }

    async fn take_keystroke_delta(&self) -> u32 {
        0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
