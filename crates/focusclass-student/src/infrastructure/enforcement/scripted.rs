//! Scripted enforcer for tests.
//!
//! # Why a scripted enforcer?
//!
//! Real focus watchers hook OS facilities that:
//!
//! - Require a desktop session to run at all.
//! - React to the *test machine's* actual window state, which the test
//!   cannot control.
//! - Cannot be told to produce a violation on demand.
//!
//! The `ScriptedEnforcer` replaces the hooks with knobs.  A test pushes the
//! violations it wants observed, sets the focus state it wants reported,
//! and credits keystrokes directly; the reporting pipeline then behaves
//! exactly as it would against a real watcher.
//!
//! # Usage in tests
//!
//! ```ignore
//! let enforcer = Arc::new(ScriptedEnforcer::new());
//! enforcer.push_violation(ViolationKind::TabSwitch, "browser");
//! enforcer.set_focus_active(false);
//!
//! // The next enforcer poll drains the violation; the next heartbeat
//! // carries focus_active = false.
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use focusclass_core::ViolationKind;

use crate::application::enforce_focus::{FocusEnforcer, ObservedViolation};

/// An enforcer driven entirely by the test that owns it.
pub struct ScriptedEnforcer {
    enabled: AtomicBool,
    focus_active: AtomicBool,
    pending: Mutex<Vec<ObservedViolation>>,
    keystrokes: AtomicU32,
}

impl ScriptedEnforcer {
    /// Starts disabled, compliant, and with nothing observed.
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            focus_active: AtomicBool::new(true),
            pending: Mutex::new(Vec::new()),
            keystrokes: AtomicU32::new(0),
        }
    }

    /// Queues a violation for the next drain.
    pub fn push_violation(&self, kind: ViolationKind, detail: &str) {
        self.pending
            .lock()
            .expect("lock poisoned")
            .push(ObservedViolation {
                kind,
                detail: detail.to_string(),
            });
    }

    /// Sets the focus state the next heartbeat will report.
    pub fn set_focus_active(&self, active: bool) {
        self.focus_active.store(active, Ordering::Relaxed);
    }

    /// Credits keystrokes to the counter.
    pub fn add_keystrokes(&self, count: u32) {
        self.keystrokes.fetch_add(count, Ordering::Relaxed);
    }
}

impl Default for ScriptedEnforcer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FocusEnforcer for ScriptedEnforcer {
    async fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    async fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn focus_active(&self) -> bool {
        self.focus_active.load(Ordering::Relaxed)
    }

    async fn drain_violations(&self) -> Vec<ObservedViolation> {
        std::mem::take(&mut *self.pending.lock().expect("lock poisoned"))
    }

    async fn take_keystroke_delta(&self) -> u32 {
        self.keystrokes.swap(0, Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
