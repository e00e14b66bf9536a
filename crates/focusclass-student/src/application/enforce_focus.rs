//! The focus-enforcement seam and the local violation debounce.
//!
//! What counts as a violation is a platform question: window focus hooks,
//! process scans, virtual-desktop checks.  All of that hides behind the
//! [`FocusEnforcer`] trait; the application layer only drains what the
//! enforcer observed and decides whether each finding is worth a message.
//!
//! The debounce exists because enforcers tend to re-detect the same
//! condition on every scan.  A student alt-tabbing once should produce one
//! `Violation` on the wire, not one per enforcer tick, so repeats of the
//! same kind inside [`DEFAULT_VIOLATION_COOLDOWN`] are dropped locally.
//! The teacher applies its own throttling on top; this filter only trims
//! the obvious chatter at the source.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use focusclass_core::ViolationKind;

/// Same-kind repeats inside this window stay on the student machine.
pub const DEFAULT_VIOLATION_COOLDOWN: Duration = Duration::from_secs(1);

/// A violation the enforcer observed but nobody has reported yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedViolation {
    pub kind: ViolationKind,
    /// Free-form context from the watcher (window title, process name, …).
    pub detail: String,
}

/// Watches this machine for focus compliance.
///
/// Implementations own whatever OS hooks they need; callers only toggle
/// enforcement and drain results on a polling cadence.
#[async_trait]
pub trait FocusEnforcer: Send + Sync {
    /// Enables or disables enforcement, following the teacher's directive.
    async fn set_enabled(&self, enabled: bool);

    /// Whether enforcement is currently switched on.
    async fn is_enabled(&self) -> bool;

    /// True while the machine is in an acceptable focus state.
    ///
    /// With enforcement disabled there is nothing to violate, so
    /// implementations report `true`.
    async fn focus_active(&self) -> bool;

    /// Returns the violations observed since the last call and forgets them.
    async fn drain_violations(&self) -> Vec<ObservedViolation>;

    /// Keystrokes counted since the last call; the counter resets to zero.
    async fn take_keystroke_delta(&self) -> u32;
}

/// Drops same-kind violations that repeat inside a cooldown window.
pub struct ViolationCooldown {
    window: Duration,
    last_forwarded: HashMap<ViolationKind, Instant>,
}

impl ViolationCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_forwarded: HashMap::new(),
        }
    }

    /// Decides whether a violation of `kind` observed at `now` goes up the
    /// wire.  A forwarded violation restarts that kind's cooldown.
    pub fn should_forward(&mut self, kind: &ViolationKind, now: Instant) -> bool {
        if let Some(&previous) = self.last_forwarded.get(kind) {
            if now.duration_since(previous) < self.window {
                return false;
            }
        }
        self.last_forwarded.insert(kind.clone(), now);
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_violation_of_a_kind_is_forwarded() {
        // Arrange
        let mut cooldown = ViolationCooldown::new(Duration::from_secs(1));

        // Act / Assert
        assert!(cooldown.should_forward(&ViolationKind::TabSwitch, Instant::now()));
    }

    #[test]
    fn test_same_kind_repeat_inside_window_is_dropped() {
        // Arrange
        let mut cooldown = ViolationCooldown::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(cooldown.should_forward(&ViolationKind::TabSwitch, start));

        // Act – the same kind 200 ms later
        let repeat = cooldown.should_forward(
            &ViolationKind::TabSwitch,
            start + Duration::from_millis(200),
        );

        // Assert
        assert!(!repeat, "repeat inside the cooldown must be dropped");
    }

    #[test]
    fn test_different_kind_passes_during_another_kinds_cooldown() {
        // Arrange
        let mut cooldown = ViolationCooldown::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(cooldown.should_forward(&ViolationKind::TabSwitch, start));

        // Act / Assert – cooldowns are keyed per kind
        assert!(cooldown.should_forward(
            &ViolationKind::WindowMinimize,
            start + Duration::from_millis(100)
        ));
    }

    #[test]
    fn test_same_kind_passes_after_the_window_elapses() {
        // Arrange
        let mut cooldown = ViolationCooldown::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(cooldown.should_forward(&ViolationKind::FocusLoss, start));

        // Act
        let later = cooldown.should_forward(
            &ViolationKind::FocusLoss,
            start + Duration::from_millis(501),
        );

        // Assert
        assert!(later, "an elapsed cooldown must not suppress");
    }

    #[test]
    fn test_forwarded_violation_restarts_the_cooldown() {
        // Arrange
        let mut cooldown = ViolationCooldown::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(cooldown.should_forward(&ViolationKind::FocusLoss, start));
        assert!(cooldown.should_forward(&ViolationKind::FocusLoss, start + Duration::from_millis(600)));

        // Act – 400 ms after the *second* forward, still inside its window
        let inside_second_window = cooldown.should_forward(
            &ViolationKind::FocusLoss,
            start + Duration::from_millis(1_000),
        );

        // Assert
        assert!(!inside_second_window);
    }

    #[test]
    fn test_other_kinds_with_distinct_labels_cool_down_independently() {
        // Arrange
        let mut cooldown = ViolationCooldown::new(Duration::from_secs(1));
        let start = Instant::now();
        let gaming = ViolationKind::Other("gaming_overlay".to_string());
        let chat = ViolationKind::Other("chat_popup".to_string());

        // Act / Assert
        assert!(cooldown.should_forward(&gaming, start));
        assert!(cooldown.should_forward(&chat, start + Duration::from_millis(10)));
        assert!(!cooldown.should_forward(&gaming, start + Duration::from_millis(20)));
    }
}
