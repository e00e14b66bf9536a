//! Periodic reporting: the chatter every connected student owes the teacher.
//!
//! Four cadences share one task:
//!
//! - **Heartbeat** (default 10 s) – carries the enforcer's focus state so
//!   the roster can show compliance and the teacher's liveness sweep never
//!   mistakes this machine for gone.
//! - **Battery telemetry** (default 60 s) – reads the [`BatteryProbe`] and
//!   sends a patch with the level and charging flag.
//! - **Keystroke delta** (default 30 s) – drains the enforcer's keystroke
//!   counter; a zero delta sends nothing.
//! - **Enforcer poll** (default 500 ms) – drains observed violations,
//!   passes them through the per-kind cooldown, and forwards survivors.
//!
//! Every cadence fires once immediately on start, so the teacher sees a
//! heartbeat and a battery reading right after the join instead of waiting
//! out a full interval.  The task runs until its handle is aborted; all
//! sends are fire-and-forget through [`TeacherLink`].

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use focusclass_core::protocol::messages::ViolationMessage;
use focusclass_core::{ClassMessage, TelemetryPatch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::application::enforce_focus::{FocusEnforcer, ViolationCooldown};
use crate::application::link::TeacherLink;

/// A battery measurement at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryReading {
    pub percent: u8,
    pub charging: bool,
}

/// Reads the machine's battery state.
///
/// Desktops without a battery report a full, charging one; the teacher's
/// low-battery warning then never fires for them.
#[async_trait]
pub trait BatteryProbe: Send + Sync {
    async fn read(&self) -> BatteryReading;
}

/// Cadences for the reporting task.
#[derive(Debug, Clone)]
pub struct ReportingConfig {
    pub heartbeat_interval: Duration,
    pub telemetry_interval: Duration,
    pub keystroke_interval: Duration,
    /// How often the enforcer is drained for violations.
    pub enforcer_poll_interval: Duration,
    /// Same-kind violations inside this window are not re-sent.
    pub violation_cooldown: Duration,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            telemetry_interval: Duration::from_secs(60),
            keystroke_interval: Duration::from_secs(30),
            enforcer_poll_interval: Duration::from_millis(500),
            violation_cooldown: super::enforce_focus::DEFAULT_VIOLATION_COOLDOWN,
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Spawns the reporting task.  Abort the returned handle to stop it.
pub fn start_reporting(
    link: Arc<dyn TeacherLink>,
    enforcer: Arc<dyn FocusEnforcer>,
    battery: Arc<dyn BatteryProbe>,
    config: ReportingConfig,
) -> JoinHandle<()> {
    tokio::spawn(run_reporting(link, enforcer, battery, config))
}

async fn run_reporting(
    link: Arc<dyn TeacherLink>,
    enforcer: Arc<dyn FocusEnforcer>,
    battery: Arc<dyn BatteryProbe>,
    config: ReportingConfig,
) {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut telemetry = tokio::time::interval(config.telemetry_interval);
    let mut keystrokes = tokio::time::interval(config.keystroke_interval);
    let mut poll = tokio::time::interval(config.enforcer_poll_interval);
    let mut cooldown = ViolationCooldown::new(config.violation_cooldown);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let focus_active = enforcer.focus_active().await;
                link.send(&ClassMessage::Heartbeat { focus_active }).await;
            }
            _ = telemetry.tick() => {
                let reading = battery.read().await;
                let patch = TelemetryPatch {
                    battery_percent: Some(reading.percent),
                    charging: Some(reading.charging),
                    ..TelemetryPatch::default()
                };
                link.send(&ClassMessage::Telemetry(patch)).await;
            }
            _ = keystrokes.tick() => {
                let delta = enforcer.take_keystroke_delta().await;
                if delta > 0 {
                    let patch = TelemetryPatch {
                        keystroke_delta: Some(delta),
                        ..TelemetryPatch::default()
                    };
                    link.send(&ClassMessage::Telemetry(patch)).await;
                }
            }
            _ = poll.tick() => {
                for violation in enforcer.drain_violations().await {
                    if cooldown.should_forward(&violation.kind, Instant::now()) {
                        link.send(&ClassMessage::Violation(ViolationMessage {
                            kind: violation.kind,
                            detail: violation.detail,
                            timestamp_ms: unix_millis(),
                        }))
                        .await;
                    } else {
                        debug!(kind = violation.kind.as_str(), "violation debounced locally");
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
