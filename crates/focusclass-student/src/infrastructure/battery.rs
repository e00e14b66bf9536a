//! Battery probes.
//!
//! A real deployment reads the OS battery API (`/sys/class/power_supply`
//! on Linux, `IOPMCopyBatteryInfo` on macOS, `GetSystemPowerStatus` on
//! Windows).  The [`FixedBatteryProbe`] stands in wherever that is not
//! wired up: desktops without a battery, tests, and headless demos.

use async_trait::async_trait;

use crate::application::reporting::{BatteryProbe, BatteryReading};

/// A probe that always reports the same reading.
pub struct FixedBatteryProbe {
    reading: BatteryReading,
}

impl FixedBatteryProbe {
    pub fn new(percent: u8, charging: bool) -> Self {
        Self {
            reading: BatteryReading { percent, charging },
        }
    }

    /// Full and charging: the reading a machine without a battery reports.
    pub fn full() -> Self {
        Self::new(100, true)
    }
}

#[async_trait]
impl BatteryProbe for FixedBatteryProbe {
    async fn read(&self) -> BatteryReading {
        self.reading
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
