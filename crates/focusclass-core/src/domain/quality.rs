//! Quality presets for the screen-sharing stream.
//!
//! A preset bundles the three knobs that matter on a school LAN: how often
//! frames go out, how much the image is scaled down before encoding, and how
//! hard the JPEG encoder squeezes.  `Medium` is the default and targets the
//! classic one-frame-per-second classroom broadcast.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stream quality selection.  Switchable live; takes effect on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum QualityPreset {
    /// Half-scale, two seconds between frames. For congested networks.
    Low = 0x01,
    #[default]
    Medium = 0x02,
    /// Full scale at two frames per second. For demos on a wired LAN.
    High = 0x03,
}

impl QualityPreset {
    /// Time between capture ticks.
    pub fn frame_interval(self) -> Duration {
        match self {
            QualityPreset::Low => Duration::from_millis(2000),
            QualityPreset::Medium => Duration::from_millis(1000),
            QualityPreset::High => Duration::from_millis(500),
        }
    }

    /// Percentage of the original resolution kept at capture time.
    pub fn scale_percent(self) -> u32 {
        match self {
            QualityPreset::Low => 50,
            QualityPreset::Medium => 75,
            QualityPreset::High => 100,
        }
    }

    /// JPEG encoder quality (1–100).
    pub fn jpeg_quality(self) -> u8 {
        match self {
            QualityPreset::Low => 50,
            QualityPreset::Medium => 70,
            QualityPreset::High => 85,
        }
    }
}

impl TryFrom<u8> for QualityPreset {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(QualityPreset::Low),
            0x02 => Ok(QualityPreset::Medium),
            0x03 => Ok(QualityPreset::High),
            _ => Err(()),
        }
    }
}

impl fmt::Display for QualityPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
        };
        f.write_str(name)
    }
}

impl FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" => Ok(QualityPreset::High),
            other => Err(format!("unknown quality preset: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_trade_cadence_against_fidelity() {
        // Faster cadence must come with equal-or-better scale and quality.
        assert!(QualityPreset::Low.frame_interval() > QualityPreset::Medium.frame_interval());
        assert!(QualityPreset::Medium.frame_interval() > QualityPreset::High.frame_interval());
        assert!(QualityPreset::Low.scale_percent() < QualityPreset::High.scale_percent());
        assert!(QualityPreset::Low.jpeg_quality() < QualityPreset::High.jpeg_quality());
    }

    #[test]
    fn test_medium_is_the_one_second_classroom_default() {
        assert_eq!(QualityPreset::default(), QualityPreset::Medium);
        assert_eq!(QualityPreset::Medium.frame_interval(), Duration::from_secs(1));
        assert_eq!(QualityPreset::Medium.scale_percent(), 75);
        assert_eq!(QualityPreset::Medium.jpeg_quality(), 70);
    }

    #[test]
    fn test_wire_codes_round_trip() {
        for preset in [QualityPreset::Low, QualityPreset::Medium, QualityPreset::High] {
            assert_eq!(QualityPreset::try_from(preset as u8), Ok(preset));
        }
        assert!(QualityPreset::try_from(0x00).is_err());
    }

    #[test]
    fn test_config_names_parse_case_insensitively() {
        assert_eq!("low".parse::<QualityPreset>(), Ok(QualityPreset::Low));
        assert_eq!("Medium".parse::<QualityPreset>(), Ok(QualityPreset::Medium));
        assert_eq!("HIGH".parse::<QualityPreset>(), Ok(QualityPreset::High));
        assert!("ultra".parse::<QualityPreset>().is_err());
    }
}
