//! TOML-based configuration persistence for the teacher application.
//!
//! Reads and writes `AppConfig` to the platform-appropriate config file:
//! - Windows:  `%APPDATA%\FocusClass\config.toml`
//! - Linux:    `~/.config/focusclass/config.toml`
//! - macOS:    `~/Library/Application Support/FocusClass/config.toml`
//!
//! # Serde default values (for beginners)
//!
//! Every field carries `#[serde(default = "some_fn")]`, so the file is
//! entirely optional: a missing file, a missing section, or a missing field
//! all resolve to the defaults below.  This keeps first runs and upgrades
//! from older files working without a migration step.  Example file:
//!
//! ```toml
//! [teacher]
//! display_name = "Ms. Rivera"
//!
//! [network]
//! control_port = 8765
//!
//! [sharing]
//! default_quality = "high"
//! ```
//!
//! Anything not listed keeps its default.  Unknown fields are ignored rather
//! than rejected, so a newer file still loads on an older build.

use std::path::PathBuf;
use std::time::Duration;

use focusclass_core::QualityPreset;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level application configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub teacher: TeacherConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub sharing: SharingConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Presenter identity and logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeacherConfig {
    /// Name shown to students in session records and logs.
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Network port and bind-address settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    /// IP address to bind all listeners to.  `"0.0.0.0"` binds all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// TCP port students connect to.
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// HTTP port serving the session metadata endpoint.
    #[serde(default = "default_metadata_port")]
    pub metadata_port: u16,
}

/// Screen-sharing defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SharingConfig {
    /// Quality preset used when sharing starts: `"low"`, `"medium"`, `"high"`.
    #[serde(default)]
    pub default_quality: QualityPreset,
    /// Monitor captured by default (zero-based).
    #[serde(default)]
    pub monitor_index: u8,
}

/// Liveness and violation-display tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitoringConfig {
    /// Seconds of silence before a student is presumed gone.
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Length of one violation-display window in seconds.
    #[serde(default = "default_violation_window_secs")]
    pub violation_window_secs: u64,
    /// Violations shown per window before suppression.
    #[serde(default = "default_visible_violations")]
    pub visible_violations_per_window: u32,
    /// Battery percentage below which an uncharged device raises a warning.
    #[serde(default = "default_battery_threshold")]
    pub battery_warn_threshold: u8,
}

impl MonitoringConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn violation_window(&self) -> Duration {
        Duration::from_secs(self.violation_window_secs)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_display_name() -> String {
    "Teacher".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_control_port() -> u16 {
    8765
}
fn default_metadata_port() -> u16 {
    8080
}
fn default_heartbeat_timeout_secs() -> u64 {
    30
}
fn default_violation_window_secs() -> u64 {
    5
}
fn default_visible_violations() -> u32 {
    3
}
fn default_battery_threshold() -> u8 {
    20
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            teacher: TeacherConfig::default(),
            network: NetworkConfig::default(),
            sharing: SharingConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for TeacherConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            control_port: default_control_port(),
            metadata_port: default_metadata_port(),
        }
    }
}

impl Default for SharingConfig {
    fn default() -> Self {
        Self {
            default_quality: QualityPreset::default(),
            monitor_index: 0,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            violation_window_secs: default_violation_window_secs(),
            visible_violations_per_window: default_visible_violations(),
            battery_warn_threshold: default_battery_threshold(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from disk, returning `AppConfig::default()` if the file
/// does not yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;

    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io { path, source: e }),
    }
}

/// Persists `config` to disk.
///
/// Creates the config directory and file if they do not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;

    // Ensure directory exists before writing.
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(())
}

/// Resolves the platform config base directory including the app folder.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("FocusClass"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("focusclass"))
    }

    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/FocusClass
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("FocusClass")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
