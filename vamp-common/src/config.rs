//! Engine configuration and data folder resolution
//!
//! Settings come from `vamp.toml`. Every key is optional; missing keys and
//! a missing file fall back to compiled defaults. Paths resolve in priority
//! order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`VAMP_CONFIG`, `VAMP_DATA_DIR`)
//! 3. TOML config file (`data_dir` key)
//! 4. OS-dependent compiled default (fallback)

use crate::fade_curves::FadeCurve;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "VAMP_CONFIG";

/// Environment variable naming the data folder
pub const DATA_DIR_ENV_VAR: &str = "VAMP_DATA_DIR";

/// File name of the config file inside the platform config folder
pub const CONFIG_FILE_NAME: &str = "vamp.toml";

pub const DEFAULT_CROSSFADE_MS: u32 = 20;
pub const DEFAULT_ENTRY_FADE_MS: u32 = 15;
pub const DEFAULT_EXIT_FADE_MS: u32 = 2000;
pub const DEFAULT_EXIT_PATCH_DURATION_MS: u32 = 250;
pub const DEFAULT_EXIT_PATCH_FADE_OUT_MS: u32 = 200;
pub const DEFAULT_TRANSPORT_RESUME_OFFSET_MS: u32 = 30;
pub const DEFAULT_MIN_LOOP_DURATION_MS: u32 = 500;
pub const DEFAULT_EXIT_BOUNDARY_THRESHOLD_MS: u32 = 30;
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 10;
pub const DEFAULT_POSITION_UPDATE_INTERVAL_MS: u64 = 33;
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Process-wide engine settings
///
/// The seam and exit settings are defaults: each loop region may override
/// `exit_patch_duration_ms` and `transport_resume_offset_ms`, and carries its
/// own crossfade and fade widths seeded from here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seam crossfade width for new regions
    pub crossfade_ms: u32,
    /// Curve used for the seam and patch crossfades
    pub crossfade_curve: FadeCurve,
    /// Fade-in applied when the loop backend takes over mid-playback
    pub entry_fade_ms: u32,
    /// Fade used by the fade-out exit style
    pub exit_fade_ms: u32,
    /// Length of the bridge played from the loop end on exit
    pub exit_patch_duration_ms: u32,
    /// Fade-out at the end of the exit patch
    pub exit_patch_fade_out_ms: u32,
    /// How far past the loop end the transport resumes
    pub transport_resume_offset_ms: u32,
    /// Shortest accepted loop region
    pub min_loop_duration_ms: u32,
    /// Lead time between an immediate exit request and the loop frame at
    /// which the exit patch takes over
    pub exit_boundary_threshold_ms: u32,
    /// Position monitor tick period
    pub monitor_interval_ms: u64,
    /// Minimum spacing of `position_update` events
    pub position_update_interval_ms: u64,
    /// EventBus channel capacity
    pub event_capacity: usize,
    /// Folder holding `loop_data.json`
    pub data_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: DEFAULT_CROSSFADE_MS,
            crossfade_curve: FadeCurve::default(),
            entry_fade_ms: DEFAULT_ENTRY_FADE_MS,
            exit_fade_ms: DEFAULT_EXIT_FADE_MS,
            exit_patch_duration_ms: DEFAULT_EXIT_PATCH_DURATION_MS,
            exit_patch_fade_out_ms: DEFAULT_EXIT_PATCH_FADE_OUT_MS,
            transport_resume_offset_ms: DEFAULT_TRANSPORT_RESUME_OFFSET_MS,
            min_loop_duration_ms: DEFAULT_MIN_LOOP_DURATION_MS,
            exit_boundary_threshold_ms: DEFAULT_EXIT_BOUNDARY_THRESHOLD_MS,
            monitor_interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
            position_update_interval_ms: DEFAULT_POSITION_UPDATE_INTERVAL_MS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            data_dir: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log file path (None = stdout only)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl EngineConfig {
    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.monitor_interval_ms == 0 {
            return Err(Error::Config("monitor_interval_ms must be > 0".to_string()));
        }
        if self.position_update_interval_ms < self.monitor_interval_ms {
            return Err(Error::Config(format!(
                "position_update_interval_ms ({}) must be >= monitor_interval_ms ({})",
                self.position_update_interval_ms, self.monitor_interval_ms
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be > 0".to_string()));
        }
        if self.exit_patch_duration_ms == 0 {
            return Err(Error::Config("exit_patch_duration_ms must be > 0".to_string()));
        }
        if self.exit_patch_fade_out_ms > self.exit_patch_duration_ms {
            return Err(Error::Config(format!(
                "exit_patch_fade_out_ms ({}) exceeds exit_patch_duration_ms ({})",
                self.exit_patch_fade_out_ms, self.exit_patch_duration_ms
            )));
        }
        if !self.crossfade_curve.is_crossfade_safe() {
            return Err(Error::Config(format!(
                "crossfade_curve '{}' dips mid-window; use linear, s_curve or equal_power",
                self.crossfade_curve.as_str()
            )));
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }
        Ok(())
    }
}

/// Resolve which config file to read
///
/// Returns `None` only when no platform config folder exists and neither
/// the CLI nor the environment names a file.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir().map(|dir| dir.join("vamp").join(CONFIG_FILE_NAME))
}

/// Load the engine configuration
///
/// A missing file logs a warning and yields the defaults. A file that
/// exists but does not parse or validate is an error.
pub fn load_config(cli_arg: Option<&Path>) -> Result<EngineConfig> {
    let path = match resolve_config_path(cli_arg) {
        Some(path) => path,
        None => {
            warn!("No config folder on this platform, using compiled defaults");
            return Ok(EngineConfig::default());
        }
    };

    if !path.exists() {
        warn!("Config file {} not found, using compiled defaults", path.display());
        return Ok(EngineConfig::default());
    }

    let content = std::fs::read_to_string(&path)?;
    let config = EngineConfig::from_toml_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Resolve the data folder (CLI > environment > config file > OS default)
pub fn resolve_data_dir(cli_arg: Option<&Path>, config: &EngineConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_DIR_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.data_dir {
        return path.clone();
    }

    default_data_dir()
}

/// OS-dependent default data folder
///
/// `~/.local/share/vamp` on Linux, `~/Library/Application Support/vamp` on
/// macOS, `%LOCALAPPDATA%\vamp` on Windows.
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("vamp"))
        .unwrap_or_else(|| PathBuf::from("./vamp_data"))
}
