//! Configuration loading using Figment.
//!
//! Configuration is merged from:
//! 1. `config/telemetry.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `PLC_TELEMETRY_`, using `__` to
//!    separate sections, e.g. `PLC_TELEMETRY_CAPTURE__BUFFER_CAPACITY=4096`
//!
//! Every section and field has a default, so an absent file yields the stock
//! configuration.
//!
//! # Example
//! ```no_run
//! use plc_telemetry::config::TelemetryConfig;
//!
//! let config = TelemetryConfig::load()?;
//! config.validate()?;
//! println!("Buffer capacity: {}", config.capture.buffer_capacity);
//! # Ok::<(), plc_telemetry::error::TelemetryError>(())
//! ```

use crate::data::channel::ChannelSettings;
use crate::data::export::ExportFormat;
use crate::error::{AppResult, TelemetryError};
use crate::logging::{parse_log_level, LogFormat};
use chrono::{DateTime, Local};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/telemetry.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PLC_TELEMETRY_";

/// Timestamp embedded in export file names.
const EXPORT_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sampling and buffering settings
    pub capture: CaptureConfig,
    /// Export settings
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "PLC Telemetry".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

/// Sampling and buffering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Ring buffer capacity per fast channel, in samples
    pub buffer_capacity: usize,
    /// Fast (quick) sampling period in milliseconds
    pub quick_period_ms: u64,
    /// Slow sampling period in milliseconds
    pub slow_period_ms: u64,
    /// Directory holding the per-channel spill logs
    pub spill_dir: PathBuf,
    /// Timeout for a single spill append, in milliseconds
    pub io_timeout_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            quick_period_ms: 2,
            slow_period_ms: 5000,
            spill_dir: PathBuf::from("logs/spill"),
            io_timeout_ms: 5000,
        }
    }
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory the exported files are written to
    pub output_dir: PathBuf,
    /// Base file name; period and timestamp are appended
    pub file_name: String,
    /// Formats written on every export
    pub file_types: Vec<ExportFormat>,
    /// Optional cap on CSV rows
    pub row_limit: Option<usize>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("logs"),
            file_name: "log".to_string(),
            file_types: ExportFormat::ALL.to_vec(),
            row_limit: None,
        }
    }
}

impl CaptureConfig {
    /// Fast sampling period.
    pub fn quick_period(&self) -> Duration {
        Duration::from_millis(self.quick_period_ms)
    }

    /// Slow sampling period.
    pub fn slow_period(&self) -> Duration {
        Duration::from_millis(self.slow_period_ms)
    }

    /// Per-spill disk timeout.
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Channel settings for a registry built from this configuration.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings::new(self.buffer_capacity, &self.spill_dir).with_io_timeout(self.io_timeout())
    }
}

impl TelemetryConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file and the environment.
    ///
    /// A missing file is not an error; defaults fill every field.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string(self).map_err(|e| TelemetryError::Configuration(e.to_string()))
    }

    /// Check semantic constraints that serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        parse_log_level(&self.application.log_level)?;

        if self.capture.buffer_capacity == 0 {
            return Err(TelemetryError::Configuration(
                "buffer_capacity must be greater than 0".to_string(),
            ));
        }

        if self.capture.quick_period_ms == 0 || self.capture.slow_period_ms == 0 {
            return Err(TelemetryError::Configuration(
                "sampling periods must be greater than 0 ms".to_string(),
            ));
        }

        if self.capture.io_timeout_ms == 0 {
            return Err(TelemetryError::Configuration(
                "io_timeout_ms must be greater than 0".to_string(),
            ));
        }

        let name = &self.export.file_name;
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(TelemetryError::Configuration(format!(
                "file_name '{name}' must be a non-empty name without path separators"
            )));
        }

        Ok(())
    }

    /// `<output_dir>/<file_name>_quick_<period>ms_<yyyyMMddHHmmss>`
    pub fn quick_export_base(&self, at: DateTime<Local>) -> PathBuf {
        self.export_base("quick", self.capture.quick_period_ms, at)
    }

    /// `<output_dir>/<file_name>_slow_<period>ms_<yyyyMMddHHmmss>`
    pub fn slow_export_base(&self, at: DateTime<Local>) -> PathBuf {
        self.export_base("slow", self.capture.slow_period_ms, at)
    }

    fn export_base(&self, kind: &str, period_ms: u64, at: DateTime<Local>) -> PathBuf {
        self.export.output_dir.join(format!(
            "{}_{kind}_{period_ms}ms_{}",
            self.export.file_name,
            at.format(EXPORT_TIMESTAMP_FORMAT)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.capture.buffer_capacity, 1000);
        assert_eq!(config.capture.quick_period_ms, 2);
        assert_eq!(config.capture.slow_period_ms, 5000);
        assert_eq!(config.export.file_name, "log");
        assert_eq!(config.export.file_types, vec![ExportFormat::Csv, ExportFormat::Mat]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_export_base_names() {
        let config = TelemetryConfig::default();
        let at = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(
            config.quick_export_base(at),
            PathBuf::from("logs/log_quick_2ms_20240309140507")
        );
        assert_eq!(
            config.slow_export_base(at),
            PathBuf::from("logs/log_slow_5000ms_20240309140507")
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = TelemetryConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.capture.buffer_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.capture.quick_period_ms = 0;
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.export.file_name = "../escape".into();
        assert!(matches!(
            config.validate(),
            Err(TelemetryError::Configuration(_))
        ));
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = TelemetryConfig::default();
        config.export.file_types = vec![ExportFormat::Mat];
        config.export.row_limit = Some(500);

        let text = config.to_toml().unwrap();
        assert!(text.contains("row_limit = 500"));
        let parsed: TelemetryConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_channel_settings() {
        let mut config = TelemetryConfig::default();
        config.capture.io_timeout_ms = 250;
        let settings = config.capture.channel_settings();
        assert_eq!(settings.capacity, 1000);
        assert_eq!(settings.io_timeout, Duration::from_millis(250));
    }
}
