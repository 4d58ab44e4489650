//! # Watchdog Configuration
//!
//! Configuration for the printer host API, the two polling intervals, the
//! optional temperature heuristic, logging destinations and the lock file.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [octoprint]
//! api_key = "0123456789ABCDEF"
//! url_base = "http://octopi.local/"
//! serial_port = "/dev/ttyACM0"
//! baud = 115200
//!
//! [connect]
//! sleep_time = 30.0
//!
//! [printmon]
//! sleep_time = 300.0
//! detection_enabled = true
//! thresh_hotend = 50
//! thresh_bed = 40
//! ```
//!
//! Files ending in `.config` or `.json` are read in the legacy JSON layout
//! (`{"config": {"octopi": {...}, "connect": {...}, "printmon": {...}}}`)
//! where numbers may be quoted and flags are the string `"true"`.
//!
//! Relative paths (`state.lock_file`, `logging.file`) resolve against the
//! directory holding the configuration file.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::detector::{DetectionSettings, TemperatureThresholds};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the watchdog.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub octoprint: OctoPrintConfig,
    pub connect: ConnectConfig,
    pub printmon: PrintMonConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub state: StateConfig,
}

/// Printer host API and serial link settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OctoPrintConfig {
    pub api_key: String,
    pub url_base: String,
    pub serial_port: String,
    pub baud: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: f64,
}

/// Connect-phase polling.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectConfig {
    pub sleep_time: f64,
}

/// Print-phase polling and temperature detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrintMonConfig {
    pub sleep_time: f64,
    #[serde(default)]
    pub detection_enabled: bool,
    #[serde(default)]
    pub thresh_hotend: Option<i64>,
    #[serde(default)]
    pub thresh_bed: Option<i64>,
}

/// Console and file log thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_console_level")]
    pub console_level: String,
    #[serde(default = "default_file_level")]
    pub file_level: String,
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_level: default_console_level(),
            file_level: default_file_level(),
            file: default_log_file(),
        }
    }
}

impl LoggingConfig {
    pub fn console_filter(&self) -> Result<LevelFilter, ConfigError> {
        parse_level("logging.console_level", &self.console_level)
    }

    pub fn file_filter(&self) -> Result<LevelFilter, ConfigError> {
        parse_level("logging.file_level", &self.file_level)
    }
}

/// Location of the persisted print-state marker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    #[serde(default = "default_lock_file")]
    pub lock_file: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            lock_file: default_lock_file(),
        }
    }
}

// Default value functions
fn default_request_timeout() -> f64 { 10.0 }
fn default_console_level() -> String { "info".to_string() }
fn default_file_level() -> String { "error".to_string() }
fn default_log_file() -> PathBuf { PathBuf::from("printmon.log") }
fn default_lock_file() -> PathBuf { PathBuf::from(".printlock") }

fn parse_level(field: &str, value: &str) -> Result<LevelFilter, ConfigError> {
    value
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| ConfigError::Invalid(format!("{} must be one of off/error/warn/info/debug/trace, got '{}'", field, value)))
}

fn positive_seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid(format!("{} must be a positive number of seconds", field)));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|e| ConfigError::Invalid(format!("{}: {}", field, e)))
}

impl Config {
    /// Check every field the watchdog relies on. All failures are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.octoprint.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("octoprint.api_key must not be empty".to_string()));
        }
        if self.octoprint.url_base.trim().is_empty() {
            return Err(ConfigError::Invalid("octoprint.url_base must not be empty".to_string()));
        }
        if self.octoprint.serial_port.trim().is_empty() {
            return Err(ConfigError::Invalid("octoprint.serial_port must not be empty".to_string()));
        }
        if self.octoprint.baud == 0 {
            return Err(ConfigError::Invalid("octoprint.baud must be > 0".to_string()));
        }
        positive_seconds("octoprint.request_timeout", self.octoprint.request_timeout)?;
        positive_seconds("connect.sleep_time", self.connect.sleep_time)?;
        positive_seconds("printmon.sleep_time", self.printmon.sleep_time)?;
        if self.printmon.detection_enabled
            && (self.printmon.thresh_hotend.is_none() || self.printmon.thresh_bed.is_none())
        {
            return Err(ConfigError::Invalid(
                "printmon.thresh_hotend and printmon.thresh_bed are required when detection is enabled".to_string(),
            ));
        }
        self.logging.console_filter()?;
        self.logging.file_filter()?;
        Ok(())
    }

    pub fn connect_interval(&self) -> Result<Duration, ConfigError> {
        positive_seconds("connect.sleep_time", self.connect.sleep_time)
    }

    pub fn print_interval(&self) -> Result<Duration, ConfigError> {
        positive_seconds("printmon.sleep_time", self.printmon.sleep_time)
    }

    pub fn request_timeout(&self) -> Result<Duration, ConfigError> {
        positive_seconds("octoprint.request_timeout", self.octoprint.request_timeout)
    }

    /// Temperature heuristic settings; thresholds only apply when detection is enabled.
    pub fn detection(&self) -> DetectionSettings {
        let thresholds = match (
            self.printmon.detection_enabled,
            self.printmon.thresh_hotend,
            self.printmon.thresh_bed,
        ) {
            (true, Some(extruder), Some(bed)) => Some(TemperatureThresholds { extruder, bed }),
            _ => None,
        };
        DetectionSettings { thresholds }
    }

    /// Anchor relative file paths at `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.state.lock_file.is_relative() {
            self.state.lock_file = base_dir.join(&self.state.lock_file);
        }
        if self.logging.file.is_relative() {
            self.logging.file = base_dir.join(&self.logging.file);
        }
    }

    /// Echo the effective settings. The API key is never written out in full.
    pub fn log_summary(&self) {
        tracing::debug!(
            api_key = %redact(&self.octoprint.api_key),
            url_base = %self.octoprint.url_base,
            baud = self.octoprint.baud,
            port = %self.octoprint.serial_port,
            connect_sleep = self.connect.sleep_time,
            print_sleep = self.printmon.sleep_time,
            temp_detect = self.printmon.detection_enabled,
            bed_thresh = ?self.printmon.thresh_bed,
            extruder_thresh = ?self.printmon.thresh_hotend,
            lock_file = %self.state.lock_file.display(),
            "Effective configuration"
        );
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}

/// Load configuration from `path`, validate it and resolve relative paths
/// against the file's directory.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            return Err(ConfigError::Io(e));
        }
    };
    let mut config = if is_legacy_path(path) {
        parse_legacy_config(&contents)?
    } else {
        toml::from_str::<Config>(&contents).map_err(|e| {
            tracing::error!("Failed to parse config TOML: {}", e);
            ConfigError::Toml(e)
        })?
    };
    config.validate()?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    config.resolve_paths(base_dir);
    Ok(config)
}

fn is_legacy_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("config") | Some("json")
    )
}

/// Scalar that older configuration files store either quoted or bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Loose {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Loose {
    fn as_f64(&self, field: &str) -> Result<f64, ConfigError> {
        match self {
            Loose::Number(n) => Ok(*n),
            Loose::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::Invalid(format!("{} must be a number", field))),
            Loose::Bool(_) => Err(ConfigError::Invalid(format!("{} must be a number", field))),
        }
    }

    fn as_integer(&self, field: &str) -> Result<i64, ConfigError> {
        let value = self.as_f64(field)?;
        if value.fract() != 0.0 || value < i64::MIN as f64 || value > i64::MAX as f64 {
            return Err(ConfigError::Invalid(format!("{} must be a whole number", field)));
        }
        Ok(value as i64)
    }

    fn as_flag(&self) -> bool {
        match self {
            Loose::Bool(b) => *b,
            Loose::Text(s) => s.trim().eq_ignore_ascii_case("true"),
            Loose::Number(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyFile {
    config: LegacyRoot,
}

#[derive(Debug, Deserialize)]
struct LegacyRoot {
    octopi: LegacyOctopi,
    connect: LegacySleep,
    printmon: LegacyPrintmon,
}

#[derive(Debug, Deserialize)]
struct LegacyOctopi {
    #[serde(rename = "api-key")]
    api_key: String,
    #[serde(rename = "url-base")]
    url_base: String,
    #[serde(rename = "serial-port")]
    serial_port: String,
    baud: Loose,
}

#[derive(Debug, Deserialize)]
struct LegacySleep {
    #[serde(rename = "sleep-time")]
    sleep_time: Loose,
}

#[derive(Debug, Deserialize)]
struct LegacyPrintmon {
    #[serde(rename = "sleep-time")]
    sleep_time: Loose,
    #[serde(rename = "detection-enabled", default)]
    detection_enabled: Option<Loose>,
    #[serde(rename = "thresh-hotend", default)]
    thresh_hotend: Option<Loose>,
    #[serde(rename = "thresh-bed", default)]
    thresh_bed: Option<Loose>,
}

/// Parse the legacy JSON layout into a `Config`.
fn parse_legacy_config(contents: &str) -> Result<Config, ConfigError> {
    let legacy: LegacyFile = serde_json::from_str(contents).map_err(|e| {
        tracing::error!("Failed to parse legacy config JSON: {}", e);
        ConfigError::Json(e)
    })?;
    let root = legacy.config;

    let baud = root.octopi.baud.as_integer("baud")?;
    let baud = u32::try_from(baud)
        .map_err(|_| ConfigError::Invalid("baud must fit in 32 bits".to_string()))?;

    let detection_enabled = root
        .printmon
        .detection_enabled
        .as_ref()
        .is_some_and(Loose::as_flag);
    let (thresh_hotend, thresh_bed) = if detection_enabled {
        let hotend = root
            .printmon
            .thresh_hotend
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("thresh-hotend is required when detection is enabled".to_string()))?
            .as_integer("thresh-hotend")?;
        let bed = root
            .printmon
            .thresh_bed
            .as_ref()
            .ok_or_else(|| ConfigError::Invalid("thresh-bed is required when detection is enabled".to_string()))?
            .as_integer("thresh-bed")?;
        (Some(hotend), Some(bed))
    } else {
        (None, None)
    };

    Ok(Config {
        octoprint: OctoPrintConfig {
            api_key: root.octopi.api_key,
            url_base: root.octopi.url_base,
            serial_port: root.octopi.serial_port,
            baud,
            request_timeout: default_request_timeout(),
        },
        connect: ConnectConfig {
            sleep_time: root.connect.sleep_time.as_f64("connect sleep-time")?,
        },
        printmon: PrintMonConfig {
            sleep_time: root.printmon.sleep_time.as_f64("printmon sleep-time")?,
            detection_enabled,
            thresh_hotend,
            thresh_bed,
        },
        logging: LoggingConfig::default(),
        state: StateConfig::default(),
    })
}
