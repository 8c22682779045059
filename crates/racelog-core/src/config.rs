//! Configuration
//!
//! A [`TelemetryConfig`] is built once (from defaults or a JSON file), validated,
//! and then shared read-only by every component. Nothing in the core reads
//! environment variables or process-global settings.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::reading::{Field, Layout, CHANNEL_COUNT, TIME_COLUMN};

/// Default baud rate for the telemetry link
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default serial read timeout in milliseconds
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 1000;

/// Default field delimiter
pub const DEFAULT_DELIMITER: char = ';';

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// How long a single read may block before reporting a timeout
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Text wire format shared by the live link and recorded files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireFormat {
    /// Character separating fields on a line
    pub delimiter: char,
    /// Header names for all 18 columns, `time_ms` first.
    ///
    /// A layout's header is the prefix of this list with the layout's
    /// field count.
    pub column_names: Vec<String>,
}

impl Default for WireFormat {
    fn default() -> Self {
        let mut column_names = Vec::with_capacity(CHANNEL_COUNT + 1);
        column_names.push(TIME_COLUMN.to_string());
        column_names.extend(Field::ALL.iter().map(|f| f.column_name().to_string()));
        Self {
            delimiter: DEFAULT_DELIMITER,
            column_names,
        }
    }
}

impl WireFormat {
    /// Header line for a layout, without a line terminator
    pub fn header(&self, layout: Layout) -> String {
        let mut sep = [0u8; 4];
        let sep = self.delimiter.encode_utf8(&mut sep);
        self.column_names[..layout.field_count()].join(sep)
    }
}

/// Where recordings are written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory new log files are created in
    pub directory: PathBuf,
    /// File name prefix for generated log names
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data_logs"),
            file_prefix: "run".to_string(),
        }
    }
}

/// Telemetry store settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum readings kept in history (`None` = unbounded)
    pub history_capacity: Option<usize>,
}

/// What to do with physically implausible readings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Pass every syntactically valid reading through unchanged
    #[default]
    Disabled,
    /// Drop readings that fail range or time-order checks
    Reject,
}

/// Complete configuration for the telemetry core
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub serial: SerialConfig,
    pub wire: WireFormat,
    pub log: LogConfig,
    pub store: StoreConfig,
    pub validation: ValidationPolicy,
}

impl TelemetryConfig {
    /// Load a configuration from a JSON file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TelemetryConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, message: String| {
            Err(ConfigError::InvalidValue { field, message })
        };

        if self.serial.baud_rate == 0 {
            return invalid("serial.baud_rate", "must be greater than zero".into());
        }
        if self.serial.read_timeout_ms == 0 {
            return invalid("serial.read_timeout_ms", "must be greater than zero".into());
        }

        let delimiter = self.wire.delimiter;
        if delimiter.is_whitespace() || delimiter.is_ascii_digit() || matches!(delimiter, '.' | '-' | '+') {
            return invalid(
                "wire.delimiter",
                format!("'{}' cannot separate numeric fields", delimiter.escape_default()),
            );
        }

        let names = &self.wire.column_names;
        if names.len() != CHANNEL_COUNT + 1 {
            return invalid(
                "wire.column_names",
                format!("expected {} names, got {}", CHANNEL_COUNT + 1, names.len()),
            );
        }
        if let Some(name) = names.iter().find(|n| n.is_empty() || n.contains(delimiter)) {
            return invalid(
                "wire.column_names",
                format!("'{}' is empty or contains the delimiter", name),
            );
        }

        if self.store.history_capacity == Some(0) {
            return invalid("store.history_capacity", "must be greater than zero".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let wire = WireFormat::default();
        assert_eq!(
            wire.header(Layout::Legacy),
            "time_ms;speed;rpm;throttle;battery_temp"
        );
        assert_eq!(
            wire.header(Layout::Extended),
            "time_ms;speed;rpm;throttle;battery_temp;g_force_lat;g_force_long;g_force_vert;\
             accel_x;accel_y;accel_z;gps_lat;gps_lon;gps_alt;tire_fl;tire_fr;tire_rl;tire_rr"
        );
    }

    #[test]
    fn test_default_config_is_valid() {
        TelemetryConfig::default().validate().unwrap();
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = TelemetryConfig::default();
        config.wire.delimiter = '.';
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.wire.column_names.pop();
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.store.history_capacity = Some(0);
        assert!(config.validate().is_err());

        let mut config = TelemetryConfig::default();
        config.serial.read_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("racelog.json");

        let mut config = TelemetryConfig::default();
        config.serial.port_name = "/dev/ttyACM0".into();
        config.store.history_capacity = Some(5000);
        config.validation = ValidationPolicy::Reject;
        config.save(&path).unwrap();

        assert_eq!(TelemetryConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TelemetryConfig =
            serde_json::from_str(r#"{ "serial": { "port_name": "COM3" } }"#).unwrap();
        assert_eq!(config.serial.port_name, "COM3");
        assert_eq!(config.serial.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.wire, WireFormat::default());
    }
}
