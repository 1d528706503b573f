use crate::acquisition::AcquisitionTiming;
use crate::instrument_link::LinkSettings;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Loop delays in milliseconds, as written in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub settle_ms: u64,
    pub conversion_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: 10,
            conversion_ms: 50,
        }
    }
}

impl From<TimingConfig> for AcquisitionTiming {
    fn from(config: TimingConfig) -> Self {
        Self {
            settle: Duration::from_millis(config.settle_ms),
            conversion: Duration::from_millis(config.conversion_ms),
        }
    }
}

/// Where the two run logs go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub directory: PathBuf,
    /// Overwritten by every run.
    pub latest_file: String,
    /// Historical logs are named `<prefix><start time>.csv`.
    pub history_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            latest_file: "spectrum.csv".to_string(),
            history_prefix: "data_".to_string(),
        }
    }
}

/// Bench setup: one link per instrument, loop timing and log locations.
///
/// ```toml
/// [meter]
/// timeout_ms = 5000
/// stop_bits = "two"
///
/// [timing]
/// settle_ms = 20
///
/// [logs]
/// directory = "runs"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub gate: LinkSettings,
    pub meter: LinkSettings,
    pub scope: LinkSettings,
    pub timing: TimingConfig,
    pub logs: LogConfig,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            gate: LinkSettings::default(),
            meter: LinkSettings::multimeter(),
            scope: LinkSettings::default(),
            timing: TimingConfig::default(),
            logs: LogConfig::default(),
        }
    }
}

impl BenchConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading bench configuration from {}", path.display());
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument_link::{LinkParity, LinkStopBits};

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BenchConfig::from_toml_str("").unwrap();
        assert_eq!(config, BenchConfig::default());
        assert_eq!(config.meter.stop_bits, LinkStopBits::Two);
        assert_eq!(
            AcquisitionTiming::from(config.timing),
            AcquisitionTiming::default()
        );
    }

    #[test]
    fn test_partial_config() {
        let config = BenchConfig::from_toml_str(
            r#"
            [meter]
            baud_rate = 19200
            parity = "even"
            read_termination = "\r\n"

            [timing]
            conversion_ms = 80

            [logs]
            directory = "runs"
            "#,
        )
        .unwrap();

        assert_eq!(config.meter.baud_rate, 19200);
        assert_eq!(config.meter.parity, LinkParity::Even);
        assert_eq!(config.meter.read_termination, "\r\n");
        assert_eq!(config.timing.settle_ms, 10);
        assert_eq!(config.timing.conversion_ms, 80);
        assert_eq!(config.logs.directory, PathBuf::from("runs"));
        assert_eq!(config.logs.latest_file, "spectrum.csv");
        assert_eq!(config.gate, LinkSettings::default());
    }

    #[test]
    fn test_unknown_parity_rejected() {
        assert!(matches!(
            BenchConfig::from_toml_str("[gate]\nparity = \"mark\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.toml");
        std::fs::write(&path, "[scope]\ntimeout_ms = 10000\n").unwrap();
        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.scope.timeout(), Duration::from_secs(10));
    }
}
