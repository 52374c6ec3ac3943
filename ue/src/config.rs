//! TOML Configuration for the UE synchronizer front end
//!
//! Cell and tuning sections map directly onto the synchronizer
//! configuration; the source section selects the sample driver.

use interfaces::{FileSourceConfig, ZmqRfConfig};
use layers::phy::{CellConfig, TuningConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UeConfig {
    /// Cell to acquire
    pub cell: CellConfig,
    /// Acquisition and tracking loop tuning
    #[serde(default)]
    pub tuning: TuningConfig,
    /// Sample source
    pub source: SourceConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
    /// Measurement reporting
    #[serde(default)]
    pub report: ReportConfig,
}

/// Sample driver selection
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "driver", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Recorded `cf32` file
    File(FileSourceConfig),
    /// srsRAN ZMQ radio
    Zmq(ZmqSourceConfig),
}

/// ZMQ radio configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZmqSourceConfig {
    /// Device arguments (e.g. "rx_port=tcp://localhost:2000,base_srate=1.92e6")
    #[serde(default = "default_device_args")]
    pub device_args: String,
    /// Number of receive channels
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
}

fn default_device_args() -> String {
    "rx_port=tcp://localhost:2000,base_srate=1.92e6".to_string()
}

fn default_num_channels() -> usize {
    1
}

impl ZmqSourceConfig {
    /// Driver configuration parsed from the device arguments
    pub fn rf_config(&self) -> anyhow::Result<ZmqRfConfig> {
        Ok(ZmqRfConfig::from_device_args(&self.device_args, self.num_channels)?)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default log filter, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Measurement reporting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    /// Print one JSON report every this many measurements (0 disables)
    #[serde(default = "default_report_interval")]
    pub interval: u32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self { interval: default_report_interval() }
    }
}

fn default_report_interval() -> u32 {
    200
}

impl UeConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: UeConfig = toml::from_str(contents)?;
        config.tuning.validate()?;
        config.cell.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::types::CyclicPrefix;

    const FILE_CONFIG: &str = r#"
[cell]
channel_bandwidth_rb = 25
cyclic_prefix = "extended"
physical_identity = 2
secondary_identity = 101

[tuning]
detection_threshold = 5.0
max_consecutive_loss = 6

[source]
driver = "file"
path = "/tmp/capture.dat"
wrap = true

[report]
interval = 10
"#;

    #[test]
    fn test_parse_file_config() {
        let config = UeConfig::from_toml_str(FILE_CONFIG).unwrap();

        assert_eq!(config.cell.channel_bandwidth_rb, 25);
        assert_eq!(config.cell.cyclic_prefix, CyclicPrefix::Extended);
        assert_eq!(config.tuning.detection_threshold, 5.0);
        assert_eq!(config.tuning.max_consecutive_loss, 6);
        // Unset tuning keys keep their defaults
        assert_eq!(config.tuning.track_window, TuningConfig::default().track_window);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.report.interval, 10);

        match config.source {
            SourceConfig::File(file) => {
                assert_eq!(file.path, Path::new("/tmp/capture.dat"));
                assert!(file.wrap);
                assert_eq!(file.num_antennas, 1);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_parse_zmq_config() {
        let config = UeConfig::from_toml_str(
            r#"
[cell]
channel_bandwidth_rb = 6
physical_identity = 0
secondary_identity = 0

[source]
driver = "zmq"
device_args = "rx_port=tcp://localhost:2101,base_srate=1.92e6"

[log]
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.tuning, TuningConfig::default());
        assert_eq!(config.log.level, "debug");
        match config.source {
            SourceConfig::Zmq(zmq) => {
                let rf = zmq.rf_config().unwrap();
                assert_eq!(rf.rx_addresses, vec!["tcp://localhost:2101".to_string()]);
                assert_eq!(rf.sample_rate, 1.92e6);
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let invalid_cell = FILE_CONFIG.replace("channel_bandwidth_rb = 25", "channel_bandwidth_rb = 24");
        assert!(UeConfig::from_toml_str(&invalid_cell).is_err());

        let invalid_tuning = FILE_CONFIG.replace("max_consecutive_loss = 6", "max_consecutive_loss = 0");
        assert!(UeConfig::from_toml_str(&invalid_tuning).is_err());

        let unknown_driver = FILE_CONFIG.replace("driver = \"file\"", "driver = \"uhd\"");
        assert!(UeConfig::from_toml_str(&unknown_driver).is_err());
    }
}
