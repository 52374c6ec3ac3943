//! Synchronizer Configuration
//!
//! Cell parameters and tuning knobs, validated before they are applied

use crate::phy::frame_structure::FrameGeometry;
use crate::LayerError;
use common::types::{ChannelBandwidth, CyclicPrefix, Pci};
use serde::{Deserialize, Serialize};

/// Cell to acquire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConfig {
    /// Downlink bandwidth in resource blocks (6, 15, 25, 50, 75 or 100)
    pub channel_bandwidth_rb: u16,
    /// Cyclic prefix type
    #[serde(default)]
    pub cyclic_prefix: CyclicPrefix,
    /// NID2, the PSS sequence (0-2)
    pub physical_identity: u8,
    /// NID1, the SSS cell identity group (0-167)
    pub secondary_identity: u16,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            channel_bandwidth_rb: 6,
            cyclic_prefix: CyclicPrefix::Normal,
            physical_identity: 0,
            secondary_identity: 0,
        }
    }
}

impl CellConfig {
    /// Check the configuration and return the derived cell identity and geometry
    pub fn validate(&self) -> Result<(Pci, FrameGeometry), LayerError> {
        let bandwidth = ChannelBandwidth::from_prb(self.channel_bandwidth_rb).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!(
                "unsupported bandwidth of {} resource blocks",
                self.channel_bandwidth_rb
            ))
        })?;

        let pci = Pci::from_identities(self.secondary_identity, self.physical_identity).ok_or_else(|| {
            LayerError::InvalidConfiguration(format!(
                "invalid cell identity NID1={} NID2={}",
                self.secondary_identity, self.physical_identity
            ))
        })?;

        Ok((pci, FrameGeometry::new(bandwidth, self.cyclic_prefix)))
    }
}

/// Tuning parameters of the acquisition and tracking loops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningConfig {
    /// Peak-to-rms ratio required in FIND
    #[serde(default = "default_detection_threshold")]
    pub detection_threshold: f32,
    /// Peak-to-rms ratio required in TRACK (window correlation)
    #[serde(default = "default_track_detection_threshold")]
    pub track_detection_threshold: f32,
    /// Frames searched before a FIND decision
    #[serde(default = "default_averaging_frames")]
    pub averaging_frames_in_find: u32,
    /// Tracked sync subframes accumulated per timing correction
    #[serde(default = "default_correction_period")]
    pub correction_period_subframes: u32,
    /// EMA coefficient of the mean SFO
    #[serde(default = "default_ema_coefficient")]
    pub sfo_ema_coefficient: f32,
    /// EMA coefficient of the CFO loop in TRACK
    #[serde(default = "default_ema_coefficient")]
    pub cfo_ema_coefficient: f32,
    /// EMA coefficient of RSRP/RSSI in TRACK
    #[serde(default = "default_ema_coefficient")]
    pub measurement_ema_coefficient: f32,
    /// Consecutive missed sync subframes before returning to FIND
    #[serde(default = "default_max_consecutive_loss")]
    pub max_consecutive_loss: u32,
    /// Mild faults tolerated by the false-alarm discriminator
    #[serde(default = "default_max_mild_faults")]
    pub false_alarm_max_mild_faults: u32,
    /// Run the false-alarm discriminator on FIND candidates
    #[serde(default = "default_true")]
    pub false_alarm_enabled: bool,
    /// Half width in samples of the TRACK search window
    #[serde(default = "default_track_window")]
    pub track_window: usize,
    /// Correct the estimated CFO on the received stream
    #[serde(default = "default_true")]
    pub cfo_correction_enabled: bool,
}

fn default_detection_threshold() -> f32 {
    4.0
}

fn default_track_detection_threshold() -> f32 {
    3.0
}

fn default_averaging_frames() -> u32 {
    4
}

fn default_correction_period() -> u32 {
    10
}

fn default_ema_coefficient() -> f32 {
    0.1
}

fn default_max_consecutive_loss() -> u32 {
    4
}

fn default_max_mild_faults() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_track_window() -> usize {
    32
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            detection_threshold: default_detection_threshold(),
            track_detection_threshold: default_track_detection_threshold(),
            averaging_frames_in_find: default_averaging_frames(),
            correction_period_subframes: default_correction_period(),
            sfo_ema_coefficient: default_ema_coefficient(),
            cfo_ema_coefficient: default_ema_coefficient(),
            measurement_ema_coefficient: default_ema_coefficient(),
            max_consecutive_loss: default_max_consecutive_loss(),
            false_alarm_max_mild_faults: default_max_mild_faults(),
            false_alarm_enabled: true,
            track_window: default_track_window(),
            cfo_correction_enabled: true,
        }
    }
}

impl TuningConfig {
    /// Check ranges of every parameter
    pub fn validate(&self) -> Result<(), LayerError> {
        let invalid = |msg: String| Err(LayerError::InvalidConfiguration(msg));

        for (name, value) in [
            ("detection_threshold", self.detection_threshold),
            ("track_detection_threshold", self.track_detection_threshold),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return invalid(format!("{} must be positive, got {}", name, value));
            }
        }

        for (name, value) in [
            ("sfo_ema_coefficient", self.sfo_ema_coefficient),
            ("cfo_ema_coefficient", self.cfo_ema_coefficient),
            ("measurement_ema_coefficient", self.measurement_ema_coefficient),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return invalid(format!("{} must be in (0, 1], got {}", name, value));
            }
        }

        if self.averaging_frames_in_find == 0 {
            return invalid("averaging_frames_in_find must be at least 1".to_string());
        }
        if self.correction_period_subframes == 0 {
            return invalid("correction_period_subframes must be at least 1".to_string());
        }
        if self.max_consecutive_loss == 0 {
            return invalid("max_consecutive_loss must be at least 1".to_string());
        }
        if self.track_window == 0 {
            return invalid("track_window must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_validation() {
        let cell = CellConfig {
            channel_bandwidth_rb: 25,
            physical_identity: 2,
            secondary_identity: 100,
            ..Default::default()
        };
        let (pci, geometry) = cell.validate().unwrap();
        assert_eq!(pci.0, 302);
        assert_eq!(geometry.fft_size(), 384);

        let bad_bandwidth = CellConfig { channel_bandwidth_rb: 20, ..Default::default() };
        assert!(matches!(bad_bandwidth.validate(), Err(LayerError::InvalidConfiguration(_))));

        let bad_nid2 = CellConfig { physical_identity: 3, ..Default::default() };
        assert!(bad_nid2.validate().is_err());

        let bad_nid1 = CellConfig { secondary_identity: 168, ..Default::default() };
        assert!(bad_nid1.validate().is_err());
    }

    #[test]
    fn test_tuning_defaults() {
        let tuning = TuningConfig::default();
        assert!(tuning.validate().is_ok());
        assert_eq!(tuning.max_consecutive_loss, 4);
        assert_eq!(tuning.correction_period_subframes, 10);
        assert!(tuning.false_alarm_enabled);
    }

    #[test]
    fn test_tuning_validation() {
        let mut tuning = TuningConfig::default();
        tuning.cfo_ema_coefficient = 0.0;
        assert!(tuning.validate().is_err());

        let mut tuning = TuningConfig::default();
        tuning.detection_threshold = f32::NAN;
        assert!(tuning.validate().is_err());

        let mut tuning = TuningConfig::default();
        tuning.averaging_frames_in_find = 0;
        assert!(tuning.validate().is_err());
    }
}
