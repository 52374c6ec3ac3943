//! False-Alarm Discrimination
//!
//! Rejects FIND candidates whose measurements are inconsistent with a real
//! sync subframe, comparing the candidate against the position half a frame
//! away.

use super::correlator::PeakEstimate;
use super::impairments::ImpairmentSample;
use common::utils::{linear_to_db, spread};
use tracing::debug;

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Pass,
    Mild,
    Severe,
}

/// Severe and mild limits of one check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPair {
    pub severe: f32,
    pub mild: f32,
}

impl ThresholdPair {
    /// Classify a value that must stay above the limits. An infinite ratio
    /// (nothing at the reference position) passes.
    pub fn classify_floor(&self, value: f32) -> Severity {
        if value.is_nan() || value < self.severe {
            Severity::Severe
        } else if value < self.mild {
            Severity::Mild
        } else {
            Severity::Pass
        }
    }

    /// Classify a value that must stay below the limits
    pub fn classify_ceiling(&self, value: f32) -> Severity {
        if !value.is_finite() || value > self.severe {
            Severity::Severe
        } else if value > self.mild {
            Severity::Mild
        } else {
            Severity::Pass
        }
    }
}

/// Limits of the four discriminator checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FalseAlarmThresholds {
    /// Candidate to opposite SSS correlation ratio (floor)
    pub sss_ratio: ThresholdPair,
    /// Spread of the per-frame CFO at the candidate in Hz (ceiling)
    pub cfo_spread_hz: ThresholdPair,
    /// Spread of the per-frame RSRP at the candidate in dB (ceiling)
    pub rsrp_spread_db: ThresholdPair,
    /// Candidate to opposite RSRP ratio (floor)
    pub rsrp_ratio: ThresholdPair,
}

impl Default for FalseAlarmThresholds {
    fn default() -> Self {
        Self {
            sss_ratio: ThresholdPair { severe: 1.2, mild: 2.0 },
            cfo_spread_hz: ThresholdPair { severe: 2000.0, mild: 500.0 },
            rsrp_spread_db: ThresholdPair { severe: 6.0, mild: 3.0 },
            rsrp_ratio: ThresholdPair { severe: 1.1, mild: 1.5 },
        }
    }
}

/// Value and classification of one check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckResult {
    pub value: f32,
    pub severity: Severity,
}

/// Result of every check for one candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FalseAlarmVerdict {
    pub sss_ratio: CheckResult,
    pub cfo_spread_hz: CheckResult,
    pub rsrp_spread_db: CheckResult,
    pub rsrp_ratio: CheckResult,
    /// Number of mild faults
    pub mild_faults: u32,
    /// Whether any check was severe
    pub severe: bool,
    /// Final decision
    pub rejected: bool,
}

impl FalseAlarmVerdict {
    /// Whether the candidate is a false alarm
    pub fn is_false_alarm(&self) -> bool {
        self.rejected
    }

    fn checks(&self) -> [CheckResult; 4] {
        [self.sss_ratio, self.cfo_spread_hz, self.rsrp_spread_db, self.rsrp_ratio]
    }
}

/// Multi-check false-alarm discriminator
#[derive(Debug, Clone)]
pub struct FalseAlarmDiscriminator {
    thresholds: FalseAlarmThresholds,
    max_mild_faults: u32,
}

impl FalseAlarmDiscriminator {
    /// Create a discriminator with default limits
    pub fn new(max_mild_faults: u32) -> Self {
        Self::with_thresholds(FalseAlarmThresholds::default(), max_mild_faults)
    }

    /// Create a discriminator with custom limits
    pub fn with_thresholds(thresholds: FalseAlarmThresholds, max_mild_faults: u32) -> Self {
        Self { thresholds, max_mild_faults }
    }

    /// Limits in use
    pub fn thresholds(&self) -> &FalseAlarmThresholds {
        &self.thresholds
    }

    /// Decide whether a candidate is a false alarm
    pub fn is_false_alarm(
        &self,
        candidate_peak: &PeakEstimate,
        at_candidate: &[ImpairmentSample],
        at_opposite: &[ImpairmentSample],
    ) -> bool {
        self.evaluate(candidate_peak, at_candidate, at_opposite).is_false_alarm()
    }

    /// Run all four checks.
    ///
    /// `at_candidate` and `at_opposite` hold one measurement per searched
    /// frame, at the candidate position and half a frame away.
    pub fn evaluate(
        &self,
        candidate_peak: &PeakEstimate,
        at_candidate: &[ImpairmentSample],
        at_opposite: &[ImpairmentSample],
    ) -> FalseAlarmVerdict {
        let t = &self.thresholds;

        let sss_ratio = mean(at_candidate, |s| s.sss_correlation) / mean(at_opposite, |s| s.sss_correlation);
        let rsrp_ratio = mean(at_candidate, |s| s.rsrp_linear) / mean(at_opposite, |s| s.rsrp_linear);

        let cfo: Vec<f32> = at_candidate.iter().map(|s| s.cfo_hz).collect();
        let rsrp_db: Vec<f32> = at_candidate.iter().map(|s| linear_to_db(s.rsrp_linear)).collect();
        let cfo_spread = if cfo.is_empty() { f32::NAN } else { spread(&cfo) };
        let rsrp_spread = if rsrp_db.is_empty() { f32::NAN } else { spread(&rsrp_db) };

        let mut verdict = FalseAlarmVerdict {
            sss_ratio: CheckResult { value: sss_ratio, severity: t.sss_ratio.classify_floor(sss_ratio) },
            cfo_spread_hz: CheckResult { value: cfo_spread, severity: t.cfo_spread_hz.classify_ceiling(cfo_spread) },
            rsrp_spread_db: CheckResult { value: rsrp_spread, severity: t.rsrp_spread_db.classify_ceiling(rsrp_spread) },
            rsrp_ratio: CheckResult { value: rsrp_ratio, severity: t.rsrp_ratio.classify_floor(rsrp_ratio) },
            mild_faults: 0,
            severe: false,
            rejected: false,
        };

        let checks = verdict.checks();
        verdict.mild_faults = checks.iter().filter(|c| c.severity == Severity::Mild).count() as u32;
        verdict.severe = checks.iter().any(|c| c.severity == Severity::Severe);
        verdict.rejected = verdict.severe || verdict.mild_faults > self.max_mild_faults;

        debug!(
            "Candidate at {} (peak/rms {:.2}): sss ratio {:.2}, cfo spread {:.0} Hz, rsrp spread {:.1} dB, \
             rsrp ratio {:.2}, {} mild, rejected={}",
            candidate_peak.sample_index,
            candidate_peak.peak_to_noise(),
            sss_ratio,
            cfo_spread,
            rsrp_spread,
            rsrp_ratio,
            verdict.mild_faults,
            verdict.rejected
        );

        verdict
    }
}

fn mean(samples: &[ImpairmentSample], field: impl Fn(&ImpairmentSample) -> f32) -> f32 {
    if samples.is_empty() {
        return f32::NAN;
    }
    samples.iter().map(field).sum::<f32>() / samples.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak() -> PeakEstimate {
        PeakEstimate { sample_index: 832, magnitude: 50.0, rms_noise: 5.0 }
    }

    fn sample(cfo_hz: f32, rsrp_linear: f32, sss_correlation: f32) -> ImpairmentSample {
        ImpairmentSample { cfo_hz, rsrp_linear, rssi_linear: 1.0, sss_correlation }
    }

    fn real_signal() -> Vec<ImpairmentSample> {
        vec![sample(1000.0, 1.0, 0.9), sample(1020.0, 1.1, 0.95), sample(990.0, 0.95, 0.92)]
    }

    fn alias_position() -> Vec<ImpairmentSample> {
        vec![sample(800.0, 0.5, 0.1), sample(2500.0, 0.52, 0.12), sample(-300.0, 0.49, 0.09)]
    }

    #[test]
    fn test_real_signal_accepted() {
        let discriminator = FalseAlarmDiscriminator::new(1);
        let verdict = discriminator.evaluate(&peak(), &real_signal(), &alias_position());

        assert_eq!(verdict.sss_ratio.severity, Severity::Pass);
        assert_eq!(verdict.cfo_spread_hz.severity, Severity::Pass);
        assert_eq!(verdict.rsrp_spread_db.severity, Severity::Pass);
        assert_eq!(verdict.rsrp_ratio.severity, Severity::Pass);
        assert!(!verdict.is_false_alarm());
    }

    #[test]
    fn test_symmetry() {
        let discriminator = FalseAlarmDiscriminator::new(1);
        assert!(!discriminator.is_false_alarm(&peak(), &real_signal(), &alias_position()));
        assert!(discriminator.is_false_alarm(&peak(), &alias_position(), &real_signal()));
    }

    #[test]
    fn test_cfo_spread_severe() {
        let discriminator = FalseAlarmDiscriminator::new(1);
        let mut candidate = real_signal();
        candidate[1].cfo_hz = 4000.0;

        let verdict = discriminator.evaluate(&peak(), &candidate, &alias_position());
        assert_eq!(verdict.cfo_spread_hz.severity, Severity::Severe);
        assert!(verdict.rejected);
    }

    #[test]
    fn test_mild_fault_budget() {
        // SSS ratio 1.5 and RSRP ratio 1.3 are both mild
        let candidate = vec![sample(0.0, 1.3, 0.75)];
        let opposite = vec![sample(0.0, 1.0, 0.5)];

        let verdict = FalseAlarmDiscriminator::new(1).evaluate(&peak(), &candidate, &opposite);
        assert_eq!(verdict.mild_faults, 2);
        assert!(!verdict.severe);
        assert!(verdict.rejected);

        assert!(!FalseAlarmDiscriminator::new(2).is_false_alarm(&peak(), &candidate, &opposite));
    }

    #[test]
    fn test_non_finite_is_severe() {
        let discriminator = FalseAlarmDiscriminator::new(4);
        let candidate = vec![sample(100.0, 1.0, 0.9), sample(f32::NAN, 1.0, 0.9)];
        let verdict = discriminator.evaluate(&peak(), &candidate, &alias_position());
        assert_eq!(verdict.cfo_spread_hz.severity, Severity::Severe);

        assert!(discriminator.is_false_alarm(&peak(), &[], &alias_position()));
    }

    #[test]
    fn test_empty_opposite_position_accepted() {
        let discriminator = FalseAlarmDiscriminator::new(1);
        let candidate = vec![sample(0.0, 1.0, 1.0)];
        let opposite = vec![sample(0.0, 0.0, 0.0)];

        let verdict = discriminator.evaluate(&peak(), &candidate, &opposite);
        assert!(verdict.sss_ratio.value.is_infinite());
        assert_eq!(verdict.sss_ratio.severity, Severity::Pass);
        assert_eq!(verdict.rsrp_ratio.severity, Severity::Pass);
        assert!(!verdict.rejected);

        // Nothing anywhere is still rejected
        let silent = vec![sample(0.0, 0.0, 0.0)];
        assert!(discriminator.is_false_alarm(&peak(), &silent, &opposite));
    }

    #[test]
    fn test_threshold_pair() {
        let floor = ThresholdPair { severe: 1.2, mild: 2.0 };
        assert_eq!(floor.classify_floor(1.0), Severity::Severe);
        assert_eq!(floor.classify_floor(1.5), Severity::Mild);
        assert_eq!(floor.classify_floor(2.0), Severity::Pass);
        assert_eq!(floor.classify_floor(f32::INFINITY), Severity::Pass);
        assert_eq!(floor.classify_floor(f32::NEG_INFINITY), Severity::Severe);
        assert_eq!(floor.classify_floor(f32::NAN), Severity::Severe);

        let ceiling = ThresholdPair { severe: 6.0, mild: 3.0 };
        assert_eq!(ceiling.classify_ceiling(7.0), Severity::Severe);
        assert_eq!(ceiling.classify_ceiling(4.0), Severity::Mild);
        assert_eq!(ceiling.classify_ceiling(3.0), Severity::Pass);
    }
}
