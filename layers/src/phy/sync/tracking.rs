//! Tracking Controller
//!
//! FIND/TRACK state machine and the sample timing loop. The controller only
//! sees correlation peaks; reading samples and applying corrections is left
//! to the synchronizer.

use super::config::TuningConfig;
use super::correlator::PeakEstimate;
use crate::LayerError;
use common::utils::{ema, time::SYNC_PERIOD_S};
use tracing::{debug, info, warn};

/// Largest timing correction applied at once, in samples
pub const MAX_TIME_OFFSET: i32 = 128;

/// Synchronizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Searching one frame per step
    #[default]
    Find,
    /// Locked, reading one subframe per step
    Track,
}

/// Timing loop state, reset whenever the synchronizer returns to FIND
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTimingContext {
    /// Sum of peak deviations since the last correction
    pub sample_offset_accumulator: f32,
    /// Number of peaks folded into the accumulator
    pub accumulated_peaks: u32,
    /// Smoothed timing drift per sync period, in samples
    pub mean_sfo: f32,
    /// Consecutive detected sync subframes
    pub consecutive_lock_count: u32,
    /// Consecutive missed sync subframes
    pub consecutive_loss_count: u32,
    /// Correction to apply before the next read (positive drops samples)
    pub next_correction_samples: i32,
    /// Expected PSS deviation from its nominal position
    pub expected_deviation: i32,
}

impl FrameTimingContext {
    pub const INITIAL_ACCUMULATOR: f32 = 0.0;
    pub const INITIAL_MEAN_SFO: f32 = 0.0;
    pub const INITIAL_CORRECTION: i32 = 0;
    pub const INITIAL_DEVIATION: i32 = 0;
}

impl Default for FrameTimingContext {
    fn default() -> Self {
        Self {
            sample_offset_accumulator: Self::INITIAL_ACCUMULATOR,
            accumulated_peaks: 0,
            mean_sfo: Self::INITIAL_MEAN_SFO,
            consecutive_lock_count: 0,
            consecutive_loss_count: 0,
            next_correction_samples: Self::INITIAL_CORRECTION,
            expected_deviation: Self::INITIAL_DEVIATION,
        }
    }
}

/// Detection predicate: the peak must exceed the noise floor by `threshold`
pub fn is_detection(peak: &PeakEstimate, threshold: f32) -> bool {
    peak.magnitude > peak.rms_noise * threshold
}

/// Peaks collected over the frames of one FIND cycle, with a payload per
/// frame (the measurements taken around that frame's peak)
#[derive(Debug, Clone)]
pub struct FindCycle<T> {
    frames: Vec<(PeakEstimate, T)>,
    best: Option<usize>,
}

impl<T> Default for FindCycle<T> {
    fn default() -> Self {
        Self { frames: Vec::new(), best: None }
    }
}

impl<T> FindCycle<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame; the first of equally strong peaks stays the best
    pub fn push(&mut self, peak: PeakEstimate, payload: T) {
        let better = match self.best() {
            Some((best, _)) => peak.magnitude > best.magnitude,
            None => true,
        };
        self.frames.push((peak, payload));
        if better {
            self.best = Some(self.frames.len() - 1);
        }
    }

    /// Strongest peak of the cycle
    pub fn best(&self) -> Option<&(PeakEstimate, T)> {
        self.best.and_then(|index| self.frames.get(index))
    }

    /// All recorded frames in order
    pub fn frames(&self) -> &[(PeakEstimate, T)] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.best = None;
    }
}

/// Decision at the end of a FIND cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindOutcome {
    /// Candidate accepted, now tracking
    Locked,
    /// Best peak below the detection threshold
    NoPeak,
    /// Candidate rejected by the discriminator
    FalseAlarm,
}

/// Result of one TRACK sync subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackOutcome {
    /// Peak detected at `deviation` samples from the nominal position;
    /// `correction` is set when a timing correction was scheduled
    Hit { deviation: i32, correction: Option<i32> },
    /// Peak missed, still tracking
    Miss { consecutive_losses: u32 },
    /// Too many misses, back to FIND
    Lost,
    /// Search window outside the block, nothing changed
    NoSpace,
}

/// FIND/TRACK state machine with the timing accumulator
#[derive(Debug, Clone)]
pub struct TrackingController {
    state: TrackState,
    context: FrameTimingContext,
    detection_threshold: f32,
    track_detection_threshold: f32,
    averaging_frames: u32,
    correction_period: u32,
    sfo_ema_coefficient: f32,
    max_consecutive_loss: u32,
}

impl TrackingController {
    /// Create a controller in FIND
    pub fn new(tuning: &TuningConfig) -> Self {
        Self {
            state: TrackState::Find,
            context: FrameTimingContext::default(),
            detection_threshold: tuning.detection_threshold,
            track_detection_threshold: tuning.track_detection_threshold,
            averaging_frames: tuning.averaging_frames_in_find,
            correction_period: tuning.correction_period_subframes,
            sfo_ema_coefficient: tuning.sfo_ema_coefficient,
            max_consecutive_loss: tuning.max_consecutive_loss,
        }
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn context(&self) -> &FrameTimingContext {
        &self.context
    }

    /// Whether a FIND cycle with `frames` frames is complete
    pub fn find_cycle_complete(&self, frames: usize) -> bool {
        frames >= self.averaging_frames as usize
    }

    /// Expected PSS deviation in TRACK
    pub fn expected_deviation(&self) -> i32 {
        self.context.expected_deviation
    }

    /// Mean sampling frequency offset in samples per second
    pub fn sfo_hz(&self) -> f32 {
        self.context.mean_sfo / SYNC_PERIOD_S
    }

    /// Decide on the best peak of a FIND cycle.
    ///
    /// `is_false_alarm` is consulted only for peaks above the threshold.
    pub fn complete_find(
        &mut self,
        best: Option<&PeakEstimate>,
        is_false_alarm: impl FnOnce(&PeakEstimate) -> bool,
    ) -> FindOutcome {
        let peak = match best {
            Some(peak) if is_detection(peak, self.detection_threshold) => peak,
            Some(peak) => {
                debug!("Best peak {:.2} over rms {:.2} below threshold", peak.magnitude, peak.rms_noise);
                return FindOutcome::NoPeak;
            }
            None => return FindOutcome::NoPeak,
        };

        if is_false_alarm(peak) {
            warn!("Candidate at sample {} rejected as false alarm", peak.sample_index);
            return FindOutcome::FalseAlarm;
        }

        self.state = TrackState::Track;
        self.context = FrameTimingContext::default();
        info!(
            "Sync found at sample {} (peak {:.2}, rms {:.2})",
            peak.sample_index, peak.magnitude, peak.rms_noise
        );
        FindOutcome::Locked
    }

    /// Process the window peak of a TRACK sync subframe
    pub fn on_track_peak(&mut self, peak: &PeakEstimate, deviation: i32) -> Result<TrackOutcome, LayerError> {
        if self.state != TrackState::Track {
            return Err(LayerError::InvalidState("tracking peak reported while searching".to_string()));
        }

        let mut context = self.context;
        let mut state = self.state;

        let outcome = if is_detection(peak, self.track_detection_threshold) {
            context.consecutive_lock_count += 1;
            context.consecutive_loss_count = 0;
            context.expected_deviation = deviation;
            context.sample_offset_accumulator += deviation as f32;
            context.accumulated_peaks += 1;

            let mut correction = None;
            if context.accumulated_peaks >= self.correction_period {
                let mean = context.sample_offset_accumulator / context.accumulated_peaks as f32;
                let samples = (mean.round() as i32).clamp(-MAX_TIME_OFFSET, MAX_TIME_OFFSET);

                context.mean_sfo = ema(mean, context.mean_sfo, self.sfo_ema_coefficient);
                context.sample_offset_accumulator = FrameTimingContext::INITIAL_ACCUMULATOR;
                context.accumulated_peaks = 0;
                context.next_correction_samples += samples;
                context.expected_deviation -= samples;
                correction = Some(samples);

                debug!("Timing correction of {} samples (mean deviation {:.2})", samples, mean);
            }

            TrackOutcome::Hit { deviation, correction }
        } else {
            context.consecutive_lock_count = 0;
            context.consecutive_loss_count += 1;

            if context.consecutive_loss_count >= self.max_consecutive_loss {
                warn!("Sync lost after {} missed sync subframes", context.consecutive_loss_count);
                state = TrackState::Find;
                context = FrameTimingContext::default();
                TrackOutcome::Lost
            } else {
                debug!("Sync subframe missed ({} in a row)", context.consecutive_loss_count);
                TrackOutcome::Miss { consecutive_losses: context.consecutive_loss_count }
            }
        };

        self.context = context;
        self.state = state;
        Ok(outcome)
    }

    /// Report a sync subframe whose window did not fit in the block
    pub fn on_track_no_space(&self) -> TrackOutcome {
        TrackOutcome::NoSpace
    }

    /// Take the scheduled correction, leaving none pending
    pub fn take_correction(&mut self) -> i32 {
        std::mem::replace(&mut self.context.next_correction_samples, FrameTimingContext::INITIAL_CORRECTION)
    }

    /// Return to FIND with a fresh timing context
    pub fn reset(&mut self) {
        self.state = TrackState::Find;
        self.context = FrameTimingContext::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peak(sample_index: usize, magnitude: f32, rms_noise: f32) -> PeakEstimate {
        PeakEstimate { sample_index, magnitude, rms_noise }
    }

    fn tracking(tuning: &TuningConfig) -> TrackingController {
        let mut controller = TrackingController::new(tuning);
        let outcome = controller.complete_find(Some(&peak(832, 100.0, 1.0)), |_| false);
        assert_eq!(outcome, FindOutcome::Locked);
        controller
    }

    #[test]
    fn test_single_frame_lock() {
        let tuning = TuningConfig {
            detection_threshold: 2.5,
            averaging_frames_in_find: 1,
            ..Default::default()
        };
        let mut controller = TrackingController::new(&tuning);
        assert_eq!(controller.state(), TrackState::Find);

        let mut cycle = FindCycle::new();
        cycle.push(peak(512, 10.0, 3.0), ());
        assert!(controller.find_cycle_complete(cycle.len()));

        let best = cycle.best().map(|(p, _)| *p);
        assert_eq!(controller.complete_find(best.as_ref(), |_| false), FindOutcome::Locked);
        assert_eq!(controller.state(), TrackState::Track);
        assert_eq!(*controller.context(), FrameTimingContext::default());
    }

    #[test]
    fn test_threshold_monotonicity() {
        let candidates = [peak(0, 10.0, 3.0), peak(0, 7.0, 3.0), peak(0, 3.1, 1.0), peak(0, 0.0, 0.0)];
        let thresholds = [0.5f32, 1.0, 2.0, 2.5, 3.0, 3.33, 4.0];

        for p in &candidates {
            for (i, &high) in thresholds.iter().enumerate() {
                for &low in &thresholds[..i] {
                    if is_detection(p, high) {
                        assert!(is_detection(p, low));
                    }
                }
            }
        }
        assert!(!is_detection(&peak(0, 6.0, 2.0), 3.0));
    }

    #[test]
    fn test_find_outcomes() {
        let mut controller = TrackingController::new(&TuningConfig::default());

        assert_eq!(controller.complete_find(None, |_| false), FindOutcome::NoPeak);
        assert_eq!(controller.complete_find(Some(&peak(1, 3.0, 1.0)), |_| false), FindOutcome::NoPeak);
        assert_eq!(controller.complete_find(Some(&peak(1, 30.0, 1.0)), |_| true), FindOutcome::FalseAlarm);
        assert_eq!(controller.state(), TrackState::Find);
    }

    #[test]
    fn test_find_cycle_keeps_first_best() {
        let mut cycle = FindCycle::new();
        cycle.push(peak(10, 5.0, 1.0), 'a');
        cycle.push(peak(20, 8.0, 1.0), 'b');
        cycle.push(peak(30, 8.0, 1.0), 'c');
        cycle.push(peak(40, 2.0, 1.0), 'd');

        let (best, tag) = cycle.best().unwrap();
        assert_eq!(best.sample_index, 20);
        assert_eq!(*tag, 'b');
        assert_eq!(cycle.len(), 4);

        cycle.clear();
        assert!(cycle.is_empty());
        assert!(cycle.best().is_none());
    }

    #[test]
    fn test_loss_boundary() {
        let mut controller = tracking(&TuningConfig::default());
        let miss = peak(832, 1.0, 1.0);
        let hit = peak(832, 10.0, 1.0);

        for losses in 1..=3 {
            assert_eq!(controller.on_track_peak(&miss, 0).unwrap(), TrackOutcome::Miss { consecutive_losses: losses });
            assert_eq!(controller.state(), TrackState::Track);
        }

        // A hit clears the loss count
        assert!(matches!(controller.on_track_peak(&hit, 0).unwrap(), TrackOutcome::Hit { .. }));
        assert_eq!(controller.context().consecutive_loss_count, 0);

        for _ in 0..3 {
            controller.on_track_peak(&miss, 0).unwrap();
        }
        assert_eq!(controller.state(), TrackState::Track);
        assert_eq!(controller.on_track_peak(&miss, 0).unwrap(), TrackOutcome::Lost);
        assert_eq!(controller.state(), TrackState::Find);
        assert_eq!(*controller.context(), FrameTimingContext::default());
    }

    #[test]
    fn test_correction_after_period() {
        let tuning = TuningConfig { correction_period_subframes: 4, sfo_ema_coefficient: 0.5, ..Default::default() };
        let mut controller = tracking(&tuning);
        let hit = peak(835, 10.0, 1.0);

        for _ in 0..3 {
            assert_eq!(controller.on_track_peak(&hit, 3).unwrap(), TrackOutcome::Hit { deviation: 3, correction: None });
        }
        assert_eq!(controller.take_correction(), 0);

        assert_eq!(controller.on_track_peak(&hit, 3).unwrap(), TrackOutcome::Hit { deviation: 3, correction: Some(3) });
        let context = *controller.context();
        assert_eq!(context.accumulated_peaks, 0);
        assert_eq!(context.sample_offset_accumulator, 0.0);
        assert_eq!(context.expected_deviation, 0);
        assert_eq!(context.consecutive_lock_count, 4);
        assert!((context.mean_sfo - 1.5).abs() < 1e-6);
        assert!((controller.sfo_hz() - 300.0).abs() < 1e-2);

        assert_eq!(controller.take_correction(), 3);
        assert_eq!(controller.take_correction(), 0);
    }

    #[test]
    fn test_correction_is_clamped() {
        let tuning = TuningConfig { correction_period_subframes: 1, ..Default::default() };
        let mut controller = tracking(&tuning);

        controller.on_track_peak(&peak(0, 10.0, 1.0), -500).unwrap();
        assert_eq!(controller.take_correction(), -MAX_TIME_OFFSET);
        assert_eq!(controller.expected_deviation(), -500 + MAX_TIME_OFFSET);
    }

    #[test]
    fn test_state_closure() {
        // Every input leaves the controller in FIND or TRACK with a context
        // that is either default or updated by tracking
        let mut controller = TrackingController::new(&TuningConfig::default());
        let inputs = [peak(0, 100.0, 1.0), peak(0, 1.0, 1.0), peak(0, 0.0, 0.0), peak(0, f32::NAN, 1.0)];

        for round in 0..40 {
            let p = inputs[round % inputs.len()];
            match controller.state() {
                TrackState::Find => {
                    controller.complete_find(Some(&p), |_| false);
                }
                TrackState::Track => {
                    let before = controller.state();
                    let outcome = controller.on_track_peak(&p, 0).unwrap();
                    if outcome == TrackOutcome::Lost {
                        assert_eq!(*controller.context(), FrameTimingContext::default());
                    } else {
                        assert_eq!(controller.state(), before);
                    }
                }
            }
        }

        assert_eq!(controller.on_track_no_space(), TrackOutcome::NoSpace);
    }

    #[test]
    fn test_track_peak_rejected_while_searching() {
        let mut controller = TrackingController::new(&TuningConfig::default());
        let result = controller.on_track_peak(&peak(832, 10.0, 1.0), 0);

        assert!(matches!(result, Err(LayerError::InvalidState(_))));
        assert_eq!(controller.state(), TrackState::Find);
        assert_eq!(*controller.context(), FrameTimingContext::default());
    }

    #[test]
    fn test_reset_idempotent() {
        let mut controller = tracking(&TuningConfig::default());
        controller.on_track_peak(&peak(0, 10.0, 1.0), 2).unwrap();

        controller.reset();
        let state = controller.state();
        let context = *controller.context();
        controller.reset();

        assert_eq!(state, TrackState::Find);
        assert_eq!(controller.state(), state);
        assert_eq!(*controller.context(), context);
        assert_eq!(context, FrameTimingContext::default());
    }
}
