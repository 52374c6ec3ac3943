//! Cell Acquisition and Tracking Synchronizer
//!
//! Turns a raw stream of baseband samples into subframe-aligned,
//! frequency-corrected blocks. In FIND the synchronizer reads whole frames
//! and searches the PSS over the frame; once a candidate is confirmed it
//! realigns the stream on a subframe boundary and switches to TRACK, where
//! it reads one subframe per step and follows the PSS in a narrow window.

pub mod config;
pub mod correlator;
pub mod false_alarm;
pub mod impairments;
pub mod tracking;

pub use config::{CellConfig, TuningConfig};
pub use correlator::{correlate_window, Correlator, PeakEstimate};
pub use false_alarm::{FalseAlarmDiscriminator, FalseAlarmThresholds, FalseAlarmVerdict, ThresholdPair};
pub use impairments::{CfoPair, CfoPairTable, ImpairmentEstimator, ImpairmentSample};
pub use tracking::{
    is_detection, FindCycle, FindOutcome, FrameTimingContext, TrackOutcome, TrackState,
    TrackingController, MAX_TIME_OFFSET,
};

use crate::phy::frame_structure::FrameGeometry;
use crate::phy::ofdm::CfoCorrector;
use crate::phy::pss_sss::{ReferenceWaveformSet, SyncSubframe};
use crate::LayerError;
use common::utils::time::advance_subframe;
use common::utils::{ema, linear_to_db, linear_to_dbm};
use impairments::sss_correlation;
use interfaces::{InterfaceError, SampleSource};
use num_complex::Complex32;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Amount of samples requested from the source in one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockLength {
    /// One radio frame (FIND)
    Frame,
    /// One subframe (TRACK)
    Subframe,
}

impl BlockLength {
    /// Number of samples for a geometry
    pub fn samples(&self, geometry: &FrameGeometry) -> usize {
        match self {
            BlockLength::Frame => geometry.frame_len(),
            BlockLength::Subframe => geometry.subframe_len(),
        }
    }
}

/// Latest synchronization measurement, in reporting units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LockResult {
    /// Whether the cell is acquired
    pub found: bool,
    /// PSS position within the last block
    pub peak_sample_index: Option<usize>,
    /// Estimated carrier frequency offset in Hz
    pub cfo_hz: f32,
    /// Reference signal received power in dBm
    pub rsrp_dbm: f32,
    /// Received signal strength in dBm
    pub rssi_dbm: f32,
    /// Reference signal received quality in dB
    pub rsrq_db: f32,
}

impl LockResult {
    /// Result carrying no measurement
    pub fn not_found() -> Self {
        Self {
            found: false,
            peak_sample_index: None,
            cfo_hz: f32::NAN,
            rsrp_dbm: f32::NAN,
            rssi_dbm: f32::NAN,
            rsrq_db: f32::NAN,
        }
    }

    fn locked(peak_sample_index: usize, cfo_hz: f32, rsrp: f32, rssi: f32, nof_prb: usize) -> Self {
        Self {
            found: true,
            peak_sample_index: Some(peak_sample_index),
            cfo_hz,
            rsrp_dbm: linear_to_dbm(rsrp),
            rssi_dbm: linear_to_dbm(rssi),
            rsrq_db: linear_to_db(nof_prb as f32 * rsrp / rssi),
        }
    }
}

impl Default for LockResult {
    fn default() -> Self {
        Self::not_found()
    }
}

/// What happened during one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncEvent {
    /// A FIND frame was searched, the cycle is not complete yet
    Searching { frames: usize },
    /// A FIND cycle ended
    Acquisition { outcome: FindOutcome, result: LockResult },
    /// A TRACK subframe was read; sync subframes with a detected PSS carry
    /// a measurement
    Subframe { index: u8, measurement: Option<LockResult> },
    /// Tracking was lost, back to FIND
    TrackingLost,
    /// The search window did not fit; samples are dropped before the next read
    Realigned { discarded: usize },
}

/// Measurements of one FIND frame
#[derive(Debug, Clone, Copy)]
struct FrameMeasurement {
    subframe: SyncSubframe,
    at_candidate: ImpairmentSample,
    at_opposite: ImpairmentSample,
}

impl FrameMeasurement {
    /// Frame whose peak was too weak and too close to the edge to measure
    fn unmeasured() -> Self {
        let sample = ImpairmentSample {
            cfo_hz: f32::NAN,
            rsrp_linear: f32::NAN,
            rssi_linear: f32::NAN,
            sss_correlation: f32::NAN,
        };
        Self { subframe: SyncSubframe::First, at_candidate: sample, at_opposite: sample }
    }
}

/// Everything derived from the configuration, built before being applied
struct CellSetup {
    geometry: FrameGeometry,
    references: ReferenceWaveformSet,
    correlator: Correlator,
    estimator: ImpairmentEstimator,
    discriminator: FalseAlarmDiscriminator,
    controller: TrackingController,
}

impl CellSetup {
    fn build(
        cell: &CellConfig,
        tuning: &TuningConfig,
        references: Option<ReferenceWaveformSet>,
    ) -> Result<Self, LayerError> {
        tuning.validate()?;
        let (pci, geometry) = cell.validate()?;

        let references = match references {
            Some(references) if references.symbol_len() != geometry.fft_size() => {
                return Err(LayerError::InvalidConfiguration(format!(
                    "reference symbols of {} samples, expected {}",
                    references.symbol_len(),
                    geometry.fft_size()
                )));
            }
            Some(references) => references,
            None => ReferenceWaveformSet::from_cell(pci, geometry.fft_size())?,
        };

        let correlator = Correlator::new(geometry.frame_len(), &[references.pss()])?;

        Ok(Self {
            estimator: ImpairmentEstimator::new(&geometry),
            discriminator: FalseAlarmDiscriminator::new(tuning.false_alarm_max_mild_faults),
            controller: TrackingController::new(tuning),
            geometry,
            references,
            correlator,
        })
    }
}

const PSS_REFERENCE: usize = 0;

/// LTE cell acquisition and tracking synchronizer
pub struct Synchronizer<S: SampleSource> {
    source: S,
    cell: CellConfig,
    tuning: TuningConfig,
    setup: CellSetup,
    find_cycle: FindCycle<FrameMeasurement>,
    corrector: CfoCorrector,
    cfo_hz: f32,
    rsrp_avg: f32,
    rssi_avg: f32,
    last_result: LockResult,
    /// Index of the block last read in TRACK
    subframe_index: Option<u8>,
    next_subframe: u8,
    /// Samples to drop before the next read
    pending_discard: usize,
    /// Samples of the current block tail to repeat at the next block start
    carry: usize,
    /// Aligned blocks, one per antenna
    buffers: Vec<Vec<Complex32>>,
    block_len: usize,
    /// Sink for dropped samples
    discard: Vec<Vec<Complex32>>,
    /// Correlator work area
    work: Vec<Complex32>,
}

impl<S: SampleSource> Synchronizer<S> {
    /// Create a synchronizer generating the references for the cell
    pub fn new(source: S, cell: CellConfig, tuning: TuningConfig) -> Result<Self, LayerError> {
        let setup = CellSetup::build(&cell, &tuning, None)?;
        Self::with_setup(source, cell, tuning, setup)
    }

    /// Create a synchronizer with precomputed references
    pub fn with_references(
        source: S,
        cell: CellConfig,
        tuning: TuningConfig,
        references: ReferenceWaveformSet,
    ) -> Result<Self, LayerError> {
        let setup = CellSetup::build(&cell, &tuning, Some(references))?;
        Self::with_setup(source, cell, tuning, setup)
    }

    fn with_setup(source: S, cell: CellConfig, tuning: TuningConfig, setup: CellSetup) -> Result<Self, LayerError> {
        let antennas = source.num_antennas();
        if antennas == 0 {
            return Err(LayerError::InvalidConfiguration("sample source has no antennas".to_string()));
        }

        info!(
            "Synchronizer for {} PRB, NID1={} NID2={}, {} antenna(s), {:.2} MHz",
            cell.channel_bandwidth_rb,
            cell.secondary_identity,
            cell.physical_identity,
            antennas,
            setup.geometry.sample_rate() / 1e6
        );

        let mut sync = Self {
            source,
            cell,
            tuning,
            setup,
            find_cycle: FindCycle::new(),
            corrector: CfoCorrector::new(),
            cfo_hz: 0.0,
            rsrp_avg: f32::NAN,
            rssi_avg: f32::NAN,
            last_result: LockResult::not_found(),
            subframe_index: None,
            next_subframe: 0,
            pending_discard: 0,
            carry: 0,
            buffers: Vec::new(),
            block_len: 0,
            discard: Vec::new(),
            work: Vec::new(),
        };
        sync.allocate_buffers();
        Ok(sync)
    }

    fn allocate_buffers(&mut self) {
        let antennas = self.source.num_antennas();
        let frame_len = self.setup.geometry.frame_len();
        let subframe_len = self.setup.geometry.subframe_len();

        self.buffers = vec![vec![Complex32::new(0.0, 0.0); frame_len]; antennas];
        self.discard = vec![vec![Complex32::new(0.0, 0.0); subframe_len]; antennas];
        self.work = vec![Complex32::new(0.0, 0.0); frame_len];
        self.block_len = 0;
    }

    /// Current state
    pub fn state(&self) -> TrackState {
        self.setup.controller.state()
    }

    /// Latest measurement
    pub fn last_result(&self) -> &LockResult {
        &self.last_result
    }

    /// Carrier frequency offset estimate in Hz
    pub fn cfo_hz(&self) -> f32 {
        self.cfo_hz
    }

    /// Mean sampling frequency offset in samples per second
    pub fn sfo_hz(&self) -> f32 {
        self.setup.controller.sfo_hz()
    }

    /// Subframe index (0-9) of the last block read in TRACK
    pub fn subframe_index(&self) -> Option<u8> {
        self.subframe_index
    }

    /// Timing loop state
    pub fn timing(&self) -> &FrameTimingContext {
        self.setup.controller.context()
    }

    /// Last aligned, CFO-corrected block of an antenna
    pub fn samples(&self, antenna: usize) -> Option<&[Complex32]> {
        self.buffers.get(antenna).map(|buffer| &buffer[..self.block_len])
    }

    /// Frame geometry in use
    pub fn geometry(&self) -> &FrameGeometry {
        &self.setup.geometry
    }

    /// Reference waveforms in use
    pub fn references(&self) -> &ReferenceWaveformSet {
        &self.setup.references
    }

    pub fn cell(&self) -> &CellConfig {
        &self.cell
    }

    pub fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Give the sample source back
    pub fn into_source(self) -> S {
        self.source
    }

    /// Return to FIND and forget every estimate
    pub fn reset(&mut self) {
        self.setup.controller.reset();
        self.find_cycle.clear();
        self.corrector.reset();
        self.cfo_hz = 0.0;
        self.rsrp_avg = f32::NAN;
        self.rssi_avg = f32::NAN;
        self.last_result = LockResult::not_found();
        self.subframe_index = None;
        self.next_subframe = 0;
        self.pending_discard = 0;
        self.carry = 0;
        debug!("Synchronizer reset");
    }

    /// Apply a new configuration. Nothing changes unless the whole new
    /// configuration is valid.
    pub fn reconfigure(&mut self, cell: CellConfig, tuning: TuningConfig) -> Result<(), LayerError> {
        let setup = CellSetup::build(&cell, &tuning, None)?;

        info!("Reconfigured for {} PRB, NID1={} NID2={}",
              cell.channel_bandwidth_rb, cell.secondary_identity, cell.physical_identity);
        self.setup = setup;
        self.cell = cell;
        self.tuning = tuning;
        self.allocate_buffers();
        self.reset();
        Ok(())
    }

    /// Read and process one block
    pub fn step(&mut self) -> Result<SyncEvent, LayerError> {
        let started = Instant::now();

        let event = match self.setup.controller.state() {
            TrackState::Find => self.step_find()?,
            TrackState::Track => self.step_track()?,
        };

        trace!("Step {:?} took {:?}", event, started.elapsed());
        Ok(event)
    }

    fn step_find(&mut self) -> Result<SyncEvent, LayerError> {
        let frame_len = self.read_block(BlockLength::Frame)?;
        let geometry = self.setup.geometry;
        let half_frame = geometry.half_frame_len();

        let peak = self.setup.correlator.correlate_with(
            &self.buffers[0][..frame_len],
            PSS_REFERENCE,
            &mut self.work,
        )?;

        let position = peak.sample_index;
        let opposite = if position >= half_frame { position - half_frame } else { position + half_frame };

        let estimator = &self.setup.estimator;
        let fits = estimator.fits(frame_len, position) && estimator.fits(frame_len, opposite);
        let detected = is_detection(&peak, self.tuning.detection_threshold);

        // Only a detected candidate is worth moving the stream for
        if detected && !fits {
            let discarded = geometry.subframe_len() / 2;
            warn!("PSS candidate at {} too close to the frame edge, dropping {} samples", position, discarded);
            self.pending_discard += discarded;
            self.find_cycle.clear();
            return Ok(SyncEvent::Realigned { discarded });
        }

        let measurement = if fits {
            let samples = &self.buffers[0][..frame_len];
            let references = &self.setup.references;
            let sss_start = position - estimator.pss_sss_distance();
            let sss_symbol = &samples[sss_start..sss_start + geometry.fft_size()];
            let subframe = if sss_correlation(sss_symbol, references.sss(SyncSubframe::First))
                >= sss_correlation(sss_symbol, references.sss(SyncSubframe::Second))
            {
                SyncSubframe::First
            } else {
                SyncSubframe::Second
            };

            // The opposite position is measured with the candidate's SSS
            FrameMeasurement {
                subframe,
                at_candidate: estimator.estimate(samples, position, references, subframe)?,
                at_opposite: estimator.estimate(samples, opposite, references, subframe)?,
            }
        } else {
            FrameMeasurement::unmeasured()
        };

        debug!(
            "FIND frame {}: peak {:.2} at {} (rms {:.2}), subframe {}, detected={}",
            self.find_cycle.len() + 1,
            peak.magnitude,
            position,
            peak.rms_noise,
            measurement.subframe.index(),
            detected
        );
        self.find_cycle.push(peak, measurement);

        if !self.setup.controller.find_cycle_complete(self.find_cycle.len()) {
            return Ok(SyncEvent::Searching { frames: self.find_cycle.len() });
        }

        self.complete_find(frame_len)
    }

    fn complete_find(&mut self, frame_len: usize) -> Result<SyncEvent, LayerError> {
        let best = self.find_cycle.best().copied();
        let discriminator = &self.setup.discriminator;
        let false_alarm_enabled = self.tuning.false_alarm_enabled;
        let frames = self.find_cycle.frames();

        let outcome = self.setup.controller.complete_find(best.as_ref().map(|(peak, _)| peak), |peak| {
            if !false_alarm_enabled {
                return false;
            }
            let at_candidate: Vec<ImpairmentSample> = frames.iter().map(|(_, m)| m.at_candidate).collect();
            let at_opposite: Vec<ImpairmentSample> = frames.iter().map(|(_, m)| m.at_opposite).collect();
            discriminator.is_false_alarm(peak, &at_candidate, &at_opposite)
        });
        self.find_cycle.clear();

        let (peak, measurement) = match (outcome, best) {
            (FindOutcome::Locked, Some(best)) => best,
            _ => {
                self.last_result = LockResult::not_found();
                return Ok(SyncEvent::Acquisition { outcome, result: self.last_result });
            }
        };

        // Align the next read on the first subframe boundary after this frame
        let geometry = self.setup.geometry;
        let subframe_len = geometry.subframe_len() as i64;
        let subframe_start = peak.sample_index as i64 - geometry.pss_offset() as i64;
        let discard = subframe_start.rem_euclid(subframe_len);
        let elapsed = (frame_len as i64 + discard - subframe_start) / subframe_len;

        self.pending_discard = discard as usize;
        self.carry = 0;
        self.next_subframe = advance_subframe(measurement.subframe.index(), elapsed as usize) as u8;
        self.subframe_index = None;

        let sample = measurement.at_candidate;
        self.update_cfo(sample.cfo_hz, 1.0);
        self.rsrp_avg = sample.rsrp_linear;
        self.rssi_avg = sample.rssi_linear;
        self.last_result = LockResult::locked(
            peak.sample_index,
            self.cfo_hz,
            self.rsrp_avg,
            self.rssi_avg,
            geometry.nof_prb(),
        );

        info!(
            "Cell acquired: PSS at {} in subframe {}, CFO {:.1} Hz, RSRP {:.1} dBm, next subframe {}",
            peak.sample_index,
            measurement.subframe.index(),
            self.cfo_hz,
            self.last_result.rsrp_dbm,
            self.next_subframe
        );

        Ok(SyncEvent::Acquisition { outcome, result: self.last_result })
    }

    fn step_track(&mut self) -> Result<SyncEvent, LayerError> {
        let block_len = self.read_block(BlockLength::Subframe)?;
        let index = self.next_subframe;
        self.next_subframe = advance_subframe(index as usize, 1) as u8;
        self.subframe_index = Some(index);

        let references = match self.setup.references.for_subframe(index as usize) {
            Some(references) => references,
            None => return Ok(SyncEvent::Subframe { index, measurement: None }),
        };
        let subframe = references.subframe;

        let geometry = self.setup.geometry;
        let window = self.tuning.track_window as i64;
        let center = geometry.pss_offset() as i64 + self.setup.controller.expected_deviation() as i64;
        let samples = &self.buffers[0][..block_len];

        let peak = if center - window >= 0 {
            correlate_window(
                samples,
                references.pss,
                (center - window) as usize,
                (2 * window + 1) as usize,
            )
            .filter(|peak| self.setup.estimator.fits(block_len, peak.sample_index))
        } else {
            None
        };

        let peak = match peak {
            Some(peak) => peak,
            None => {
                let outcome = self.setup.controller.on_track_no_space();
                let discarded = geometry.subframe_len() / 2;
                warn!("Subframe {}: tracking window out of block ({:?}), dropping {} samples",
                      index, outcome, discarded);
                self.pending_discard += discarded;
                return Ok(SyncEvent::Realigned { discarded });
            }
        };

        let deviation = peak.sample_index as i32 - geometry.pss_offset() as i32;
        let outcome = self.setup.controller.on_track_peak(&peak, deviation)?;

        let event = match outcome {
            TrackOutcome::Hit { .. } => {
                let sample = self.setup.estimator.estimate(
                    samples,
                    peak.sample_index,
                    &self.setup.references,
                    subframe,
                )?;

                let coefficient = self.tuning.measurement_ema_coefficient;
                self.rsrp_avg = smooth(self.rsrp_avg, sample.rsrp_linear, coefficient);
                self.rssi_avg = smooth(self.rssi_avg, sample.rssi_linear, coefficient);
                self.update_cfo(sample.cfo_hz, self.tuning.cfo_ema_coefficient);

                self.last_result = LockResult::locked(
                    peak.sample_index,
                    self.cfo_hz,
                    self.rsrp_avg,
                    self.rssi_avg,
                    geometry.nof_prb(),
                );
                debug!("Subframe {}: PSS at {} (deviation {}), CFO {:.1} Hz",
                       index, peak.sample_index, deviation, self.cfo_hz);

                SyncEvent::Subframe { index, measurement: Some(self.last_result) }
            }
            TrackOutcome::Miss { .. } | TrackOutcome::NoSpace => SyncEvent::Subframe { index, measurement: None },
            TrackOutcome::Lost => {
                warn!("Tracking lost at subframe {}, searching again", index);
                self.last_result = LockResult::not_found();
                self.subframe_index = None;
                self.pending_discard = 0;
                self.carry = 0;
                self.find_cycle.clear();
                return Ok(SyncEvent::TrackingLost);
            }
        };

        // Timing corrections take effect from the next block on
        let correction = self.setup.controller.take_correction();
        if correction > 0 {
            self.pending_discard += correction as usize;
        } else if correction < 0 {
            self.carry = (correction.unsigned_abs() as usize).min(block_len);
        }

        Ok(event)
    }

    /// Fold a residual CFO measurement into the estimate
    fn update_cfo(&mut self, residual_hz: f32, coefficient: f32) {
        if !residual_hz.is_finite() {
            return;
        }
        if self.tuning.cfo_correction_enabled {
            // The stream is already corrected by the current estimate
            self.cfo_hz += coefficient * residual_hz;
        } else {
            self.cfo_hz = ema(residual_hz, self.cfo_hz, coefficient);
        }
    }

    /// Read the next block into the antenna buffers and return its length
    fn read_block(&mut self, length: BlockLength) -> Result<usize, LayerError> {
        let len = length.samples(&self.setup.geometry);
        let sample_rate = self.setup.geometry.sample_rate();

        if self.pending_discard > 0 {
            let count = std::mem::take(&mut self.pending_discard);
            self.discard_samples(count)?;
        }

        let previous = self.block_len;
        let carry = std::mem::take(&mut self.carry).min(previous).min(len);
        for buffer in self.buffers.iter_mut() {
            buffer.copy_within(previous - carry..previous, 0);
        }

        let mut blocks: Vec<&mut [Complex32]> = self.buffers.iter_mut().map(|b| &mut b[carry..len]).collect();
        let info = self.source.read(&mut blocks)?;
        if info.samples != len - carry {
            return Err(InterfaceError::ShortRead { requested: len - carry, read: info.samples }.into());
        }

        if self.tuning.cfo_correction_enabled {
            self.corrector.compensate_antennas(blocks, self.cfo_hz, sample_rate);
        }

        self.block_len = len;
        Ok(len)
    }

    /// Drop samples from the source, keeping the CFO phase continuous
    fn discard_samples(&mut self, count: usize) -> Result<(), LayerError> {
        let chunk_len = self.discard.first().map(|d| d.len()).unwrap_or(0).max(1);
        let mut remaining = count;

        while remaining > 0 {
            let chunk = remaining.min(chunk_len);
            let mut sinks: Vec<&mut [Complex32]> = self.discard.iter_mut().map(|d| &mut d[..chunk]).collect();
            self.source.read(&mut sinks)?;
            remaining -= chunk;
        }

        if self.tuning.cfo_correction_enabled {
            self.corrector.advance(count, self.cfo_hz, self.setup.geometry.sample_rate());
        }
        trace!("Discarded {} samples", count);
        Ok(())
    }
}

fn smooth(average: f32, value: f32, coefficient: f32) -> f32 {
    if average.is_nan() {
        value
    } else {
        ema(value, average, coefficient)
    }
}
