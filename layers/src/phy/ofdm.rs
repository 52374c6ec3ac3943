//! OFDM Helpers for the Synchronization Front End
//!
//! Maps synchronization sequences to time-domain OFDM symbols and
//! compensates carrier frequency offset on the received stream

use crate::LayerError;
use num_complex::Complex32;
use rustfft::FftPlanner;
use std::f32::consts::PI;
use tracing::debug;

/// Map a centred sequence onto the subcarriers around DC (DC excluded) and
/// return the time-domain useful symbol.
///
/// Element `n` of a sequence of length `M` goes to subcarrier `n - M/2`
/// below DC when `n < M/2` and to subcarrier `n - M/2 + 1` above DC
/// otherwise. The IFFT is scaled by `1/sqrt(N)` so symbol energy equals the
/// energy of the sequence.
pub fn sequence_to_symbol(sequence: &[Complex32], fft_size: usize) -> Result<Vec<Complex32>, LayerError> {
    let half = sequence.len() / 2;
    if sequence.is_empty() || sequence.len() % 2 != 0 || sequence.len() >= fft_size {
        return Err(LayerError::InvalidConfiguration(format!(
            "cannot map {} subcarriers into FFT size {}",
            sequence.len(),
            fft_size
        )));
    }

    let mut grid = vec![Complex32::new(0.0, 0.0); fft_size];
    for (n, &value) in sequence.iter().enumerate() {
        let bin = if n < half {
            fft_size - half + n
        } else {
            n - half + 1
        };
        grid[bin] = value;
    }

    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(fft_size);
    ifft.process(&mut grid);

    let scale = 1.0 / (fft_size as f32).sqrt();
    for sample in grid.iter_mut() {
        *sample *= scale;
    }

    debug!("Mapped {} subcarriers into a {}-point symbol", sequence.len(), fft_size);
    Ok(grid)
}

/// Carrier frequency offset corrector.
///
/// Keeps the phase between calls so consecutive blocks of one stream are
/// corrected continuously.
#[derive(Debug, Clone, Default)]
pub struct CfoCorrector {
    phase: f32,
}

impl CfoCorrector {
    /// Create a corrector with zero phase
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a frequency offset of `cfo_hz` from the samples
    pub fn apply_cfo_compensation(
        &mut self,
        samples: &mut [Complex32],
        cfo_hz: f32,
        sample_rate: f32,
    ) {
        let phase_increment = -2.0 * PI * cfo_hz / sample_rate;
        let mut phase = self.phase;

        for sample in samples {
            let compensation = Complex32::new(phase.cos(), phase.sin());
            *sample *= compensation;
            phase = wrap_phase(phase + phase_increment);
        }

        self.phase = phase;
    }

    /// Apply the same correction to every antenna of one block; every antenna
    /// starts from the same phase
    pub fn compensate_antennas<'a>(
        &mut self,
        antennas: impl IntoIterator<Item = &'a mut [Complex32]>,
        cfo_hz: f32,
        sample_rate: f32,
    ) {
        let start = self.phase;
        let mut end = start;
        for samples in antennas {
            self.phase = start;
            self.apply_cfo_compensation(samples, cfo_hz, sample_rate);
            end = self.phase;
        }
        self.phase = end;
    }

    /// Advance the phase over samples that are dropped without correction
    pub fn advance(&mut self, num_samples: usize, cfo_hz: f32, sample_rate: f32) {
        let phase_increment = -2.0 * PI * cfo_hz / sample_rate;
        let turns = (phase_increment as f64) * num_samples as f64;
        self.phase = wrap_phase((self.phase as f64 + turns).rem_euclid(2.0 * std::f64::consts::PI) as f32);
    }

    /// Reset the phase to zero
    pub fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Wrap phase to [-π, π]
pub fn wrap_phase(phase: f32) -> f32 {
    if phase > PI {
        phase - 2.0 * PI
    } else if phase < -PI {
        phase + 2.0 * PI
    } else {
        phase
    }
}
