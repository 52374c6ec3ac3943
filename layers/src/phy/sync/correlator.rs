//! Sync Sequence Correlator
//!
//! Circular cross-correlation of a received block against the reference
//! waveforms, computed in the frequency domain with cached reference spectra.

use crate::LayerError;
use num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;
use tracing::debug;

/// Correlation peak of one block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakEstimate {
    /// Lag of the strongest correlation, i.e. where the reference starts
    pub sample_index: usize,
    /// Correlation magnitude at the peak
    pub magnitude: f32,
    /// RMS of the correlation magnitude over all evaluated lags
    pub rms_noise: f32,
}

impl PeakEstimate {
    /// Peak-to-rms ratio; zero when the correlation is empty
    pub fn peak_to_noise(&self) -> f32 {
        if self.rms_noise > 0.0 {
            self.magnitude / self.rms_noise
        } else {
            0.0
        }
    }
}

/// Frequency-domain correlator for a fixed block length
pub struct Correlator {
    block_len: usize,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    /// Conjugated spectra of the zero-padded references
    reference_spectra: Vec<Vec<Complex32>>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("block_len", &self.block_len)
            .field("references", &self.reference_spectra.len())
            .finish()
    }
}

impl Correlator {
    /// Plan the transforms and cache the spectrum of every reference
    pub fn new(block_len: usize, references: &[&[Complex32]]) -> Result<Self, LayerError> {
        if block_len == 0 {
            return Err(LayerError::InvalidConfiguration("zero correlation length".to_string()));
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(block_len);
        let ifft = planner.plan_fft_inverse(block_len);

        let mut reference_spectra = Vec::with_capacity(references.len());
        for (index, reference) in references.iter().enumerate() {
            if reference.is_empty() || reference.len() > block_len {
                return Err(LayerError::InvalidConfiguration(format!(
                    "reference {} has length {}, block length is {}",
                    index,
                    reference.len(),
                    block_len
                )));
            }

            let mut spectrum = vec![Complex32::new(0.0, 0.0); block_len];
            spectrum[..reference.len()].copy_from_slice(reference);
            fft.process(&mut spectrum);
            for bin in spectrum.iter_mut() {
                *bin = bin.conj();
            }
            reference_spectra.push(spectrum);
        }

        debug!("Correlator ready: {} references over {} samples", reference_spectra.len(), block_len);

        Ok(Self {
            block_len,
            fft,
            ifft,
            reference_spectra,
        })
    }

    /// Block length the correlator was planned for
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Correlate a full block against one reference
    pub fn correlate(&self, samples: &[Complex32], reference_index: usize) -> Result<PeakEstimate, LayerError> {
        let mut work = vec![Complex32::new(0.0, 0.0); self.block_len];
        self.correlate_with(samples, reference_index, &mut work)
    }

    /// Same as [`Correlator::correlate`] with a caller-owned work buffer of
    /// the block length
    pub fn correlate_with(
        &self,
        samples: &[Complex32],
        reference_index: usize,
        work: &mut [Complex32],
    ) -> Result<PeakEstimate, LayerError> {
        if samples.len() != self.block_len || work.len() != self.block_len {
            return Err(LayerError::InvalidState(format!(
                "correlator expects {} samples, got {}",
                self.block_len,
                samples.len()
            )));
        }
        let spectrum = self.reference_spectra.get(reference_index).ok_or_else(|| {
            LayerError::InvalidState(format!("no reference with index {}", reference_index))
        })?;

        work.copy_from_slice(samples);
        self.fft.process(work);
        for (bin, reference) in work.iter_mut().zip(spectrum) {
            *bin *= reference;
        }
        self.ifft.process(work);

        let scale = 1.0 / self.block_len as f32;
        Ok(find_peak(work.iter().map(|c| c.norm() * scale), 0))
    }
}

/// Inner product `Σ y[n]·conj(r[n])` over the shorter of the two slices
pub fn inner_product(samples: &[Complex32], reference: &[Complex32]) -> Complex32 {
    samples
        .iter()
        .zip(reference)
        .map(|(y, r)| y * r.conj())
        .sum()
}

/// Time-domain correlation over the lags `start..start + len`.
///
/// Returns `None` when the reference does not fit in the block at the last
/// lag of the window.
pub fn correlate_window(
    samples: &[Complex32],
    reference: &[Complex32],
    start: usize,
    len: usize,
) -> Option<PeakEstimate> {
    if len == 0 || reference.is_empty() || start + len - 1 + reference.len() > samples.len() {
        return None;
    }

    let magnitudes = (start..start + len).map(|lag| inner_product(&samples[lag..], reference).norm());
    Some(find_peak(magnitudes, start))
}

/// Strongest lag (first one on ties) and rms of a magnitude sequence
fn find_peak(magnitudes: impl Iterator<Item = f32>, first_lag: usize) -> PeakEstimate {
    let mut peak = PeakEstimate {
        sample_index: first_lag,
        magnitude: 0.0,
        rms_noise: 0.0,
    };
    let mut power = 0.0f64;
    let mut count = 0usize;

    for (offset, magnitude) in magnitudes.enumerate() {
        if magnitude > peak.magnitude {
            peak.magnitude = magnitude;
            peak.sample_index = first_lag + offset;
        }
        power += (magnitude as f64) * (magnitude as f64);
        count += 1;
    }

    if count > 0 {
        peak.rms_noise = (power / count as f64).sqrt() as f32;
    }
    peak
}
