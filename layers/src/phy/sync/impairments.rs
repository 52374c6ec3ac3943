//! Impairment Estimation
//!
//! Estimates RSRP, RSSI and carrier frequency offset from the PSS and SSS
//! symbols of one sync subframe

use super::correlator::inner_product;
use crate::phy::frame_structure::FrameGeometry;
use crate::phy::pss_sss::{ReferenceWaveformSet, SyncSubframe};
use crate::LayerError;
use num_complex::Complex32;
use std::f32::consts::PI;

/// Measurements at one PSS position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpairmentSample {
    /// Residual carrier frequency offset in Hz
    pub cfo_hz: f32,
    /// Reference signal received power, linear
    pub rsrp_linear: f32,
    /// Received signal strength over the channel bandwidth, linear
    pub rssi_linear: f32,
    /// Normalized SSS correlation strength
    pub sss_correlation: f32,
}

/// One pair of observations whose phase difference measures the CFO
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfoPair {
    /// Distance in samples between the two observations
    pub distance: usize,
    /// Combination weight
    pub weight: f32,
}

impl CfoPair {
    /// Frequency in Hz of a phase rotation over the pair distance
    pub fn frequency(&self, phase: f32, sample_rate: f32) -> f32 {
        phase * sample_rate / (2.0 * PI * self.distance as f32)
    }

    /// Largest offset measurable without ambiguity, in Hz
    pub fn period(&self, sample_rate: f32) -> f32 {
        sample_rate / self.distance as f32
    }
}

/// CFO estimation pairs, combined with weights proportional to distance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CfoPairTable {
    half_symbol: CfoPair,
    adjacent_symbols: CfoPair,
}

impl CfoPairTable {
    /// Pairs for a geometry: PSS halves (coarse) and SSS to PSS (fine)
    pub fn new(geometry: &FrameGeometry) -> Self {
        let coarse = geometry.fft_size() / 2;
        let fine = geometry.pss_sss_distance();
        let coarse_weight = coarse as f32 / (coarse + fine) as f32;

        Self {
            half_symbol: CfoPair { distance: coarse, weight: coarse_weight },
            // Last weight completes the sum to one
            adjacent_symbols: CfoPair { distance: fine, weight: 1.0 - coarse_weight },
        }
    }

    /// First and second half of the PSS
    pub fn half_symbol(&self) -> &CfoPair {
        &self.half_symbol
    }

    /// SSS and PSS symbols
    pub fn adjacent_symbols(&self) -> &CfoPair {
        &self.adjacent_symbols
    }

    /// Combine the per-pair phases into one estimate.
    ///
    /// The fine estimate is unwrapped to the period closest to the coarse one.
    pub fn combine(&self, half_symbol_phase: f32, adjacent_phase: f32, sample_rate: f32) -> f32 {
        let coarse = self.half_symbol.frequency(half_symbol_phase, sample_rate);
        let fine = self.adjacent_symbols.frequency(adjacent_phase, sample_rate);
        let period = self.adjacent_symbols.period(sample_rate);
        let fine = fine + period * ((coarse - fine) / period).round();

        self.half_symbol.weight * coarse + self.adjacent_symbols.weight * fine
    }
}

/// RSRP, RSSI and CFO estimator for one cell geometry
#[derive(Debug, Clone)]
pub struct ImpairmentEstimator {
    fft_size: usize,
    pss_sss_distance: usize,
    sample_rate: f32,
    nof_subcarriers: usize,
    pairs: CfoPairTable,
}

impl ImpairmentEstimator {
    /// Create an estimator for a frame geometry
    pub fn new(geometry: &FrameGeometry) -> Self {
        Self {
            fft_size: geometry.fft_size(),
            pss_sss_distance: geometry.pss_sss_distance(),
            sample_rate: geometry.sample_rate(),
            nof_subcarriers: geometry.bandwidth().nof_subcarriers(),
            pairs: CfoPairTable::new(geometry),
        }
    }

    /// CFO pair table in use
    pub fn pairs(&self) -> &CfoPairTable {
        &self.pairs
    }

    /// Distance between the SSS and PSS useful parts
    pub fn pss_sss_distance(&self) -> usize {
        self.pss_sss_distance
    }

    /// Check that the PSS at `pss_start` and its SSS lie inside a block
    pub fn fits(&self, block_len: usize, pss_start: usize) -> bool {
        pss_start >= self.pss_sss_distance && pss_start + self.fft_size <= block_len
    }

    /// Measure the PSS at `pss_start` and the SSS of `subframe` before it
    pub fn estimate(
        &self,
        samples: &[Complex32],
        pss_start: usize,
        references: &ReferenceWaveformSet,
        subframe: SyncSubframe,
    ) -> Result<ImpairmentSample, LayerError> {
        if !self.fits(samples.len(), pss_start) || references.symbol_len() != self.fft_size {
            return Err(LayerError::InvalidState(format!(
                "sync symbols at {} do not fit in a block of {} samples",
                pss_start,
                samples.len()
            )));
        }

        let sss_start = pss_start - self.pss_sss_distance;
        let y_pss = &samples[pss_start..pss_start + self.fft_size];
        let y_sss = &samples[sss_start..sss_start + self.fft_size];
        let r_pss = references.pss();
        let r_sss = references.sss(subframe);

        let rsrp = 0.5 * (channel_power(y_pss, r_pss) + channel_power(y_sss, r_sss));
        let rssi = 0.5 * (self.band_power(y_pss) + self.band_power(y_sss));

        // Channel-compensated samples, z[n] = h·|r[n]|²·e^{jωn}
        let z_pss: Vec<Complex32> = y_pss.iter().zip(r_pss).map(|(y, r)| y * r.conj()).collect();
        let z_sss = y_sss.iter().zip(r_sss).map(|(y, r)| y * r.conj());

        let half = self.pairs.half_symbol().distance;
        let half_symbol: Complex32 = z_pss[..half]
            .iter()
            .zip(&z_pss[half..])
            .map(|(a, b)| a.conj() * b)
            .sum();
        let adjacent: Complex32 = z_sss.zip(&z_pss).map(|(s, p)| s.conj() * p).sum();

        let cfo_hz = self.pairs.combine(half_symbol.arg(), adjacent.arg(), self.sample_rate);

        Ok(ImpairmentSample {
            cfo_hz,
            rsrp_linear: rsrp,
            rssi_linear: rssi,
            sss_correlation: sss_correlation(y_sss, r_sss),
        })
    }

    /// Mean symbol power scaled to the channel bandwidth in resource elements
    fn band_power(&self, symbol: &[Complex32]) -> f32 {
        let mean = symbol.iter().map(|s| s.norm_sqr()).sum::<f32>() / symbol.len() as f32;
        mean * self.nof_subcarriers as f32
    }
}

/// LS channel power per reference element, `|<y, r>|² / (Σ|r|²)²`
fn channel_power(symbol: &[Complex32], reference: &[Complex32]) -> f32 {
    let energy = reference_energy(reference);
    if energy == 0.0 {
        return 0.0;
    }
    inner_product(symbol, reference).norm_sqr() / (energy * energy)
}

/// Normalized correlation strength `|<y, r>| / Σ|r|²`
pub fn sss_correlation(symbol: &[Complex32], reference: &[Complex32]) -> f32 {
    let energy = reference_energy(reference);
    if energy == 0.0 {
        return 0.0;
    }
    inner_product(symbol, reference).norm() / energy
}

fn reference_energy(reference: &[Complex32]) -> f32 {
    reference.iter().map(|r| r.norm_sqr()).sum()
}
