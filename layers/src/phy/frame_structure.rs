//! LTE Frame Structure Implementation
//!
//! Implements the downlink frame timing according to 3GPP TS 36.211 for
//! the common LTE FFT sizes

use common::types::{ChannelBandwidth, CyclicPrefix, SUBCARRIER_SPACING_HZ};
use common::utils::time::SUBFRAMES_PER_FRAME;

/// Reference FFT size for the CP length tables of 36.211
const REFERENCE_FFT_SIZE: usize = 2048;

/// Sample-level geometry of a downlink frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Channel bandwidth
    bandwidth: ChannelBandwidth,
    /// Cyclic prefix type
    cyclic_prefix: CyclicPrefix,
    /// OFDM symbol size
    fft_size: usize,
}

impl FrameGeometry {
    /// Create the geometry for a bandwidth and cyclic prefix
    pub fn new(bandwidth: ChannelBandwidth, cyclic_prefix: CyclicPrefix) -> Self {
        Self {
            bandwidth,
            cyclic_prefix,
            fft_size: bandwidth.fft_size(),
        }
    }

    /// Channel bandwidth
    pub fn bandwidth(&self) -> ChannelBandwidth {
        self.bandwidth
    }

    /// Cyclic prefix type
    pub fn cyclic_prefix(&self) -> CyclicPrefix {
        self.cyclic_prefix
    }

    /// Number of resource blocks
    pub fn nof_prb(&self) -> usize {
        self.bandwidth.nof_prb()
    }

    /// OFDM symbol size (samples without CP)
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> f32 {
        self.fft_size as f32 * SUBCARRIER_SPACING_HZ
    }

    /// Samples per subframe
    pub fn subframe_len(&self) -> usize {
        15 * self.fft_size
    }

    /// Samples per frame
    pub fn frame_len(&self) -> usize {
        SUBFRAMES_PER_FRAME * self.subframe_len()
    }

    /// Samples per half frame (distance between the two sync subframes)
    pub fn half_frame_len(&self) -> usize {
        self.frame_len() / 2
    }

    /// Number of OFDM symbols per slot
    pub fn symbols_per_slot(&self) -> usize {
        match self.cyclic_prefix {
            CyclicPrefix::Normal => 7,
            CyclicPrefix::Extended => 6,
        }
    }

    /// CP length of a symbol, by its index within the slot
    pub fn cp_len(&self, symbol: usize) -> usize {
        let reference = match (self.cyclic_prefix, symbol) {
            (CyclicPrefix::Normal, 0) => 160,
            (CyclicPrefix::Normal, _) => 144,
            (CyclicPrefix::Extended, _) => 512,
        };
        reference * self.fft_size / REFERENCE_FFT_SIZE
    }

    /// Offset of a symbol's useful part from the start of its slot
    pub fn symbol_offset(&self, symbol: usize) -> usize {
        (0..symbol).map(|l| self.cp_len(l) + self.fft_size).sum::<usize>() + self.cp_len(symbol)
    }

    /// Index within slot 0 of the symbol carrying the PSS (the last one)
    pub fn pss_symbol(&self) -> usize {
        self.symbols_per_slot() - 1
    }

    /// CP length in front of the PSS symbol
    pub fn pss_cp_len(&self) -> usize {
        self.cp_len(self.pss_symbol())
    }

    /// Offset of the PSS useful part from the start of subframe 0 or 5
    pub fn pss_offset(&self) -> usize {
        self.subframe_len() / 2 - self.fft_size
    }

    /// Offset of the SSS useful part from the start of subframe 0 or 5
    pub fn sss_offset(&self) -> usize {
        self.pss_offset() - self.pss_sss_distance()
    }

    /// Distance in samples between the SSS and PSS useful parts
    pub fn pss_sss_distance(&self) -> usize {
        self.fft_size + self.pss_cp_len()
    }
}
