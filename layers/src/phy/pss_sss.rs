//! Primary and Secondary Synchronization Signal Generation
//!
//! Implements LTE PSS and SSS generation according to 3GPP TS 36.211
//! section 6.11 and builds the time-domain reference set used by the
//! synchronizer

use crate::phy::ofdm::sequence_to_symbol;
use crate::LayerError;
use common::types::Pci;
use num_complex::Complex32;
use std::f32::consts::PI;
use tracing::{debug, info};

/// PSS/SSS sequence length (subcarriers around DC)
pub const SYNC_SEQUENCE_LENGTH: usize = 62;

/// Zadoff-Chu root indices for NID2 = 0, 1, 2
const PSS_ROOTS: [u32; 3] = [25, 29, 34];

/// Length of the SSS m-sequences
const M_SEQUENCE_LENGTH: usize = 31;

/// Subframes of a frame carrying PSS and SSS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncSubframe {
    /// Subframe 0
    First,
    /// Subframe 5
    Second,
}

impl SyncSubframe {
    /// Sync subframe at a subframe index, if any
    pub fn from_index(subframe: usize) -> Option<Self> {
        match subframe {
            0 => Some(SyncSubframe::First),
            5 => Some(SyncSubframe::Second),
            _ => None,
        }
    }

    /// Subframe index within the frame
    pub fn index(&self) -> usize {
        match self {
            SyncSubframe::First => 0,
            SyncSubframe::Second => 5,
        }
    }
}

/// PSS generator
#[derive(Debug, Clone)]
pub struct PssGenerator {
    /// PSS sequence ID (0-2)
    nid2: u8,
}

impl PssGenerator {
    /// Create a new PSS generator
    pub fn new(nid2: u8) -> Result<Self, LayerError> {
        if nid2 > 2 {
            return Err(LayerError::InvalidConfiguration(format!("NID2 {} out of range 0-2", nid2)));
        }
        Ok(Self { nid2 })
    }

    /// Generate the 62 frequency-domain PSS values
    pub fn generate(&self) -> Vec<Complex32> {
        let root = PSS_ROOTS[self.nid2 as usize] as f32;
        let sequence: Vec<Complex32> = (0..SYNC_SEQUENCE_LENGTH)
            .map(|n| {
                // The middle element of the length-63 Zadoff-Chu sequence is
                // punctured (it would sit on DC)
                let m = if n < 31 { n } else { n + 1 } as f32;
                Complex32::from_polar(1.0, -PI * root * m * (m + 1.0) / 63.0)
            })
            .collect();

        debug!("Generated PSS for NID2={} (root {})", self.nid2, root);
        sequence
    }

    /// Get PSS sequence ID
    pub fn nid2(&self) -> u8 {
        self.nid2
    }
}

/// SSS generator
#[derive(Debug, Clone)]
pub struct SssGenerator {
    /// Cell identity group (0-167)
    nid1: u16,
    /// Identity within the group (0-2)
    nid2: u8,
    /// Cyclic shifts derived from NID1
    m0: usize,
    m1: usize,
}

impl SssGenerator {
    /// Create a new SSS generator
    pub fn new(nid1: u16, nid2: u8) -> Result<Self, LayerError> {
        if nid1 > 167 || nid2 > 2 {
            return Err(LayerError::InvalidConfiguration(format!(
                "NID1 {} / NID2 {} out of range", nid1, nid2
            )));
        }

        let (m0, m1) = sss_shifts(nid1);
        Ok(Self { nid1, nid2, m0, m1 })
    }

    /// Generate the 62 frequency-domain SSS values for a sync subframe
    pub fn generate(&self, subframe: SyncSubframe) -> Vec<Complex32> {
        let s_tilde = m_sequence(|x, i| (x[i + 2] + x[i]) % 2);
        let c_tilde = m_sequence(|x, i| (x[i + 3] + x[i]) % 2);
        let z_tilde = m_sequence(|x, i| (x[i + 4] + x[i + 2] + x[i + 1] + x[i]) % 2);

        let n2 = self.nid2 as usize;
        let at = |seq: &[f32], n: usize, shift: usize| seq[(n + shift) % M_SEQUENCE_LENGTH];

        let mut sequence = Vec::with_capacity(SYNC_SEQUENCE_LENGTH);
        for n in 0..M_SEQUENCE_LENGTH {
            let s0 = at(&s_tilde, n, self.m0);
            let s1 = at(&s_tilde, n, self.m1);
            let c0 = at(&c_tilde, n, n2);
            let c1 = at(&c_tilde, n, n2 + 3);
            let z_m0 = at(&z_tilde, n, self.m0 % 8);
            let z_m1 = at(&z_tilde, n, self.m1 % 8);

            let (even, odd) = match subframe {
                SyncSubframe::First => (s0 * c0, s1 * c1 * z_m0),
                SyncSubframe::Second => (s1 * c0, s0 * c1 * z_m1),
            };
            sequence.push(Complex32::new(even, 0.0));
            sequence.push(Complex32::new(odd, 0.0));
        }

        debug!("Generated SSS for NID1={}, NID2={}, subframe {}", self.nid1, self.nid2, subframe.index());
        sequence
    }

    /// Get cell group ID
    pub fn nid1(&self) -> u16 {
        self.nid1
    }
}

/// Cyclic shifts m0 and m1 of the SSS for a cell identity group
fn sss_shifts(nid1: u16) -> (usize, usize) {
    let nid1 = nid1 as usize;
    let q_prime = nid1 / 30;
    let q = (nid1 + q_prime * (q_prime + 1) / 2) / 30;
    let m_prime = nid1 + q * (q + 1) / 2;
    let m0 = m_prime % M_SEQUENCE_LENGTH;
    let m1 = (m0 + m_prime / M_SEQUENCE_LENGTH + 1) % M_SEQUENCE_LENGTH;
    (m0, m1)
}

/// BPSK-mapped length-31 m-sequence with initial state x(0..4) = 0,0,0,0,1
fn m_sequence(feedback: impl Fn(&[u8], usize) -> u8) -> Vec<f32> {
    let mut x = vec![0u8; M_SEQUENCE_LENGTH + 5];
    x[4] = 1;
    for i in 0..M_SEQUENCE_LENGTH {
        x[i + 5] = feedback(&x, i);
    }
    x[..M_SEQUENCE_LENGTH].iter().map(|&bit| 1.0 - 2.0 * bit as f32).collect()
}

/// Time-domain synchronization references for one cell.
///
/// Holds the useful part (no CP) of the PSS symbol, identical in subframes
/// 0 and 5, and of the SSS symbol for each sync subframe.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceWaveformSet {
    pss: Vec<Complex32>,
    sss: [Vec<Complex32>; 2],
}

/// References expected in one sync subframe
#[derive(Debug, Clone, Copy)]
pub struct SyncReferences<'a> {
    pub subframe: SyncSubframe,
    pub pss: &'a [Complex32],
    pub sss: &'a [Complex32],
}

impl ReferenceWaveformSet {
    /// Generate the LTE references for a cell
    pub fn from_cell(pci: Pci, fft_size: usize) -> Result<Self, LayerError> {
        let pss = PssGenerator::new(pci.nid2())?;
        let sss = SssGenerator::new(pci.nid1(), pci.nid2())?;

        let set = Self::from_sequences(
            sequence_to_symbol(&pss.generate(), fft_size)?,
            sequence_to_symbol(&sss.generate(SyncSubframe::First), fft_size)?,
            sequence_to_symbol(&sss.generate(SyncSubframe::Second), fft_size)?,
        )?;

        info!("Built sync references for PCI {} (NID1={}, NID2={}), symbol size {}",
              pci.0, pci.nid1(), pci.nid2(), fft_size);
        Ok(set)
    }

    /// Build the set from precomputed time-domain symbols
    pub fn from_sequences(
        pss: Vec<Complex32>,
        sss_first: Vec<Complex32>,
        sss_second: Vec<Complex32>,
    ) -> Result<Self, LayerError> {
        if pss.is_empty() {
            return Err(LayerError::InvalidConfiguration("zero-length reference".to_string()));
        }
        if sss_first.len() != pss.len() || sss_second.len() != pss.len() {
            return Err(LayerError::InvalidConfiguration(format!(
                "reference lengths differ: PSS {}, SSS {} / {}",
                pss.len(), sss_first.len(), sss_second.len()
            )));
        }

        Ok(Self { pss, sss: [sss_first, sss_second] })
    }

    /// Symbol length of every reference
    pub fn symbol_len(&self) -> usize {
        self.pss.len()
    }

    /// PSS useful symbol
    pub fn pss(&self) -> &[Complex32] {
        &self.pss
    }

    /// SSS useful symbol of a sync subframe
    pub fn sss(&self, subframe: SyncSubframe) -> &[Complex32] {
        match subframe {
            SyncSubframe::First => &self.sss[0],
            SyncSubframe::Second => &self.sss[1],
        }
    }

    /// PSS and SSS expected in a subframe; `None` outside subframes 0 and 5
    pub fn for_subframe(&self, subframe: usize) -> Option<SyncReferences<'_>> {
        SyncSubframe::from_index(subframe).map(|sf| SyncReferences {
            subframe: sf,
            pss: self.pss(),
            sss: self.sss(sf),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlation(a: &[Complex32], b: &[Complex32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y.conj()).sum::<Complex32>().norm()
    }

    #[test]
    fn test_pss_generator() {
        let pss_gen = PssGenerator::new(1).unwrap();
        let pss = pss_gen.generate();

        assert_eq!(pss.len(), SYNC_SEQUENCE_LENGTH);
        assert_eq!(pss_gen.nid2(), 1);
        for value in &pss {
            assert!((value.norm() - 1.0).abs() < 1e-5);
        }
        assert!(PssGenerator::new(3).is_err());
    }

    #[test]
    fn test_pss_roots_distinct() {
        let p0 = PssGenerator::new(0).unwrap().generate();
        let p1 = PssGenerator::new(1).unwrap().generate();

        let auto = correlation(&p0, &p0);
        let cross = correlation(&p0, &p1);
        assert!((auto - 62.0).abs() < 1e-3);
        assert!(cross < 0.3 * auto);
    }

    #[test]
    fn test_sss_shifts() {
        assert_eq!(sss_shifts(0), (0, 1));
        assert_eq!(sss_shifts(1), (1, 2));
        assert_eq!(sss_shifts(30), (0, 2));
        assert_eq!(sss_shifts(167), (2, 9));
    }

    #[test]
    fn test_sss_generator() {
        let sss_gen = SssGenerator::new(45, 0).unwrap();
        let first = sss_gen.generate(SyncSubframe::First);
        let second = sss_gen.generate(SyncSubframe::Second);

        assert_eq!(first.len(), SYNC_SEQUENCE_LENGTH);
        assert_eq!(sss_gen.nid1(), 45);
        assert!(first.iter().all(|v| v.re.abs() == 1.0 && v.im == 0.0));
        assert_ne!(first, second);
        assert!(correlation(&first, &second) < 0.5 * 62.0);
    }

    #[test]
    fn test_reference_set() {
        let pci = Pci::from_identities(12, 2).unwrap();
        let set = ReferenceWaveformSet::from_cell(pci, 128).unwrap();

        assert_eq!(set.symbol_len(), 128);
        let second = set.for_subframe(5).unwrap();
        assert_eq!(second.subframe, SyncSubframe::Second);
        assert_eq!(second.pss, set.pss());
        assert_eq!(second.sss, set.sss(SyncSubframe::Second));
        assert_eq!(set.for_subframe(0).unwrap().sss, set.sss(SyncSubframe::First));
        assert!(set.for_subframe(3).is_none());

        // Unitary mapping keeps the 62 unit-power subcarriers
        let energy: f32 = set.pss().iter().map(|s| s.norm_sqr()).sum();
        assert!((energy - 62.0).abs() < 1e-2);
    }

    #[test]
    fn test_reference_set_rejects_bad_lengths() {
        let symbol = vec![Complex32::new(1.0, 0.0); 4];
        assert!(ReferenceWaveformSet::from_sequences(vec![], vec![], vec![]).is_err());
        assert!(ReferenceWaveformSet::from_sequences(symbol.clone(), symbol.clone(), vec![]).is_err());
        assert!(ReferenceWaveformSet::from_sequences(symbol.clone(), symbol.clone(), symbol).is_ok());
    }

    #[test]
    fn test_sync_subframe() {
        assert_eq!(SyncSubframe::from_index(5), Some(SyncSubframe::Second));
        assert_eq!(SyncSubframe::from_index(4), None);
        assert_eq!(SyncSubframe::Second.index(), 5);
    }
}
