//! Common Types for the LTE UE front end
//!
//! Defines fundamental cell and numerology types shared by the PHY and the
//! application crates

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::{FromPrimitive, ToPrimitive};

/// LTE subcarrier spacing in Hz
pub const SUBCARRIER_SPACING_HZ: f32 = 15_000.0;

/// Subcarriers per resource block
pub const SUBCARRIERS_PER_RB: usize = 12;

/// Physical Cell Identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pci(pub u16);

impl Pci {
    /// Maximum valid PCI value (0-503)
    pub const MAX: u16 = 503;

    /// Create a new PCI with validation
    pub fn new(value: u16) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Build the PCI from the cell identity group (NID1) and the identity
    /// within the group (NID2)
    pub fn from_identities(nid1: u16, nid2: u8) -> Option<Self> {
        if nid1 > 167 || nid2 > 2 {
            return None;
        }
        Self::new(3 * nid1 + nid2 as u16)
    }

    /// Physical-layer cell identity group (0-167)
    pub fn nid1(&self) -> u16 {
        self.0 / 3
    }

    /// Physical-layer identity within the group (0-2)
    pub fn nid2(&self) -> u8 {
        (self.0 % 3) as u8
    }
}

/// Cyclic prefix length
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclicPrefix {
    /// Normal CP, 7 symbols per slot
    #[default]
    Normal,
    /// Extended CP, 6 symbols per slot
    Extended,
}

/// LTE channel bandwidths, valued in resource blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
pub enum ChannelBandwidth {
    /// 1.4 MHz
    Prb6 = 6,
    /// 3 MHz
    Prb15 = 15,
    /// 5 MHz
    Prb25 = 25,
    /// 10 MHz
    Prb50 = 50,
    /// 15 MHz
    Prb75 = 75,
    /// 20 MHz
    Prb100 = 100,
}

impl ChannelBandwidth {
    /// Look up a bandwidth by its number of resource blocks
    pub fn from_prb(nof_prb: u16) -> Option<Self> {
        Self::from_u16(nof_prb)
    }

    /// Number of downlink resource blocks
    pub fn nof_prb(&self) -> usize {
        self.to_usize().unwrap_or(0)
    }

    /// FFT size used for this bandwidth
    pub fn fft_size(&self) -> usize {
        match self {
            ChannelBandwidth::Prb6 => 128,
            ChannelBandwidth::Prb15 => 256,
            ChannelBandwidth::Prb25 => 384,
            ChannelBandwidth::Prb50 => 768,
            ChannelBandwidth::Prb75 => 1024,
            ChannelBandwidth::Prb100 => 1536,
        }
    }

    /// Get the sample rate for this bandwidth
    pub fn to_sample_rate(&self) -> f64 {
        self.fft_size() as f64 * SUBCARRIER_SPACING_HZ as f64
    }

    /// Number of occupied subcarriers
    pub fn nof_subcarriers(&self) -> usize {
        self.nof_prb() * SUBCARRIERS_PER_RB
    }
}
