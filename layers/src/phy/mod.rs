//! Physical Layer (PHY) Submodules
//!
//! This module contains the LTE downlink synchronization front end
//! according to 3GPP TS 36.211.

pub mod frame_structure;
pub mod ofdm;
pub mod pss_sss;
pub mod sync;

// Re-export commonly used types
pub use frame_structure::FrameGeometry;
pub use ofdm::{sequence_to_symbol, CfoCorrector};
pub use pss_sss::{PssGenerator, ReferenceWaveformSet, SssGenerator, SyncReferences, SyncSubframe};
pub use sync::{
    CellConfig, LockResult, SyncEvent, Synchronizer, TrackState, TuningConfig,
};
