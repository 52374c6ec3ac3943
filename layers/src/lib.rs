//! Protocol Stack Layers Library
//!
//! This crate implements the LTE UE physical-layer front end: reference
//! signal generation, frame geometry and the cell acquisition and tracking
//! synchronizer.

pub mod phy;

use interfaces::InterfaceError;
use thiserror::Error;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Sample source error: {0}")]
    Source(#[from] InterfaceError),
}
