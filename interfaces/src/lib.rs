//! Sample Source Interfaces Library
//!
//! This crate provides the sample source abstraction consumed by the UE
//! synchronizer together with file, ZeroMQ and in-memory implementations.

pub mod source;
pub mod file_source;
pub mod zmq_rf;

pub use source::{MemorySource, ReadInfo, SampleSource};
pub use file_source::{FileSource, FileSourceConfig};
pub use zmq_rf::{ZmqRfConfig, ZmqSource};

use thiserror::Error;

/// Interface errors
#[derive(Error, Debug)]
pub enum InterfaceError {
    #[error("ZMQ error: {0}")]
    ZmqError(#[from] zmq::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid message format")]
    InvalidMessage,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Short read: requested {requested} samples, got {read}")]
    ShortRead { requested: usize, read: usize },

    #[error("End of sample stream")]
    EndOfStream,

    #[error("Antenna mismatch: source has {expected} antennas, got {got} buffers")]
    AntennaMismatch { expected: usize, got: usize },
}
