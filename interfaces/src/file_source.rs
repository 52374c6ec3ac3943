//! File Sample Source
//!
//! Reads raw complex float samples (little-endian `cf32`, as written by
//! srsRAN and GNU Radio file sinks). Multi-antenna recordings interleave
//! the antennas sample by sample.

use crate::source::{requested_len, ReadInfo, SampleSource};
use crate::InterfaceError;
use bytes::Buf;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Bytes per complex float sample
const SAMPLE_BYTES: usize = 8;

/// File source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSourceConfig {
    /// Path of the recording
    pub path: PathBuf,
    /// Number of interleaved antennas in the recording
    #[serde(default = "default_num_antennas")]
    pub num_antennas: usize,
    /// Restart from the beginning at end of file
    #[serde(default)]
    pub wrap: bool,
    /// Samples (per antenna) to skip at the start of the file
    #[serde(default)]
    pub skip_samples: u64,
}

fn default_num_antennas() -> usize {
    1
}

impl FileSourceConfig {
    /// Configuration for a single-antenna recording
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            num_antennas: default_num_antennas(),
            wrap: false,
            skip_samples: 0,
        }
    }
}

/// Sample source reading a `cf32` recording
pub struct FileSource {
    config: FileSourceConfig,
    reader: BufReader<File>,
    raw: Vec<u8>,
    timestamp: u64,
}

impl FileSource {
    /// Open the recording
    pub fn open(config: FileSourceConfig) -> Result<Self, InterfaceError> {
        if config.num_antennas == 0 {
            return Err(InterfaceError::InvalidConfig(
                "file source needs at least one antenna".to_string(),
            ));
        }

        let file = File::open(&config.path)?;
        let mut reader = BufReader::new(file);
        let frame_bytes = (SAMPLE_BYTES * config.num_antennas) as u64;
        if config.skip_samples > 0 {
            reader.seek(SeekFrom::Start(config.skip_samples * frame_bytes))?;
        }

        info!("Opened sample file {}", config.path.display());
        info!("  Antennas: {}, wrap: {}, skip: {} samples",
              config.num_antennas, config.wrap, config.skip_samples);

        Ok(Self {
            timestamp: config.skip_samples,
            config,
            reader,
            raw: Vec::new(),
        })
    }

    /// Read exactly `raw.len()` bytes, wrapping if configured.
    /// Returns the number of bytes read.
    fn fill_raw(&mut self) -> Result<usize, InterfaceError> {
        let mut filled = 0;
        let mut wrapped_without_data = false;

        while filled < self.raw.len() {
            match self.reader.read(&mut self.raw[filled..]) {
                Ok(0) => {
                    if !self.config.wrap || wrapped_without_data {
                        break;
                    }
                    debug!("End of {} reached, wrapping", self.config.path.display());
                    self.reader.seek(SeekFrom::Start(0))?;
                    wrapped_without_data = true;
                }
                Ok(n) => {
                    filled += n;
                    wrapped_without_data = false;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(filled)
    }
}

impl SampleSource for FileSource {
    fn num_antennas(&self) -> usize {
        self.config.num_antennas
    }

    fn read(&mut self, buffers: &mut [&mut [Complex32]]) -> Result<ReadInfo, InterfaceError> {
        let requested = requested_len(buffers, self.config.num_antennas)?;
        let frame_bytes = SAMPLE_BYTES * self.config.num_antennas;

        self.raw.resize(requested * frame_bytes, 0);
        let filled = self.fill_raw()?;
        let read = filled / frame_bytes;
        if read == 0 && requested > 0 {
            return Err(InterfaceError::EndOfStream);
        }

        let mut raw = &self.raw[..read * frame_bytes];
        for n in 0..read {
            for buffer in buffers.iter_mut() {
                let re = raw.get_f32_le();
                let im = raw.get_f32_le();
                buffer[n] = Complex32::new(re, im);
            }
        }

        let timestamp = self.timestamp;
        self.timestamp += read as u64;

        if read < requested {
            return Err(InterfaceError::ShortRead { requested, read });
        }

        Ok(ReadInfo { samples: read, timestamp })
    }
}
