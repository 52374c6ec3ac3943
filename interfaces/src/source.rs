//! Sample Source Abstraction
//!
//! A sample source delivers fixed-size blocks of complex baseband samples,
//! one buffer per receive antenna. The number of samples requested is the
//! length of the buffers handed to [`SampleSource::read`]; every buffer must
//! have the same length and there must be one buffer per antenna.

use crate::InterfaceError;
use num_complex::Complex32;

/// Result of a successful read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadInfo {
    /// Number of samples written into each antenna buffer
    pub samples: usize,
    /// Timestamp of the first sample, in samples since the stream start
    pub timestamp: u64,
}

/// Source of receive samples
pub trait SampleSource {
    /// Number of receive antennas; fixed for the lifetime of the source
    fn num_antennas(&self) -> usize;

    /// Fill every buffer completely. A source that cannot deliver the full
    /// count reports an error rather than a partial block.
    fn read(&mut self, buffers: &mut [&mut [Complex32]]) -> Result<ReadInfo, InterfaceError>;
}

impl<S: SampleSource + ?Sized> SampleSource for &mut S {
    fn num_antennas(&self) -> usize {
        (**self).num_antennas()
    }

    fn read(&mut self, buffers: &mut [&mut [Complex32]]) -> Result<ReadInfo, InterfaceError> {
        (**self).read(buffers)
    }
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn num_antennas(&self) -> usize {
        (**self).num_antennas()
    }

    fn read(&mut self, buffers: &mut [&mut [Complex32]]) -> Result<ReadInfo, InterfaceError> {
        (**self).read(buffers)
    }
}

/// Check the buffer set against the source antenna count and return the
/// requested sample count
pub(crate) fn requested_len(
    buffers: &[&mut [Complex32]],
    num_antennas: usize,
) -> Result<usize, InterfaceError> {
    if buffers.len() != num_antennas {
        return Err(InterfaceError::AntennaMismatch {
            expected: num_antennas,
            got: buffers.len(),
        });
    }

    let len = buffers.first().map(|b| b.len()).unwrap_or(0);
    if buffers.iter().any(|b| b.len() != len) {
        return Err(InterfaceError::InvalidConfig(
            "antenna buffers differ in length".to_string(),
        ));
    }

    Ok(len)
}

/// In-memory sample source, one vector per antenna
#[derive(Debug, Clone)]
pub struct MemorySource {
    channels: Vec<Vec<Complex32>>,
    position: usize,
    timestamp: u64,
    wrap: bool,
}

impl MemorySource {
    /// Create a single-antenna source
    pub fn new(samples: Vec<Complex32>) -> Self {
        Self::with_channels(vec![samples])
    }

    /// Create a multi-antenna source; every channel must have the same length
    pub fn with_channels(channels: Vec<Vec<Complex32>>) -> Self {
        Self {
            channels,
            position: 0,
            timestamp: 0,
            wrap: false,
        }
    }

    /// Restart from the beginning instead of ending the stream
    pub fn with_wrap(mut self, wrap: bool) -> Self {
        self.wrap = wrap;
        self
    }

    /// Samples left before the end of the stream
    pub fn remaining(&self) -> usize {
        self.stream_len().saturating_sub(self.position)
    }

    fn stream_len(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }
}

impl SampleSource for MemorySource {
    fn num_antennas(&self) -> usize {
        self.channels.len()
    }

    fn read(&mut self, buffers: &mut [&mut [Complex32]]) -> Result<ReadInfo, InterfaceError> {
        let requested = requested_len(buffers, self.channels.len())?;
        let stream_len = self.stream_len();
        if stream_len == 0 && requested > 0 {
            return Err(InterfaceError::EndOfStream);
        }

        let timestamp = self.timestamp;
        let mut written = 0;
        while written < requested {
            if self.position == stream_len {
                if !self.wrap {
                    break;
                }
                self.position = 0;
            }

            let chunk = (requested - written).min(stream_len - self.position);
            for (buffer, channel) in buffers.iter_mut().zip(&self.channels) {
                buffer[written..written + chunk]
                    .copy_from_slice(&channel[self.position..self.position + chunk]);
            }
            written += chunk;
            self.position += chunk;
        }

        self.timestamp += written as u64;

        if written < requested {
            return Err(InterfaceError::ShortRead { requested, read: written });
        }

        Ok(ReadInfo { samples: written, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<Complex32> {
        (0..len).map(|i| Complex32::new(i as f32, 0.0)).collect()
    }

    #[test]
    fn test_memory_source_read() {
        let mut source = MemorySource::new(ramp(10));
        let mut buffer = vec![Complex32::new(0.0, 0.0); 4];

        let info = source.read(&mut [&mut buffer[..]]).unwrap();
        assert_eq!(info, ReadInfo { samples: 4, timestamp: 0 });
        assert_eq!(buffer[3].re, 3.0);

        let info = source.read(&mut [&mut buffer[..]]).unwrap();
        assert_eq!(info.timestamp, 4);
        assert_eq!(buffer[0].re, 4.0);
        assert_eq!(source.remaining(), 2);
    }

    #[test]
    fn test_memory_source_short_read() {
        let mut source = MemorySource::new(ramp(6));
        let mut buffer = vec![Complex32::new(0.0, 0.0); 4];

        source.read(&mut [&mut buffer[..]]).unwrap();
        match source.read(&mut [&mut buffer[..]]) {
            Err(InterfaceError::ShortRead { requested, read }) => {
                assert_eq!(requested, 4);
                assert_eq!(read, 2);
            }
            other => panic!("expected short read, got {:?}", other),
        }
    }

    #[test]
    fn test_memory_source_wrap() {
        let mut source = MemorySource::new(ramp(3)).with_wrap(true);
        let mut buffer = vec![Complex32::new(0.0, 0.0); 7];

        let info = source.read(&mut [&mut buffer[..]]).unwrap();
        assert_eq!(info.samples, 7);
        let values: Vec<f32> = buffer.iter().map(|s| s.re).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_antenna_mismatch() {
        let mut source = MemorySource::with_channels(vec![ramp(8), ramp(8)]);
        let mut buffer = vec![Complex32::new(0.0, 0.0); 4];

        assert!(matches!(
            source.read(&mut [&mut buffer[..]]),
            Err(InterfaceError::AntennaMismatch { expected: 2, got: 1 })
        ));
    }

    fn read_block<S: SampleSource>(mut source: S, len: usize) -> ReadInfo {
        let mut buffer = vec![Complex32::new(0.0, 0.0); len];
        source.read(&mut [&mut buffer[..]]).unwrap()
    }

    #[test]
    fn test_borrowed_source() {
        let mut source = MemorySource::new(ramp(8));
        read_block(&mut source, 5);
        assert_eq!(source.remaining(), 3);

        let mut boxed: Box<dyn SampleSource> = Box::new(MemorySource::new(ramp(8)));
        assert_eq!(read_block(&mut boxed, 2).samples, 2);
        assert_eq!(boxed.num_antennas(), 1);
    }
}
