//! ZMQ RF Receive Driver
//!
//! This module implements the receive side of the ZMQ-based RF driver used
//! by srsRAN-compatible software radios. Each channel uses a REQ socket: a
//! one-byte request is sent and the peer answers with raw `cf_t` samples.

use crate::source::{requested_len, ReadInfo, SampleSource};
use crate::InterfaceError;
use bytes::Buf;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info, trace};
use zmq::{Context, Socket};

/// Default base sample rate (6 PRB cell)
pub const DEFAULT_BASE_SRATE: f64 = 1.92e6;

/// Default ZMQ RX port
pub const DEFAULT_RX_PORT: u16 = 2000;

/// Default receive timeout in milliseconds
pub const DEFAULT_RX_TIMEOUT_MS: i32 = 1000;

/// Bytes per complex float sample
const SAMPLE_BYTES: usize = 8;

/// ZMQ RF configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZmqRfConfig {
    /// Sample rate in Hz
    pub sample_rate: f64,
    /// RX connection address per channel
    pub rx_addresses: Vec<String>,
    /// Receive timeout in milliseconds
    pub rx_timeout_ms: i32,
}

impl Default for ZmqRfConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_BASE_SRATE,
            rx_addresses: vec![format!("tcp://localhost:{}", DEFAULT_RX_PORT)],
            rx_timeout_ms: DEFAULT_RX_TIMEOUT_MS,
        }
    }
}

impl ZmqRfConfig {
    /// Parse device arguments in srsRAN format
    /// Format: "key1=value1,key2=value2,..."
    /// Supports indexed port names: rx_port0, rx_port1, etc.
    pub fn from_device_args(args: &str, num_channels: usize) -> Result<Self, InterfaceError> {
        if num_channels == 0 {
            return Err(InterfaceError::InvalidConfig("num_channels must be at least 1".to_string()));
        }

        let mut config = Self::default();
        let mut ports: Vec<Option<String>> = vec![None; num_channels];

        for pair in args.split(',') {
            let parts: Vec<&str> = pair.trim().split('=').collect();
            if parts.len() != 2 {
                continue;
            }

            let key = parts[0].trim();
            let value = parts[1].trim();

            match key {
                "base_srate" => {
                    config.sample_rate = value.parse::<f64>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid base_srate".to_string()))?;
                }
                "rx_gain" | "tx_gain" => {
                    // Shared srsRAN arguments; the ZMQ peer applies no gain
                    value.parse::<f32>()
                        .map_err(|_| InterfaceError::InvalidConfig(format!("Invalid {}", key)))?;
                    debug!("Ignoring {}={} for the ZMQ radio", key, value);
                }
                "rx_timeout_ms" => {
                    config.rx_timeout_ms = value.parse::<i32>()
                        .map_err(|_| InterfaceError::InvalidConfig("Invalid rx_timeout_ms".to_string()))?;
                }
                "rx_port" => ports[0] = Some(value.to_string()),
                _ => {
                    // Indexed port names (rx_port0, rx_port1, ...)
                    if let Some(index) = key.strip_prefix("rx_port") {
                        let channel = index.parse::<usize>()
                            .map_err(|_| InterfaceError::InvalidConfig(format!("Invalid key {}", key)))?;
                        if channel >= num_channels {
                            return Err(InterfaceError::InvalidConfig(format!(
                                "{} refers to channel {} but only {} configured",
                                key, channel, num_channels
                            )));
                        }
                        ports[channel] = Some(value.to_string());
                    }
                }
            }
        }

        let default_address = config.rx_addresses[0].clone();
        config.rx_addresses = ports
            .into_iter()
            .enumerate()
            .map(|(channel, port)| match port {
                Some(address) => Ok(address),
                None if channel == 0 => Ok(default_address.clone()),
                None => Err(InterfaceError::InvalidConfig(format!("Missing rx_port{}", channel))),
            })
            .collect::<Result<_, _>>()?;

        Ok(config)
    }
}

/// Convert raw bytes to samples (srsRAN format)
pub fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<Complex32>, InterfaceError> {
    if bytes.len() % SAMPLE_BYTES != 0 {
        return Err(InterfaceError::InvalidMessage);
    }

    let mut raw = bytes;
    let mut samples = Vec::with_capacity(bytes.len() / SAMPLE_BYTES);
    while raw.has_remaining() {
        let re = raw.get_f32_le();
        let im = raw.get_f32_le();
        samples.push(Complex32::new(re, im));
    }

    Ok(samples)
}

/// Sample source pulling from srsRAN ZMQ peers
pub struct ZmqSource {
    config: ZmqRfConfig,
    sockets: Vec<Socket>,
    pending: Vec<VecDeque<Complex32>>,
    timestamp: u64,
    requests: u64,
}

impl ZmqSource {
    /// Connect to the configured peers using a private context
    pub fn connect(config: ZmqRfConfig) -> Result<Self, InterfaceError> {
        Self::with_context(config, &Context::new())
    }

    /// Connect using an existing context (needed for `inproc://` peers)
    pub fn with_context(config: ZmqRfConfig, context: &Context) -> Result<Self, InterfaceError> {
        if config.rx_addresses.is_empty() {
            return Err(InterfaceError::InvalidConfig("no RX address configured".to_string()));
        }

        info!("Initializing ZMQ RF receiver");
        info!("Sample rate: {} MHz", config.sample_rate / 1e6);
        info!("Channels: {}", config.rx_addresses.len());

        let mut sockets = Vec::with_capacity(config.rx_addresses.len());
        for address in &config.rx_addresses {
            let socket = context.socket(zmq::REQ)?;
            socket.set_rcvtimeo(config.rx_timeout_ms)?;
            socket.set_sndtimeo(config.rx_timeout_ms)?;
            socket.set_linger(0)?;
            socket.connect(address)?;
            info!("RX socket connected to {} (REQ mode)", address);
            sockets.push(socket);
        }

        Ok(Self {
            pending: vec![VecDeque::new(); sockets.len()],
            config,
            sockets,
            timestamp: 0,
            requests: 0,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &ZmqRfConfig {
        &self.config
    }

    /// Request one block from a channel peer and queue it
    fn request(&mut self, channel: usize) -> Result<(), InterfaceError> {
        let socket = &self.sockets[channel];
        let dummy: &[u8] = &[0]; // Use 0 like srsRAN
        socket.send(dummy, 0)?;
        let bytes = socket.recv_bytes(0)?;
        let samples = bytes_to_samples(&bytes)?;

        self.requests += 1;
        trace!("Channel {}: received {} samples (request #{})", channel, samples.len(), self.requests);

        if samples.is_empty() {
            return Err(InterfaceError::InvalidMessage);
        }
        self.pending[channel].extend(samples);
        Ok(())
    }
}

impl SampleSource for ZmqSource {
    fn num_antennas(&self) -> usize {
        self.sockets.len()
    }

    fn read(&mut self, buffers: &mut [&mut [Complex32]]) -> Result<ReadInfo, InterfaceError> {
        let requested = requested_len(buffers, self.sockets.len())?;

        for channel in 0..self.sockets.len() {
            while self.pending[channel].len() < requested {
                self.request(channel)?;
            }
        }

        for (buffer, pending) in buffers.iter_mut().zip(self.pending.iter_mut()) {
            for (dst, src) in buffer.iter_mut().zip(pending.drain(..requested)) {
                *dst = src;
            }
        }

        let timestamp = self.timestamp;
        self.timestamp += requested as u64;
        debug!("Read {} samples at timestamp {}", requested, timestamp);

        Ok(ReadInfo { samples: requested, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples_to_bytes(samples: &[Complex32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_BYTES);
        for sample in samples {
            bytes.extend_from_slice(&sample.re.to_le_bytes());
            bytes.extend_from_slice(&sample.im.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_sample_decoding() {
        let samples = vec![
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
            Complex32::new(-1.0, 0.5),
        ];

        let decoded = bytes_to_samples(&samples_to_bytes(&samples)).unwrap();
        assert_eq!(decoded, samples);

        assert!(matches!(bytes_to_samples(&[0u8; 7]), Err(InterfaceError::InvalidMessage)));
    }

    #[test]
    fn test_device_args() {
        let config = ZmqRfConfig::from_device_args(
            "rx_port0=tcp://localhost:2000,rx_port1=tcp://localhost:2100,base_srate=5.76e6",
            2,
        ).unwrap();

        assert_eq!(config.sample_rate, 5.76e6);
        assert_eq!(config.rx_addresses, vec![
            "tcp://localhost:2000".to_string(),
            "tcp://localhost:2100".to_string(),
        ]);

        let config = ZmqRfConfig::from_device_args("id=ue,base_srate=1.92e6", 1).unwrap();
        assert_eq!(config.rx_addresses, ZmqRfConfig::default().rx_addresses);

        assert!(ZmqRfConfig::from_device_args("rx_port0=tcp://a:1", 2).is_err());
        assert!(ZmqRfConfig::from_device_args("rx_port3=tcp://a:1", 2).is_err());
        assert!(ZmqRfConfig::from_device_args("base_srate=fast", 1).is_err());

        // Gains are validated but leave the configuration untouched
        let config = ZmqRfConfig::from_device_args("rx_gain=40,tx_gain=80,base_srate=1.92e6", 1).unwrap();
        assert_eq!(config, ZmqRfConfig { sample_rate: 1.92e6, ..ZmqRfConfig::default() });
        assert!(ZmqRfConfig::from_device_args("rx_gain=high", 1).is_err());
    }

    #[test]
    fn test_zmq_source_reassembles_blocks() {
        let context = Context::new();
        let peer = context.socket(zmq::REP).unwrap();
        peer.bind("inproc://albor-rx-test").unwrap();

        let server = std::thread::spawn(move || {
            for block in 0..2 {
                peer.recv_bytes(0).unwrap();
                let samples: Vec<Complex32> = (0..5)
                    .map(|i| Complex32::new((block * 5 + i) as f32, 0.0))
                    .collect();
                peer.send(samples_to_bytes(&samples), 0).unwrap();
            }
        });

        let config = ZmqRfConfig {
            rx_addresses: vec!["inproc://albor-rx-test".to_string()],
            ..ZmqRfConfig::default()
        };
        let mut source = ZmqSource::with_context(config, &context).unwrap();

        let mut buffer = vec![Complex32::new(0.0, 0.0); 8];
        let info = source.read(&mut [&mut buffer[..]]).unwrap();
        assert_eq!(info, ReadInfo { samples: 8, timestamp: 0 });
        assert_eq!(buffer[7].re, 7.0);

        // Two samples remain queued from the second reply
        let mut tail = vec![Complex32::new(0.0, 0.0); 2];
        let info = source.read(&mut [&mut tail[..]]).unwrap();
        assert_eq!(info.timestamp, 8);
        assert_eq!(tail[1].re, 9.0);

        server.join().unwrap();
    }
}
