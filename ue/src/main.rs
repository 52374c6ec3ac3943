//! Albor LTE UE Synchronizer Main Application
//!
//! Acquires and tracks an LTE cell on a sample stream from a file or a
//! ZMQ radio and reports the synchronization measurements as JSON lines.

mod config;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::types::ChannelBandwidth;
use config::{SourceConfig, UeConfig};
use interfaces::{FileSource, InterfaceError, SampleSource, ZmqSource};
use layers::phy::sync::FindOutcome;
use layers::phy::{LockResult, SyncEvent, Synchronizer, TrackState};
use layers::LayerError;

/// Albor LTE UE cell synchronizer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ue_sync.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Stop after processing this many subframes
    #[arg(long)]
    max_subframes: Option<u64>,
}

/// One JSON measurement report
#[derive(Serialize)]
struct Report<'a> {
    subframes: u64,
    state: &'static str,
    subframe_index: Option<u8>,
    sfo_hz: f32,
    result: &'a LockResult,
}

/// Counters of one run
#[derive(Debug, Default)]
struct RunSummary {
    subframes: u64,
    acquisitions: u64,
    losses: u64,
    measurements: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = UeConfig::from_toml_file(&args.config)?;

    // Initialize logging
    let level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor LTE UE synchronizer");
    info!("Configuration file: {}", args.config);
    info!("Cell configuration:");
    info!("  Bandwidth: {} PRB", config.cell.channel_bandwidth_rb);
    info!("  NID1: {}, NID2: {}", config.cell.secondary_identity, config.cell.physical_identity);
    info!("  Cyclic prefix: {:?}", config.cell.cyclic_prefix);

    let source = open_source(&config)?;
    let sync = Synchronizer::new(source, config.cell.clone(), config.tuning.clone())?;

    let running = Arc::new(AtomicBool::new(true));
    let report_interval = config.report.interval;
    let max_subframes = args.max_subframes;

    // The synchronizer blocks on the source; keep it off the async workers
    let mut sync_handle = {
        let running = running.clone();
        tokio::task::spawn_blocking(move || run(sync, running, report_interval, max_subframes))
    };

    let summary = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            running.store(false, Ordering::Relaxed);
            (&mut sync_handle).await?
        }
        result = &mut sync_handle => result?,
    };

    match summary {
        Ok(summary) => {
            info!(
                "Processed {} subframes: {} acquisitions, {} losses, {} measurements",
                summary.subframes, summary.acquisitions, summary.losses, summary.measurements
            );
        }
        Err(e) => {
            error!("Synchronizer stopped: {}", e);
            return Err(e);
        }
    }

    info!("UE synchronizer shutdown complete");
    Ok(())
}

/// Build the configured sample source
fn open_source(config: &UeConfig) -> Result<Box<dyn SampleSource + Send>> {
    match &config.source {
        SourceConfig::File(file) => {
            info!("Sample source: file {}", file.path.display());
            Ok(Box::new(FileSource::open(file.clone())?))
        }
        SourceConfig::Zmq(zmq) => {
            let rf_config = zmq.rf_config()?;
            info!("Sample source: ZMQ {:?} at {} MHz", rf_config.rx_addresses, rf_config.sample_rate / 1e6);

            let cell_rate = ChannelBandwidth::from_prb(config.cell.channel_bandwidth_rb)
                .map(|bandwidth| bandwidth.to_sample_rate())
                .ok_or_else(|| anyhow::anyhow!("Invalid bandwidth: {} PRB", config.cell.channel_bandwidth_rb))?;
            if (rf_config.sample_rate - cell_rate).abs() > 1.0 {
                warn!("Radio sample rate {} Hz differs from the cell rate {} Hz", rf_config.sample_rate, cell_rate);
            }
            Ok(Box::new(ZmqSource::connect(rf_config)?))
        }
    }
}

/// Step the synchronizer until stopped, the stream ends or the subframe
/// limit is reached
fn run<S: SampleSource>(
    mut sync: Synchronizer<S>,
    running: Arc<AtomicBool>,
    report_interval: u32,
    max_subframes: Option<u64>,
) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    while running.load(Ordering::Relaxed) {
        if max_subframes.is_some_and(|max| summary.subframes >= max) {
            info!("Subframe limit reached");
            break;
        }

        let state = sync.state();
        let event = match sync.step() {
            Ok(event) => event,
            Err(LayerError::Source(InterfaceError::EndOfStream | InterfaceError::ShortRead { .. })) => {
                info!("End of sample stream");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        summary.subframes += match state {
            TrackState::Find => 10,
            TrackState::Track => 1,
        };

        match event {
            SyncEvent::Searching { frames } => debug!("Searching, frame {}", frames),
            SyncEvent::Acquisition { outcome: FindOutcome::Locked, .. } => {
                summary.acquisitions += 1;
                report(&sync, &summary)?;
            }
            SyncEvent::Acquisition { outcome, .. } => debug!("No cell found ({:?})", outcome),
            SyncEvent::Subframe { measurement: Some(_), .. } => {
                summary.measurements += 1;
                if report_interval > 0 && summary.measurements % report_interval as u64 == 0 {
                    report(&sync, &summary)?;
                }
            }
            SyncEvent::Subframe { .. } => {}
            SyncEvent::TrackingLost => {
                summary.losses += 1;
                warn!("Lost cell after {} subframes", summary.subframes);
            }
            SyncEvent::Realigned { discarded } => debug!("Realigned, {} samples dropped", discarded),
        }
    }

    Ok(summary)
}

/// Print the current measurements as one JSON line
fn report<S: SampleSource>(sync: &Synchronizer<S>, summary: &RunSummary) -> Result<()> {
    let report = Report {
        subframes: summary.subframes,
        state: match sync.state() {
            TrackState::Find => "find",
            TrackState::Track => "track",
        },
        subframe_index: sync.subframe_index(),
        sfo_hz: sync.sfo_hz(),
        result: sync.last_result(),
    };
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
