//! CLI Entry Point for daq-workers
//!
//! Provides command-line interface for:
//! - Listing serial devices
//! - Recording a serial device to CSV until Ctrl-C
//! - Running simulated devices through the recorder and frame parser
//! - Writing a default configuration file
//!
//! # Usage
//!
//! ```bash
//! daq-workers list-devices
//! daq-workers record --port /dev/ttyUSB0 --tag EIT --suffix calibration
//! daq-workers simulate --tags EIT,PD --seconds 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use daq_workers::config::{DaqConfig, DEFAULT_CONFIG_PATH};
use daq_workers::devices::{self, SimulatedReader, SimulatedStart};
use daq_workers::processing::{FrameParser, FrameStore};
use daq_workers::storage::CsvRecorder;
use daq_workers::worker::{ControlMessage, Consumer, Producer};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "daq-workers")]
#[command(about = "Concurrent acquisition and recording of line-oriented devices", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the serial ports present on this machine
    ListDevices,

    /// Record one serial device to CSV until Ctrl-C
    Record {
        /// Serial port, e.g. /dev/ttyUSB0 or COM3
        #[arg(long)]
        port: String,

        /// Tag for the device; also its CSV column
        #[arg(long)]
        tag: String,

        /// Output file name suffix
        #[arg(long, default_value = "")]
        suffix: String,
    },

    /// Run simulated devices through the recorder and frame parser
    Simulate {
        /// Comma-separated device tags
        #[arg(long, value_delimiter = ',', default_value = "EIT")]
        tags: Vec<String>,

        /// Run time; Ctrl-C ends the run early
        #[arg(long, default_value_t = 5)]
        seconds: u64,

        /// Frames per second per device
        #[arg(long, default_value_t = 10.0)]
        rate: f64,

        /// Output file name suffix
        #[arg(long, default_value = "simulated")]
        suffix: String,

        /// Baseline file subtracted from parsed frames
        #[arg(long)]
        baseline: Option<PathBuf>,
    },

    /// Write the default configuration if the file does not exist yet
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::InitConfig = cli.command {
        let config = DaqConfig::load_or_create(&cli.config)?;
        config.validate()?;
        println!("Configuration ready at {}", cli.config.display());
        return Ok(());
    }

    let config = DaqConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;
    daq_workers::logging::init_from_config(&config)?;
    info!(app = %config.application.name, "Configuration loaded");

    match cli.command {
        Commands::ListDevices => list_devices(),
        Commands::Record { port, tag, suffix } => record(config, port, tag, suffix).await,
        Commands::Simulate {
            tags,
            seconds,
            rate,
            suffix,
            baseline,
        } => simulate(config, tags, seconds, rate, suffix, baseline).await,
        Commands::InitConfig => Ok(()),
    }
}

fn list_devices() -> Result<()> {
    let ports = devices::list_devices()?;
    if ports.is_empty() {
        println!("No serial devices found");
    }
    for port in ports {
        println!("{port}");
    }
    Ok(())
}

fn log_messages(worker: &'static str) -> impl Fn(ControlMessage) + Send + Sync + 'static {
    move |message| match &message {
        ControlMessage::ConnectFailed { .. }
        | ControlMessage::DeviceLost { .. }
        | ControlMessage::StorageFailed { .. }
        | ControlMessage::Panicked { .. } => warn!(worker, ?message, "Worker fault"),
        _ => info!(worker, ?message, "Worker message"),
    }
}

fn with_columns(mut config: DaqConfig, tags: &[String]) -> DaqConfig {
    for tag in tags {
        if !config.storage.columns.contains(tag) {
            config.storage.columns.push(tag.clone());
        }
    }
    config
}

#[cfg(feature = "instrument_serial")]
async fn record(config: DaqConfig, port: String, tag: String, suffix: String) -> Result<()> {
    use daq_workers::devices::{Frame, SerialReader, SerialStart};
    use daq_workers::processing::Forwarder;

    let config = with_columns(config, std::slice::from_ref(&tag));

    let mut recorder = Consumer::from_config(
        "recorder",
        CsvRecorder::new(config.storage.clone()),
        &config.workers,
    );
    recorder.on_message(log_messages("recorder"));
    recorder.on_result(|rows| tracing::debug!(rows, "Recorded batch"));

    let mut display = Consumer::from_config("display", Forwarder::<Frame>::new(), &config.workers);
    display.on_result(|batch: Vec<Frame>| {
        if let Some(frame) = batch.last() {
            println!("{} {}", frame.tag, frame.data);
        }
    });

    let mut reader = Producer::from_config("reader", SerialReader::new(&tag), &config.workers);
    reader.on_message(log_messages("reader"));
    reader.set_subscribers(vec![recorder.get_work_queue(), display.get_work_queue()]);

    recorder.start_new(suffix, (), ()).await;
    display.start_new((), (), ()).await;
    reader
        .start_new(
            SerialStart {
                port,
                config: config.device.clone(),
            },
            (),
            (),
        )
        .await;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Ctrl-C received, stopping");
        }
        _ = wait_until_stopped(&reader) => warn!("Reader stopped by itself"),
    }

    reader.set_stopped();
    reader.join().await;
    recorder.set_stop_at_queue_end();
    display.set_stop_at_queue_end();
    recorder.join().await;
    display.join().await;
    Ok(())
}

#[cfg(not(feature = "instrument_serial"))]
async fn record(_config: DaqConfig, _port: String, _tag: String, _suffix: String) -> Result<()> {
    Err(daq_workers::DaqError::SerialFeatureDisabled.into())
}

async fn wait_until_stopped<P: daq_workers::worker::Produce>(producer: &Producer<P>) {
    while producer.get_state() != daq_workers::worker::WorkerState::Stopped {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn simulate(
    config: DaqConfig,
    tags: Vec<String>,
    seconds: u64,
    rate: f64,
    suffix: String,
    baseline: Option<PathBuf>,
) -> Result<()> {
    let config = with_columns(config, &tags);
    let (store, store_task) = FrameStore::spawn();

    let mut recorder = Consumer::from_config(
        "recorder",
        CsvRecorder::new(config.storage.clone()),
        &config.workers,
    );
    recorder.on_message(log_messages("recorder"));

    let mut parser = Consumer::from_config("parser", FrameParser::new(store.clone()), &config.workers);
    parser.on_message(log_messages("parser"));
    parser.on_result(|frames| {
        for frame in frames {
            match serde_json::to_string(&frame) {
                Ok(json) => println!("{json}"),
                Err(e) => warn!(error = %e, "Could not serialize parsed frame"),
            }
        }
    });

    let interval = if rate > 0.0 {
        Duration::from_secs_f64(1.0 / rate)
    } else {
        config.workers.work_timeout
    };
    let mut readers: Vec<Producer<SimulatedReader>> = tags
        .iter()
        .map(|tag| {
            let mut reader =
                Producer::from_config(format!("sim-{tag}"), SimulatedReader::new(tag, 3), &config.workers)
                    .with_work_timeout(interval);
            reader.set_subscribers(vec![recorder.get_work_queue(), parser.get_work_queue()]);
            reader.on_message(log_messages("simulator"));
            reader
        })
        .collect();

    recorder.start_new(suffix, (), ()).await;
    parser.start_new(baseline, (), ()).await;
    for reader in &mut readers {
        reader.start_new(SimulatedStart::default(), (), ()).await;
    }

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Ctrl-C received, stopping");
        }
    }

    for reader in &mut readers {
        reader.set_stopped();
        reader.join().await;
    }
    recorder.set_stop_at_queue_end();
    parser.set_stop_at_queue_end();
    recorder.join().await;
    parser.join().await;

    if let Some(frame) = store.current().await? {
        info!(tag = %frame.tag, values = ?frame.values, "Last parsed frame");
    }
    drop(store);
    drop(parser);
    store_task.await.context("frame store task")?;
    Ok(())
}
