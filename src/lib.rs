//! # DAQ Workers
//!
//! A small framework for running acquisition work concurrently with the code
//! that controls it, plus the device readers and recorders built on it.
//!
//! ## Crate Structure
//!
//! - **`worker`**: the framework itself. [`Producer`](worker::Producer)s
//!   generate items and fan them out to subscriber
//!   [`ReadyQueue`](worker::ReadyQueue)s; [`Consumer`](worker::Consumer)s own
//!   one ready queue and process what accumulates in it as batches. Each run
//!   executes in its own Tokio task with contained panics, reports results and
//!   [`ControlMessage`](worker::ControlMessage)s over separate channels, and is
//!   controlled through a shared [`WorkerState`](worker::WorkerState).
//! - **`devices`**: producers reading line-oriented frames from serial
//!   instruments, and a simulated device.
//! - **`processing`**: consumers parsing frames, and the
//!   [`FrameStore`](processing::FrameStore) actor holding the latest frame and
//!   baseline.
//! - **`storage`**: the CSV recorder and unique output file naming.
//! - **`config`**: figment-based configuration (`DaqConfig`).
//! - **`error`**: the crate-wide `DaqError` enum.
//! - **`logging`**: `tracing` subscriber setup.
//!
//! ## Example
//!
//! ```no_run
//! use daq_workers::devices::{SimulatedReader, SimulatedStart};
//! use daq_workers::processing::Forwarder;
//! use daq_workers::worker::{Consumer, Producer};
//!
//! # async fn demo() {
//! let mut display = Consumer::new("display", Forwarder::new());
//! display.on_result(|batch: Vec<daq_workers::devices::Frame>| println!("{} frames", batch.len()));
//! display.start_new((), (), ()).await;
//!
//! let mut reader = Producer::new("sim", SimulatedReader::new("EIT", 3));
//! reader.set_subscribers(vec![display.get_work_queue()]);
//! reader
//!     .start_new(SimulatedStart { limit: Some(100), seed: None }, (), ())
//!     .await;
//!
//! reader.join().await;
//! display.set_stop_at_queue_end();
//! display.join().await;
//! # }
//! ```

pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod processing;
pub mod storage;
pub mod worker;

pub use config::DaqConfig;
pub use error::{AppResult, DaqError};
