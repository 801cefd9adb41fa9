//! Line-oriented serial device reader.
//!
//! The port is opened in `on_start` and read on Tokio's blocking pool, one
//! terminator-delimited frame per `work` call. Connection problems are reported
//! as control messages and stop the reader; undecodable frames are dropped.

use super::frame::{accepts_frame, decode_line, read_frame, Frame};
use crate::config::DeviceConfig;
use crate::error::{AppResult, DaqError};
use crate::worker::{ControlMessage, Produce, UnitControl};
use async_trait::async_trait;
use serialport::SerialPort;
use std::io::BufReader;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// Names of the serial ports present on this machine.
pub fn list_devices() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(|e| DaqError::Serial(e.to_string()))?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}

/// Call-level arguments for [`SerialReader`].
#[derive(Debug, Clone)]
pub struct SerialStart {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Line settings
    pub config: DeviceConfig,
}

struct OpenPort {
    reader: BufReader<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

/// Per-run state of a [`SerialReader`]. `port` is `None` when opening failed.
pub struct ReaderContext {
    port: Option<Arc<Mutex<OpenPort>>>,
    config: DeviceConfig,
}

/// Producer reading frames from one serial device and tagging them.
#[derive(Debug, Clone)]
pub struct SerialReader {
    tag: String,
}

impl SerialReader {
    /// Reader whose frames carry `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    /// Tag stamped on every frame.
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

fn open_port(port: &str, config: &DeviceConfig) -> Result<Box<dyn SerialPort>, serialport::Error> {
    let device = serialport::new(port, config.baud)
        .timeout(config.read_timeout)
        .flow_control(serialport::FlowControl::None)
        .open()?;
    device.clear(serialport::ClearBuffer::Input)?;
    Ok(device)
}

#[async_trait]
impl Produce for SerialReader {
    type Context = ReaderContext;
    type Output = Frame;
    type StartArgs = SerialStart;
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, ctl: &UnitControl, args: SerialStart) -> ReaderContext {
        let SerialStart { port, config } = args;
        let opened = {
            let port = port.clone();
            let config = config.clone();
            tokio::task::spawn_blocking(move || open_port(&port, &config)).await
        };

        let device = match opened {
            Ok(Ok(device)) => device,
            Ok(Err(e)) => {
                ctl.fail(ControlMessage::ConnectFailed {
                    device: port,
                    reason: e.to_string(),
                });
                return ReaderContext { port: None, config };
            }
            Err(e) => {
                ctl.fail(ControlMessage::ConnectFailed {
                    device: port,
                    reason: format!("open task failed: {e}"),
                });
                return ReaderContext { port: None, config };
            }
        };

        info!(tag = %self.tag, %port, baud = config.baud, "Serial device connected");
        ctl.send(ControlMessage::Connected { device: port });
        ReaderContext {
            port: Some(Arc::new(Mutex::new(OpenPort {
                reader: BufReader::new(device),
                pending: Vec::new(),
            }))),
            config,
        }
    }

    async fn work(&self, context: &mut ReaderContext, ctl: &UnitControl, _args: &()) -> Option<Frame> {
        let port = Arc::clone(context.port.as_ref()?);
        let terminator = context.config.terminator as u8;

        let read = tokio::task::spawn_blocking(move || {
            let mut guard = port.blocking_lock();
            let OpenPort { reader, pending } = &mut *guard;
            read_frame(reader, terminator, pending)
        })
        .await;

        let bytes = match read {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                ctl.fail(ControlMessage::DeviceLost {
                    reason: e.to_string(),
                });
                return None;
            }
            Err(e) => {
                ctl.fail(ControlMessage::DeviceLost {
                    reason: format!("read task failed: {e}"),
                });
                return None;
            }
        };

        let Some(line) = decode_line(&bytes, &context.config.encoding) else {
            debug!(tag = %self.tag, len = bytes.len(), "Dropped undecodable frame");
            return None;
        };
        if !accepts_frame(&line, context.config.frame_start_char) {
            trace!(tag = %self.tag, "Dropped frame without start character");
            return None;
        }
        Some(Frame::new(self.tag.clone(), line))
    }

    async fn on_stop(&self, context: ReaderContext, _ctl: &UnitControl, _args: ()) {
        match context.port {
            Some(port) => {
                // Dropping the last handle closes the port.
                drop(port);
                info!(tag = %self.tag, "Serial device closed");
            }
            None => warn!(tag = %self.tag, "Reader stopped without an open device"),
        }
    }
}
