//! Numeric frame parsing with optional baseline subtraction.

use super::frame_store::FrameStore;
use crate::devices::Frame;
use crate::worker::{Batch, Consume, ControlMessage, UnitControl};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A frame whose payload was parsed into numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedFrame {
    /// Tag of the source reader
    pub tag: String,
    /// Label in front of the `:` in the raw line
    pub label: String,
    /// Parsed values
    pub values: Vec<f64>,
    /// Timestamp of the raw frame
    pub timestamp: DateTime<Utc>,
    /// `values` minus the baseline, when one of matching length is set
    pub delta: Option<Vec<f64>>,
}

/// Split `"<label>: v1, v2, ..."` into its label and values.
///
/// Empty fields are skipped. Returns `None` if there is no `:` or any field is
/// not a number.
pub fn parse_numeric_line(line: &str) -> Option<(String, Vec<f64>)> {
    let (label, rest) = line.split_once(':')?;
    let values = rest
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| field.parse::<f64>().ok())
        .collect::<Option<Vec<f64>>>()?;
    Some((label.trim().to_string(), values))
}

fn load_baseline(path: &Path) -> Result<Vec<f64>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let line = text
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| "file is empty".to_string())?;
    match parse_numeric_line(line) {
        Some((_, values)) => Ok(values),
        None => line
            .split(',')
            .map(|field| field.trim().parse::<f64>().map_err(|e| e.to_string()))
            .collect(),
    }
}

/// Consumer turning raw frames into [`ParsedFrame`]s and publishing the newest
/// one to a [`FrameStore`].
///
/// The start argument is an optional baseline file holding either a raw frame
/// line or plain comma-separated numbers. A missing or unreadable file is
/// reported but does not stop the parser.
#[derive(Debug, Clone)]
pub struct FrameParser {
    store: FrameStore,
}

impl FrameParser {
    /// Parser publishing to `store`.
    pub fn new(store: FrameStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Consume for FrameParser {
    type Item = Frame;
    type Context = ();
    type Output = Vec<ParsedFrame>;
    type StartArgs = Option<PathBuf>;
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, ctl: &UnitControl, baseline_file: Option<PathBuf>) {
        let Some(path) = baseline_file else {
            return;
        };
        let file = path.clone();
        let loaded = tokio::task::spawn_blocking(move || load_baseline(&file))
            .await
            .unwrap_or_else(|e| Err(e.to_string()));
        match loaded {
            Ok(values) => {
                info!(path = %path.display(), len = values.len(), "Loaded baseline");
                if self.store.set_baseline(Some(values)).await.is_err() {
                    ctl.fail(ControlMessage::Status("frame store closed".into()));
                }
            }
            Err(reason) => {
                warn!(path = %path.display(), %reason, "Ignoring baseline file");
                ctl.send(ControlMessage::Status(format!(
                    "baseline {} not loaded: {reason}",
                    path.display()
                )));
            }
        }
    }

    async fn work(
        &self,
        batch: Batch<Frame>,
        _context: &mut (),
        ctl: &UnitControl,
        _args: &(),
    ) -> Vec<ParsedFrame> {
        let baseline = match self.store.baseline().await {
            Ok(baseline) => baseline,
            Err(_) => {
                ctl.fail(ControlMessage::Status("frame store closed".into()));
                return Vec::new();
            }
        };

        let parsed: Vec<ParsedFrame> = batch
            .into_iter()
            .filter_map(|frame| {
                let Some((label, values)) = parse_numeric_line(&frame.data) else {
                    debug!(tag = %frame.tag, data = %frame.data, "Dropped malformed frame");
                    return None;
                };
                let delta = baseline
                    .as_ref()
                    .filter(|base| base.len() == values.len())
                    .map(|base| values.iter().zip(base).map(|(v, b)| v - b).collect());
                Some(ParsedFrame {
                    tag: frame.tag,
                    label,
                    values,
                    timestamp: frame.timestamp,
                    delta,
                })
            })
            .collect();

        if let Some(latest) = parsed.last() {
            if self.store.set_current(latest.clone()).await.is_err() {
                ctl.fail(ControlMessage::Status("frame store closed".into()));
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_label_and_values() {
        assert_eq!(
            parse_numeric_line("EIT: 1.5, -2, 3e2"),
            Some(("EIT".to_string(), vec![1.5, -2.0, 300.0]))
        );
        assert_eq!(
            parse_numeric_line("A: 1, , 2,"),
            Some(("A".to_string(), vec![1.0, 2.0]))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert_eq!(parse_numeric_line("no separator"), None);
        assert_eq!(parse_numeric_line("A: 1, x, 2"), None);
    }

    #[test]
    fn baseline_file_accepts_frame_or_plain_numbers() {
        let mut framed = tempfile::NamedTempFile::new().unwrap();
        writeln!(framed, "EIT: 1, 2, 3").unwrap();
        assert_eq!(
            load_baseline(framed.path()).unwrap(),
            vec![1.0, 2.0, 3.0]
        );

        let mut plain = tempfile::NamedTempFile::new().unwrap();
        writeln!(plain, "\n0.5,0.25").unwrap();
        assert_eq!(
            load_baseline(plain.path()).unwrap(),
            vec![0.5, 0.25]
        );

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(load_baseline(empty.path()).is_err());
    }
}
