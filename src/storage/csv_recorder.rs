//! CSV recording consumer.
//!
//! One file per run. The header comes from `storage.columns`; each frame
//! becomes one row with its timestamp in the `Time` column and its data in the
//! column named after its tag.

use super::create_unique_file;
use crate::config::{StorageConfig, RAW_TIMESTAMP, TIME_COLUMN};
use crate::devices::Frame;
use crate::worker::{Batch, Consume, ControlMessage, UnitControl};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Open output of one recording run.
pub struct Recording {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl Recording {
    /// File being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Write `rows` and flush. Rows written before a failure stay counted.
    fn append(&mut self, rows: &[Vec<String>]) -> Result<(), csv::Error> {
        for row in rows {
            self.writer.write_record(row)?;
            self.rows += 1;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Consumer writing frames to a CSV file. The start argument is the file name
/// suffix; an empty one uses `storage.default_suffix`.
#[derive(Debug, Clone)]
pub struct CsvRecorder {
    config: StorageConfig,
    positions: HashMap<String, usize>,
}

impl CsvRecorder {
    /// Recorder writing into `config.directory` with `config.columns`.
    pub fn new(config: StorageConfig) -> Self {
        let positions = config
            .columns
            .iter()
            .enumerate()
            .map(|(index, column)| (column.clone(), index))
            .collect();
        Self { config, positions }
    }

    fn format_time(&self, timestamp: &DateTime<Utc>) -> String {
        match self.config.timestamp_format.as_deref() {
            Some(RAW_TIMESTAMP) => {
                format!("{:.6}", timestamp.timestamp_micros() as f64 / 1_000_000.0)
            }
            Some(format) => {
                let mut text = String::new();
                match write!(text, "{}", timestamp.format(format)) {
                    Ok(()) => text,
                    Err(_) => timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
                }
            }
            None => timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }

    fn row(&self, frame: &Frame) -> Option<Vec<String>> {
        let data_at = *self.positions.get(&frame.tag)?;
        let mut row = vec![String::new(); self.config.columns.len()];
        if let Some(&time_at) = self.positions.get(TIME_COLUMN) {
            row[time_at] = self.format_time(&frame.timestamp);
        }
        // A tag named like the time column wins over the timestamp.
        row[data_at] = frame.data.clone();
        Some(row)
    }

    fn open(&self, suffix: &str) -> Result<Recording, String> {
        let (path, file) = create_unique_file(&self.config, suffix).map_err(|e| e.to_string())?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.config.delimiter as u8)
            .from_writer(file);
        writer
            .write_record(&self.config.columns)
            .and_then(|()| writer.flush().map_err(csv::Error::from))
            .map_err(|e| format!("{}: {e}", path.display()))?;
        Ok(Recording {
            path,
            writer,
            rows: 0,
        })
    }
}

#[async_trait]
impl Consume for CsvRecorder {
    type Item = Frame;
    type Context = Option<Recording>;
    type Output = usize;
    type StartArgs = String;
    type WorkArgs = ();
    type StopArgs = ();

    async fn on_start(&self, ctl: &UnitControl, suffix: String) -> Option<Recording> {
        let recorder = self.clone();
        let opened = tokio::task::spawn_blocking(move || recorder.open(&suffix))
            .await
            .unwrap_or_else(|e| Err(e.to_string()));
        match opened {
            Ok(recording) => {
                info!(path = %recording.path.display(), "Recording to CSV");
                ctl.send(ControlMessage::Opened {
                    path: recording.path.clone(),
                });
                Some(recording)
            }
            Err(reason) => {
                ctl.fail(ControlMessage::StorageFailed { reason });
                None
            }
        }
    }

    async fn work(
        &self,
        batch: Batch<Frame>,
        context: &mut Option<Recording>,
        ctl: &UnitControl,
        _args: &(),
    ) -> usize {
        let Some(mut recording) = context.take() else {
            return 0;
        };

        let rows: Vec<Vec<String>> = batch
            .iter()
            .filter_map(|frame| {
                let row = self.row(frame);
                if row.is_none() {
                    warn!(tag = %frame.tag, "No column for tag, frame not recorded");
                }
                row
            })
            .collect();

        let before = recording.rows;
        let joined = tokio::task::spawn_blocking(move || {
            let outcome = recording.append(&rows);
            (recording, outcome)
        })
        .await;
        let (recording, outcome) = match joined {
            Ok(done) => done,
            Err(e) => {
                ctl.fail(ControlMessage::StorageFailed {
                    reason: e.to_string(),
                });
                return 0;
            }
        };
        if let Err(e) = outcome {
            ctl.fail(ControlMessage::StorageFailed {
                reason: e.to_string(),
            });
        }

        let written = recording.rows - before;
        debug!(written, total = recording.rows, "Wrote CSV rows");
        *context = Some(recording);
        written
    }

    async fn on_stop(&self, context: Option<Recording>, _ctl: &UnitControl, _args: ()) {
        let Some(mut recording) = context else {
            return;
        };
        let path = recording.path.clone();
        let rows = recording.rows;
        let flushed = tokio::task::spawn_blocking(move || recording.writer.flush()).await;
        match flushed {
            Ok(Ok(())) => info!(path = %path.display(), rows, "Recording closed"),
            Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Final flush failed"),
            Err(e) => warn!(path = %path.display(), error = %e, "Final flush did not finish"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(timestamp_format: Option<&str>) -> StorageConfig {
        StorageConfig {
            columns: vec!["Time".into(), "EIT".into(), "PD".into()],
            timestamp_format: timestamp_format.map(str::to_string),
            ..StorageConfig::default()
        }
    }

    fn frame(tag: &str, data: &str) -> Frame {
        Frame {
            tag: tag.into(),
            data: data.into(),
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 5).unwrap(),
        }
    }

    #[test]
    fn row_places_time_and_data_by_column() {
        let recorder = CsvRecorder::new(config(Some("raw")));
        assert_eq!(
            recorder.row(&frame("PD", "PD: 1, 2")).unwrap(),
            vec!["1709294405.000000".to_string(), String::new(), "PD: 1, 2".into()]
        );
        assert!(recorder.row(&frame("XYZ", "1")).is_none());
    }

    #[test]
    fn failed_write_keeps_earlier_rows_counted() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = CsvRecorder::new(StorageConfig {
            directory: dir.path().to_path_buf(),
            ..config(None)
        });
        let mut recording = recorder.open("count").unwrap();

        let good = vec!["t".to_string(), "1".into(), String::new()];
        let short = vec!["t".to_string()];
        assert!(recording.append(&[good.clone(), short, good]).is_err());
        assert_eq!(recording.rows(), 1);
    }

    #[test]
    fn formats_time_with_strftime() {
        let recorder = CsvRecorder::new(config(Some("%H:%M:%S")));
        assert_eq!(recorder.row(&frame("EIT", "x")).unwrap()[0], "12:00:05");
    }
}
