//! End-to-end tests: simulated devices feeding the CSV recorder and the frame
//! parser through the worker framework.

mod common;

use common::{consumer_messages, messages, next};
use daq_workers::config::StorageConfig;
use daq_workers::devices::{Frame, SimulatedReader, SimulatedStart};
use daq_workers::processing::{FrameParser, FrameStore, ParsedFrame};
use daq_workers::storage::CsvRecorder;
use daq_workers::worker::{Consumer, ControlMessage, Producer, WorkerState};
use parking_lot::Mutex;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn storage(dir: &Path, columns: &[&str]) -> StorageConfig {
    StorageConfig {
        directory: dir.to_path_buf(),
        columns: columns.iter().map(|c| c.to_string()).collect(),
        ..StorageConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_simulated_devices_are_recorded_and_parsed() {
    let dir = tempfile::tempdir().unwrap();
    let (store, _store_task) = FrameStore::spawn();

    let mut recorder = Consumer::new(
        "recorder",
        CsvRecorder::new(storage(dir.path(), &["Time", "EIT", "PD"])),
    )
    .with_buffer_size(8);
    let mut recorder_rx = consumer_messages(&recorder);
    let rows = Arc::new(Mutex::new(0usize));
    let rows_sink = Arc::clone(&rows);
    recorder.on_result(move |written| *rows_sink.lock() += written);

    let mut parser = Consumer::new("parser", FrameParser::new(store.clone()))
        .with_buffer_timeout(Duration::from_millis(20));
    let parsed = Arc::new(Mutex::new(Vec::<ParsedFrame>::new()));
    let parsed_sink = Arc::clone(&parsed);
    parser.on_result(move |frames| parsed_sink.lock().extend(frames));

    let mut readers: Vec<_> = ["EIT", "PD"]
        .into_iter()
        .map(|tag| {
            let mut reader = Producer::new(tag, SimulatedReader::new(tag, 3));
            reader.set_subscribers(vec![recorder.get_work_queue(), parser.get_work_queue()]);
            reader
        })
        .collect();
    let mut reader_rx = messages(&readers[0]);

    recorder.start_new("run".to_string(), (), ()).await;
    parser.start_new(None, (), ()).await;
    let path = match next(&mut recorder_rx, 5).await {
        ControlMessage::Opened { path } => path,
        other => panic!("unexpected message {other:?}"),
    };

    for reader in &mut readers {
        reader
            .start_new(
                SimulatedStart {
                    limit: Some(20),
                    seed: Some(7),
                },
                (),
                (),
            )
            .await;
    }
    for reader in &mut readers {
        reader.join().await;
        assert_eq!(reader.get_state(), WorkerState::Stopped);
    }
    assert_eq!(
        next(&mut reader_rx, 5).await,
        ControlMessage::Connected {
            device: "simulated:EIT".into()
        }
    );

    assert!(recorder.set_stop_at_queue_end());
    assert!(parser.set_stop_at_queue_end());
    recorder.join().await;
    parser.join().await;

    assert_eq!(*rows.lock(), 40);
    let mut csv = csv::Reader::from_path(&path).unwrap();
    assert_eq!(csv.headers().unwrap(), vec!["Time", "EIT", "PD"]);
    let records: Vec<csv::StringRecord> = csv.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 40);
    for record in &records {
        assert!(record[0].parse::<f64>().is_ok());
        let filled = [&record[1], &record[2]]
            .iter()
            .filter(|field| !field.is_empty())
            .count();
        assert_eq!(filled, 1);
    }

    let parsed = parsed.lock();
    assert_eq!(parsed.len(), 40);
    assert!(parsed.iter().all(|frame| frame.values.len() == 3));
    let current = store.current().await.unwrap().unwrap();
    assert_eq!(current.values.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_parser_subtracts_baseline_file() {
    let mut baseline = tempfile::NamedTempFile::new().unwrap();
    writeln!(baseline, "1, 1, 1").unwrap();
    let (store, _store_task) = FrameStore::spawn();

    let mut parser = Consumer::new("parser", FrameParser::new(store.clone()))
        .with_buffer_size(1000)
        .with_buffer_timeout(Duration::from_secs(10));
    let (tx, mut rx) = mpsc::unbounded_channel();
    parser.on_result(move |frames| {
        let _ = tx.send(frames);
    });
    parser
        .start_new(Some(baseline.path().to_path_buf()), (), ())
        .await;

    let inbox = parser.get_work_queue();
    inbox.offer(Frame::new("EIT", "EIT: 2, 3, 4"));
    inbox.offer(Frame::new("EIT", "garbage"));
    inbox.offer(Frame::new("EIT", "EIT: 5, 6"));
    assert!(parser.set_stop_at_queue_end());
    parser.join().await;

    let frames = next(&mut rx, 2).await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].delta, Some(vec![1.0, 2.0, 3.0]));
    // Length mismatch with the baseline: no delta.
    assert_eq!(frames[1].delta, None);
    assert_eq!(store.baseline().await.unwrap(), Some(vec![1.0, 1.0, 1.0]));
    assert_eq!(store.current().await.unwrap().unwrap().values, vec![5.0, 6.0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_baseline_is_reported_but_not_fatal() {
    let (store, _store_task) = FrameStore::spawn();
    let mut parser = Consumer::new("parser", FrameParser::new(store));
    let mut rx = consumer_messages(&parser);

    parser
        .start_new(Some("/nonexistent/baseline.csv".into()), (), ())
        .await;
    assert!(matches!(next(&mut rx, 5).await, ControlMessage::Status(_)));
    assert_eq!(parser.get_state(), WorkerState::Started);

    parser.set_stopped();
    parser.join().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unwritable_directory_stops_recorder() {
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let mut recorder = Consumer::new(
        "recorder",
        CsvRecorder::new(storage(&blocker.path().join("sub"), &["Time", "EIT"])),
    );
    let mut rx = consumer_messages(&recorder);

    recorder.start_new(String::new(), (), ()).await;
    recorder.join().await;

    assert!(matches!(
        next(&mut rx, 5).await,
        ControlMessage::StorageFailed { .. }
    ));
    assert_eq!(next(&mut rx, 5).await, ControlMessage::Exited);
    assert_eq!(recorder.get_state(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_recorder_file_io_leaves_single_thread_runtime_free() {
    let dir = tempfile::tempdir().unwrap();
    let mut recorder = Consumer::new(
        "recorder",
        CsvRecorder::new(storage(dir.path(), &["Time", "EIT"])),
    )
    .with_buffer_size(1000)
    .with_buffer_timeout(Duration::from_secs(10));
    let mut rx = consumer_messages(&recorder);
    let (tx, mut rows_rx) = mpsc::unbounded_channel();
    recorder.on_result(move |written| {
        let _ = tx.send(written);
    });

    recorder.start_new("single".to_string(), (), ()).await;
    let path = match next(&mut rx, 5).await {
        ControlMessage::Opened { path } => path,
        other => panic!("unexpected message {other:?}"),
    };

    let inbox = recorder.get_work_queue();
    for i in 0..3 {
        inbox.offer(Frame::new("EIT", format!("EIT: {i}")));
    }
    assert!(recorder.set_stop_at_queue_end());
    recorder.join().await;

    assert_eq!(next(&mut rows_rx, 5).await, 3);
    let records = csv::Reader::from_path(&path).unwrap().records().count();
    assert_eq!(records, 3);
}
