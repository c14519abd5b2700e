//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use daq_json_metadata::{Artifacts, Document, ExportResult, OpenMode, OutputSink, SinkHandle};
use parking_lot::Mutex;
use serde_json::Value;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub fn doc(value: Value) -> Document {
    Document::try_from(value).expect("fixture documents are JSON objects")
}

pub fn read_json(path: &Path) -> Value {
    let text = std::fs::read_to_string(path).expect("metadata file is readable");
    serde_json::from_str(&text).expect("metadata file is valid JSON")
}

/// A complete run: start, two streams, events, stop.
pub fn two_stream_run(uid: &str, plan_name: &str) -> Vec<(&'static str, Document)> {
    vec![
        ("start", doc(serde_json::json!({"uid": uid, "plan_name": plan_name, "time": 1_600_000_000.0}))),
        ("descriptor", doc(serde_json::json!({"name": "primary", "uid": "d1", "run_start": uid, "data_keys": {"det": {"dtype": "number"}}}))),
        ("event", doc(serde_json::json!({"uid": "e1", "descriptor": "d1", "seq_num": 1, "data": {"det": 1.5}}))),
        ("descriptor", doc(serde_json::json!({"name": "baseline", "uid": "d2", "run_start": uid, "data_keys": {}}))),
        ("event_page", doc(serde_json::json!({"descriptor": "d1", "uid": ["e2", "e3"], "seq_num": [2, 3]}))),
        ("stop", doc(serde_json::json!({"uid": "s1", "run_start": uid, "exit_status": "success"}))),
    ]
}

/// Writer that refuses every byte; flushing succeeds so handles can close.
struct BrokenWriter;

impl Write for BrokenWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::StorageFull, "disk full"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Sink whose handles fail on write. Keeps every handle it hands out so tests
/// can check they were closed.
#[derive(Default)]
pub struct FullDiskSink {
    handles: Mutex<Vec<SinkHandle>>,
}

impl FullDiskSink {
    pub fn handles(&self) -> Vec<SinkHandle> {
        self.handles.lock().clone()
    }
}

impl OutputSink for FullDiskSink {
    fn open(&self, _label: &str, filename: &str, _mode: OpenMode) -> ExportResult<SinkHandle> {
        let handle = SinkHandle::new(PathBuf::from(filename), Box::new(BrokenWriter));
        self.handles.lock().push(handle.clone());
        Ok(handle)
    }

    fn close(&self) -> ExportResult<()> {
        for handle in self.handles.lock().iter() {
            handle.close()?;
        }
        Ok(())
    }

    fn artifacts(&self) -> Artifacts {
        Artifacts::new()
    }
}
