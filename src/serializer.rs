//! The run metadata serializer.
//!
//! [`Serializer`] consumes the documents of exactly one run and, when the stop
//! document arrives, writes the collected metadata to a single
//! `<file_prefix>meta.json` artifact:
//!
//! ```text
//! {"metadata": {"start": start_doc,
//!               "stop": stop_doc,
//!               "descriptors": {stream_name: {descriptor_uid: descriptor_doc, ...}, ...}}}
//! ```
//!
//! # Lifecycle
//!
//! ```text
//! not started --start--> started --descriptor*--> started --stop--> finished
//! ```
//!
//! - a second `start` is a usage error and leaves the first run untouched
//! - the file prefix is rendered from the start document as soon as it arrives
//! - the metadata file is opened in exclusive-create mode, so an existing file
//!   is never overwritten
//! - a second `stop` is a usage error; nothing is rewritten
//! - [`Serializer::close`] is idempotent and also runs on drop

use crate::data::encode::{self, EncodingOptions};
use crate::data::sanitize::sanitize_document;
use crate::data::sink::{Artifacts, OpenMode, OutputSink, SinkHandle};
use crate::error::{ExportError, ExportResult};
use crate::experiment::{Document, DocumentRouter};
use crate::export::Destination;
use crate::metadata::{JsonDocument, RunMetadata};
use crate::template::FilenameTemplate;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Artifact label under which the metadata file is recorded.
pub const RUN_METADATA_LABEL: &str = "run_metadata";

/// Suffix appended to the rendered file prefix.
pub const METADATA_FILE_SUFFIX: &str = "meta.json";

/// Key under which descriptors without a `name` are grouped.
pub const NULL_STREAM_KEY: &str = "null";

/// Accumulates one run's metadata and writes it out at stop time.
pub struct Serializer {
    sink: Arc<dyn OutputSink>,
    file_prefix: FilenameTemplate,
    templated_file_prefix: Option<String>,
    options: EncodingOptions,
    tree: RunMetadata,
    files: Vec<SinkHandle>,
}

impl Serializer {
    /// Create a serializer writing into `destination`.
    ///
    /// `file_prefix` is parsed immediately so syntax errors surface before any
    /// document is handled.
    pub fn new(
        destination: impl Into<Destination>,
        file_prefix: &str,
        options: EncodingOptions,
    ) -> ExportResult<Self> {
        let file_prefix = FilenameTemplate::parse(file_prefix)?;
        Ok(Self::with_template(destination, file_prefix, options))
    }

    /// Like [`Serializer::new`], with an already parsed template.
    pub fn with_template(
        destination: impl Into<Destination>,
        file_prefix: FilenameTemplate,
        options: EncodingOptions,
    ) -> Self {
        Self {
            sink: destination.into().into_sink(),
            file_prefix,
            templated_file_prefix: None,
            options,
            tree: RunMetadata::new(),
            files: Vec::new(),
        }
    }

    /// The metadata collected so far.
    pub fn metadata(&self) -> &RunMetadata {
        &self.tree
    }

    /// The file prefix rendered from the start document, once it has arrived.
    pub fn templated_file_prefix(&self) -> Option<&str> {
        self.templated_file_prefix.as_deref()
    }

    /// Everything the sink has produced so far, queried live.
    pub fn artifacts(&self) -> Artifacts {
        self.sink.artifacts()
    }

    /// True once a stop document has been accepted.
    pub fn is_finished(&self) -> bool {
        self.tree.stop().is_some()
    }

    /// Close every handle this serializer opened. Safe to call repeatedly and
    /// on a serializer that never saw a document.
    pub fn close(&mut self) -> ExportResult<()> {
        let mut first_err = None;
        for handle in self.files.drain(..) {
            if let Err(e) = handle.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn sanitize(&self, doc: &Document) -> ExportResult<JsonDocument> {
        sanitize_document(doc, self.options.type_hook.as_ref())
    }
}

impl DocumentRouter for Serializer {
    fn start(&mut self, doc: Document) -> ExportResult<()> {
        if let Some(first) = self.tree.start() {
            return Err(ExportError::DuplicateStart {
                first_uid: first
                    .get("uid")
                    .map(json_key)
                    .unwrap_or_else(|| NULL_STREAM_KEY.to_string()),
            });
        }

        let sanitized = self.sanitize(&doc)?;
        let prefix = self.file_prefix.render(&sanitized)?;
        debug!(prefix = %prefix, "rendered file prefix");
        self.templated_file_prefix = Some(prefix);
        self.tree.metadata.start = Some(sanitized);
        Ok(())
    }

    fn descriptor(&mut self, doc: Document) -> ExportResult<()> {
        let sanitized = self.sanitize(&doc)?;
        let stream = sanitized
            .get("name")
            .map(json_key)
            .unwrap_or_else(|| NULL_STREAM_KEY.to_string());
        let uid = sanitized
            .get("uid")
            .map(json_key)
            .ok_or_else(|| ExportError::MissingField {
                kind: "descriptor".into(),
                field: "uid".into(),
            })?;

        if self
            .tree
            .insert_descriptor(stream.clone(), uid.clone(), sanitized)
            .is_some()
        {
            debug!(%stream, %uid, "replaced descriptor with the same uid");
        }
        Ok(())
    }

    fn stop(&mut self, doc: Document) -> ExportResult<()> {
        if self.is_finished() {
            return Err(ExportError::DuplicateStop);
        }
        let prefix = self
            .templated_file_prefix
            .clone()
            .ok_or(ExportError::StopBeforeStart)?;

        self.tree.metadata.stop = Some(self.sanitize(&doc)?);

        let filename = format!("{prefix}{METADATA_FILE_SUFFIX}");
        let mut handle = self
            .sink
            .open(RUN_METADATA_LABEL, &filename, OpenMode::CreateNew)?;
        self.files.push(handle.clone());

        encode::write_json(&mut handle, &self.tree.to_value(), &self.options)?;
        self.close()?;

        info!(
            path = %handle.path().display(),
            streams = self.tree.metadata.descriptors.len(),
            descriptors = self.tree.descriptor_count(),
            "wrote run metadata"
        );
        Ok(())
    }
}

impl Drop for Serializer {
    fn drop(&mut self) {
        if self.files.is_empty() {
            return;
        }
        if let Err(e) = self.close() {
            warn!("failed to close metadata file on drop: {e}");
        }
    }
}

/// Render a sanitized value as a JSON object key.
///
/// Strings are used as-is; other scalars use their JSON text (`null`, `true`,
/// `3`), matching how JSON encoders coerce non-string keys.
fn json_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sink::MemoryBufferSink;
    use crate::experiment::{ArrayData, DocumentKind, NdArray, Scalar};
    use serde_json::json;
    use tracing_test::traced_test;

    fn doc(value: Value) -> Document {
        Document::try_from(value).unwrap()
    }

    fn memory_serializer(file_prefix: &str) -> (Arc<MemoryBufferSink>, Serializer) {
        let sink = Arc::new(MemoryBufferSink::new());
        let serializer =
            Serializer::new(sink.clone(), file_prefix, EncodingOptions::default()).unwrap();
        (sink, serializer)
    }

    fn written(sink: &MemoryBufferSink, name: &str) -> Value {
        serde_json::from_str(&sink.contents_string(name).unwrap()).unwrap()
    }

    #[test]
    fn test_second_start_is_rejected_and_first_is_kept() {
        let (_sink, mut serializer) = memory_serializer("{uid}-");
        serializer.start(doc(json!({"uid": "first"}))).unwrap();

        let err = serializer.start(doc(json!({"uid": "second"}))).unwrap_err();
        assert!(matches!(err, ExportError::DuplicateStart { ref first_uid } if first_uid == "first"));
        assert_eq!(serializer.metadata().start(), doc_map(json!({"uid": "first"})).as_ref());
        assert_eq!(serializer.templated_file_prefix(), Some("first-"));
    }

    fn doc_map(value: Value) -> Option<JsonDocument> {
        match value {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    #[test]
    fn test_descriptor_reinsert_keeps_latest() {
        let (_sink, mut serializer) = memory_serializer("");
        serializer
            .descriptor(doc(json!({"name": "primary", "uid": "d1", "rev": 1})))
            .unwrap();
        serializer
            .descriptor(doc(json!({"name": "primary", "uid": "d1", "rev": 2})))
            .unwrap();

        let tree = serializer.metadata();
        assert_eq!(tree.descriptor_count(), 1);
        assert_eq!(tree.descriptor("primary", "d1").unwrap()["rev"], json!(2));
    }

    #[test]
    fn test_descriptor_without_name_groups_under_null() {
        let (_sink, mut serializer) = memory_serializer("");
        serializer.descriptor(doc(json!({"uid": "d1"}))).unwrap();
        serializer
            .descriptor(doc(json!({"name": null, "uid": "d2"})))
            .unwrap();

        let streams: Vec<_> = serializer.metadata().stream_names().collect();
        assert_eq!(streams, vec![NULL_STREAM_KEY]);
        assert_eq!(serializer.metadata().descriptor_count(), 2);
    }

    #[test]
    fn test_descriptor_without_uid_is_an_error() {
        let (_sink, mut serializer) = memory_serializer("");
        let err = serializer
            .descriptor(doc(json!({"name": "primary"})))
            .unwrap_err();
        assert!(matches!(err, ExportError::MissingField { .. }));
    }

    #[test]
    fn test_descriptors_are_sanitized_before_insertion() {
        let (sink, mut serializer) = memory_serializer("");
        serializer.start(doc(json!({"uid": "u1"}))).unwrap();
        let descriptor = Document::new()
            .with("name", "primary")
            .with("uid", "d1")
            .with("exposure", Scalar::F32(0.25))
            .with(
                "roi",
                NdArray::new(vec![2, 2], ArrayData::U16(vec![0, 0, 2048, 2048])).unwrap(),
            );
        serializer.descriptor(descriptor).unwrap();
        serializer.stop(doc(json!({"exit_status": "success"}))).unwrap();

        let written = written(&sink, "meta.json");
        assert_eq!(
            written["metadata"]["descriptors"]["primary"]["d1"],
            json!({"name": "primary", "uid": "d1", "exposure": 0.25, "roi": [[0, 0], [2048, 2048]]})
        );
    }

    #[test]
    fn test_start_template_error_is_fatal_at_start() {
        let (_sink, mut serializer) = memory_serializer("{proposal_id}-");
        let err = serializer.start(doc(json!({"uid": "u1"}))).unwrap_err();
        assert!(matches!(err, ExportError::Template(_)));
        assert!(serializer.metadata().start().is_none());
    }

    #[test]
    fn test_stop_writes_once_and_second_stop_is_rejected() {
        let (sink, mut serializer) = memory_serializer("{uid}-");
        serializer.route(DocumentKind::Start, doc(json!({"uid": "u1"}))).unwrap();
        serializer.route(DocumentKind::Stop, doc(json!({"exit_status": "success"}))).unwrap();

        assert!(serializer.is_finished());
        assert_eq!(
            serializer.artifacts()[RUN_METADATA_LABEL],
            vec![std::path::PathBuf::from("u1-meta.json")]
        );

        let err = serializer.stop(doc(json!({"exit_status": "abort"}))).unwrap_err();
        assert!(matches!(err, ExportError::DuplicateStop));
        assert_eq!(written(&sink, "u1-meta.json")["metadata"]["stop"]["exit_status"], "success");
        assert_eq!(serializer.artifacts()[RUN_METADATA_LABEL].len(), 1);
    }

    #[test]
    fn test_stop_before_start_is_rejected() {
        let (sink, mut serializer) = memory_serializer("");
        let err = serializer.stop(doc(json!({"exit_status": "success"}))).unwrap_err();
        assert!(matches!(err, ExportError::StopBeforeStart));
        assert!(sink.artifacts().is_empty());
    }

    struct RejectingWriter;

    impl std::io::Write for RejectingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RejectingSink {
        opened: parking_lot::Mutex<Vec<SinkHandle>>,
    }

    impl OutputSink for RejectingSink {
        fn open(&self, _label: &str, filename: &str, _mode: OpenMode) -> ExportResult<SinkHandle> {
            let handle = SinkHandle::new(filename.into(), Box::new(RejectingWriter));
            self.opened.lock().push(handle.clone());
            Ok(handle)
        }

        fn close(&self) -> ExportResult<()> {
            Ok(())
        }

        fn artifacts(&self) -> Artifacts {
            Artifacts::new()
        }
    }

    #[test]
    fn test_failed_write_keeps_handle_until_close() {
        let sink = Arc::new(RejectingSink::default());
        let mut serializer =
            Serializer::new(sink.clone(), "{uid}-", EncodingOptions::default()).unwrap();
        serializer.start(doc(json!({"uid": "u1"}))).unwrap();

        let err = serializer.stop(doc(json!({"exit_status": "success"}))).unwrap_err();
        assert!(matches!(err, ExportError::Encoding(ref e) if e.is_io()));
        let handle = sink.opened.lock()[0].clone();
        assert!(!handle.is_closed());

        serializer.close().unwrap();
        assert!(handle.is_closed());
    }

    #[test]
    fn test_dropping_serializer_closes_a_failed_write() {
        let sink = Arc::new(RejectingSink::default());
        {
            let mut serializer =
                Serializer::new(sink.clone(), "{uid}-", EncodingOptions::default()).unwrap();
            serializer.start(doc(json!({"uid": "u1"}))).unwrap();
            assert!(serializer.stop(doc(json!({}))).is_err());
        }
        assert!(sink.opened.lock().iter().all(SinkHandle::is_closed));
    }

    #[test]
    fn test_close_is_idempotent_on_empty_run() {
        let (sink, mut serializer) = memory_serializer("{uid}-");
        serializer.close().unwrap();
        serializer.close().unwrap();
        assert!(serializer.artifacts().is_empty());
        assert!(sink.artifacts().is_empty());
    }

    #[test]
    fn test_encoding_options_are_applied() {
        let sink = Arc::new(MemoryBufferSink::new());
        let mut serializer = Serializer::new(
            sink.clone(),
            "",
            EncodingOptions::pretty(2).with_sort_keys(true),
        )
        .unwrap();
        serializer.start(doc(json!({"uid": "u1", "b": 1, "a": 2}))).unwrap();
        serializer.stop(doc(json!({"uid": "s1"}))).unwrap();

        let text = sink.contents_string("meta.json").unwrap();
        let expected = "{\n  \"metadata\": {\n    \"descriptors\": {},\n    \"start\": {\n      \"a\": 2,\n      \"b\": 1,\n      \"uid\": \"u1\"\n    },\n    \"stop\": {\n      \"uid\": \"s1\"\n    }\n  }\n}";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_events_do_not_touch_the_tree() {
        let (_sink, mut serializer) = memory_serializer("");
        serializer
            .route(DocumentKind::Event, doc(json!({"uid": "e1", "data": {"x": 1}})))
            .unwrap();
        assert_eq!(serializer.metadata(), &RunMetadata::new());
    }

    #[test]
    #[traced_test]
    fn test_written_file_is_logged() {
        let (_sink, mut serializer) = memory_serializer("{uid}-");
        serializer.start(doc(json!({"uid": "u1"}))).unwrap();
        serializer
            .descriptor(doc(json!({"name": "primary", "uid": "d1"})))
            .unwrap();
        serializer.stop(doc(json!({"exit_status": "success"}))).unwrap();

        assert!(logs_contain("rendered file prefix"));
        assert!(logs_contain("wrote run metadata"));
        assert!(logs_contain("u1-meta.json"));
    }
}
