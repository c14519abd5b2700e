//! One-call export of a document stream.
//!
//! [`export`] drives a [`Serializer`] over an iterator of `(kind, document)`
//! pairs and returns the artifacts it produced. The serializer is closed after
//! the loop whether the stream ran to completion or an error cut it short.
//!
//! # Example
//!
//! ```rust
//! use daq_json_metadata::{export, Document, EncodingOptions};
//!
//! let dir = tempfile::tempdir()?;
//! let documents = vec![
//!     ("start", Document::new().with("uid", "u1").with("plan_name", "count")),
//!     ("descriptor", Document::new().with("name", "primary").with("uid", "d1")),
//!     ("event", Document::new().with("uid", "e1")),
//!     ("stop", Document::new().with("run_start", "u1").with("exit_status", "success")),
//! ];
//!
//! let artifacts = export(documents, dir.path(), "{plan_name}-", EncodingOptions::default())?;
//! assert_eq!(artifacts["run_metadata"], vec![dir.path().join("count-meta.json")]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::data::encode::EncodingOptions;
use crate::data::sink::{Artifacts, MultiFileSink, OutputSink};
use crate::error::{ExportError, ExportResult};
use crate::experiment::{Document, DocumentKind, DocumentRouter};
use crate::serializer::Serializer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where exported artifacts go: a directory, or any shared sink.
#[derive(Clone)]
pub enum Destination {
    /// Files under this directory, through a fresh [`MultiFileSink`].
    Directory(PathBuf),
    /// A sink owned by the caller, possibly shared across runs.
    Sink(Arc<dyn OutputSink>),
}

impl Destination {
    /// The sink artifacts are opened on.
    pub fn into_sink(self) -> Arc<dyn OutputSink> {
        match self {
            Destination::Directory(directory) => Arc::new(MultiFileSink::new(directory)),
            Destination::Sink(sink) => sink,
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Directory(path) => f.debug_tuple("Directory").field(path).finish(),
            Destination::Sink(_) => f.write_str("Sink(..)"),
        }
    }
}

impl From<PathBuf> for Destination {
    fn from(path: PathBuf) -> Self {
        Destination::Directory(path)
    }
}

impl From<&Path> for Destination {
    fn from(path: &Path) -> Self {
        Destination::Directory(path.to_path_buf())
    }
}

impl From<&PathBuf> for Destination {
    fn from(path: &PathBuf) -> Self {
        Destination::Directory(path.clone())
    }
}

impl From<&str> for Destination {
    fn from(path: &str) -> Self {
        Destination::Directory(PathBuf::from(path))
    }
}

impl From<Arc<dyn OutputSink>> for Destination {
    fn from(sink: Arc<dyn OutputSink>) -> Self {
        Destination::Sink(sink)
    }
}

impl<S: OutputSink + 'static> From<Arc<S>> for Destination {
    fn from(sink: Arc<S>) -> Self {
        Destination::Sink(sink)
    }
}

/// Export the metadata of `documents` to `<destination>/<file_prefix>meta.json`.
///
/// Unknown document kinds are skipped. Returns the artifacts produced, keyed
/// by label.
pub fn export<I, K>(
    documents: I,
    destination: impl Into<Destination>,
    file_prefix: &str,
    options: EncodingOptions,
) -> ExportResult<Artifacts>
where
    I: IntoIterator<Item = (K, Document)>,
    K: AsRef<str>,
{
    try_export(
        documents.into_iter().map(Ok::<_, ExportError>),
        destination,
        file_prefix,
        options,
    )
}

/// Like [`export`], for sources that can fail while producing documents.
///
/// A source error stops the export; the serializer is still closed and the
/// source error is returned.
pub fn try_export<I, K, E>(
    documents: I,
    destination: impl Into<Destination>,
    file_prefix: &str,
    options: EncodingOptions,
) -> ExportResult<Artifacts>
where
    I: IntoIterator<Item = Result<(K, Document), E>>,
    K: AsRef<str>,
    E: Into<ExportError>,
{
    let mut serializer = Serializer::new(destination, file_prefix, options)?;

    let fed = feed(&mut serializer, documents);
    let closed = serializer.close();
    fed?;
    closed?;

    Ok(serializer.artifacts())
}

fn feed<I, K, E>(serializer: &mut Serializer, documents: I) -> ExportResult<()>
where
    I: IntoIterator<Item = Result<(K, Document), E>>,
    K: AsRef<str>,
    E: Into<ExportError>,
{
    for item in documents {
        let (kind, doc) = item.map_err(Into::into)?;
        match kind.as_ref().parse::<DocumentKind>() {
            Ok(kind) => serializer.route(kind, doc)?,
            Err(unknown) => debug!("skipping document: {unknown}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sink::MemoryBufferSink;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::try_from(value).unwrap()
    }

    #[test]
    fn test_unknown_kinds_are_skipped() {
        let sink = Arc::new(MemoryBufferSink::new());
        let documents = vec![
            ("start", doc(json!({"uid": "u1"}))),
            ("bulk_events", doc(json!({"uid": "b1"}))),
            ("stop", doc(json!({"uid": "s1"}))),
        ];
        let artifacts = export(documents, sink.clone(), "{uid}-", EncodingOptions::default()).unwrap();
        assert_eq!(artifacts[crate::RUN_METADATA_LABEL].len(), 1);
        assert!(sink.contents("u1-meta.json").is_some());
    }

    #[test]
    fn test_source_error_stops_the_export() {
        let sink = Arc::new(MemoryBufferSink::new());
        let documents: Vec<Result<(&str, Document), ExportError>> = vec![
            Ok(("start", doc(json!({"uid": "u1"})))),
            Err(ExportError::from_source("stream interrupted")),
            Ok(("stop", doc(json!({"uid": "s1"})))),
        ];
        let err = try_export(documents, sink.clone(), "{uid}-", EncodingOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExportError::Source(_)));
        assert!(sink.artifacts().is_empty());
    }

    #[test]
    fn test_bad_template_fails_before_reading_documents() {
        let mut pulled = 0;
        let documents = std::iter::from_fn(|| {
            pulled += 1;
            None::<(&str, Document)>
        });
        let err = export(documents, Arc::new(MemoryBufferSink::new()), "{uid", EncodingOptions::default())
            .unwrap_err();
        assert!(matches!(err, ExportError::Template(_)));
        assert_eq!(pulled, 0);
    }

    #[test]
    fn test_destination_conversions() {
        assert!(matches!(Destination::from("out"), Destination::Directory(_)));
        assert!(matches!(
            Destination::from(Path::new("out")),
            Destination::Directory(_)
        ));
        let shared: Arc<dyn OutputSink> = Arc::new(MemoryBufferSink::new());
        assert!(matches!(Destination::from(shared), Destination::Sink(_)));
    }
}
