//! Document model for a run's metadata stream.
//!
//! Implements the Bluesky-style document model. A run is described by:
//!
//! - **start**: experiment intent and metadata, carries the run `uid`
//! - **descriptor**: schema for one data stream, identified by `name` and `uid`
//! - **event** / **event_page**: measurements (ignored by the metadata exporter)
//! - **resource** / **datum** / **datum_page**: external asset references (ignored)
//! - **stop**: completion status
//!
//! # Document Flow
//!
//! ```text
//! start (1)
//!    │
//!    ├── descriptor (0+, one or more per data stream)
//!    │       │
//!    │       └── event (N, measurements)
//!    │
//! stop (1)
//! ```
//!
//! Documents are schemaless here: a [`Document`] is an ordered string-keyed
//! mapping of [`DocValue`]s. No validation is performed beyond what the
//! exporter needs to route and file a document.

use super::value::{DocValue, ValueMap};
use crate::error::{ExportError, ExportResult};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Generate a new unique document ID
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current time in (fractional) seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// The kind of a document, as named in a `(kind, document)` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Opens a run; carries its `uid` and plan metadata.
    Start,
    /// Declares one event stream.
    Descriptor,
    /// One row of readings.
    Event,
    /// A batch of events in columnar form.
    EventPage,
    /// Pointer to externally stored data.
    Resource,
    /// Reference into a resource.
    Datum,
    /// Batch of datums.
    DatumPage,
    /// Closes a run.
    Stop,
}

impl DocumentKind {
    /// Name as it appears in a stream, e.g. `event_page`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Start => "start",
            DocumentKind::Descriptor => "descriptor",
            DocumentKind::Event => "event",
            DocumentKind::EventPage => "event_page",
            DocumentKind::Resource => "resource",
            DocumentKind::Datum => "datum",
            DocumentKind::DatumPage => "datum_page",
            DocumentKind::Stop => "stop",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stream names a document kind this crate does not know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownKind(
    /// The unrecognised name.
    pub String,
);

impl fmt::Display for UnknownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown document kind '{}'", self.0)
    }
}

impl std::error::Error for UnknownKind {}

impl FromStr for DocumentKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "start" => DocumentKind::Start,
            "descriptor" => DocumentKind::Descriptor,
            "event" => DocumentKind::Event,
            "event_page" => DocumentKind::EventPage,
            "resource" => DocumentKind::Resource,
            "datum" => DocumentKind::Datum,
            "datum_page" => DocumentKind::DatumPage,
            "stop" => DocumentKind::Stop,
            other => return Err(UnknownKind(other.to_string())),
        })
    }
}

/// A single document: an ordered mapping from field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: ValueMap,
}

impl Document {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start document with a fresh `uid` and the current `time`.
    pub fn run_start(plan_name: &str) -> Self {
        Self::new()
            .with("uid", new_uid())
            .with("time", now_secs())
            .with("plan_name", plan_name)
    }

    /// Descriptor for stream `name` belonging to run `run_uid`.
    pub fn descriptor(run_uid: &str, name: &str) -> Self {
        Self::new()
            .with("uid", new_uid())
            .with("run_start", run_uid)
            .with("time", now_secs())
            .with("name", name)
            .with("data_keys", ValueMap::new())
    }

    /// Stop document closing run `run_uid` with the given exit status.
    pub fn run_stop(run_uid: &str, exit_status: &str) -> Self {
        Self::new()
            .with("uid", new_uid())
            .with("run_start", run_uid)
            .with("time", now_secs())
            .with("exit_status", exit_status)
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<DocValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Set `key`, returning the previous value.
    pub fn insert(&mut self, key: &str, value: impl Into<DocValue>) -> Option<DocValue> {
        self.fields.insert(key.to_string(), value.into())
    }

    /// Value of `key`, if present.
    pub fn get(&self, key: &str) -> Option<&DocValue> {
        self.fields.get(key)
    }

    /// The document's `uid` field, if it is a string.
    pub fn uid(&self) -> Option<&str> {
        self.get("uid").and_then(DocValue::as_str)
    }

    /// All fields, in insertion order.
    pub fn fields(&self) -> &ValueMap {
        &self.fields
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the document has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<ValueMap> for Document {
    fn from(fields: ValueMap) -> Self {
        Self { fields }
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for Document {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = ExportError;

    fn try_from(value: serde_json::Value) -> ExportResult<Self> {
        match value {
            serde_json::Value::Object(map) => Ok(map.into()),
            other => Err(ExportError::InvalidDocument(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }
}

impl From<Document> for DocValue {
    fn from(doc: Document) -> Self {
        DocValue::Map(doc.fields)
    }
}
