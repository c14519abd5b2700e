//! Core library for exporting run metadata.
//!
//! This library consumes the document stream of one acquisition run (a start
//! document, any number of stream descriptors, a stop document, plus event and
//! asset documents it ignores) and writes the run's metadata as a single JSON
//! file once the run completes. It is used by the `daq-json-metadata` binary
//! and can be embedded wherever a run's documents are available.
//!
//! - [`experiment`]: documents, values and routing
//! - [`data`]: sanitizing, encoding and output sinks
//! - [`serializer`]: the per-run accumulator
//! - [`export`]: the one-call driver

pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod export;
pub mod metadata;
pub mod serializer;
pub mod template;

pub use data::encode::{EncodingOptions, Separators};
pub use data::sanitize::{sanitize_document, sanitize_value, TypeHook};
pub use data::sink::{
    Artifacts, MemoryBufferSink, MultiFileSink, OpenMode, OutputSink, SinkHandle,
};
pub use error::{ExportError, ExportResult, TemplateError};
pub use experiment::{Document, DocumentKind, DocumentRouter};
pub use export::{export, try_export, Destination};
pub use metadata::RunMetadata;
pub use serializer::{Serializer, METADATA_FILE_SUFFIX, RUN_METADATA_LABEL};
pub use template::{FilenameTemplate, DEFAULT_FILE_PREFIX};
