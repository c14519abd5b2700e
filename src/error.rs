//! Custom error types for the metadata exporter.
//!
//! `ExportError` is the single error type returned by every fallible operation
//! in the library. It is built with `thiserror` and groups failures into the
//! categories a caller needs to tell apart:
//!
//! - **Usage errors** (`DuplicateStart`, `DuplicateStop`, `StopBeforeStart`):
//!   one serializer handles exactly one run, in order.
//! - **Templating errors** (`Template`): the file prefix could not be rendered
//!   against the start document. See [`TemplateError`].
//! - **Collision errors** (`Collision`): the target file already exists and
//!   exclusive creation refused to overwrite it.
//! - **Encoding errors** (`Unrepresentable`, `ShapeMismatch`, `Encoding`): a
//!   value cannot be expressed as JSON.
//! - **I/O and source errors** (`Io`, `Source`): the sink or the document
//!   source failed underneath us.
//!
//! With `#[from]`, the lower-level errors convert through `?`.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the exporter error type.
pub type ExportResult<T> = std::result::Result<T, ExportError>;

/// Every failure the exporter can report.
#[derive(Error, Debug)]
pub enum ExportError {
    /// A second `start` arrived; the serializer handles one run.
    #[error(
        "The serializer expects documents from one run only. \
         Two `start` documents were sent to it (first run uid: {first_uid})"
    )]
    DuplicateStart {
        /// uid of the run already in progress
        first_uid: String,
    },

    /// The metadata file was already written.
    #[error("A second `stop` document was received; the run metadata was already written")]
    DuplicateStop,

    /// `stop` arrived with no file prefix rendered yet.
    #[error("A `stop` document was received before any `start` document")]
    StopBeforeStart,

    /// A required field such as a descriptor's `uid` is absent.
    #[error("{kind} document is missing required field '{field}'")]
    MissingField {
        /// Document kind, e.g. `descriptor`.
        kind: String,
        /// The absent field.
        field: String,
    },

    /// Input that is not a JSON object, or has a malformed field.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// The file prefix could not be parsed or rendered.
    #[error("File prefix template error: {0}")]
    Template(#[from] TemplateError),

    /// Exclusive creation found an existing file.
    #[error("Refusing to overwrite existing output '{}'", path.display())]
    Collision {
        /// Path the sink refused to create.
        path: PathBuf,
    },

    /// The rendered filename is absolute or escapes the sink's directory.
    #[error("Invalid output filename '{filename}': {reason}")]
    InvalidFilename {
        /// Filename as rendered.
        filename: String,
        /// Why it was refused.
        reason: String,
    },

    /// A value JSON cannot express, such as `NaN`, with no type hook to map it.
    #[error("Value is not representable as JSON: {0}")]
    Unrepresentable(String),

    /// An array's shape does not match its buffer length.
    #[error("Array shape {shape:?} holds {expected} elements but the buffer has {actual}")]
    ShapeMismatch {
        /// Declared shape.
        shape: Vec<usize>,
        /// Product of `shape`.
        expected: usize,
        /// Buffer length.
        actual: usize,
    },

    /// Serialization failed, including write errors from the sink's writer.
    #[error("JSON encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Opening, flushing or closing an output failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document source failed while producing a document.
    #[error("Document source error: {0}")]
    Source(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ExportError {
    /// Wrap a failure raised by the document source (reader, decoder, ...).
    pub fn from_source<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        ExportError::Source(err.into())
    }

    /// True for errors caused by calling the serializer out of protocol order.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ExportError::DuplicateStart { .. }
                | ExportError::DuplicateStop
                | ExportError::StopBeforeStart
        )
    }
}

/// Errors raised while parsing or rendering a file prefix template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)] // field names say it all
pub enum TemplateError {
    /// A `{` or `}` with no partner.
    #[error("unmatched '{brace}' at position {position} in '{template}'")]
    UnmatchedBrace {
        template: String,
        brace: char,
        position: usize,
    },

    /// Positional fields such as `{}` or `{0}`, and nested specs.
    #[error("unsupported replacement field '{{{field}}}': {reason}")]
    UnsupportedField { field: String, reason: String },

    /// The start document has no value at the field's path.
    #[error("start document has no field '{field}'")]
    UnknownField { field: String },

    /// Anything other than `!s` or `!r`.
    #[error("unknown conversion '!{conversion}' in field '{field}'")]
    InvalidConversion { field: String, conversion: String },

    /// A spec that does not parse, or does not fit the value's type.
    #[error("invalid format spec '{spec}' for field '{field}': {reason}")]
    InvalidFormatSpec {
        field: String,
        spec: String,
        reason: String,
    },
}
