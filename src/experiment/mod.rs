//! Run documents and how they are routed.
//!
//! # Architecture (Bluesky-inspired)
//!
//! - **Documents**: schemaless start / descriptor / event / stop records
//! - **Values**: JSON-like values plus typed numeric scalars and arrays
//! - **Router**: per-kind dispatch with a default no-op for every kind
//!
//! # Example
//!
//! ```rust
//! use daq_json_metadata::experiment::{Document, DocumentKind, DocumentRouter};
//!
//! struct CountStarts(usize);
//!
//! impl DocumentRouter for CountStarts {
//!     fn start(&mut self, _doc: Document) -> daq_json_metadata::ExportResult<()> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut counter = CountStarts(0);
//! counter.route(DocumentKind::Start, Document::run_start("count")).unwrap();
//! counter.route(DocumentKind::Event, Document::new()).unwrap();
//! assert_eq!(counter.0, 1);
//! ```

pub mod document;
pub mod router;
pub mod value;

pub use document::{new_uid, now_secs, Document, DocumentKind, UnknownKind};
pub use router::DocumentRouter;
pub use value::{ArrayData, DocValue, NdArray, Scalar, ValueMap};
