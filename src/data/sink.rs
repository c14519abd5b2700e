//! Output sinks: where serialized artifacts are written.
//!
//! A sink turns a logical artifact label plus a filename into a writable
//! [`SinkHandle`], remembers every name it produced (grouped by label), and can
//! release every handle it handed out. Two sinks are provided:
//!
//! - [`MultiFileSink`]: files under a directory on disk
//! - [`MemoryBufferSink`]: named in-memory buffers, for tests and for callers
//!   that ship the bytes somewhere else
//!
//! Sinks take `&self` and guard their bookkeeping with a mutex, so one sink can
//! be shared (`Arc<dyn OutputSink>`) by several serializers.

use crate::error::{ExportError, ExportResult};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Produced artifact names grouped by logical label.
pub type Artifacts = IndexMap<String, Vec<PathBuf>>;

/// How a sink should open the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new target, failing with a collision if it already exists
    CreateNew,
    /// Create or truncate
    Truncate,
    /// Create or append
    Append,
}

/// Shared, closable writer handed out by a sink.
///
/// Clones refer to the same underlying writer. Once closed (by the owner or by
/// the sink) further writes fail and further closes are no-ops.
#[derive(Clone)]
pub struct SinkHandle {
    path: PathBuf,
    inner: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
}

impl SinkHandle {
    /// Wrap an open writer for `path`.
    pub fn new(path: PathBuf, writer: Box<dyn Write + Send>) -> Self {
        Self {
            path,
            inner: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Path relative to the sink, as recorded in its artifacts.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once any clone of this handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Flush and release the underlying writer.
    pub fn close(&self) -> io::Result<()> {
        if let Some(mut writer) = self.inner.lock().take() {
            writer.flush()?;
            debug!(path = %self.path.display(), "closed sink handle");
        }
        Ok(())
    }
}

impl std::fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHandle")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Write for SinkHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.lock().as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("write to closed handle '{}'", self.path.display()),
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.lock().as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Destination for serialized artifacts.
pub trait OutputSink: Send + Sync {
    /// Open `filename` for writing and record it under `label`.
    fn open(&self, label: &str, filename: &str, mode: OpenMode) -> ExportResult<SinkHandle>;

    /// Release every handle this sink has opened.
    fn close(&self) -> ExportResult<()>;

    /// Snapshot of everything produced so far, grouped by label.
    fn artifacts(&self) -> Artifacts;
}

/// Artifact and handle bookkeeping shared by the sink implementations.
#[derive(Default)]
struct Ledger {
    artifacts: Artifacts,
    handles: Vec<SinkHandle>,
}

impl Ledger {
    /// Remember `handle` under `label`. Handles already closed by their owner
    /// are dropped from the list; their artifact names are kept.
    fn record(&mut self, label: &str, handle: &SinkHandle) {
        self.handles.retain(|open| !open.is_closed());
        self.artifacts
            .entry(label.to_string())
            .or_default()
            .push(handle.path().to_path_buf());
        self.handles.push(handle.clone());
    }

    fn close_all(&mut self) -> ExportResult<()> {
        let mut first_err = None;
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

/// Reject absolute names and names that escape the sink's root.
fn check_relative(filename: &str) -> ExportResult<&Path> {
    let path = Path::new(filename);
    let invalid = |reason: &str| ExportError::InvalidFilename {
        filename: filename.to_string(),
        reason: reason.to_string(),
    };
    if filename.is_empty() {
        return Err(invalid("name is empty"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => return Err(invalid("must be relative")),
        }
    }
    Ok(path)
}

/// Writes each artifact as a file under a root directory.
pub struct MultiFileSink {
    directory: PathBuf,
    ledger: Mutex<Ledger>,
}

impl MultiFileSink {
    /// Sink rooted at `directory`. The directory is created on first open; an
    /// empty path means the current working directory.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ledger: Mutex::new(Ledger::default()),
        }
    }

    /// Root directory that every filename is resolved against.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl OutputSink for MultiFileSink {
    fn open(&self, label: &str, filename: &str, mode: OpenMode) -> ExportResult<SinkHandle> {
        let relative = check_relative(filename)?;
        let path = self.directory.join(relative);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut options = OpenOptions::new();
        match mode {
            OpenMode::CreateNew => options.write(true).create_new(true),
            OpenMode::Truncate => options.write(true).create(true).truncate(true),
            OpenMode::Append => options.append(true).create(true),
        };
        let file = options.open(&path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => ExportError::Collision { path: path.clone() },
            _ => ExportError::Io(e),
        })?;

        let handle = SinkHandle::new(path, Box::new(BufWriter::new(file)));
        self.ledger.lock().record(label, &handle);
        debug!(label, path = %handle.path().display(), ?mode, "opened file");
        Ok(handle)
    }

    fn close(&self) -> ExportResult<()> {
        self.ledger.lock().close_all()
    }

    fn artifacts(&self) -> Artifacts {
        self.ledger.lock().artifacts.clone()
    }
}

type SharedBuffer = Arc<Mutex<Vec<u8>>>;

/// `Write` adapter appending into a shared buffer.
struct BufferWriter(SharedBuffer);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each artifact into a named in-memory buffer.
#[derive(Default)]
pub struct MemoryBufferSink {
    buffers: Mutex<IndexMap<PathBuf, SharedBuffer>>,
    ledger: Mutex<Ledger>,
}

impl MemoryBufferSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far to the buffer named `path`.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.buffers
            .lock()
            .get(path.as_ref())
            .map(|buffer| buffer.lock().clone())
    }

    /// Like [`contents`](Self::contents), decoded as UTF-8.
    pub fn contents_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.contents(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl OutputSink for MemoryBufferSink {
    fn open(&self, label: &str, filename: &str, mode: OpenMode) -> ExportResult<SinkHandle> {
        let path = check_relative(filename)?.to_path_buf();
        let buffer = {
            let mut buffers = self.buffers.lock();
            match (buffers.get(&path).cloned(), mode) {
                (Some(_), OpenMode::CreateNew) => return Err(ExportError::Collision { path }),
                (Some(existing), OpenMode::Truncate) => {
                    existing.lock().clear();
                    existing
                }
                (Some(existing), OpenMode::Append) => existing,
                (None, _) => buffers.entry(path.clone()).or_default().clone(),
            }
        };

        let handle = SinkHandle::new(path, Box::new(BufferWriter(buffer)));
        self.ledger.lock().record(label, &handle);
        Ok(handle)
    }

    fn close(&self) -> ExportResult<()> {
        self.ledger.lock().close_all()
    }

    fn artifacts(&self) -> Artifacts {
        self.ledger.lock().artifacts.clone()
    }
}
