// Streaming delta applier.
//
// DeltaApplier replays a delta against a tree of extracted old files:
//   - The magic header is checked before the decompressor is created
//   - One operation is read and executed per iteration
//   - Output is streamed to the sink; memory stays bounded by BUF_SIZE
//   - At most one old file is open; it is released on every exit path

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use log::{debug, trace};
use zstd::stream::read::Decoder as ZstdDecoder;

use crate::format::header::{self, DELTA_MAGIC};
use crate::format::op::{MAX_NAME_LEN, OpHeader, OpHeaderError, OpKind};

/// Scratch buffer size for streaming payloads and old-file reads.
pub(crate) const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Broad category of an apply failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad header, unknown tag, truncated varint or payload.
    Format,
    /// An operation that needs an open old file arrived without one.
    Referential,
    /// Old file unavailable, or I/O on the old tree or output failed.
    Resource,
    /// The compressed stream is malformed.
    Compressor,
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("invalid delta header: expected {:02x?}, found {found:02x?}", DELTA_MAGIC)]
    BadMagic { found: Vec<u8> },
    #[error("unrecognized delta operation {tag}")]
    UnknownOp { tag: u8 },
    #[error("truncated {op} operation")]
    Truncated { op: OpKind },
    #[error("malformed varint in {op} operation")]
    BadVarint { op: OpKind },
    #[error("Open carries a {len} byte file name, longer than the {} byte limit", MAX_NAME_LEN)]
    NameTooLong { len: u64 },
    #[error("no current file for {op} operation")]
    NoCurrentFile { op: OpKind },
    #[error("cannot open old file {name}: {source}")]
    MissingFile { name: String, source: io::Error },
    #[error("old file {name} ended during {op} of {len} bytes")]
    ShortOldFile { name: String, op: OpKind, len: u64 },
    #[error("decompression failed: {0}")]
    Decompress(io::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ApplyError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::BadMagic { .. }
            | Self::UnknownOp { .. }
            | Self::Truncated { .. }
            | Self::BadVarint { .. }
            | Self::NameTooLong { .. } => ErrorClass::Format,
            Self::NoCurrentFile { .. } => ErrorClass::Referential,
            Self::MissingFile { .. } | Self::ShortOldFile { .. } | Self::Io(_) => {
                ErrorClass::Resource
            }
            Self::Decompress(_) => ErrorClass::Compressor,
        }
    }

    /// Map a failed read of the operation stream while inside `op`.
    pub(crate) fn from_stream(op: OpKind, e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated { op }
        } else {
            Self::Decompress(e)
        }
    }
}

impl From<OpHeaderError> for ApplyError {
    fn from(e: OpHeaderError) -> Self {
        match e {
            OpHeaderError::UnknownTag(tag) => Self::UnknownOp { tag },
            OpHeaderError::Truncated(op) => Self::Truncated { op },
            OpHeaderError::BadVarint(op) => Self::BadVarint { op },
            OpHeaderError::Io(e) => Self::Decompress(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Old-file tree
// ---------------------------------------------------------------------------

/// Opens old files by the name carried in an Open operation.
pub trait SourceTree {
    type File: Read + Seek;

    /// Open `name` for reading, positioned at offset 0.
    fn open(&self, name: &[u8]) -> io::Result<Self::File>;
}

impl<T: SourceTree + ?Sized> SourceTree for &T {
    type File = T::File;

    fn open(&self, name: &[u8]) -> io::Result<Self::File> {
        (**self).open(name)
    }
}

/// Old files extracted under a root directory. Access is read-only.
#[derive(Debug, Clone)]
pub struct DirTree {
    root: PathBuf,
}

impl DirTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an Open name against the root.
    ///
    /// A leading `/` is treated as relative to the root; `..` components
    /// are rejected so the result never leaves the root.
    pub fn resolve(&self, name: &[u8]) -> io::Result<PathBuf> {
        let relative = name_to_path(name)?;
        let mut path = self.root.clone();
        for component in relative.components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir | Component::RootDir => {}
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "path escapes the extraction root",
                    ));
                }
            }
        }
        Ok(path)
    }
}

impl SourceTree for DirTree {
    type File = BufReader<File>;

    fn open(&self, name: &[u8]) -> io::Result<Self::File> {
        let path = self.resolve(name)?;
        let file = File::open(&path)?;
        Ok(BufReader::with_capacity(BUF_SIZE, file))
    }
}

#[cfg(unix)]
fn name_to_path(name: &[u8]) -> io::Result<&Path> {
    use std::os::unix::ffi::OsStrExt;
    Ok(Path::new(std::ffi::OsStr::from_bytes(name)))
}

#[cfg(not(unix))]
fn name_to_path(name: &[u8]) -> io::Result<&Path> {
    std::str::from_utf8(name)
        .map(Path::new)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
}

/// In-memory old files, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct MemoryTree {
    files: HashMap<Vec<u8>, Arc<[u8]>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) -> &mut Self {
        self.files
            .insert(name.as_ref().to_vec(), Arc::from(data.into()));
        self
    }

    pub fn with_file(mut self, name: impl AsRef<[u8]>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }

    pub fn get(&self, name: &[u8]) -> Option<&[u8]> {
        self.files.get(name).map(|data| &data[..])
    }
}

impl SourceTree for MemoryTree {
    type File = Cursor<Arc<[u8]>>;

    fn open(&self, name: &[u8]) -> io::Result<Self::File> {
        self.files
            .get(name)
            .map(|data| Cursor::new(Arc::clone(data)))
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such old file"))
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters gathered while applying a delta.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    /// Operations executed, indexed by tag value.
    pub ops: [u64; 5],
    /// Total bytes written to the output sink.
    pub bytes_written: u64,
    pub literal_bytes: u64,
    pub copied_bytes: u64,
    pub add_bytes: u64,
}

impl ApplyStats {
    pub fn op_count(&self, kind: OpKind) -> u64 {
        self.ops[kind as usize]
    }
}

// ---------------------------------------------------------------------------
// DeltaApplier
// ---------------------------------------------------------------------------

struct CurrentFile<F> {
    name: Vec<u8>,
    file: F,
}

impl<F> CurrentFile<F> {
    fn display_name(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Applies deltas against one old-file tree.
pub struct DeltaApplier<T: SourceTree> {
    tree: T,
    current: Option<CurrentFile<T::File>>,
    buf: Vec<u8>,
    old_buf: Vec<u8>,
    stats: ApplyStats,
}

impl<T: SourceTree> DeltaApplier<T> {
    pub fn new(tree: T) -> Self {
        Self {
            tree,
            current: None,
            buf: vec![0u8; BUF_SIZE],
            old_buf: Vec::new(),
            stats: ApplyStats::default(),
        }
    }

    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// Apply one delta, streaming the reconstructed bytes to `dst`.
    ///
    /// On error, whatever was already written to `dst` is incomplete. The
    /// open old file, if any, is released before returning either way.
    pub fn apply<R: Read, W: Write + ?Sized>(
        &mut self,
        delta: R,
        dst: &mut W,
    ) -> Result<ApplyStats, ApplyError> {
        self.stats = ApplyStats::default();
        let result = self.run(delta, dst);
        if let Some(current) = self.current.take() {
            debug!("release {}", current.display_name());
        }
        match result {
            Ok(()) => {
                debug!(
                    "delta applied: {} ops, {} bytes written",
                    self.stats.ops.iter().sum::<u64>(),
                    self.stats.bytes_written
                );
                Ok(self.stats.clone())
            }
            Err(e) => {
                debug!("delta apply failed: {e}");
                Err(e)
            }
        }
    }

    fn run<R: Read, W: Write + ?Sized>(&mut self, mut delta: R, dst: &mut W) -> Result<(), ApplyError> {
        if let Err(found) = header::read_header(&mut delta)? {
            return Err(ApplyError::BadMagic { found });
        }
        let decoder = ZstdDecoder::new(delta).map_err(ApplyError::Decompress)?;
        let mut stream = BufReader::with_capacity(BUF_SIZE, decoder);

        while let Some(op) = OpHeader::read(&mut stream)? {
            trace!("op {} {}", op.kind, op.value);
            match op.kind {
                OpKind::Data => self.data(&mut stream, dst, op.value)?,
                OpKind::Open => self.open(&mut stream, op.value)?,
                OpKind::Copy => self.copy(dst, op.value)?,
                OpKind::AddData => self.add_data(&mut stream, dst, op.value)?,
                OpKind::Seek => self.seek(op.value)?,
            }
            self.stats.ops[op.kind as usize] += 1;
        }
        Ok(())
    }

    fn current(&mut self, op: OpKind) -> Result<&mut CurrentFile<T::File>, ApplyError> {
        self.current
            .as_mut()
            .ok_or(ApplyError::NoCurrentFile { op })
    }

    fn data<R: Read, W: Write + ?Sized>(
        &mut self,
        stream: &mut R,
        dst: &mut W,
        size: u64,
    ) -> Result<(), ApplyError> {
        let mut remaining = size;
        while remaining > 0 {
            let n = chunk_len(remaining, self.buf.len());
            stream
                .read_exact(&mut self.buf[..n])
                .map_err(|e| ApplyError::from_stream(OpKind::Data, e))?;
            dst.write_all(&self.buf[..n])?;
            remaining -= n as u64;
        }
        self.stats.literal_bytes += size;
        self.stats.bytes_written += size;
        Ok(())
    }

    fn open<R: Read>(&mut self, stream: &mut R, size: u64) -> Result<(), ApplyError> {
        if size > MAX_NAME_LEN {
            return Err(ApplyError::NameTooLong { len: size });
        }
        let mut name = vec![0u8; size as usize];
        stream
            .read_exact(&mut name)
            .map_err(|e| ApplyError::from_stream(OpKind::Open, e))?;

        if let Some(previous) = self.current.take() {
            trace!("release {}", previous.display_name());
        }
        let file = self
            .tree
            .open(&name)
            .map_err(|source| ApplyError::MissingFile {
                name: String::from_utf8_lossy(&name).into_owned(),
                source,
            })?;
        debug!("open {}", String::from_utf8_lossy(&name));
        self.current = Some(CurrentFile { name, file });
        Ok(())
    }

    fn copy<W: Write + ?Sized>(&mut self, dst: &mut W, size: u64) -> Result<(), ApplyError> {
        let current = self
            .current
            .as_mut()
            .ok_or(ApplyError::NoCurrentFile { op: OpKind::Copy })?;
        let mut remaining = size;
        while remaining > 0 {
            let n = chunk_len(remaining, self.buf.len());
            read_old(current, &mut self.buf[..n], OpKind::Copy, size)?;
            dst.write_all(&self.buf[..n])?;
            remaining -= n as u64;
        }
        self.stats.copied_bytes += size;
        self.stats.bytes_written += size;
        Ok(())
    }

    fn add_data<R: Read, W: Write + ?Sized>(
        &mut self,
        stream: &mut R,
        dst: &mut W,
        size: u64,
    ) -> Result<(), ApplyError> {
        let current = self
            .current
            .as_mut()
            .ok_or(ApplyError::NoCurrentFile { op: OpKind::AddData })?;
        if self.old_buf.len() < self.buf.len() {
            self.old_buf.resize(self.buf.len(), 0);
        }
        let mut remaining = size;
        while remaining > 0 {
            let n = chunk_len(remaining, self.buf.len());
            let add = &mut self.buf[..n];
            let old = &mut self.old_buf[..n];
            stream
                .read_exact(add)
                .map_err(|e| ApplyError::from_stream(OpKind::AddData, e))?;
            read_old(current, old, OpKind::AddData, size)?;
            for (a, o) in add.iter_mut().zip(old.iter()) {
                *a = a.wrapping_add(*o);
            }
            dst.write_all(add)?;
            remaining -= n as u64;
        }
        self.stats.add_bytes += size;
        self.stats.bytes_written += size;
        Ok(())
    }

    fn seek(&mut self, pos: u64) -> Result<(), ApplyError> {
        let current = self.current(OpKind::Seek)?;
        current.file.seek(SeekFrom::Start(pos))?;
        Ok(())
    }
}

#[inline]
fn chunk_len(remaining: u64, cap: usize) -> usize {
    remaining.min(cap as u64) as usize
}

fn read_old<F: Read>(
    current: &mut CurrentFile<F>,
    buf: &mut [u8],
    op: OpKind,
    len: u64,
) -> Result<(), ApplyError> {
    current.file.read_exact(buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ApplyError::ShortOldFile {
                name: current.display_name(),
                op,
                len,
            }
        } else {
            ApplyError::Io(e)
        }
    })
}

// ---------------------------------------------------------------------------
// Convenience functions
// ---------------------------------------------------------------------------

/// Apply `delta` against the files extracted under `extraction_root`.
pub fn apply_delta<R: Read, W: Write + ?Sized>(
    delta: R,
    extraction_root: impl AsRef<Path>,
    dst: &mut W,
) -> Result<ApplyStats, ApplyError> {
    DeltaApplier::new(DirTree::new(extraction_root.as_ref())).apply(delta, dst)
}

/// Apply an in-memory delta and collect the output.
pub fn apply_to_vec<T: SourceTree>(delta: &[u8], tree: T) -> Result<Vec<u8>, ApplyError> {
    let mut out = Vec::new();
    DeltaApplier::new(tree).apply(delta, &mut out)?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
