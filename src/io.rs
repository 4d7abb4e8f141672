// File-level I/O helpers for delta generation and application.
//
// Provides `diff_file()` and `apply_file()` convenience functions that
// wrap the encoder and applier with buffered I/O. Optionally computes
// streaming SHA-256 checksums (feature-gated behind `file-io`).

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;

use crate::delta::decoder::{ApplyError, DirTree, apply_delta};
use crate::delta::encoder::{DeltaOptions, DeltaWriter, EncodeError};
use crate::planner::{AlignedPlanner, DEFAULT_BLOCK_SIZE, PlanStats, Planner};

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics returned by `diff_file()`.
#[derive(Debug, Clone)]
pub struct DiffStats {
    /// Size of the reference old file (0 without one).
    pub old_size: u64,
    /// New file size in bytes.
    pub new_size: u64,
    /// Delta output size in bytes.
    pub delta_size: u64,
    /// How the new content was described.
    pub plan: PlanStats,
    /// Operations written to the delta.
    pub ops: u64,
    /// SHA-256 of the new file (if `file-io` feature is enabled).
    pub new_sha256: Option<[u8; 32]>,
}

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct ApplyFileStats {
    /// Delta file size in bytes.
    pub delta_size: u64,
    /// Reconstructed output size in bytes.
    pub output_size: u64,
    /// Operations executed.
    pub ops: u64,
    /// SHA-256 of the reconstructed output (if `file-io` feature is enabled).
    pub output_sha256: Option<[u8; 32]>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error type for file I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// I/O error (file open, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Delta generation error.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    /// Delta application error.
    #[error("apply error: {0}")]
    Apply(#[from] ApplyError),
}

// ---------------------------------------------------------------------------
// Default buffer size
// ---------------------------------------------------------------------------

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

// ---------------------------------------------------------------------------
// diff_file
// ---------------------------------------------------------------------------

/// Options for `diff_file()`.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub delta: DeltaOptions,
    /// Block size for the aligned planner.
    pub block_size: usize,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            delta: DeltaOptions::default(),
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Generate a delta describing `new_path` and write it to `delta_path`.
///
/// `reference` names an old file under `old_root`; it is read fully into
/// memory and the new file is planned against it with `AlignedPlanner`.
/// Without a reference the new file is stored as literal bytes.
pub fn diff_file(
    old_root: &Path,
    reference: Option<&str>,
    new_path: &Path,
    delta_path: &Path,
    opts: DiffOptions,
) -> Result<DiffStats, IoError> {
    let old = match reference {
        Some(name) => std::fs::read(DirTree::new(old_root).resolve(name.as_bytes())?)?,
        None => Vec::new(),
    };
    let old_size = old.len() as u64;

    let new_file = File::open(new_path)?;
    let new_size = new_file.metadata()?.len();
    let new_reader = BufReader::with_capacity(BUF_SIZE, new_file);

    let delta_file = File::create(delta_path)?;
    let delta_writer = BufWriter::with_capacity(BUF_SIZE, delta_file);
    let mut writer = DeltaWriter::new(delta_writer, opts.delta)?;

    let planner = match reference {
        Some(name) => AlignedPlanner::new(name.as_bytes(), &old),
        None => AlignedPlanner::literal_only(),
    }
    .block_size(opts.block_size);

    #[cfg(feature = "file-io")]
    let mut new_hasher = sha2::Sha256::new();

    #[cfg(feature = "file-io")]
    let plan = planner.plan(
        HashingReader {
            inner: new_reader,
            hasher: &mut new_hasher,
        },
        &mut writer,
    )?;

    #[cfg(not(feature = "file-io"))]
    let plan = planner.plan(new_reader, &mut writer)?;

    writer.close()?;
    let ops = writer.stats().ops.iter().sum();
    let delta_size = writer
        .finish()?
        .into_inner()
        .map_err(|e| e.into_error())?
        .metadata()?
        .len();

    #[cfg(feature = "file-io")]
    let new_sha256 = Some(new_hasher.finalize().into());
    #[cfg(not(feature = "file-io"))]
    let new_sha256: Option<[u8; 32]> = None;

    Ok(DiffStats {
        old_size,
        new_size,
        delta_size,
        plan,
        ops,
        new_sha256,
    })
}

// ---------------------------------------------------------------------------
// apply_file
// ---------------------------------------------------------------------------

/// Apply the delta at `delta_path` against `extraction_root`, writing the
/// reconstructed bytes to `output_path`.
///
/// When the `file-io` feature is enabled, a SHA-256 checksum of the output
/// is computed incrementally.
pub fn apply_file(
    delta_path: &Path,
    extraction_root: &Path,
    output_path: &Path,
) -> Result<ApplyFileStats, IoError> {
    let delta_file = File::open(delta_path)?;
    let delta_size = delta_file.metadata()?.len();
    let delta_reader = BufReader::with_capacity(BUF_SIZE, delta_file);

    let output_file = File::create(output_path)?;
    let mut output_writer = BufWriter::with_capacity(BUF_SIZE, output_file);

    #[cfg(feature = "file-io")]
    let mut output_hasher = sha2::Sha256::new();

    #[cfg(feature = "file-io")]
    let stats = {
        let mut hashing_writer = HashingWriter {
            inner: &mut output_writer,
            hasher: &mut output_hasher,
        };
        apply_delta(delta_reader, extraction_root, &mut hashing_writer)?
    };

    #[cfg(not(feature = "file-io"))]
    let stats = apply_delta(delta_reader, extraction_root, &mut output_writer)?;

    output_writer.flush()?;

    #[cfg(feature = "file-io")]
    let output_sha256 = Some(output_hasher.finalize().into());
    #[cfg(not(feature = "file-io"))]
    let output_sha256: Option<[u8; 32]> = None;

    Ok(ApplyFileStats {
        delta_size,
        output_size: stats.bytes_written,
        ops: stats.ops.iter().sum(),
        output_sha256,
    })
}

// ---------------------------------------------------------------------------
// Hashing adapters (used with file-io feature)
// ---------------------------------------------------------------------------

#[cfg(feature = "file-io")]
struct HashingWriter<'a, W: Write> {
    inner: &'a mut W,
    hasher: &'a mut sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<W: Write> Write for HashingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(feature = "file-io")]
struct HashingReader<'a, R: Read> {
    inner: R,
    hasher: &'a mut sha2::Sha256,
}

#[cfg(feature = "file-io")]
impl<R: Read> Read for HashingReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
