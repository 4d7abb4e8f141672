// Streaming delta encoder.
//
// DeltaWriter turns planner verbs into operations:
//   - Literal bytes are batched into Data operations of at most `chunk_size`
//   - Redundant Open and Seek operations are elided via a tracked position
//   - Everything after the magic header goes through a zstd encoder

use std::io::{self, Write};

use log::{debug, trace};
use zstd::stream::write::Encoder as ZstdEncoder;

use crate::format::header;
use crate::format::op::{MAX_NAME_LEN, Op, OpKind};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Literal bytes are flushed as one Data operation once this many are pending.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Default zstd level.
pub const DEFAULT_LEVEL: i32 = 3;

/// Configuration for the delta encoder.
#[derive(Debug, Clone)]
pub struct DeltaOptions {
    /// zstd compression level.
    pub level: i32,
    /// Maximum size of a single Data operation.
    pub chunk_size: usize,
}

impl Default for DeltaOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("delta writer is closed")]
    Closed,
    #[error("file name is {len} bytes, longer than the {} byte limit", MAX_NAME_LEN)]
    NameTooLong { len: usize },
    #[error("seek past the end of the addressable range")]
    PositionOverflow,
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Counters gathered while encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Operations emitted, indexed by tag value.
    pub ops: [u64; 5],
    /// Literal bytes emitted through Data operations.
    pub literal_bytes: u64,
    /// Old-file bytes referenced by Copy operations.
    pub copied_bytes: u64,
    /// Bytes emitted through AddData operations.
    pub add_bytes: u64,
    /// Open and Seek calls that emitted nothing.
    pub elided: u64,
}

impl EncodeStats {
    pub fn op_count(&self, kind: OpKind) -> u64 {
        self.ops[kind as usize]
    }

    /// Total bytes the decoder will write when applying the delta.
    pub fn output_bytes(&self) -> u64 {
        self.literal_bytes
            .saturating_add(self.copied_bytes)
            .saturating_add(self.add_bytes)
    }
}

// ---------------------------------------------------------------------------
// DeltaWriter
// ---------------------------------------------------------------------------

/// Streaming delta encoder.
///
/// The magic header is written when the writer is created. Every verb after
/// that appends operations to the compressed stream; `close` flushes pending
/// literals and finalizes the compressor. A stream that was not closed is
/// incomplete and must not be handed to a reader.
///
/// # Example
/// ```
/// use tardiff::delta::encoder::{DeltaOptions, DeltaWriter};
/// let mut out = Vec::new();
/// let mut w = DeltaWriter::new(&mut out, DeltaOptions::default()).unwrap();
/// w.write_old_file("etc/motd", 120).unwrap();
/// w.write_literal(b"new trailing bytes").unwrap();
/// w.close().unwrap();
/// ```
pub struct DeltaWriter<W: Write> {
    stream: Option<ZstdEncoder<'static, W>>,
    finished: Option<W>,
    buffer: Vec<u8>,
    chunk_size: usize,
    current_file: Option<Vec<u8>>,
    current_pos: u64,
    stats: EncodeStats,
}

impl<W: Write> DeltaWriter<W> {
    /// Write the header to `writer` and start the compressed stream.
    pub fn new(mut writer: W, opts: DeltaOptions) -> Result<Self, EncodeError> {
        header::write_header(&mut writer)?;
        let stream = ZstdEncoder::new(writer, opts.level)?;
        let chunk_size = opts.chunk_size.max(1);
        debug!(
            "delta writer: level {}, chunk size {chunk_size}",
            opts.level
        );
        Ok(Self {
            stream: Some(stream),
            finished: None,
            buffer: Vec::with_capacity(chunk_size.min(DEFAULT_CHUNK_SIZE)),
            chunk_size,
            current_file: None,
            current_pos: 0,
            stats: EncodeStats::default(),
        })
    }

    // -- Verbs ---------------------------------------------------------------

    /// Append literal bytes, flushing a Data operation each time the
    /// pending buffer fills up to the chunk size.
    pub fn write_literal(&mut self, mut data: &[u8]) -> Result<(), EncodeError> {
        self.ensure_open()?;
        while !data.is_empty() {
            let room = self.chunk_size - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() >= self.chunk_size {
                self.flush_buffer()?;
            }
        }
        Ok(())
    }

    /// Make `name` the current old file. Does nothing if it already is.
    pub fn set_current_file(&mut self, name: impl AsRef<[u8]>) -> Result<(), EncodeError> {
        self.ensure_open()?;
        let name = name.as_ref();
        if self.current_file.as_deref() == Some(name) {
            self.stats.elided += 1;
            return Ok(());
        }
        if name.len() as u64 > MAX_NAME_LEN {
            return Err(EncodeError::NameTooLong { len: name.len() });
        }
        self.flush_buffer()?;
        self.emit(Op::Open(name))?;
        debug!("open {}", String::from_utf8_lossy(name));
        self.current_file = Some(name.to_vec());
        self.current_pos = 0;
        Ok(())
    }

    /// Move to absolute offset `pos` in the current old file. Does nothing
    /// if the tracked position is already `pos`.
    pub fn seek(&mut self, pos: u64) -> Result<(), EncodeError> {
        self.ensure_open()?;
        if self.current_pos == pos {
            self.stats.elided += 1;
            return Ok(());
        }
        self.flush_buffer()?;
        self.emit(Op::Seek(pos))?;
        self.current_pos = pos;
        Ok(())
    }

    /// Skip `delta` bytes of the current old file. Always emits an absolute
    /// Seek.
    pub fn seek_forward(&mut self, delta: u64) -> Result<(), EncodeError> {
        let pos = self
            .current_pos
            .checked_add(delta)
            .ok_or(EncodeError::PositionOverflow)?;
        self.flush_buffer()?;
        self.emit(Op::Seek(pos))?;
        self.current_pos = pos;
        Ok(())
    }

    /// Copy `size` bytes from the current old file at the tracked position.
    pub fn copy(&mut self, size: u64) -> Result<(), EncodeError> {
        self.flush_buffer()?;
        self.emit(Op::Copy(size))?;
        self.advance(size)?;
        self.stats.copied_bytes = self.stats.copied_bytes.saturating_add(size);
        Ok(())
    }

    /// `seek(offset)` followed by `copy(size)`.
    pub fn copy_at(&mut self, offset: u64, size: u64) -> Result<(), EncodeError> {
        self.seek(offset)?;
        self.copy(size)
    }

    /// Emit the whole of an old file that is unchanged in the new archive.
    pub fn write_old_file(&mut self, name: impl AsRef<[u8]>, size: u64) -> Result<(), EncodeError> {
        self.set_current_file(name)?;
        self.seek(0)?;
        self.copy(size)
    }

    /// Emit add-delta bytes against the current old file at the tracked
    /// position. Each byte must be `new - old (mod 256)`.
    pub fn write_add_delta(&mut self, delta: &[u8]) -> Result<(), EncodeError> {
        self.flush_buffer()?;
        self.emit(Op::AddData(delta))?;
        let size = delta.len() as u64;
        self.advance(size)?;
        self.stats.add_bytes = self.stats.add_bytes.saturating_add(size);
        Ok(())
    }

    /// Flush pending literals and finalize the compressed stream.
    ///
    /// Calling `close` again after it has succeeded does nothing. If it
    /// fails, the compressor is still released and the output is invalid.
    pub fn close(&mut self) -> Result<(), EncodeError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let flushed = self.flush_buffer();
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        flushed?;
        let writer = stream.finish()?;
        self.buffer = Vec::new();
        self.finished = Some(writer);
        debug!(
            "delta writer closed: {} ops, {} output bytes described",
            self.stats.ops.iter().sum::<u64>(),
            self.stats.output_bytes()
        );
        Ok(())
    }

    /// Close the stream and return the underlying writer.
    pub fn finish(mut self) -> Result<W, EncodeError> {
        self.close()?;
        self.finished.take().ok_or(EncodeError::Closed)
    }

    // -- Accessors -----------------------------------------------------------

    /// Name of the current old file, if one has been opened.
    pub fn current_file(&self) -> Option<&[u8]> {
        self.current_file.as_deref()
    }

    /// Tracked read position in the current old file.
    pub fn position(&self) -> u64 {
        self.current_pos
    }

    /// Literal bytes waiting to be flushed.
    pub fn pending_literal(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    // -- Internals -----------------------------------------------------------

    /// Emit the pending literal buffer as one Data operation.
    pub fn flush_buffer(&mut self) -> Result<(), EncodeError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(EncodeError::Closed)?;
        Op::Data(&self.buffer).encode(stream)?;
        trace!("op Data {}", self.buffer.len());
        self.stats.ops[OpKind::Data as usize] += 1;
        self.stats.literal_bytes = self
            .stats
            .literal_bytes
            .saturating_add(self.buffer.len() as u64);
        self.buffer.clear();
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), EncodeError> {
        if self.stream.is_none() {
            return Err(EncodeError::Closed);
        }
        Ok(())
    }

    fn emit(&mut self, op: Op<'_>) -> Result<(), EncodeError> {
        let stream = self.stream.as_mut().ok_or(EncodeError::Closed)?;
        op.encode(stream)?;
        trace!("op {} {}", op.kind(), op.value());
        self.stats.ops[op.kind() as usize] += 1;
        Ok(())
    }

    fn advance(&mut self, size: u64) -> Result<(), EncodeError> {
        self.current_pos = self
            .current_pos
            .checked_add(size)
            .ok_or(EncodeError::PositionOverflow)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::header::DELTA_MAGIC;
    use crate::format::op::OpHeader;
    use std::io::Read;

    /// Decompress a finished delta and list `(kind, value, payload)` triples.
    fn decode_ops(delta: &[u8]) -> Vec<(OpKind, u64, Vec<u8>)> {
        assert_eq!(&delta[..8], &DELTA_MAGIC);
        let body = zstd::stream::decode_all(&delta[8..]).unwrap();
        let mut r = body.as_slice();
        let mut ops = Vec::new();
        while let Some(h) = OpHeader::read(&mut r).unwrap() {
            let mut payload = Vec::new();
            if h.kind.has_payload() {
                payload.resize(h.value as usize, 0);
                r.read_exact(&mut payload).unwrap();
            }
            ops.push((h.kind, h.value, payload));
        }
        ops
    }

    fn encode_with(opts: DeltaOptions, f: impl FnOnce(&mut DeltaWriter<&mut Vec<u8>>)) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = DeltaWriter::new(&mut out, opts).unwrap();
        f(&mut w);
        w.close().unwrap();
        drop(w);
        out
    }

    fn encode(f: impl FnOnce(&mut DeltaWriter<&mut Vec<u8>>)) -> Vec<u8> {
        encode_with(DeltaOptions::default(), f)
    }

    #[test]
    fn empty_stream_is_header_plus_frame() {
        let delta = encode(|_| {});
        assert!(delta.len() > 8);
        assert!(decode_ops(&delta).is_empty());
    }

    #[test]
    fn literals_are_batched() {
        let delta = encode(|w| {
            w.write_literal(b"abc").unwrap();
            w.write_literal(b"def").unwrap();
        });
        assert_eq!(decode_ops(&delta), vec![(OpKind::Data, 6, b"abcdef".to_vec())]);
    }

    #[test]
    fn set_current_file_is_idempotent() {
        let once = encode(|w| w.set_current_file("a.txt").unwrap());
        let twice = encode(|w| {
            w.set_current_file("a.txt").unwrap();
            w.set_current_file("a.txt").unwrap();
        });
        assert_eq!(decode_ops(&once), decode_ops(&twice));
        assert_eq!(once, twice);
    }

    #[test]
    fn repeated_seek_is_elided() {
        let once = encode(|w| {
            w.set_current_file("f").unwrap();
            w.seek(10).unwrap();
        });
        let twice = encode(|w| {
            w.set_current_file("f").unwrap();
            w.seek(10).unwrap();
            w.seek(10).unwrap();
        });
        assert_eq!(once, twice);
        assert_eq!(
            decode_ops(&once),
            vec![(OpKind::Open, 1, b"f".to_vec()), (OpKind::Seek, 10, vec![])]
        );
    }

    #[test]
    fn seek_to_zero_after_open_is_elided() {
        let delta = encode(|w| w.write_old_file("a", 11).unwrap());
        assert_eq!(
            decode_ops(&delta),
            vec![(OpKind::Open, 1, b"a".to_vec()), (OpKind::Copy, 11, vec![])]
        );
    }

    #[test]
    fn reopening_resets_position() {
        let delta = encode(|w| {
            w.write_old_file("a", 5).unwrap();
            w.write_old_file("b", 7).unwrap();
            w.write_old_file("a", 5).unwrap();
        });
        let kinds: Vec<_> = decode_ops(&delta).into_iter().map(|(k, v, _)| (k, v)).collect();
        assert_eq!(
            kinds,
            vec![
                (OpKind::Open, 1),
                (OpKind::Copy, 5),
                (OpKind::Open, 1),
                (OpKind::Copy, 7),
                (OpKind::Open, 1),
                (OpKind::Copy, 5),
            ]
        );
    }

    #[test]
    fn contiguous_copy_at_skips_seek() {
        let delta = encode(|w| {
            w.set_current_file("f").unwrap();
            w.copy_at(0, 4).unwrap();
            w.copy_at(4, 4).unwrap();
            w.copy_at(100, 4).unwrap();
        });
        let kinds: Vec<_> = decode_ops(&delta).into_iter().map(|(k, v, _)| (k, v)).collect();
        assert_eq!(
            kinds,
            vec![
                (OpKind::Open, 1),
                (OpKind::Copy, 4),
                (OpKind::Copy, 4),
                (OpKind::Seek, 100),
                (OpKind::Copy, 4),
            ]
        );
    }

    #[test]
    fn seek_forward_is_absolute_and_unconditional() {
        let delta = encode(|w| {
            w.set_current_file("f").unwrap();
            w.copy(10).unwrap();
            w.seek_forward(5).unwrap();
            w.seek_forward(0).unwrap();
        });
        let kinds: Vec<_> = decode_ops(&delta).into_iter().map(|(k, v, _)| (k, v)).collect();
        assert_eq!(
            kinds,
            vec![
                (OpKind::Open, 1),
                (OpKind::Copy, 10),
                (OpKind::Seek, 15),
                (OpKind::Seek, 15),
            ]
        );
    }

    #[test]
    fn add_delta_advances_position() {
        let mut out = Vec::new();
        let mut w = DeltaWriter::new(&mut out, DeltaOptions::default()).unwrap();
        w.set_current_file("f").unwrap();
        w.copy(6).unwrap();
        w.write_add_delta(&[1, 2, 3]).unwrap();
        assert_eq!(w.position(), 9);
        w.seek(9).unwrap();
        assert_eq!(w.stats().elided, 1);
        w.close().unwrap();
        drop(w);
        let ops = decode_ops(&out);
        assert_eq!(ops[2], (OpKind::AddData, 3, vec![1, 2, 3]));
        assert_eq!(ops.len(), 3);
    }

    #[test]
    fn pending_literals_flush_before_other_ops() {
        let delta = encode(|w| {
            w.write_literal(b"lit").unwrap();
            w.set_current_file("f").unwrap();
            w.write_literal(b"more").unwrap();
            w.copy(2).unwrap();
            w.write_literal(b"tail").unwrap();
        });
        let kinds: Vec<_> = decode_ops(&delta).into_iter().map(|(k, v, _)| (k, v)).collect();
        assert_eq!(
            kinds,
            vec![
                (OpKind::Data, 3),
                (OpKind::Open, 1),
                (OpKind::Data, 4),
                (OpKind::Copy, 2),
                (OpKind::Data, 4),
            ]
        );
    }

    #[test]
    fn chunk_threshold_splits_literals() {
        let opts = DeltaOptions {
            chunk_size: 16,
            ..Default::default()
        };
        let first: Vec<u8> = (0..9).collect();
        let second: Vec<u8> = (9..18).collect();
        let delta = encode_with(opts, |w| {
            w.write_literal(&first).unwrap();
            assert_eq!(w.pending_literal(), 9);
            w.write_literal(&second).unwrap();
            assert_eq!(w.pending_literal(), 2);
        });
        let ops = decode_ops(&delta);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].1, 16);
        assert_eq!(ops[1].1, 2);
        let joined: Vec<u8> = ops.into_iter().flat_map(|(_, _, p)| p).collect();
        assert_eq!(joined, (0..18).collect::<Vec<u8>>());
    }

    #[test]
    fn close_is_idempotent() {
        let mut out = Vec::new();
        let mut w = DeltaWriter::new(&mut out, DeltaOptions::default()).unwrap();
        w.write_literal(b"x").unwrap();
        w.close().unwrap();
        w.close().unwrap();
        assert!(w.is_closed());
        assert!(matches!(w.write_literal(b"y"), Err(EncodeError::Closed)));
        assert!(matches!(w.copy(1), Err(EncodeError::Closed)));
        drop(w);
        assert_eq!(decode_ops(&out), vec![(OpKind::Data, 1, b"x".to_vec())]);
    }

    #[test]
    fn elided_verbs_fail_after_close() {
        let mut w = DeltaWriter::new(Vec::new(), DeltaOptions::default()).unwrap();
        w.set_current_file("a").unwrap();
        w.close().unwrap();
        assert!(matches!(w.set_current_file("a"), Err(EncodeError::Closed)));
        assert!(matches!(w.seek(0), Err(EncodeError::Closed)));
        assert!(matches!(w.write_old_file("a", 0), Err(EncodeError::Closed)));
        assert_eq!(w.stats().elided, 0);
    }

    /// Accepts `limit` bytes, then fails every write.
    struct ShortSink {
        written: usize,
        limit: usize,
    }

    impl Write for ShortSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.written;
            if room == 0 {
                return Err(io::Error::other("sink full"));
            }
            let n = room.min(buf.len());
            self.written += n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_close_releases_the_stream() {
        let sink = ShortSink {
            written: 0,
            limit: DELTA_MAGIC.len(),
        };
        let mut w = DeltaWriter::new(sink, DeltaOptions::default()).unwrap();
        w.write_literal(b"does not fit").unwrap();
        assert!(matches!(w.close(), Err(EncodeError::Io(_))));
        assert!(w.is_closed());
        w.close().unwrap();
        assert!(matches!(w.write_literal(b"more"), Err(EncodeError::Closed)));
        assert!(matches!(w.finish(), Err(EncodeError::Closed)));
    }

    #[test]
    fn byte_counters_saturate() {
        let mut w = DeltaWriter::new(Vec::new(), DeltaOptions::default()).unwrap();
        w.set_current_file("big").unwrap();
        w.copy(u64::MAX).unwrap();
        w.seek(0).unwrap();
        w.copy(1).unwrap();
        w.write_add_delta(&[1]).unwrap();
        assert_eq!(w.stats().copied_bytes, u64::MAX);
        assert_eq!(w.stats().output_bytes(), u64::MAX);
        // The position itself cannot pass the end of the range.
        w.seek(u64::MAX).unwrap();
        assert!(matches!(w.copy(1), Err(EncodeError::PositionOverflow)));
        assert_eq!(w.stats().copied_bytes, u64::MAX);
    }

    #[test]
    fn finish_returns_writer() {
        let w = DeltaWriter::new(Vec::new(), DeltaOptions::default()).unwrap();
        let out = w.finish().unwrap();
        assert_eq!(&out[..8], &DELTA_MAGIC);
    }

    #[test]
    fn overlong_name_is_rejected() {
        let mut w = DeltaWriter::new(Vec::new(), DeltaOptions::default()).unwrap();
        let name = vec![b'a'; MAX_NAME_LEN as usize + 1];
        assert!(matches!(
            w.set_current_file(&name),
            Err(EncodeError::NameTooLong { .. })
        ));
        assert!(w.current_file().is_none());
    }

    #[test]
    fn stats_track_output_bytes() {
        let mut w = DeltaWriter::new(Vec::new(), DeltaOptions::default()).unwrap();
        w.write_old_file("a", 10).unwrap();
        w.write_add_delta(&[0; 4]).unwrap();
        w.write_literal(b"abc").unwrap();
        w.close().unwrap();
        let stats = w.stats();
        assert_eq!(stats.output_bytes(), 17);
        assert_eq!(stats.op_count(OpKind::Open), 1);
        assert_eq!(stats.op_count(OpKind::Seek), 0);
        assert_eq!(stats.op_count(OpKind::Data), 1);
    }
}
