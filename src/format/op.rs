// Delta operations and their wire encoding.
//
// Each operation is one tag byte and one unsigned varint. Data, Open and
// AddData follow the varint with exactly that many payload bytes; for
// Copy and Seek the varint is the value itself.

use std::fmt;
use std::io::{self, Read, Write};

use super::varint;

/// Longest old-file name accepted in an Open operation.
pub const MAX_NAME_LEN: u64 = 1 << 16;

// ---------------------------------------------------------------------------
// Operation tags
// ---------------------------------------------------------------------------

/// Operation tag as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpKind {
    Data = 0,
    Open = 1,
    Copy = 2,
    AddData = 3,
    Seek = 4,
}

impl OpKind {
    pub const ALL: [OpKind; 5] = [
        OpKind::Data,
        OpKind::Open,
        OpKind::Copy,
        OpKind::AddData,
        OpKind::Seek,
    ];

    /// Whether the varint is followed by that many payload bytes.
    #[inline]
    pub fn has_payload(self) -> bool {
        matches!(self, OpKind::Data | OpKind::Open | OpKind::AddData)
    }

    /// Whether the operation needs an open old file.
    #[inline]
    pub fn needs_current_file(self) -> bool {
        matches!(self, OpKind::Copy | OpKind::AddData | OpKind::Seek)
    }

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Data => "Data",
            OpKind::Open => "Open",
            OpKind::Copy => "Copy",
            OpKind::AddData => "AddData",
            OpKind::Seek => "Seek",
        }
    }
}

impl TryFrom<u8> for OpKind {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, u8> {
        match tag {
            0 => Ok(OpKind::Data),
            1 => Ok(OpKind::Open),
            2 => Ok(OpKind::Copy),
            3 => Ok(OpKind::AddData),
            4 => Ok(OpKind::Seek),
            other => Err(other),
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// One operation with its payload borrowed from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op<'a> {
    /// Literal bytes copied verbatim to the output.
    Data(&'a [u8]),
    /// Switch the current old file; the read position starts at 0.
    Open(&'a [u8]),
    /// Copy this many bytes from the current old file.
    Copy(u64),
    /// Add these bytes (mod 256) to the same number of old-file bytes.
    AddData(&'a [u8]),
    /// Move the current old file's read position to this absolute offset.
    Seek(u64),
}

impl Op<'_> {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::Data(_) => OpKind::Data,
            Op::Open(_) => OpKind::Open,
            Op::Copy(_) => OpKind::Copy,
            Op::AddData(_) => OpKind::AddData,
            Op::Seek(_) => OpKind::Seek,
        }
    }

    /// The varint carried on the wire: payload length, byte count or offset.
    pub fn value(&self) -> u64 {
        match self {
            Op::Data(p) | Op::Open(p) | Op::AddData(p) => p.len() as u64,
            Op::Copy(n) => *n,
            Op::Seek(pos) => *pos,
        }
    }

    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Op::Data(p) | Op::Open(p) | Op::AddData(p) => Some(p),
            Op::Copy(_) | Op::Seek(_) => None,
        }
    }

    /// Number of bytes this operation occupies in the uncompressed stream.
    pub fn encoded_len(&self) -> usize {
        let value = self.value();
        let payload = self.payload().map_or(0, <[u8]>::len);
        1 + varint::sizeof_u64(value) + payload
    }

    /// Write tag, varint and payload to `w`.
    pub fn encode<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        let mut head = [0u8; 1 + varint::MAX_VARINT_LEN];
        head[0] = self.kind() as u8;
        let mut vbuf = [0u8; varint::MAX_VARINT_LEN];
        let vlen = varint::encode_u64(self.value(), &mut vbuf);
        head[1..=vlen].copy_from_slice(&vbuf[..vlen]);
        w.write_all(&head[..=vlen])?;
        if let Some(payload) = self.payload() {
            w.write_all(payload)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Streaming header read
// ---------------------------------------------------------------------------

/// Tag and varint of one operation, read ahead of its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub kind: OpKind,
    pub value: u64,
}

/// Failure to read an operation header.
#[derive(Debug, thiserror::Error)]
pub enum OpHeaderError {
    #[error("unrecognized operation tag {0}")]
    UnknownTag(u8),
    #[error("truncated {0} operation")]
    Truncated(OpKind),
    #[error("malformed varint in {0} operation")]
    BadVarint(OpKind),
    #[error(transparent)]
    Io(io::Error),
}

impl OpHeader {
    /// Read the next operation header.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly before a tag byte.
    pub fn read<R: Read + ?Sized>(r: &mut R) -> Result<Option<Self>, OpHeaderError> {
        let mut tag = [0u8; 1];
        loop {
            match r.read(&mut tag) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(OpHeaderError::Io(e)),
            }
        }
        let kind = OpKind::try_from(tag[0]).map_err(OpHeaderError::UnknownTag)?;
        let value = varint::stream_read_u64(r).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => OpHeaderError::Truncated(kind),
            io::ErrorKind::InvalidData
                if e
                    .get_ref()
                    .is_some_and(|inner| inner.is::<varint::VarIntError>()) =>
            {
                OpHeaderError::BadVarint(kind)
            }
            _ => OpHeaderError::Io(e),
        })?;
        Ok(Some(OpHeader { kind, value }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_match_wire_values() {
        assert_eq!(OpKind::Data as u8, 0);
        assert_eq!(OpKind::Open as u8, 1);
        assert_eq!(OpKind::Copy as u8, 2);
        assert_eq!(OpKind::AddData as u8, 3);
        assert_eq!(OpKind::Seek as u8, 4);
        for kind in OpKind::ALL {
            assert_eq!(OpKind::try_from(kind as u8), Ok(kind));
        }
        assert!(!OpKind::Open.needs_current_file());
        assert!(OpKind::Seek.needs_current_file());
        assert_eq!(format!("{:<7}|", OpKind::Copy), "Copy   |");
        assert_eq!(OpKind::try_from(5), Err(5));
        assert_eq!(OpKind::try_from(0xFF), Err(0xFF));
    }

    #[test]
    fn payload_ops_carry_bytes() {
        let mut out = Vec::new();
        Op::Open(b"a.txt").encode(&mut out).unwrap();
        assert_eq!(out, b"\x01\x05a.txt");

        out.clear();
        Op::AddData(&[5, 9, 1]).encode(&mut out).unwrap();
        assert_eq!(out, [3, 3, 5, 9, 1]);
    }

    #[test]
    fn copy_and_seek_have_no_payload() {
        let mut out = Vec::new();
        Op::Copy(6).encode(&mut out).unwrap();
        Op::Seek(300).encode(&mut out).unwrap();
        assert_eq!(out, [2, 6, 4, 0xAC, 0x02]);
        assert_eq!(Op::Seek(300).encoded_len(), 3);
    }

    #[test]
    fn read_header_sequence() {
        let mut out = Vec::new();
        Op::Data(b"xyz").encode(&mut out).unwrap();
        Op::Copy(1 << 20).encode(&mut out).unwrap();
        let mut r = out.as_slice();

        let h = OpHeader::read(&mut r).unwrap().unwrap();
        assert_eq!(h, OpHeader { kind: OpKind::Data, value: 3 });
        let mut payload = [0u8; 3];
        r.read_exact(&mut payload).unwrap();
        assert_eq!(&payload, b"xyz");

        let h = OpHeader::read(&mut r).unwrap().unwrap();
        assert_eq!(h, OpHeader { kind: OpKind::Copy, value: 1 << 20 });
        assert!(OpHeader::read(&mut r).unwrap().is_none());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut r: &[u8] = &[9, 0];
        assert!(matches!(
            OpHeader::read(&mut r),
            Err(OpHeaderError::UnknownTag(9))
        ));
    }

    #[test]
    fn missing_varint_is_truncation() {
        let mut r: &[u8] = &[2];
        assert!(matches!(
            OpHeader::read(&mut r),
            Err(OpHeaderError::Truncated(OpKind::Copy))
        ));
        let mut r: &[u8] = &[4, 0x80];
        assert!(matches!(
            OpHeader::read(&mut r),
            Err(OpHeaderError::Truncated(OpKind::Seek))
        ));
    }

    #[test]
    fn oversized_varint_is_rejected() {
        let mut data = vec![2u8];
        data.extend_from_slice(&[0xFF; 11]);
        let mut r = data.as_slice();
        assert!(matches!(
            OpHeader::read(&mut r),
            Err(OpHeaderError::BadVarint(OpKind::Copy))
        ));
    }
}
