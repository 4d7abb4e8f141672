// Unsigned LEB128 variable-length integers.
//
// Little-endian base-128: least-significant group first, bit 7 set on
// every byte except the last. A u64 needs at most 10 bytes, and the
// 10th byte may only carry the single remaining bit.

use std::io::{self, Read, Write};

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode a `u64` into `buf`, starting at index 0.
/// Returns the number of bytes written (1..=10).
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = 0;
    while num >= 0x80 {
        buf[i] = (num as u8) | 0x80;
        num >>= 7;
        i += 1;
    }
    buf[i] = num as u8;
    i + 1
}

/// Encode a `u64` and write it to a `Write` sink.
pub fn write_u64<W: Write + ?Sized>(w: &mut W, num: u64) -> io::Result<()> {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    w.write_all(&buf[..len])
}

// ---------------------------------------------------------------------------
// Decoding from byte slices
// ---------------------------------------------------------------------------

/// Decode a `u64` from the front of `data`.
/// Returns `(value, bytes_consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarIntError> {
    let mut val: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(VarIntError::Overflow);
        }
        if byte < 0x80 {
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(VarIntError::Overflow);
            }
            return Ok((val | (u64::from(byte) << shift), i + 1));
        }
        val |= u64::from(byte & 0x7F) << shift;
        shift += 7;
    }
    Err(VarIntError::Underflow)
}

// ---------------------------------------------------------------------------
// Decoding from `Read` (streaming)
// ---------------------------------------------------------------------------

/// Read a `u64` varint from a streaming source.
///
/// A source that ends mid-integer yields `UnexpectedEof`; an encoding
/// wider than 64 bits yields `InvalidData`.
pub fn stream_read_u64<R: Read + ?Sized>(r: &mut R) -> io::Result<u64> {
    let mut val: u64 = 0;
    let mut shift = 0u32;
    let mut buf = [0u8; 1];
    for i in 0..MAX_VARINT_LEN {
        r.read_exact(&mut buf)?;
        let byte = buf[0];
        if byte < 0x80 {
            if i == MAX_VARINT_LEN - 1 && byte > 1 {
                return Err(VarIntError::Overflow.into());
            }
            return Ok(val | (u64::from(byte) << shift));
        }
        val |= u64::from(byte & 0x7F) << shift;
        shift += 7;
    }
    Err(VarIntError::Overflow.into())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Return the encoded byte-length of a `u64` value.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    bits.max(1).div_ceil(7) as usize
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VarIntError {
    /// Not enough input bytes to complete the integer.
    #[error("varint underflow (truncated input)")]
    Underflow,
    /// Value does not fit in 64 bits.
    #[error("varint overflow")]
    Overflow,
}

impl From<VarIntError> for io::Error {
    fn from(e: VarIntError) -> io::Error {
        match e {
            VarIntError::Underflow => io::Error::new(io::ErrorKind::UnexpectedEof, e),
            VarIntError::Overflow => io::Error::new(io::ErrorKind::InvalidData, e),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
