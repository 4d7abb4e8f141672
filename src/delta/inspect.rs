// Operation listing.
//
// OpReader walks a delta without an old tree: it checks the header,
// decompresses the body and yields one record per operation. Payloads are
// skipped except Open names.

use std::io::{self, BufReader, Read};

use zstd::stream::read::Decoder as ZstdDecoder;

use super::decoder::{ApplyError, BUF_SIZE};
use crate::format::header;
use crate::format::op::{MAX_NAME_LEN, OpHeader, OpKind};
use crate::format::varint;

/// One operation as it appears in the decompressed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    /// Offset of the tag byte in the decompressed stream.
    pub offset: u64,
    pub kind: OpKind,
    /// Payload length, byte count or absolute offset, depending on `kind`.
    pub value: u64,
    /// File name for Open operations.
    pub name: Option<Vec<u8>>,
}

pub struct OpReader<R: Read> {
    stream: BufReader<ZstdDecoder<'static, BufReader<R>>>,
    offset: u64,
    done: bool,
}

impl<R: Read> OpReader<R> {
    /// Verify the header of `delta` and prepare to read its operations.
    pub fn new(mut delta: R) -> Result<Self, ApplyError> {
        if let Err(found) = header::read_header(&mut delta)? {
            return Err(ApplyError::BadMagic { found });
        }
        let decoder = ZstdDecoder::new(delta).map_err(ApplyError::Decompress)?;
        Ok(Self {
            stream: BufReader::with_capacity(BUF_SIZE, decoder),
            offset: 0,
            done: false,
        })
    }

    /// Read the next operation, or `None` at the end of the stream.
    pub fn next_op(&mut self) -> Result<Option<OpRecord>, ApplyError> {
        let Some(op) = OpHeader::read(&mut self.stream)? else {
            return Ok(None);
        };
        let offset = self.offset;
        self.offset += 1 + varint::sizeof_u64(op.value) as u64;

        let mut name = None;
        match op.kind {
            OpKind::Open => {
                if op.value > MAX_NAME_LEN {
                    return Err(ApplyError::NameTooLong { len: op.value });
                }
                let mut buf = vec![0u8; op.value as usize];
                self.stream
                    .read_exact(&mut buf)
                    .map_err(|e| ApplyError::from_stream(op.kind, e))?;
                name = Some(buf);
            }
            OpKind::Data | OpKind::AddData => {
                let skipped = io::copy(&mut (&mut self.stream).take(op.value), &mut io::sink())
                    .map_err(|e| ApplyError::from_stream(op.kind, e))?;
                if skipped < op.value {
                    return Err(ApplyError::Truncated { op: op.kind });
                }
            }
            OpKind::Copy | OpKind::Seek => {}
        }
        if op.kind.has_payload() {
            self.offset += op.value;
        }

        Ok(Some(OpRecord {
            offset,
            kind: op.kind,
            value: op.value,
            name,
        }))
    }
}

impl<R: Read> Iterator for OpReader<R> {
    type Item = Result<OpRecord, ApplyError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.next_op().transpose();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}
