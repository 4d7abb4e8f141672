// Delta file header: a fixed 8-byte magic in front of the compressed
// operation stream.

use std::io::{self, Read, Write};

/// `"tardf1\n"` followed by a NUL byte.
pub const DELTA_MAGIC: [u8; 8] = *b"tardf1\n\0";

/// Write the magic header.
pub fn write_header<W: Write + ?Sized>(w: &mut W) -> io::Result<()> {
    w.write_all(&DELTA_MAGIC)
}

/// Read the first 8 bytes of `r` and check them against the magic.
///
/// Returns `Ok(Err(found))` with whatever bytes were present when the
/// header does not match, including a short read at end of input. I/O
/// failures other than end of input are returned as the outer error.
pub fn read_header<R: Read + ?Sized>(r: &mut R) -> io::Result<Result<(), Vec<u8>>> {
    let mut buf = [0u8; DELTA_MAGIC.len()];
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    if filled == buf.len() && buf == DELTA_MAGIC {
        Ok(Ok(()))
    } else {
        Ok(Err(buf[..filled].to_vec()))
    }
}
