// Delta container format.
//
// # Modules
//
// - `varint` — Unsigned LEB128 variable-length integers
// - `header` — The 8-byte magic in front of the compressed stream
// - `op`     — Operation tags, the `Op` sum type and its wire encoding

pub mod header;
pub mod op;
pub mod varint;

pub use header::DELTA_MAGIC;
pub use op::{MAX_NAME_LEN, Op, OpHeader, OpHeaderError, OpKind};
pub use varint::VarIntError;
