// Delta engines.
//
// - `encoder` — DeltaWriter: planner verbs in, compressed operation stream out
// - `decoder` — DeltaApplier: replays a delta against an extracted old tree
// - `inspect` — OpReader: lists the operations of a delta

pub mod decoder;
pub mod encoder;
pub mod inspect;

pub use decoder::{
    ApplyError, ApplyStats, DeltaApplier, DirTree, ErrorClass, MemoryTree, SourceTree,
    apply_delta, apply_to_vec,
};
pub use encoder::{DeltaOptions, DeltaWriter, EncodeError, EncodeStats};
pub use inspect::{OpReader, OpRecord};
