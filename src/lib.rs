//! Tardiff: compact binary deltas between archives.
//!
//! A delta describes how to rebuild the byte stream of a new archive from
//! the files of an old one that has already been extracted to disk. It is an
//! 8-byte magic followed by a zstd-compressed sequence of operations: literal
//! data, open an old file, copy from it, add byte-wise differences to it, or
//! seek within it.
//!
//! The crate provides:
//! - The container format (`format`)
//! - The streaming encoder and applier (`delta`)
//! - A pluggable planner contract with a reference strategy (`planner`)
//! - File-oriented helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```
//! use tardiff::delta::{DeltaOptions, DeltaWriter, MemoryTree, apply_to_vec};
//!
//! let old = MemoryTree::new().with_file("a.txt", b"hello world".to_vec());
//!
//! let mut delta = Vec::new();
//! let mut w = DeltaWriter::new(&mut delta, DeltaOptions::default()).unwrap();
//! w.set_current_file("a.txt").unwrap();
//! w.copy(6).unwrap();
//! w.write_add_delta(&tardiff::planner::add_delta_bytes(b"world", b"earth")).unwrap();
//! w.close().unwrap();
//! drop(w);
//!
//! assert_eq!(apply_to_vec(&delta, &old).unwrap(), b"hello earth");
//! ```

pub mod delta;
pub mod format;
pub mod io;
pub mod planner;

#[cfg(feature = "cli")]
pub mod cli;
