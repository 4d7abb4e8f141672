// Planning: deciding which encoder verb describes each region of new content.
//
// The encoder trusts whoever drives it. A planner must open an old file
// before any copy, add-delta or seek, and must compute add-delta bytes
// against exactly the old bytes the decoder will read at that point.
//
// AlignedPlanner is a simple reference strategy: the new content is cut
// into fixed-size blocks and each block is compared with the bytes at the
// same offset of one old file.

use std::io::{Read, Write};

use crate::delta::encoder::{DeltaWriter, EncodeError};

/// Default block size for `AlignedPlanner`.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Drives a `DeltaWriter` to describe one stream of new content.
pub trait Planner {
    /// Describe all of `new`, in order, through `writer`. Does not close it.
    fn plan<R: Read, W: Write>(
        &self,
        new: R,
        writer: &mut DeltaWriter<W>,
    ) -> Result<PlanStats, EncodeError>;
}

/// How a plan split the new content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub new_bytes: u64,
    pub copied_bytes: u64,
    pub add_bytes: u64,
    pub literal_bytes: u64,
}

/// Byte-wise difference `new[i] - old[i] (mod 256)`.
///
/// Applying AddData with the result against `old` yields `new`.
///
/// # Panics
///
/// Panics if `old` and `new` differ in length.
pub fn add_delta_bytes(old: &[u8], new: &[u8]) -> Vec<u8> {
    assert_eq!(
        old.len(),
        new.len(),
        "add-delta spans must have equal length"
    );
    new.iter()
        .zip(old)
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect()
}

// ---------------------------------------------------------------------------
// AlignedPlanner
// ---------------------------------------------------------------------------

/// Compares new content block by block with the same offsets of one old file.
///
/// Per block: identical bytes become a copy, blocks where at most
/// `max_diff_ratio` of the bytes differ become an add-delta, anything else
/// (and anything past the end of the old file) is written as literal bytes.
#[derive(Debug, Clone)]
pub struct AlignedPlanner<'a> {
    reference: Option<(&'a [u8], &'a [u8])>,
    block_size: usize,
    max_diff_ratio: f64,
}

impl<'a> AlignedPlanner<'a> {
    /// Plan against old file `name` whose content is `old`.
    pub fn new(name: &'a [u8], old: &'a [u8]) -> Self {
        Self {
            reference: Some((name, old)),
            block_size: DEFAULT_BLOCK_SIZE,
            max_diff_ratio: 0.5,
        }
    }

    /// A planner with no old file: everything is literal.
    pub fn literal_only() -> Self {
        Self {
            reference: None,
            block_size: DEFAULT_BLOCK_SIZE,
            max_diff_ratio: 0.5,
        }
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Fraction of differing bytes (0.0..=1.0) up to which a block is
    /// encoded as add-delta rather than literal.
    pub fn max_diff_ratio(mut self, ratio: f64) -> Self {
        self.max_diff_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    fn plan_block<W: Write>(
        &self,
        offset: u64,
        block: &[u8],
        writer: &mut DeltaWriter<W>,
        stats: &mut PlanStats,
    ) -> Result<(), EncodeError> {
        let Some((name, old)) = self.reference else {
            stats.literal_bytes += block.len() as u64;
            return writer.write_literal(block);
        };
        let start = usize::try_from(offset).map_or(old.len(), |o| o.min(old.len()));
        let end = start.saturating_add(block.len()).min(old.len());
        let overlap = &old[start..end];
        let (matched, tail) = block.split_at(overlap.len());

        if !matched.is_empty() {
            let differing = matched.iter().zip(overlap).filter(|(n, o)| n != o).count();
            if differing == 0 {
                writer.set_current_file(name)?;
                writer.copy_at(offset, matched.len() as u64)?;
                stats.copied_bytes += matched.len() as u64;
            } else if differing as f64 <= matched.len() as f64 * self.max_diff_ratio {
                writer.set_current_file(name)?;
                writer.seek(offset)?;
                writer.write_add_delta(&add_delta_bytes(overlap, matched))?;
                stats.add_bytes += matched.len() as u64;
            } else {
                writer.write_literal(matched)?;
                stats.literal_bytes += matched.len() as u64;
            }
        }
        if !tail.is_empty() {
            writer.write_literal(tail)?;
            stats.literal_bytes += tail.len() as u64;
        }
        Ok(())
    }
}

impl Planner for AlignedPlanner<'_> {
    fn plan<R: Read, W: Write>(
        &self,
        mut new: R,
        writer: &mut DeltaWriter<W>,
    ) -> Result<PlanStats, EncodeError> {
        let mut stats = PlanStats::default();
        let mut block = Vec::with_capacity(self.block_size.min(DEFAULT_BLOCK_SIZE));
        loop {
            block.clear();
            let n = (&mut new).take(self.block_size as u64).read_to_end(&mut block)?;
            if n == 0 {
                break;
            }
            self.plan_block(stats.new_bytes, &block, writer, &mut stats)?;
            stats.new_bytes += n as u64;
        }
        log::debug!(
            "plan: {} new bytes, {} copied, {} add-delta, {} literal",
            stats.new_bytes,
            stats.copied_bytes,
            stats.add_bytes,
            stats.literal_bytes
        );
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
