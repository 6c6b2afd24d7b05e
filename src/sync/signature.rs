//! Block checksums of a base value
//!
//! A replica answers an INFO it cannot satisfy with the checksum list of its
//! own value; the responsible node scans its value against that list.

use crate::sync::rolling_hash::RollingChecksum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Length of the truncated strong hash
pub const STRONG_HASH_LEN: usize = 16;

/// Checksums of one block of the base value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumBlock {
    /// Weak rolling checksum
    pub weak: u32,
    /// Blake3, truncated to 128 bits
    pub strong: [u8; STRONG_HASH_LEN],
}

impl ChecksumBlock {
    pub fn new(block: &[u8]) -> Self {
        Self {
            weak: RollingChecksum::checksum(block),
            strong: strong_hash(block),
        }
    }
}

/// Strong hash of a block
pub fn strong_hash(data: &[u8]) -> [u8; STRONG_HASH_LEN] {
    let full = blake3::hash(data);
    let mut strong = [0u8; STRONG_HASH_LEN];
    strong.copy_from_slice(&full.as_bytes()[..STRONG_HASH_LEN]);
    strong
}

/// Split `value` into `block_size` blocks and checksum each
///
/// The last block is shorter when `block_size` does not divide the value
/// length. An empty value, or a block size of zero, yields no blocks.
pub fn compute_checksums(value: &[u8], block_size: usize) -> Vec<ChecksumBlock> {
    if block_size == 0 {
        return Vec::new();
    }

    value.chunks(block_size).map(ChecksumBlock::new).collect()
}

/// Weak checksum index over a checksum list
pub struct ChecksumLookup<'a> {
    blocks: &'a [ChecksumBlock],
    by_weak: HashMap<u32, Vec<u32>>,
}

impl<'a> ChecksumLookup<'a> {
    pub fn new(blocks: &'a [ChecksumBlock]) -> Self {
        let mut by_weak: HashMap<u32, Vec<u32>> = HashMap::with_capacity(blocks.len());

        // Indices are pushed in list order, so each candidate list is ascending
        for (idx, block) in blocks.iter().enumerate() {
            by_weak.entry(block.weak).or_default().push(idx as u32);
        }

        Self { blocks, by_weak }
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Lowest block index whose weak and strong checksums both match `window`
    ///
    /// The strong hash of the window is only computed when some block
    /// shares its weak checksum.
    pub fn find(&self, weak: u32, window: &[u8]) -> Option<u32> {
        let candidates = self.by_weak.get(&weak)?;
        let strong = strong_hash(window);

        candidates
            .iter()
            .copied()
            .find(|&idx| self.blocks[idx as usize].strong == strong)
    }
}
