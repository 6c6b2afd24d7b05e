//! Delta synchronization engine
//!
//! rsync-style block matching: weak rolling checksums find candidate blocks,
//! a truncated Blake3 hash confirms them. All functions here are pure.

pub mod delta;
pub mod rolling_hash;
pub mod signature;

pub use delta::{
    block_count, find_instructions, reconstruct, DeltaError, DeltaResult, DeltaStats, Instruction,
};
pub use rolling_hash::RollingChecksum;
pub use signature::{compute_checksums, strong_hash, ChecksumBlock, ChecksumLookup};
