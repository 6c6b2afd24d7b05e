//! Diff generation and reconstruction
//!
//! The responsible node scans its value against a replica's checksum list
//! and produces instructions; the replica replays them against its own
//! value to rebuild the responsible node's value byte for byte.

use crate::sync::rolling_hash::RollingChecksum;
use crate::sync::signature::{ChecksumBlock, ChecksumLookup};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// One step of a reconstruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Emit block `n` of the base value verbatim
    Reference(u32),
    /// Emit these bytes
    Literal(Vec<u8>),
}

impl Instruction {
    pub fn is_literal(&self) -> bool {
        matches!(self, Instruction::Literal(_))
    }
}

/// Errors that can occur during delta operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeltaError {
    #[error("Block reference {index} out of range: base has {block_count} blocks")]
    ReferenceOutOfRange { index: u32, block_count: usize },
}

pub type DeltaResult<T> = Result<T, DeltaError>;

/// Compute the instructions that rebuild `new_value` from the base value
/// described by `base`
///
/// The window slides one byte at a time and its weak checksum is rolled;
/// after a match the window jumps a whole block and the checksum is
/// recomputed. Once fewer than `block_size` bytes remain, the shorter
/// suffixes are tried (longest first) since the base's last block may be
/// short. Identical inputs always produce identical output.
pub fn find_instructions(
    new_value: &[u8],
    base: &[ChecksumBlock],
    block_size: usize,
) -> Vec<Instruction> {
    let mut instructions = Vec::new();

    if new_value.is_empty() {
        return instructions;
    }

    if block_size == 0 || base.is_empty() {
        instructions.push(Instruction::Literal(new_value.to_vec()));
        return instructions;
    }

    let lookup = ChecksumLookup::new(base);
    let len = new_value.len();
    let mut literal_start = 0;
    let mut offset = 0;
    let mut rolling = RollingChecksum::default();
    let mut fresh_window = true;

    while offset + block_size <= len {
        let window = &new_value[offset..offset + block_size];

        if fresh_window {
            rolling.update_block(window);
            fresh_window = false;
        } else {
            rolling.roll_byte(new_value[offset - 1], new_value[offset + block_size - 1]);
        }

        match lookup.find(rolling.digest(), window) {
            Some(index) => {
                flush_literal(&mut instructions, &new_value[literal_start..offset]);
                instructions.push(Instruction::Reference(index));

                offset += block_size;
                literal_start = offset;
                fresh_window = true;
            }
            None => offset += 1,
        }
    }

    let max_tail = (block_size - 1).min(len - literal_start);
    for tail_len in (1..=max_tail).rev() {
        let start = len - tail_len;
        let window = &new_value[start..];

        if let Some(index) = lookup.find(RollingChecksum::checksum(window), window) {
            flush_literal(&mut instructions, &new_value[literal_start..start]);
            instructions.push(Instruction::Reference(index));
            literal_start = len;
            break;
        }
    }

    flush_literal(&mut instructions, &new_value[literal_start..]);
    instructions
}

fn flush_literal(instructions: &mut Vec<Instruction>, pending: &[u8]) {
    if !pending.is_empty() {
        instructions.push(Instruction::Literal(pending.to_vec()));
    }
}

/// Number of blocks a value of `len` bytes is split into
pub fn block_count(len: usize, block_size: usize) -> usize {
    if block_size == 0 {
        return 0;
    }
    len.div_ceil(block_size)
}

fn block_range(
    base_len: usize,
    block_size: usize,
    index: u32,
    block_count: usize,
) -> DeltaResult<Range<usize>> {
    if index as usize >= block_count {
        return Err(DeltaError::ReferenceOutOfRange { index, block_count });
    }

    let start = index as usize * block_size;
    let end = (start + block_size).min(base_len);
    Ok(start..end)
}

/// Replay `instructions` against `base`
///
/// The output length is computed first and the buffer allocated once.
pub fn reconstruct(
    base: &[u8],
    instructions: &[Instruction],
    block_size: usize,
) -> DeltaResult<Vec<u8>> {
    let block_count = block_count(base.len(), block_size);

    let mut total = 0usize;
    for instr in instructions {
        total += match instr {
            Instruction::Literal(data) => data.len(),
            Instruction::Reference(index) => {
                block_range(base.len(), block_size, *index, block_count)?.len()
            }
        };
    }

    let mut output = Vec::with_capacity(total);
    for instr in instructions {
        match instr {
            Instruction::Literal(data) => output.extend_from_slice(data),
            Instruction::Reference(index) => {
                let range = block_range(base.len(), block_size, *index, block_count)?;
                output.extend_from_slice(&base[range]);
            }
        }
    }

    Ok(output)
}

/// Summary of one diff, for logs and metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaStats {
    pub referenced_bytes: u64,
    pub literal_bytes: u64,
    pub reference_ops: usize,
    pub literal_ops: usize,
    /// Size of the encoded instruction payload on the wire
    pub payload_size: usize,
    /// Size of the value being synchronized
    pub target_size: u64,
}

impl DeltaStats {
    pub fn new(instructions: &[Instruction], target_size: usize, payload_size: usize) -> Self {
        let mut stats = DeltaStats {
            payload_size,
            target_size: target_size as u64,
            ..Default::default()
        };

        for instr in instructions {
            match instr {
                Instruction::Reference(_) => stats.reference_ops += 1,
                Instruction::Literal(data) => {
                    stats.literal_ops += 1;
                    stats.literal_bytes += data.len() as u64;
                }
            }
        }

        stats.referenced_bytes = stats.target_size.saturating_sub(stats.literal_bytes);
        stats
    }

    /// Percentage of the target rebuilt from base blocks
    pub fn copy_ratio(&self) -> f64 {
        if self.target_size == 0 {
            return 0.0;
        }
        self.referenced_bytes as f64 / self.target_size as f64 * 100.0
    }

    /// Bytes not sent compared to a full transfer
    pub fn bytes_saved(&self) -> u64 {
        self.target_size.saturating_sub(self.payload_size as u64)
    }

    /// Bandwidth savings compared to full transfer
    pub fn savings_ratio(&self) -> f64 {
        if self.target_size == 0 {
            return 0.0;
        }
        (1.0 - self.payload_size as f64 / self.target_size as f64) * 100.0
    }
}

impl std::fmt::Display for DeltaStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Delta: {} referenced ({:.1}%), {} literal, {} total ops, {:.1}% savings",
            self.referenced_bytes,
            self.copy_ratio(),
            self.literal_bytes,
            self.reference_ops + self.literal_ops,
            self.savings_ratio()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::signature::compute_checksums;

    fn diff(base: &[u8], new_value: &[u8], block_size: usize) -> Vec<Instruction> {
        let checksums = compute_checksums(base, block_size);
        find_instructions(new_value, &checksums, block_size)
    }

    fn literal(data: &[u8]) -> Instruction {
        Instruction::Literal(data.to_vec())
    }

    #[test]
    fn test_swiss_cities() {
        let base = b"ZurichGenevaLuganoAAA";
        let new_value = b"AzurichGenevaLuganoAbbLuganoAAA";

        let instructions = diff(base, new_value, 6);
        assert_eq!(
            instructions,
            vec![
                literal(b"Azurich"),
                Instruction::Reference(1),
                Instruction::Reference(2),
                literal(b"Abb"),
                Instruction::Reference(2),
                Instruction::Reference(3),
            ]
        );

        let rebuilt = reconstruct(base, &instructions, 6).unwrap();
        assert_eq!(rebuilt, new_value);
    }

    #[test]
    fn test_identical_values_are_pure_references() {
        for data in [&b"Hello, World! This is test data."[..], b"ZurichGenevaLuganoAAA"] {
            let instructions = diff(data, data, 6);

            assert!(instructions.iter().all(|i| !i.is_literal()));
            assert_eq!(reconstruct(data, &instructions, 6).unwrap(), data);
        }
    }

    #[test]
    fn test_no_common_content_is_single_literal() {
        let base = b"AAAAAAAAAAAAAAAA";
        let new_value = b"BBBBBBBBBBBBBBBBBB";

        let instructions = diff(base, new_value, 4);
        assert_eq!(instructions, vec![literal(new_value)]);
        assert_eq!(reconstruct(base, &instructions, 4).unwrap(), new_value);
    }

    #[test]
    fn test_weak_collision_is_not_a_match() {
        let instructions = diff(b"bcbbcb", b"cbbbbc", 6);
        assert_eq!(instructions, vec![literal(b"cbbbbc")]);
    }

    #[test]
    fn test_deterministic() {
        let base = b"the cat sat on the mat, the cat sat on the hat".to_vec();
        let new_value = b"a cat sat on the mat; the dog sat on the hat!".to_vec();

        let first = diff(&base, &new_value, 5);
        let second = diff(&base, &new_value, 5);
        assert_eq!(first, second);
    }

    #[test]
    fn test_literal_runs_are_never_split() {
        let instructions = diff(b"AAAABBBBCCCCDDDD", b"AAAAXXXXYYYYCCCCDDDD", 4);

        assert_eq!(
            instructions,
            vec![
                Instruction::Reference(0),
                literal(b"XXXXYYYY"),
                Instruction::Reference(2),
                Instruction::Reference(3),
            ]
        );
        for pair in instructions.windows(2) {
            assert!(!(pair[0].is_literal() && pair[1].is_literal()));
        }
    }

    #[test]
    fn test_empty_values() {
        assert!(diff(b"something", b"", 4).is_empty());
        assert_eq!(reconstruct(b"something", &[], 4).unwrap(), b"");

        let instructions = diff(b"", b"fresh", 4);
        assert_eq!(instructions, vec![literal(b"fresh")]);
        assert_eq!(reconstruct(b"", &instructions, 4).unwrap(), b"fresh");
    }

    #[test]
    fn test_zero_block_size() {
        let instructions = diff(b"base", b"value", 0);
        assert_eq!(instructions, vec![literal(b"value")]);
        assert_eq!(reconstruct(b"base", &instructions, 0).unwrap(), b"value");
    }

    #[test]
    fn test_new_value_shorter_than_block() {
        // Only the short last block of the base can match
        let instructions = diff(b"GenevaAAA", b"AAA", 6);
        assert_eq!(instructions, vec![Instruction::Reference(1)]);

        let instructions = diff(b"GenevaAAA", b"xyAAA", 6);
        assert_eq!(instructions, vec![literal(b"xy"), Instruction::Reference(1)]);
    }

    #[test]
    fn test_reference_out_of_range() {
        let err = reconstruct(b"ZurichGeneva", &[Instruction::Reference(2)], 6).unwrap_err();
        assert_eq!(
            err,
            DeltaError::ReferenceOutOfRange {
                index: 2,
                block_count: 2
            }
        );

        let err = reconstruct(b"", &[Instruction::Reference(0)], 6).unwrap_err();
        assert!(matches!(err, DeltaError::ReferenceOutOfRange { .. }));
    }

    #[test]
    fn test_stats() {
        let base = b"AAAABBBBCCCCDDDD";
        let target = b"AAAAXXXXCCCCDDDD";
        let instructions = diff(base, target, 4);

        let stats = DeltaStats::new(&instructions, target.len(), 10);
        assert_eq!(stats.referenced_bytes, 12);
        assert_eq!(stats.literal_bytes, 4);
        assert_eq!(stats.reference_ops, 3);
        assert_eq!(stats.literal_ops, 1);
        assert_eq!(stats.bytes_saved(), 6);
        assert_eq!(stats.copy_ratio(), 75.0);
    }
}
