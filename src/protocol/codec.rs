//! Wire encoding
//!
//! Frames are plain bincode. Checksum and instruction lists travel inside
//! frames as opaque payloads: one tag byte, then bincode, LZ4-compressed
//! when that makes a large payload smaller.

use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::sync::{ChecksumBlock, Instruction};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Payload tags
const TAG_RAW: u8 = 0;
const TAG_LZ4: u8 = 1;

/// Payloads up to this size are never compressed
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Upper bound on a decompressed payload
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Encode a message frame
pub fn encode_frame<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    Ok(bincode::serialize(message)?)
}

/// Decode a message frame
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> ProtocolResult<T> {
    Ok(bincode::deserialize(frame)?)
}

pub fn encode_payload<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let raw = bincode::serialize(value)?;

    if raw.len() > COMPRESSION_THRESHOLD {
        let compressed = lz4_flex::compress_prepend_size(&raw);
        if compressed.len() < raw.len() {
            let mut payload = Vec::with_capacity(compressed.len() + 1);
            payload.push(TAG_LZ4);
            payload.extend_from_slice(&compressed);
            return Ok(payload);
        }
    }

    let mut payload = Vec::with_capacity(raw.len() + 1);
    payload.push(TAG_RAW);
    payload.extend_from_slice(&raw);
    Ok(payload)
}

pub fn decode_payload<T: DeserializeOwned>(payload: &[u8]) -> ProtocolResult<T> {
    let (&tag, body) = payload
        .split_first()
        .ok_or_else(|| ProtocolError::Codec("empty payload".into()))?;

    match tag {
        TAG_RAW => Ok(bincode::deserialize(body)?),
        TAG_LZ4 => {
            let size = body
                .get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize)
                .ok_or_else(|| ProtocolError::Codec("truncated compressed payload".into()))?;
            if size > MAX_PAYLOAD_SIZE {
                return Err(ProtocolError::Codec(format!(
                    "payload of {} bytes exceeds limit",
                    size
                )));
            }

            let raw = lz4_flex::decompress_size_prepended(body)
                .map_err(|e| ProtocolError::Codec(format!("decompression failed: {}", e)))?;
            Ok(bincode::deserialize(&raw)?)
        }
        other => Err(ProtocolError::Codec(format!("unknown payload tag {}", other))),
    }
}

pub fn encode_checksums(checksums: &[ChecksumBlock]) -> ProtocolResult<Vec<u8>> {
    encode_payload(&checksums)
}

pub fn decode_checksums(payload: &[u8]) -> ProtocolResult<Vec<ChecksumBlock>> {
    decode_payload(payload)
}

pub fn encode_instructions(instructions: &[Instruction]) -> ProtocolResult<Vec<u8>> {
    encode_payload(&instructions)
}

pub fn decode_instructions(payload: &[u8]) -> ProtocolResult<Vec<Instruction>> {
    decode_payload(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{InfoRequest, Request};
    use crate::storage::{Id160, StorageKey};
    use crate::sync::compute_checksums;

    #[test]
    fn test_small_payload_is_raw() {
        let instructions = vec![
            Instruction::Literal(b"Azurich".to_vec()),
            Instruction::Reference(1),
        ];
        let payload = encode_instructions(&instructions).unwrap();

        assert_eq!(payload[0], TAG_RAW);
        assert_eq!(decode_instructions(&payload).unwrap(), instructions);
    }

    #[test]
    fn test_large_compressible_payload_is_compressed() {
        let instructions = vec![Instruction::Literal(vec![b'A'; 8192])];
        let payload = encode_instructions(&instructions).unwrap();

        assert_eq!(payload[0], TAG_LZ4);
        assert!(payload.len() < 8192);
        assert_eq!(decode_instructions(&payload).unwrap(), instructions);
    }

    #[test]
    fn test_checksums_survive_encoding() {
        let value: Vec<u8> = (0..4096u32).map(|i| (i * 31 % 251) as u8).collect();
        let checksums = compute_checksums(&value, 32);

        let payload = encode_checksums(&checksums).unwrap();
        assert_eq!(decode_checksums(&payload).unwrap(), checksums);
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(matches!(decode_instructions(&[]), Err(ProtocolError::Codec(_))));
        assert!(matches!(decode_instructions(&[9, 1, 2]), Err(ProtocolError::Codec(_))));
        assert!(matches!(decode_instructions(&[TAG_LZ4, 1]), Err(ProtocolError::Codec(_))));

        // Claims a decompressed size far beyond the limit
        let mut huge = vec![TAG_LZ4];
        huge.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(decode_instructions(&huge), Err(ProtocolError::Codec(_))));
    }

    #[test]
    fn test_frame_roundtrip() {
        let key = StorageKey::new(Id160::from_u64(1), Id160::from_u64(2), Id160::from_u64(3));
        let request = Request::Info(InfoRequest::new(key, b"Zurich"));

        let frame = encode_frame(&request).unwrap();
        match decode_frame::<Request>(&frame).unwrap() {
            Request::Info(info) => {
                assert_eq!(info.key, key);
                assert_eq!(info.value_hash, Id160::hash(b"Zurich"));
            }
            other => panic!("unexpected request {:?}", other),
        }
    }
}
