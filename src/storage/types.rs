//! Key identity for stored values

use crate::storage::error::StorageError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 160-bit identifier used for locations, domains, contents and peers
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Id160([u8; Id160::LEN]);

impl Id160 {
    pub const LEN: usize = 20;
    pub const ZERO: Id160 = Id160([0u8; Id160::LEN]);
    pub const MAX: Id160 = Id160([0xffu8; Id160::LEN]);

    pub const fn new(bytes: [u8; Id160::LEN]) -> Self {
        Self(bytes)
    }

    /// Content hash: the first 160 bits of Blake3
    pub fn hash(data: &[u8]) -> Self {
        let full = blake3::hash(data);
        let mut bytes = [0u8; Id160::LEN];
        bytes.copy_from_slice(&full.as_bytes()[..Id160::LEN]);
        Self(bytes)
    }

    /// Id with `n` in its low 64 bits, big-endian
    pub fn from_u64(n: u64) -> Self {
        let mut bytes = [0u8; Id160::LEN];
        bytes[Id160::LEN - 8..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, StorageError> {
        let decoded = hex::decode(s).map_err(|e| StorageError::InvalidId(format!("{}: {}", s, e)))?;
        let bytes: [u8; Id160::LEN] = decoded.try_into().map_err(|v: Vec<u8>| {
            StorageError::InvalidId(format!(
                "{}: expected {} bytes, got {}",
                s,
                Id160::LEN,
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; Id160::LEN] {
        &self.0
    }

    /// XOR distance; smaller means closer
    pub fn distance(&self, other: &Id160) -> Id160 {
        let mut bytes = [0u8; Id160::LEN];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Id160(bytes)
    }
}

impl fmt::Display for Id160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Id160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id160({})", &self.to_hex()[..12])
    }
}

impl FromStr for Id160 {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Hex in configuration files, raw bytes on the wire
impl Serialize for Id160 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_hex())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Id160 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Id160::from_hex(&s).map_err(de::Error::custom)
        } else {
            <[u8; Id160::LEN]>::deserialize(deserializer).map(Id160)
        }
    }
}

/// Address of a stored value
///
/// Ordered location first so all values under one location are contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    pub location: Id160,
    pub domain: Id160,
    pub content: Id160,
}

impl StorageKey {
    pub fn new(location: Id160, domain: Id160, content: Id160) -> Self {
        Self {
            location,
            domain,
            content,
        }
    }

    /// Smallest key under `location`
    pub fn first_under(location: Id160) -> Self {
        Self::new(location, Id160::ZERO, Id160::ZERO)
    }

    /// Largest key under `location`
    pub fn last_under(location: Id160) -> Self {
        Self::new(location, Id160::MAX, Id160::MAX)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            &self.location.to_hex()[..8],
            &self.domain.to_hex()[..8],
            &self.content.to_hex()[..8]
        )
    }
}

/// Storage statistics
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub entries: u64,
    pub locations: u64,
    pub bytes: u64,
}

impl fmt::Display for StorageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Storage: {} values under {} locations, {:.2}KB",
            self.entries,
            self.locations,
            self.bytes as f64 / 1024.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = Id160::hash(b"Zurich");
        let parsed: Id160 = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);

        assert!(Id160::from_hex("abcd").is_err());
        assert!(Id160::from_hex("not hex").is_err());
    }

    #[test]
    fn test_content_hash_distinguishes_values() {
        assert_eq!(Id160::hash(b"value"), Id160::hash(b"value"));
        assert_ne!(Id160::hash(b"value"), Id160::hash(b"value2"));
    }

    #[test]
    fn test_xor_distance() {
        let a = Id160::from_u64(0b1010);
        let b = Id160::from_u64(0b0110);
        assert_eq!(a.distance(&b), Id160::from_u64(0b1100));
        assert_eq!(a.distance(&a), Id160::ZERO);
    }

    #[test]
    fn test_serde_forms() {
        let id = Id160::from_u64(42);

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        assert_eq!(serde_json::from_str::<Id160>(&json).unwrap(), id);

        let bin = bincode::serialize(&id).unwrap();
        assert_eq!(bin.len(), Id160::LEN);
        assert_eq!(bincode::deserialize::<Id160>(&bin).unwrap(), id);
    }

    #[test]
    fn test_key_ordering_is_location_first() {
        let low = StorageKey::new(Id160::from_u64(1), Id160::MAX, Id160::MAX);
        let high = StorageKey::new(Id160::from_u64(2), Id160::ZERO, Id160::ZERO);
        assert!(low < high);
        assert!(StorageKey::first_under(Id160::from_u64(1)) <= low);
        assert!(low <= StorageKey::last_under(Id160::from_u64(1)));
    }
}
