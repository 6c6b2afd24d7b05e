//! INFO / COPY / SYNC messages

use crate::storage::{Id160, StorageKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Does the replica hold the caller's value?
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoRequest {
    pub key: StorageKey,
    /// Content hash of the caller's value
    pub value_hash: Id160,
    pub timestamp: i64,
}

impl InfoRequest {
    pub fn new(key: StorageKey, value: &[u8]) -> Self {
        Self {
            key,
            value_hash: Id160::hash(value),
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InfoStatus {
    /// Same content hash, nothing to do
    Ok,
    /// No value under the key
    NotFound,
    /// Different value; checksums attached
    Partial,
}

impl InfoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InfoStatus::Ok => "ok",
            InfoStatus::NotFound => "not_found",
            InfoStatus::Partial => "partial",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub status: InfoStatus,
    /// Echo of the request timestamp
    pub timestamp: i64,
    /// Encoded checksum list, only for `Partial`
    pub checksums: Option<Vec<u8>>,
}

/// Store these values verbatim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRequest {
    pub entries: BTreeMap<StorageKey, Vec<u8>>,
    pub timestamp: i64,
}

impl CopyRequest {
    pub fn new(entries: BTreeMap<StorageKey, Vec<u8>>) -> Self {
        Self {
            entries,
            timestamp: now_millis(),
        }
    }

    pub fn single(key: StorageKey, value: Vec<u8>) -> Self {
        Self::new(BTreeMap::from([(key, value)]))
    }

    pub fn payload_len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

/// Rebuild the value under `key` from the replica's own value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub key: StorageKey,
    /// Content hash of the value the instructions rebuild
    pub expected_hash: Id160,
    pub timestamp: i64,
    /// Encoded instruction list
    pub instructions: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAck {
    Applied,
    /// The replica already held the expected value
    NoOp,
}

impl SyncAck {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAck::Applied => "applied",
            SyncAck::NoOp => "noop",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Info(InfoRequest),
    Copy(CopyRequest),
    Sync(SyncRequest),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Info(_) => RequestKind::Info,
            Request::Copy(_) => RequestKind::Copy,
            Request::Sync(_) => RequestKind::Sync,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Info(InfoResponse),
    CopyAck { stored: u32 },
    SyncAck(SyncAck),
    /// The handler could not serve the request
    Failed { reason: String },
}

impl Response {
    pub fn describe(&self) -> String {
        match self {
            Response::Info(info) => format!("INFO {}", info.status.as_str()),
            Response::CopyAck { stored } => format!("COPY ack ({} stored)", stored),
            Response::SyncAck(ack) => format!("SYNC ack ({})", ack.as_str()),
            Response::Failed { reason } => format!("failure: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Info,
    Copy,
    Sync,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Info => "info",
            RequestKind::Copy => "copy",
            RequestKind::Sync => "sync",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Info => write!(f, "INFO"),
            RequestKind::Copy => write!(f, "COPY"),
            RequestKind::Sync => write!(f, "SYNC"),
        }
    }
}
