use crate::compute::ComputeError;
use crate::network::NetworkError;
use crate::protocol::ProtocolError;
use crate::storage::StorageKey;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplicationError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("{key} needs {size} bytes on the wire, over the {limit} byte limit")]
    ValueTooLarge {
        key: StorageKey,
        size: usize,
        limit: usize,
    },
}

impl ReplicationError {
    /// Transient failures are retried on the next tick
    pub fn is_transient(&self) -> bool {
        matches!(self, ReplicationError::Network(_))
    }
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;
