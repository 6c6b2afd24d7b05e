use crate::compute::ComputeError;
use crate::protocol::types::RequestKind;
use crate::storage::{StorageError, StorageKey};
use crate::sync::DeltaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Reconstruction error: {0}")]
    Delta(#[from] DeltaError),

    #[error("Reconstructed value for {key} does not match the expected hash")]
    HashMismatch { key: StorageKey },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Compute error: {0}")]
    Compute(#[from] ComputeError),

    #[error("Unexpected response to {expected} request: {got}")]
    UnexpectedResponse { expected: RequestKind, got: String },

    #[error("Remote failure: {0}")]
    Remote(String),
}

impl From<bincode::Error> for ProtocolError {
    fn from(err: bincode::Error) -> Self {
        ProtocolError::Codec(err.to_string())
    }
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;
