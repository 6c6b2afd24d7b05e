use std::time::Duration;
use thiserror::Error;

/// Transport failures; all of them are worth retrying later
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Could not connect: {0}")]
    ConnectionFailed(String),

    #[error("Peer {0} is unreachable")]
    PeerUnreachable(String),

    #[error("Sending request failed: {0}")]
    SendFailed(String),

    #[error("Reading response failed: {0}")]
    ReceiveFailed(String),

    #[error("No response within {0:?}")]
    Timeout(Duration),

    #[error("Frame codec: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("QUIC connection: {0}")]
    QuicError(String),

    #[error("TLS setup: {0}")]
    CertificateError(String),
}

impl From<quinn::ConnectionError> for NetworkError {
    fn from(err: quinn::ConnectionError) -> Self {
        NetworkError::QuicError(err.to_string())
    }
}

impl From<quinn::ConnectError> for NetworkError {
    fn from(err: quinn::ConnectError) -> Self {
        NetworkError::ConnectionFailed(err.to_string())
    }
}

impl From<quinn::WriteError> for NetworkError {
    fn from(err: quinn::WriteError) -> Self {
        NetworkError::SendFailed(err.to_string())
    }
}

impl From<quinn::ReadToEndError> for NetworkError {
    fn from(err: quinn::ReadToEndError) -> Self {
        NetworkError::ReceiveFailed(err.to_string())
    }
}

impl From<crate::protocol::ProtocolError> for NetworkError {
    fn from(err: crate::protocol::ProtocolError) -> Self {
        NetworkError::Codec(err.to_string())
    }
}

pub type NetworkResult<T> = Result<T, NetworkError>;
