pub mod error;
pub mod quic_transport;
pub mod transport;
pub mod types;

pub use error::{NetworkError, NetworkResult};
pub use quic_transport::QuicTransport;
pub use transport::{LocalTransport, SentRequest, SyncTransport};
pub use types::{ConnectionConfig, NetworkStats, PeerAddress};
