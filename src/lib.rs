//! Replisync - delta-based value replication for a DHT
//!
//! Keeps the replicas of every location a node is responsible for in sync,
//! sending whole values where a replica has nothing and rsync-style diffs
//! where it holds an older version.

pub mod compute;
pub mod config;
pub mod metrics;
pub mod network;
pub mod protocol;
pub mod replication;
pub mod storage;
pub mod sync;

pub use compute::{ComputeError, ComputePool};
pub use config::{ConfigError, NodeConfig};
pub use network::{LocalTransport, PeerAddress, QuicTransport, SyncTransport};
pub use protocol::{Request, Response, SyncHandler};
pub use replication::{
    LocalResponsibilityTracker, ReplicationConfig, ReplicationExecutor, StaticPeerDirectory,
};
pub use storage::{Id160, MemoryStorage, Storage, StorageKey};
