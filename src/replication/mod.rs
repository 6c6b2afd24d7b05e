//! Replication of stored values to the replicas of their location
//!
//! The tracker decides which locations this node owns, the executor keeps
//! the replicas of those locations in sync, and the factor estimator
//! decides how many replicas there should be.

pub mod error;
pub mod executor;
pub mod factor;
pub mod peers;
pub mod tracker;
pub mod types;

pub use error::{ReplicationError, ReplicationResult};
pub use executor::ReplicationExecutor;
pub use factor::{ReplicationFactorConfig, ReplicationFactorEstimator};
pub use peers::{PeerDirectory, StaticPeerDirectory};
pub use tracker::{LocalResponsibilityTracker, ResponsibilityTracker};
pub use types::{
    ExecutorStats, LocationReport, ReconcileOutcome, ReplicationConfig, ResponsibilityEvent,
    TickReport,
};
