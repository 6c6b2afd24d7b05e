//! Replication types and configuration

use crate::config::duration_millis;
use crate::network::PeerAddress;
use crate::protocol::SyncAck;
use crate::replication::factor::ReplicationFactorConfig;
use crate::storage::Id160;
use crate::sync::DeltaStats;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Configuration for the replication executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Delta block size; both ends must agree
    pub block_size: usize,

    pub factor: ReplicationFactorConfig,

    /// How often responsible locations are reconciled
    #[serde(with = "duration_millis")]
    pub tick_interval: Duration,

    /// Upper bound of the random delay before a delayed push
    #[serde(with = "duration_millis")]
    pub max_push_jitter: Duration,

    /// Locations reconciled at once during a tick
    pub max_concurrent_locations: usize,

    /// Largest value or SYNC payload sent in one request; must leave room
    /// under the transport's frame limit
    pub max_value_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            block_size: 32,
            factor: ReplicationFactorConfig::default(),
            tick_interval: Duration::from_secs(60),
            max_push_jitter: Duration::from_secs(5),
            max_concurrent_locations: 16,
            max_value_size: 15 * 1024 * 1024,
        }
    }
}

/// Responsibility changes reported by the tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsibilityEvent {
    /// This node is now responsible for `location`
    Gained { location: Id160 },

    /// `new_owner` is now responsible for `location`
    Lost {
        location: Id160,
        new_owner: PeerAddress,
        delayed: bool,
    },
}

/// Result of reconciling one value with one replica
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Replica already held the value
    UpToDate,
    /// Replica had nothing; full value sent
    Copied { bytes: usize },
    /// Replica had a different value; instructions sent
    Synced { stats: DeltaStats, ack: SyncAck },
}

/// Result of reconciling one location against its replicas
#[derive(Debug, Clone, Default)]
pub struct LocationReport {
    pub location: Id160,
    /// Another reconciliation of this location was still running
    pub skipped: bool,
    pub replicas: usize,
    pub values: usize,
    pub up_to_date: usize,
    pub copied: usize,
    pub synced: usize,
    pub failures: usize,
}

impl LocationReport {
    pub fn new(location: Id160) -> Self {
        Self {
            location,
            ..Default::default()
        }
    }

    pub fn skipped(location: Id160) -> Self {
        Self {
            location,
            skipped: true,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &ReconcileOutcome) {
        self.values += 1;
        match outcome {
            ReconcileOutcome::UpToDate => self.up_to_date += 1,
            ReconcileOutcome::Copied { .. } => self.copied += 1,
            ReconcileOutcome::Synced { .. } => self.synced += 1,
        }
    }
}

/// Result of one periodic tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub replication_factor: usize,
    pub locations: Vec<LocationReport>,
}

impl TickReport {
    pub fn failures(&self) -> usize {
        self.locations.iter().map(|l| l.failures).sum()
    }

    pub fn skipped(&self) -> usize {
        self.locations.iter().filter(|l| l.skipped).count()
    }
}

impl std::fmt::Display for TickReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (copied, synced, up_to_date) = self.locations.iter().fold((0, 0, 0), |acc, l| {
            (acc.0 + l.copied, acc.1 + l.synced, acc.2 + l.up_to_date)
        });
        write!(
            f,
            "Tick: {} locations (factor {}), {} copied, {} synced, {} up to date, {} failures, {} skipped",
            self.locations.len(),
            self.replication_factor,
            copied,
            synced,
            up_to_date,
            self.failures(),
            self.skipped()
        )
    }
}

/// Internal stats counters
#[derive(Debug, Default)]
pub(crate) struct ExecutorStatsInner {
    pub infos_sent: AtomicU64,
    pub copies_sent: AtomicU64,
    pub syncs_sent: AtomicU64,
    pub up_to_date: AtomicU64,
    pub failures: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_saved: AtomicU64,
    pub pushes: AtomicU64,
}

impl ExecutorStatsInner {
    pub fn snapshot(&self) -> ExecutorStats {
        ExecutorStats {
            infos_sent: self.infos_sent.load(Ordering::Relaxed),
            copies_sent: self.copies_sent.load(Ordering::Relaxed),
            syncs_sent: self.syncs_sent.load(Ordering::Relaxed),
            up_to_date: self.up_to_date.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            pushes: self.pushes.load(Ordering::Relaxed),
        }
    }
}

/// Executor statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct ExecutorStats {
    pub infos_sent: u64,
    pub copies_sent: u64,
    pub syncs_sent: u64,
    pub up_to_date: u64,
    pub failures: u64,
    pub bytes_sent: u64,
    pub bytes_saved: u64,
    /// Full pushes to a new owner
    pub pushes: u64,
}
