//! Client side of replication
//!
//! For every location this node is responsible for, each replica is brought
//! up to date with INFO followed by COPY or SYNC. Replicas of a location are
//! handled concurrently; the values sent to one replica go one at a time.
//! Failures stay with the replica they happened on and are retried on the
//! next tick.

use crate::compute::ComputePool;
use crate::metrics::{self, ReconcileTimer};
use crate::network::{PeerAddress, SyncTransport};
use crate::protocol::{
    codec, now_millis, CopyRequest, InfoRequest, InfoStatus, ProtocolError, ProtocolResult,
    Request, RequestKind, Response, SyncRequest,
};
use crate::replication::error::{ReplicationError, ReplicationResult};
use crate::replication::factor::ReplicationFactorEstimator;
use crate::replication::peers::PeerDirectory;
use crate::replication::tracker::ResponsibilityTracker;
use crate::replication::types::{
    ExecutorStats, ExecutorStatsInner, LocationReport, ReconcileOutcome, ReplicationConfig,
    ResponsibilityEvent, TickReport,
};
use crate::storage::{Id160, Storage, StorageKey};
use crate::sync::{find_instructions, DeltaStats};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

/// Full pushes are split into COPY requests of at most this many value bytes
const MAX_COPY_BATCH_BYTES: usize = 4 * 1024 * 1024;

/// Releases a location's in-flight tag when dropped
struct InFlightGuard {
    in_flight: Arc<DashMap<Id160, ()>>,
    location: Id160,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.location);
    }
}

pub struct ReplicationExecutor {
    config: Arc<ReplicationConfig>,
    storage: Arc<dyn Storage>,
    tracker: Arc<dyn ResponsibilityTracker>,
    peers: Arc<dyn PeerDirectory>,
    transport: Arc<dyn SyncTransport>,
    compute: ComputePool,
    factor: Arc<ReplicationFactorEstimator>,

    // Locations currently being reconciled
    in_flight: Arc<DashMap<Id160, ()>>,

    stats: Arc<ExecutorStatsInner>,
}

impl ReplicationExecutor {
    pub fn new(
        config: ReplicationConfig,
        storage: Arc<dyn Storage>,
        tracker: Arc<dyn ResponsibilityTracker>,
        peers: Arc<dyn PeerDirectory>,
        transport: Arc<dyn SyncTransport>,
        compute: ComputePool,
    ) -> Self {
        let factor = ReplicationFactorEstimator::new(config.factor.clone());

        Self {
            config: Arc::new(config),
            storage,
            tracker,
            peers,
            transport,
            compute,
            factor: Arc::new(factor),
            in_flight: Arc::new(DashMap::new()),
            stats: Arc::new(ExecutorStatsInner::default()),
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn stats(&self) -> ExecutorStats {
        self.stats.snapshot()
    }

    pub fn replication_factor(&self) -> usize {
        self.factor.current()
    }

    /// Drive the executor until `shutdown` turns true
    ///
    /// Ticks and event reactions run as tasks so a slow reconciliation never
    /// holds up the loop. Outstanding tasks are aborted on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.tracker.subscribe();
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tasks = JoinSet::new();

        tracing::info!(
            "Replication executor started (tick {:?}, block size {})",
            self.config.tick_interval,
            self.config.block_size
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let executor = self.clone();
                    tasks.spawn(async move {
                        executor.tick().await;
                    });
                }
                event = events.recv() => match event {
                    Ok(event) => {
                        let executor = self.clone();
                        tasks.spawn(async move {
                            executor.handle_event(event).await;
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(
                            "Missed {} responsibility events; next tick will catch up",
                            missed
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = result {
                        if e.is_panic() {
                            tracing::error!("Replication task panicked: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tasks.shutdown().await;
        tracing::info!("Replication executor stopped");
    }

    pub async fn handle_event(&self, event: ResponsibilityEvent) {
        match event {
            ResponsibilityEvent::Gained { location } => {
                self.on_responsibility_gained(location).await;
            }
            ResponsibilityEvent::Lost {
                location,
                new_owner,
                delayed,
            } => {
                if let Err(e) = self
                    .on_responsibility_lost(location, &new_owner, delayed)
                    .await
                {
                    tracing::warn!("Push of {} to {} failed: {}", location, new_owner, e);
                }
            }
        }
    }

    /// This node now owns `location`: make sure its replicas exist
    pub async fn on_responsibility_gained(&self, location: Id160) -> LocationReport {
        tracing::debug!("Responsible for {}", location);
        self.reconcile_location(location).await
    }

    /// `new_owner` now owns `location`: hand it everything held locally
    ///
    /// Delayed pushes wait a random time up to `max_push_jitter` first.
    pub async fn on_responsibility_lost(
        &self,
        location: Id160,
        new_owner: &PeerAddress,
        delayed: bool,
    ) -> ReplicationResult<usize> {
        if delayed {
            let jitter = self.push_jitter();
            tracing::debug!("Delaying push of {} by {:?}", location, jitter);
            tokio::time::sleep(jitter).await;
        }

        self.push_location(&location, new_owner).await
    }

    fn push_jitter(&self) -> Duration {
        let max = self.config.max_push_jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    /// Send every value under `location` to `peer` with COPY
    pub async fn push_location(
        &self,
        location: &Id160,
        peer: &PeerAddress,
    ) -> ReplicationResult<usize> {
        let values = self.storage.values_under(location);
        let mut stored = 0usize;

        let mut batch = BTreeMap::new();
        let mut batch_bytes = 0usize;

        for (key, value) in values {
            if let Err(e) = self.check_size(key, value.len()) {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Not pushing to {}: {}", peer, e);
                continue;
            }

            if !batch.is_empty() && batch_bytes + value.len() > MAX_COPY_BATCH_BYTES {
                let request = CopyRequest::new(std::mem::take(&mut batch));
                stored += self.send_copy(peer, request).await?;
                batch_bytes = 0;
            }

            batch_bytes += value.len();
            batch.insert(key, value.to_vec());
        }

        if !batch.is_empty() {
            stored += self.send_copy(peer, CopyRequest::new(batch)).await?;
        }

        self.stats.pushes.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Pushed {} values under {} to {}", stored, location, peer);
        Ok(stored)
    }

    /// Recompute the replication factor and reconcile every responsible
    /// location
    pub async fn tick(&self) -> TickReport {
        let factor = self.factor.recompute(self.peers.cluster_size());
        metrics::set_replication_factor(factor);

        let locations = self.tracker.responsible_locations();
        let reports: Vec<LocationReport> = stream::iter(locations)
            .map(|location| self.reconcile_location(location))
            .buffer_unordered(self.config.max_concurrent_locations.max(1))
            .collect()
            .await;

        let report = TickReport {
            replication_factor: factor,
            locations: reports,
        };
        if report.locations.is_empty() {
            tracing::debug!("{}", report);
        } else {
            tracing::info!("{}", report);
        }
        report
    }

    fn try_claim(&self, location: Id160) -> Option<InFlightGuard> {
        match self.in_flight.entry(location) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(());
                Some(InFlightGuard {
                    in_flight: self.in_flight.clone(),
                    location,
                })
            }
        }
    }

    /// Bring every replica of `location` up to date
    ///
    /// Skipped when another reconciliation of the same location is running.
    pub async fn reconcile_location(&self, location: Id160) -> LocationReport {
        let Some(_guard) = self.try_claim(location) else {
            tracing::debug!("Reconciliation of {} already running, skipping", location);
            return LocationReport::skipped(location);
        };

        let timer = ReconcileTimer::start();
        let mut report = LocationReport::new(location);

        let factor = self.factor.current();
        let local = self.peers.local();
        let replicas: Vec<PeerAddress> = self
            .peers
            .closest_replicas(&location, factor + 1)
            .into_iter()
            .filter(|peer| peer.id != local.id)
            .take(factor)
            .collect();
        report.replicas = replicas.len();

        let values = self.storage.values_under(&location);
        if replicas.is_empty() || values.is_empty() {
            return report;
        }

        let results = futures::future::join_all(
            replicas
                .iter()
                .map(|replica| self.reconcile_replica(replica, &values)),
        )
        .await;

        for result in results.iter().flatten() {
            match result {
                Ok(outcome) => report.record(outcome),
                Err(_) => report.failures += 1,
            }
        }

        tracing::debug!(
            "Reconciled {} with {} replicas in {:?}",
            location,
            report.replicas,
            timer.elapsed()
        );
        timer.stop();
        report
    }

    async fn reconcile_replica(
        &self,
        replica: &PeerAddress,
        values: &[(StorageKey, Bytes)],
    ) -> Vec<ReplicationResult<ReconcileOutcome>> {
        let mut results = Vec::with_capacity(values.len());

        for (key, value) in values {
            let result = self.reconcile_value(replica, *key, value.clone()).await;

            match &result {
                Ok(outcome) => {
                    self.factor.record_success();
                    tracing::debug!("{} on {}: {:?}", key, replica, outcome);
                }
                Err(e) => {
                    if e.is_transient() {
                        self.factor.record_failure();
                    }
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Reconciling {} with {} failed: {}", key, replica, e);
                }
            }
            results.push(result);
        }

        results
    }

    /// INFO, then COPY or SYNC depending on the answer
    pub async fn reconcile_value(
        &self,
        replica: &PeerAddress,
        key: StorageKey,
        value: Bytes,
    ) -> ReplicationResult<ReconcileOutcome> {
        let request = Request::Info(InfoRequest::new(key, &value));
        let info = match self.send(replica, request).await? {
            Response::Info(info) => info,
            other => return Err(unexpected(RequestKind::Info, &other).into()),
        };

        self.stats.infos_sent.fetch_add(1, Ordering::Relaxed);
        metrics::record_info(info.status);

        match info.status {
            InfoStatus::Ok => {
                self.stats.up_to_date.fetch_add(1, Ordering::Relaxed);
                Ok(ReconcileOutcome::UpToDate)
            }
            InfoStatus::NotFound => {
                let bytes = value.len();
                self.check_size(key, bytes)?;
                self.send_copy(replica, CopyRequest::single(key, value.to_vec()))
                    .await?;
                Ok(ReconcileOutcome::Copied { bytes })
            }
            InfoStatus::Partial => {
                let checksums = info.checksums.ok_or_else(|| {
                    ProtocolError::Codec("PARTIAL response without checksums".into())
                })?;
                self.sync_value(replica, key, value, checksums).await
            }
        }
    }

    async fn sync_value(
        &self,
        replica: &PeerAddress,
        key: StorageKey,
        value: Bytes,
        checksums: Vec<u8>,
    ) -> ReplicationResult<ReconcileOutcome> {
        let expected_hash = Id160::hash(&value);
        let block_size = self.config.block_size;

        let (instructions, stats) = self
            .compute
            .run(move || -> ProtocolResult<(Vec<u8>, DeltaStats)> {
                let checksums = codec::decode_checksums(&checksums)?;
                let instructions = find_instructions(&value, &checksums, block_size);
                let payload = codec::encode_instructions(&instructions)?;
                let stats = DeltaStats::new(&instructions, value.len(), payload.len());
                Ok((payload, stats))
            })
            .await??;
        self.check_size(key, instructions.len())?;

        let request = Request::Sync(SyncRequest {
            key,
            expected_hash,
            timestamp: now_millis(),
            instructions,
        });

        let ack = match self.send(replica, request).await? {
            Response::SyncAck(ack) => ack,
            other => return Err(unexpected(RequestKind::Sync, &other).into()),
        };

        self.stats.syncs_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_sent
            .fetch_add(stats.payload_size as u64, Ordering::Relaxed);
        self.stats
            .bytes_saved
            .fetch_add(stats.bytes_saved(), Ordering::Relaxed);
        metrics::record_sync(ack, stats.payload_size, stats.bytes_saved());

        tracing::debug!("SYNC {} to {}: {}", key, replica, stats);
        Ok(ReconcileOutcome::Synced { stats, ack })
    }

    /// Values too large for one frame can not be replicated
    fn check_size(&self, key: StorageKey, size: usize) -> ReplicationResult<()> {
        let limit = self.config.max_value_size;
        if size > limit {
            return Err(ReplicationError::ValueTooLarge { key, size, limit });
        }
        Ok(())
    }

    async fn send_copy(&self, peer: &PeerAddress, request: CopyRequest) -> ReplicationResult<usize> {
        let bytes = request.payload_len();

        let stored = match self.send(peer, Request::Copy(request)).await? {
            Response::CopyAck { stored } => stored as usize,
            other => return Err(unexpected(RequestKind::Copy, &other).into()),
        };

        self.stats.copies_sent.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
        metrics::record_copy(bytes);
        Ok(stored)
    }

    /// One exchange; a `Failed` response becomes a remote error
    async fn send(&self, peer: &PeerAddress, request: Request) -> ReplicationResult<Response> {
        let kind = request.kind();

        match self.transport.request(peer, request).await {
            Ok(Response::Failed { reason }) => {
                metrics::record_rpc_failure(kind);
                Err(ProtocolError::Remote(reason).into())
            }
            Ok(response) => Ok(response),
            Err(e) => {
                metrics::record_rpc_failure(kind);
                Err(e.into())
            }
        }
    }
}

fn unexpected(expected: RequestKind, got: &Response) -> ProtocolError {
    ProtocolError::UnexpectedResponse {
        expected,
        got: got.describe(),
    }
}

impl Clone for ReplicationExecutor {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            storage: self.storage.clone(),
            tracker: self.tracker.clone(),
            peers: self.peers.clone(),
            transport: self.transport.clone(),
            compute: self.compute.clone(),
            factor: self.factor.clone(),
            in_flight: self.in_flight.clone(),
            stats: self.stats.clone(),
        }
    }
}
