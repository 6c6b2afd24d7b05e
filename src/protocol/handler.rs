//! Server side of INFO / COPY / SYNC
//!
//! Each request is served on its own against local storage; nothing is
//! kept between requests. Writes to one key are serialized by its lock.

use crate::compute::ComputePool;
use crate::protocol::codec;
use crate::protocol::error::{ProtocolError, ProtocolResult};
use crate::protocol::types::{
    CopyRequest, InfoRequest, InfoResponse, InfoStatus, Request, RequestKind, Response, SyncAck,
    SyncRequest,
};
use crate::replication::ResponsibilityTracker;
use crate::storage::{Id160, KeyLocks, Storage};
use crate::sync::{compute_checksums, reconstruct};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Internal stats counters
#[derive(Debug, Default)]
struct HandlerStatsInner {
    infos: AtomicU64,
    copies: AtomicU64,
    syncs_applied: AtomicU64,
    syncs_noop: AtomicU64,
    failures: AtomicU64,
}

/// Handler statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct HandlerStats {
    pub infos: u64,
    pub copies: u64,
    pub syncs_applied: u64,
    pub syncs_noop: u64,
    pub failures: u64,
}

pub struct SyncHandler {
    storage: Arc<dyn Storage>,
    tracker: Arc<dyn ResponsibilityTracker>,
    locks: Arc<KeyLocks>,
    compute: ComputePool,
    block_size: usize,
    stats: Arc<HandlerStatsInner>,
}

impl SyncHandler {
    pub fn new(
        storage: Arc<dyn Storage>,
        tracker: Arc<dyn ResponsibilityTracker>,
        compute: ComputePool,
        block_size: usize,
    ) -> Self {
        Self {
            storage,
            tracker,
            locks: Arc::new(KeyLocks::new()),
            compute,
            block_size,
            stats: Arc::new(HandlerStatsInner::default()),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn stats(&self) -> HandlerStats {
        HandlerStats {
            infos: self.stats.infos.load(Ordering::Relaxed),
            copies: self.stats.copies.load(Ordering::Relaxed),
            syncs_applied: self.stats.syncs_applied.load(Ordering::Relaxed),
            syncs_noop: self.stats.syncs_noop.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
        }
    }

    /// Serve one request
    ///
    /// Errors become `Response::Failed` so the caller sees a failed ack.
    pub async fn handle(&self, request: Request) -> Response {
        let kind = request.kind();

        let result = match request {
            Request::Info(req) => self.handle_info(req).await.map(Response::Info),
            Request::Copy(req) => self
                .handle_copy(req)
                .await
                .map(|stored| Response::CopyAck { stored }),
            Request::Sync(req) => self.handle_sync(req).await.map(Response::SyncAck),
        };

        // Every guard taken for this request is released by now
        if kind != RequestKind::Info {
            self.locks.prune();
        }

        match result {
            Ok(response) => {
                crate::metrics::record_request_handled(kind, "ok");
                response
            }
            Err(e) => {
                tracing::warn!("{} request failed: {}", kind, e);
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_request_handled(kind, "failed");
                Response::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub async fn handle_info(&self, req: InfoRequest) -> ProtocolResult<InfoResponse> {
        self.stats.infos.fetch_add(1, Ordering::Relaxed);

        let Some(value) = self.storage.get(&req.key) else {
            tracing::debug!("INFO {}: not found", req.key);
            return Ok(InfoResponse {
                status: InfoStatus::NotFound,
                timestamp: req.timestamp,
                checksums: None,
            });
        };

        if Id160::hash(&value) == req.value_hash {
            tracing::debug!("INFO {}: up to date", req.key);
            return Ok(InfoResponse {
                status: InfoStatus::Ok,
                timestamp: req.timestamp,
                checksums: None,
            });
        }

        // Computed fresh for every request
        let block_size = self.block_size;
        let checksums = self
            .compute
            .run(move || codec::encode_checksums(&compute_checksums(&value, block_size)))
            .await??;

        tracing::debug!(
            "INFO {}: differs, returning {} bytes of checksums",
            req.key,
            checksums.len()
        );
        Ok(InfoResponse {
            status: InfoStatus::Partial,
            timestamp: req.timestamp,
            checksums: Some(checksums),
        })
    }

    /// Overwrite every supplied value; returns how many were stored
    pub async fn handle_copy(&self, req: CopyRequest) -> ProtocolResult<u32> {
        self.stats.copies.fetch_add(1, Ordering::Relaxed);

        let mut locations = BTreeSet::new();
        let mut stored = 0u32;

        let mut failure = None;

        for (key, value) in req.entries {
            let _guard = self.locks.lock(&key).await;
            if let Err(e) = self.storage.put(key, Bytes::from(value)) {
                failure = Some(e);
                break;
            }
            locations.insert(key.location);
            stored += 1;
        }

        // Values written before a failure are stored and must be tracked
        for location in &locations {
            self.tracker.notify_data_changed(location);
        }

        if let Some(e) = failure {
            tracing::warn!("COPY: write failed after {} values: {}", stored, e);
            return Err(e.into());
        }

        tracing::debug!("COPY: stored {} values under {} locations", stored, locations.len());
        Ok(stored)
    }

    pub async fn handle_sync(&self, req: SyncRequest) -> ProtocolResult<SyncAck> {
        let _guard = self.locks.lock(&req.key).await;

        let current = self.storage.get(&req.key);
        if let Some(ref value) = current {
            if Id160::hash(value) == req.expected_hash {
                tracing::debug!("SYNC {}: already up to date", req.key);
                self.stats.syncs_noop.fetch_add(1, Ordering::Relaxed);
                return Ok(SyncAck::NoOp);
            }
        }

        // No local value: every instruction must be a literal
        let base = current.unwrap_or_default();
        let block_size = self.block_size;
        let payload = req.instructions;
        let rebuilt = self
            .compute
            .run(move || -> ProtocolResult<Vec<u8>> {
                let instructions = codec::decode_instructions(&payload)?;
                Ok(reconstruct(&base, &instructions, block_size)?)
            })
            .await??;

        // The base may have changed since the INFO that produced these
        // instructions; never store a value the sender did not hold
        if Id160::hash(&rebuilt) != req.expected_hash {
            return Err(ProtocolError::HashMismatch { key: req.key });
        }

        let len = rebuilt.len();
        self.storage.put(req.key, Bytes::from(rebuilt))?;
        self.tracker.notify_data_changed(&req.key.location);
        self.stats.syncs_applied.fetch_add(1, Ordering::Relaxed);

        tracing::debug!("SYNC {}: rebuilt {} bytes", req.key, len);
        Ok(SyncAck::Applied)
    }
}
