//! Metrics recorder for replication
//!
//! Thin wrappers over the `metrics` macros so metric names live in one place.

use crate::protocol::{InfoStatus, RequestKind, SyncAck};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    // Client side
    describe_counter!(
        "replisync_info_requests_total",
        "INFO exchanges by replica answer"
    );
    describe_counter!(
        "replisync_copy_requests_total",
        "COPY requests sent with full values"
    );
    describe_counter!(
        "replisync_sync_requests_total",
        "SYNC requests sent with instruction lists"
    );
    describe_counter!(
        "replisync_bytes_sent_total",
        "Value bytes sent, by request kind"
    );
    describe_counter!(
        "replisync_bytes_saved_total",
        "Bytes not sent thanks to delta transfer"
    );
    describe_counter!(
        "replisync_rpc_failures_total",
        "Failed request/response exchanges"
    );

    // Server side
    describe_counter!(
        "replisync_requests_handled_total",
        "Requests served by the protocol handler"
    );

    // Gauges
    describe_gauge!(
        "replisync_replication_factor",
        "Replicas required per location"
    );
    describe_gauge!(
        "replisync_responsible_locations",
        "Locations this node is responsible for"
    );

    // Histograms
    describe_histogram!(
        "replisync_reconcile_duration_seconds",
        "Time to reconcile one location with its replicas"
    );
}

// ============== Client Operations ==============

pub fn record_info(status: InfoStatus) {
    counter!("replisync_info_requests_total", "status" => status.as_str()).increment(1);
}

pub fn record_copy(bytes: usize) {
    counter!("replisync_copy_requests_total").increment(1);
    counter!("replisync_bytes_sent_total", "kind" => "copy").increment(bytes as u64);
}

pub fn record_sync(ack: SyncAck, payload_bytes: usize, bytes_saved: u64) {
    counter!("replisync_sync_requests_total", "ack" => ack.as_str()).increment(1);
    counter!("replisync_bytes_sent_total", "kind" => "sync").increment(payload_bytes as u64);
    counter!("replisync_bytes_saved_total").increment(bytes_saved);
}

pub fn record_rpc_failure(kind: RequestKind) {
    counter!("replisync_rpc_failures_total", "kind" => kind.as_str()).increment(1);
}

// ============== Handler Operations ==============

pub fn record_request_handled(kind: RequestKind, outcome: &'static str) {
    counter!("replisync_requests_handled_total", "kind" => kind.as_str(), "outcome" => outcome)
        .increment(1);
}

// ============== Gauges ==============

pub fn set_replication_factor(factor: usize) {
    gauge!("replisync_replication_factor").set(factor as f64);
}

pub fn set_responsible_locations(count: usize) {
    gauge!("replisync_responsible_locations").set(count as f64);
}

/// Times one location reconciliation
pub struct ReconcileTimer {
    start_time: Instant,
}

impl ReconcileTimer {
    pub fn start() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Stop timing and record the duration
    pub fn stop(self) {
        histogram!("replisync_reconcile_duration_seconds")
            .record(self.start_time.elapsed().as_secs_f64());
    }
}
