//! Metrics and observability module
//!
//! Key metrics exposed:
//! - INFO/COPY/SYNC exchanges and their outcomes
//! - Bytes sent and bytes saved by delta transfer
//! - Replication factor and responsible locations

pub mod exporter;
pub mod recorder;

pub use exporter::{render_metrics, start_metrics_server, MetricsError};
pub use recorder::{
    init_metrics, record_copy, record_info, record_request_handled, record_rpc_failure,
    record_sync, set_replication_factor, set_responsible_locations, ReconcileTimer,
};
