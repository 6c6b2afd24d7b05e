//! Prometheus scrape endpoint

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to build Prometheus exporter: {0}")]
    Build(#[from] BuildError),

    #[error("A metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Install the Prometheus recorder and serve `/metrics` on `listen_addr`
///
/// Must be called from within a tokio runtime; the HTTP listener runs as a
/// spawned task. Only one recorder can be installed per process.
pub fn start_metrics_server(listen_addr: SocketAddr) -> Result<&'static PrometheusHandle, MetricsError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Err(MetricsError::AlreadyInstalled);
    }

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .build()?;
    let handle = recorder.handle();

    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    init_metrics();

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!("Metrics endpoint on {} stopped: {:?}", listen_addr, e);
        }
    });

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle))
}

/// Current metrics in Prometheus text format, once the exporter runs
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_before_start() {
        // Installing a global recorder would leak into other tests
        assert!(render_metrics().is_none());
    }
}
