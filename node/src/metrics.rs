//! # Prometheus Metrics
//!
//! Operational counters for the agent, scraped at `/metrics` on the metrics
//! port. Everything lives in a dedicated [`prometheus::Registry`] with the
//! `hm` prefix.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Blobs accepted by `POST /blobs` that were not already stored.
    pub blobs_stored_total: IntCounter,
    /// Bytes of newly stored blobs.
    pub blob_bytes_total: IntCounter,
    pub link_sessions_created_total: IntCounter,
    /// Incoming device-link streams, successful or not.
    pub link_attempts_total: IntCounter,
    pub links_completed_total: IntCounter,
    pub link_failures_total: IntCounter,
    /// Time from accepting a link stream to closing it.
    pub link_duration_seconds: Histogram,
    /// Requests served by the HTTP API.
    pub api_requests_total: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl NodeMetrics {
    /// Create and register every metric. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("hm".into()), None)?;

        let link_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "link_duration_seconds",
                "Duration of device-link handshakes in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )?;
        registry.register(Box::new(link_duration_seconds.clone()))?;

        Ok(Self {
            blobs_stored_total: counter(&registry, "blobs_stored_total", "Blobs newly stored")?,
            blob_bytes_total: counter(&registry, "blob_bytes_total", "Bytes of newly stored blobs")?,
            link_sessions_created_total: counter(
                &registry,
                "link_sessions_created_total",
                "Device-link sessions created",
            )?,
            link_attempts_total: counter(
                &registry,
                "link_attempts_total",
                "Incoming device-link streams",
            )?,
            links_completed_total: counter(
                &registry,
                "links_completed_total",
                "Device links completed",
            )?,
            link_failures_total: counter(
                &registry,
                "link_failures_total",
                "Device-link streams that ended in an error",
            )?,
            link_duration_seconds,
            api_requests_total: counter(&registry, "api_requests_total", "HTTP API requests")?,
            registry,
        })
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

pub type SharedMetrics = Arc<NodeMetrics>;

/// `GET /metrics`.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
