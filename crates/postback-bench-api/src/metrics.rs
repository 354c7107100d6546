//! Prometheus metrics for the ingestion service.
//!
//! Each [`ServiceMetrics`] owns its own registry so several receivers can
//! live in one process (tests start many).

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Service metrics for observability
#[derive(Debug)]
pub struct ServiceMetrics {
    registry: Registry,

    // HTTP request metrics
    pub http_requests_total: IntCounter,
    pub http_request_duration: Histogram,

    // Ingestion metrics
    pub postbacks_received_total: IntCounter,
    pub postbacks_rejected_total: IntCounter,
    pub postbacks_buffered: IntGauge,

    // Persistence metrics
    pub batches_flushed_total: IntCounter,
    pub rows_flushed_total: IntCounter,
    pub flush_failures_total: IntCounter,
}

impl ServiceMetrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new_custom(Some("postback_receiver".to_string()), None)?;

        let http_requests_total =
            IntCounter::new("http_requests_total", "Total number of HTTP requests")?;
        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request processing time",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 1.0]),
        )?;
        let postbacks_received_total =
            IntCounter::new("postbacks_received_total", "Postbacks accepted into the buffer")?;
        let postbacks_rejected_total = IntCounter::new(
            "postbacks_rejected_total",
            "Postbacks rejected before buffering",
        )?;
        let postbacks_buffered = IntGauge::with_opts(Opts::new(
            "postbacks_buffered",
            "Postbacks waiting for the next flush",
        ))?;
        let batches_flushed_total =
            IntCounter::new("batches_flushed_total", "Batches written to the store")?;
        let rows_flushed_total =
            IntCounter::new("rows_flushed_total", "New rows written to the store")?;
        let flush_failures_total =
            IntCounter::new("flush_failures_total", "Batch writes that failed")?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(postbacks_received_total.clone()))?;
        registry.register(Box::new(postbacks_rejected_total.clone()))?;
        registry.register(Box::new(postbacks_buffered.clone()))?;
        registry.register(Box::new(batches_flushed_total.clone()))?;
        registry.register(Box::new(rows_flushed_total.clone()))?;
        registry.register(Box::new(flush_failures_total.clone()))?;

        Ok(Arc::new(Self {
            registry,
            http_requests_total,
            http_request_duration,
            postbacks_received_total,
            postbacks_rejected_total,
            postbacks_buffered,
            batches_flushed_total,
            rows_flushed_total,
            flush_failures_total,
        }))
    }

    /// Render all metrics in the Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
