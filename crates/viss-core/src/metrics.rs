//! Prometheus counters and gauges emitted by the pipeline.
//!
//! Names are stable; mounting the text exposition on an HTTP route is left to
//! the host application.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::models::QueueMetrics;

/// Pipeline metrics held in a private registry.
#[derive(Clone)]
pub struct VectorMetrics {
    registry: Registry,
    pub ack_total: IntCounter,
    pub nack_total: IntCounter,
    pub queue_queued: IntGauge,
    pub queue_inflight: IntGauge,
    pub active_workers: IntGauge,
    pub configured_concurrency: IntGauge,
    pub paused: IntGauge,
}

impl VectorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let ack_total = counter(
            &registry,
            "vector_ack_total",
            "Successful worker acknowledgements",
        )?;
        let nack_total = counter(
            &registry,
            "vector_nack_total",
            "Failed attempts (per attempt, not per job)",
        )?;
        let queue_queued = gauge(&registry, "vector_queue_queued", "Jobs awaiting pickup")?;
        let queue_inflight = gauge(&registry, "vector_queue_inflight", "Jobs currently leased")?;
        let active_workers = gauge(
            &registry,
            "vector_active_workers",
            "Workers currently inside a fetch+process",
        )?;
        let configured_concurrency = gauge(
            &registry,
            "vector_configured_concurrency",
            "Target worker count",
        )?;
        let paused = gauge(&registry, "vector_paused", "1 if paused else 0")?;

        Ok(Self {
            registry,
            ack_total,
            nack_total,
            queue_queued,
            queue_inflight,
            active_workers,
            configured_concurrency,
            paused,
        })
    }

    /// Copy queue counters into the queue gauges.
    pub fn observe_queue(&self, queue: &QueueMetrics) {
        self.queue_queued.set(queue.queued);
        self.queue_inflight.set(queue.in_flight);
    }

    /// Text exposition of every metric.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics are not UTF-8: {e}")))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let c = IntCounter::new(name, help)
        .map_err(|e| Error::Internal(format!("Invalid counter {name}: {e}")))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| Error::Internal(format!("Failed to register {name}: {e}")))?;
    Ok(c)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let g = IntGauge::new(name, help)
        .map_err(|e| Error::Internal(format!("Invalid gauge {name}: {e}")))?;
    registry
        .register(Box::new(g.clone()))
        .map_err(|e| Error::Internal(format!("Failed to register {name}: {e}")))?;
    Ok(g)
}
