//! Stats payloads and the broadcast bus that carries them.
//!
//! Downstream transports (WebSocket, SSE) subscribe independently. Each
//! payload carries point-in-time aggregates, so subscribers tolerate
//! duplicates and out-of-order delivery.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{QueueMetrics, StatusCounts};

/// Aggregate pipeline state broadcast to dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct VectorStats {
    pub counts: StatusCounts,
    pub queue: QueueMetrics,
    pub active_workers: i64,
    pub configured_concurrency: i64,
    pub paused: bool,
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
}

/// Event published on the stats bus.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum VectorEvent {
    /// Fresh aggregates.
    Stats(VectorStats),
    /// A verification task advanced.
    VerificationProgress {
        task_id: String,
        processed: i64,
        total: i64,
    },
}

/// Broadcast bus for [`VectorEvent`]s.
#[derive(Clone)]
pub struct StatsBus {
    tx: broadcast::Sender<VectorEvent>,
}

impl StatsBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VectorEvent> {
        self.tx.subscribe()
    }

    /// Whether anyone is listening; producers skip expensive aggregation otherwise.
    pub fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }

    /// Best-effort publish.
    pub fn publish(&self, event: VectorEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for StatsBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
