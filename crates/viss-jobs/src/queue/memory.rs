//! In-process job queue.
//!
//! Scheduling uses `tokio::time::Instant`, so tests running on a paused
//! clock observe delays and lease expiry deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use viss_core::defaults::FETCH_POLL_INTERVAL;
use viss_core::{JobQueue, Lease, QueueMetrics, Result};

#[derive(Debug, Clone, Copy)]
enum JobState {
    Queued { visible_at: Instant },
    Processing { lease_until: Instant, token: Uuid },
}

#[derive(Debug)]
struct MemoryJob {
    seq: u64,
    attempts: i32,
    state: JobState,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    jobs: HashMap<String, MemoryJob>,
    dlq: BTreeMap<String, String>,
}

impl QueueState {
    /// Oldest due queued job by `(visible_at, seq)`.
    fn next_due(&self, now: Instant) -> Option<String> {
        self.jobs
            .iter()
            .filter_map(|(id, job)| match job.state {
                JobState::Queued { visible_at } if visible_at <= now => {
                    Some((visible_at, job.seq, id))
                }
                _ => None,
            })
            .min()
            .map(|(_, _, id)| id.clone())
    }

    /// The job held under `lease`, if the lease is still current.
    fn leased_mut(&mut self, lease: &Lease) -> Option<&mut MemoryJob> {
        self.jobs.get_mut(&lease.file_id).filter(|job| {
            matches!(job.state, JobState::Processing { token, .. } if token == lease.token)
        })
    }
}

/// Single-process queue with the full lease/ack/nack/reaper contract.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn try_claim(&self, lease: Duration) -> Option<Lease> {
        let now = Instant::now();
        let mut state = self.lock();
        let file_id = state.next_due(now)?;
        let job = state.jobs.get_mut(&file_id)?;
        let token = Uuid::new_v4();
        job.state = JobState::Processing {
            lease_until: now + lease,
            token,
        };
        Some(Lease {
            file_id,
            attempts: job.attempts,
            token,
            lease_until: Utc::now()
                + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero()),
        })
    }

    /// Reasons recorded for dead-lettered file ids.
    pub fn dead_letters(&self) -> BTreeMap<String, String> {
        self.lock().dlq.clone()
    }

    /// Live jobs (queued or processing).
    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn enqueue_unique(&self, file_id: &str, delay: Duration) -> Result<()> {
        {
            let mut state = self.lock();
            if state.jobs.contains_key(file_id) {
                debug!(
                    subsystem = "queue",
                    backend = "memory",
                    file_id,
                    "Job already live, enqueue skipped"
                );
                return Ok(());
            }
            state.dlq.remove(file_id);
            state.next_seq += 1;
            let seq = state.next_seq;
            state.jobs.insert(
                file_id.to_string(),
                MemoryJob {
                    seq,
                    attempts: 0,
                    state: JobState::Queued {
                        visible_at: Instant::now() + delay,
                    },
                },
            );
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn fetch(&self, lease: Duration) -> Result<Option<Lease>> {
        let deadline = Instant::now() + FETCH_POLL_INTERVAL;
        loop {
            if let Some(claimed) = self.try_claim(lease) {
                return Ok(Some(claimed));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.notify.notified()).await;
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        let mut state = self.lock();
        if state.leased_mut(lease).is_some() {
            state.jobs.remove(&lease.file_id);
        } else {
            debug!(
                subsystem = "queue",
                backend = "memory",
                file_id = %lease.file_id,
                "Ack ignored for stale lease"
            );
        }
        Ok(())
    }

    async fn nack(
        &self,
        lease: &Lease,
        delay: Duration,
        to_dlq: bool,
        reason: &str,
    ) -> Result<()> {
        {
            let mut state = self.lock();
            let Some(job) = state.leased_mut(lease) else {
                debug!(
                    subsystem = "queue",
                    backend = "memory",
                    file_id = %lease.file_id,
                    "Nack ignored for stale lease"
                );
                return Ok(());
            };
            if to_dlq {
                state.jobs.remove(&lease.file_id);
                state.dlq.insert(lease.file_id.clone(), reason.to_string());
                return Ok(());
            }
            job.attempts += 1;
            job.state = JobState::Queued {
                visible_at: Instant::now() + delay,
            };
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn metrics(&self) -> Result<QueueMetrics> {
        let now = Instant::now();
        let state = self.lock();
        let mut metrics = QueueMetrics {
            dlq: state.dlq.len() as i64,
            ..QueueMetrics::default()
        };
        for job in state.jobs.values() {
            match job.state {
                JobState::Queued { visible_at } if visible_at <= now => metrics.queued += 1,
                JobState::Queued { .. } => metrics.delayed += 1,
                JobState::Processing { .. } => metrics.in_flight += 1,
            }
        }
        Ok(metrics)
    }

    async fn reap_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let reaped = {
            let mut state = self.lock();
            let mut reaped = 0u64;
            for job in state.jobs.values_mut() {
                if let JobState::Processing { lease_until, .. } = job.state {
                    if lease_until < now {
                        job.attempts += 1;
                        job.state = JobState::Queued { visible_at: now };
                        reaped += 1;
                    }
                }
            }
            reaped
        };
        if reaped > 0 {
            self.notify.notify_waiters();
        }
        Ok(reaped)
    }

    async fn live_jobs(&self, file_ids: &[String]) -> Result<HashSet<String>> {
        let state = self.lock();
        Ok(file_ids
            .iter()
            .filter(|id| state.jobs.contains_key(*id))
            .cloned()
            .collect())
    }
}
