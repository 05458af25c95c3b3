//! Periodic maintenance triggers.
//!
//! Each job sleeps until its next fire time and runs its action in a fresh
//! task, so a slow sweep never delays the next tick of another job.
//!
//! | Job | Schedule |
//! |-----|----------|
//! | enqueue pending | every 15 min at :00 |
//! | reconcile missing | every 15 min at :07:30 |
//! | clean orphans | daily 03:30 UTC |
//! | scheduled verification | daily 00:00 UTC |

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// When a job fires. Times are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Every `period`, shifted `offset` past each epoch-aligned boundary.
    Every { period: Duration, offset: Duration },
    /// Once a day at `hour:minute`.
    DailyAt { hour: u32, minute: u32 },
}

impl Schedule {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Every { period, offset } => {
                let period_ms = (period.as_millis() as i64).max(1);
                let offset_ms = (offset.as_millis() as i64).rem_euclid(period_ms);
                let now_ms = now.timestamp_millis();
                let base = (now_ms - offset_ms).div_euclid(period_ms) * period_ms + offset_ms;
                let next = base + period_ms;
                DateTime::from_timestamp_millis(next).unwrap_or(now)
            }
            Schedule::DailyAt { hour, minute } => {
                let time = NaiveTime::from_hms_opt(hour.min(23), minute.min(59), 0)
                    .unwrap_or(NaiveTime::MIN);
                let today = now.date_naive().and_time(time).and_utc();
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

/// Action run on each tick.
pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A named periodic job.
#[derive(Clone)]
pub struct ScheduledJob {
    pub name: &'static str,
    pub schedule: Schedule,
    pub action: JobAction,
}

impl ScheduledJob {
    pub fn new<F>(name: &'static str, schedule: Schedule, action: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            name,
            schedule,
            action: Arc::new(action),
        }
    }
}

/// Spawn one timer task per job; all stop when `shutdown` flips to true.
pub fn spawn_scheduler(
    jobs: Vec<ScheduledJob>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|job| {
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                info!(
                    subsystem = "scheduler",
                    job = job.name,
                    schedule = ?job.schedule,
                    "Job scheduled"
                );
                loop {
                    let now = Utc::now();
                    let next = job.schedule.next_after(now);
                    let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(wait) => {
                            debug!(subsystem = "scheduler", job = job.name, "Job fired");
                            tokio::spawn((job.action)());
                        }
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use futures::FutureExt;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, h, m, s).unwrap()
    }

    #[test]
    fn test_every_fifteen_minutes() {
        let s = Schedule::Every {
            period: Duration::from_secs(900),
            offset: Duration::ZERO,
        };
        assert_eq!(s.next_after(at(10, 3, 0)), at(10, 15, 0));
        assert_eq!(s.next_after(at(10, 15, 0)), at(10, 30, 0));
        assert_eq!(s.next_after(at(23, 59, 59)), at(0, 0, 0) + ChronoDuration::days(1));
    }

    #[test]
    fn test_every_with_offset() {
        let s = Schedule::Every {
            period: Duration::from_secs(900),
            offset: Duration::from_secs(450),
        };
        assert_eq!(s.next_after(at(10, 0, 0)), at(10, 7, 30));
        assert_eq!(s.next_after(at(10, 7, 30)), at(10, 22, 30));
    }

    #[test]
    fn test_daily_at() {
        let s = Schedule::DailyAt { hour: 3, minute: 30 };
        assert_eq!(s.next_after(at(1, 0, 0)), at(3, 30, 0));
        assert_eq!(s.next_after(at(3, 30, 0)), at(3, 30, 0) + ChronoDuration::days(1));
        assert_eq!(s.next_after(at(12, 0, 0)), at(3, 30, 0) + ChronoDuration::days(1));
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let handles = spawn_scheduler(
            vec![ScheduledJob::new(
                "noop",
                Schedule::DailyAt { hour: 0, minute: 0 },
                || async {}.boxed(),
            )],
            rx,
        );
        tx.send(true).unwrap();
        for h in handles {
            h.await.unwrap();
        }
    }
}
