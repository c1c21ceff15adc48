//! Cron and interval job tables: the scheduler runtime's own state,
//! disjoint from anything the router owns.
//!
//! Cron jobs fire against wall-clock time (a cron expression is only
//! meaningful against the calendar); interval jobs fire against monotonic
//! time so a wall-clock step can't distort their cadence. The two tables
//! are never compared against each other's clock.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Result, SchedulerError};

/// A job fired by a cron expression evaluated against wall-clock time.
pub struct CronJobRecord {
    pub handle: String,
    pub queue: String,
    pub payload: Vec<u8>,
    schedule: Schedule,
    next_fire: DateTime<Utc>,
}

/// A job fired on a fixed period evaluated against monotonic time.
pub struct IntervalJobRecord {
    pub handle: String,
    pub queue: String,
    pub payload: Vec<u8>,
    interval: Duration,
    next_fire: Duration,
}

/// An emission due to fire: the payload to send as a `REQUEST`, and the
/// queue it targets.
pub struct DueJob {
    pub queue: String,
    pub payload: Vec<u8>,
}

/// Configuration-file shape for a preloaded cron job (`[[cron_jobs]]`).
#[derive(Debug, serde::Deserialize)]
pub struct CronJobConfig {
    pub id: Option<String>,
    pub schedule: String,
    pub queue: String,
    pub payload: String,
}

/// Owns both job tables. The scheduler runtime is the sole mutator.
#[derive(Default)]
pub struct JobTables {
    cron: Vec<CronJobRecord>,
    interval: Vec<IntervalJobRecord>,
}

impl JobTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `[[cron_jobs]]` entries from configuration. A malformed cron
    /// expression is a startup error, not a silently-dropped job. Each
    /// loaded job's `next_fire` is seeded strictly in the future at `now`.
    pub fn load_cron_jobs(&mut self, entries: &[CronJobConfig], now: DateTime<Utc>) -> Result<()> {
        for (idx, entry) in entries.iter().enumerate() {
            let handle = entry.id.clone().unwrap_or_else(|| format!("{}-{idx}", entry.queue));
            let schedule = Schedule::from_str(&entry.schedule).map_err(|source| {
                SchedulerError::InvalidCronSchedule {
                    id: handle.clone(),
                    expr: entry.schedule.clone(),
                    source,
                }
            })?;
            let next_fire = schedule
                .after(&now)
                .next()
                .unwrap_or(now + chrono::Duration::seconds(1));
            self.cron.push(CronJobRecord {
                handle,
                queue: entry.queue.clone(),
                payload: entry.payload.clone().into_bytes(),
                schedule,
                next_fire,
            });
        }
        Ok(())
    }

    /// Register an interval job from a broker-forwarded `SCHEDULE`. Fires
    /// once immediately per the registration contract: the returned
    /// `DueJob` is the caller's responsibility to emit right away, and
    /// `next_fire` is seeded one interval out from `now`.
    pub fn register_interval(
        &mut self,
        handle: String,
        queue: String,
        payload: Vec<u8>,
        interval: Duration,
        now: Duration,
    ) -> DueJob {
        let immediate = DueJob {
            queue: queue.clone(),
            payload: payload.clone(),
        };
        self.interval.push(IntervalJobRecord {
            handle,
            queue,
            payload,
            interval,
            next_fire: now + interval,
        });
        immediate
    }

    /// Remove a job from either table by handle. Returns whether one was
    /// found.
    pub fn unschedule(&mut self, handle: &str) -> bool {
        let before = self.cron.len() + self.interval.len();
        self.cron.retain(|j| j.handle != handle);
        self.interval.retain(|j| j.handle != handle);
        before != self.cron.len() + self.interval.len()
    }

    /// Drain every cron job whose `next_fire` is due at `ts`, advancing each
    /// to the next instant strictly greater than `ts`. Drift accumulates by
    /// design (successive `next(iterator)` calls), matching interval jobs.
    pub fn due_cron(&mut self, ts: DateTime<Utc>) -> Vec<DueJob> {
        let mut due = Vec::new();
        for job in &mut self.cron {
            while job.next_fire <= ts {
                due.push(DueJob {
                    queue: job.queue.clone(),
                    payload: job.payload.clone(),
                });
                job.next_fire = job
                    .schedule
                    .after(&ts)
                    .next()
                    .unwrap_or(ts + chrono::Duration::seconds(1));
            }
        }
        due
    }

    /// Drain every interval job whose `next_fire` is due at `m`, advancing
    /// each by its interval from the fire time actually used (not from
    /// `m`), so a missed tick doesn't cause a catch-up fire-storm beyond
    /// what was already due.
    pub fn due_interval(&mut self, m: Duration) -> Vec<DueJob> {
        let mut due = Vec::new();
        for job in &mut self.interval {
            while job.next_fire <= m {
                due.push(DueJob {
                    queue: job.queue.clone(),
                    payload: job.payload.clone(),
                });
                job.next_fire += job.interval;
            }
        }
        due
    }

    pub fn cron_len(&self) -> usize {
        self.cron.len()
    }

    pub fn interval_len(&self) -> usize {
        self.interval.len()
    }
}
