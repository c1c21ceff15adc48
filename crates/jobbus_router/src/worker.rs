//! Worker registry: known workers, their queue membership, last-seen time,
//! and the per-queue LRU availability lists.
//!
//! The registry is the single owner of both the worker map and the
//! availability lists; callers never reach into one without going through
//! `WorkerRegistry` so the cross-reference invariant (every id in an
//! availability list has a matching worker record) can't be broken from
//! outside.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

type WorkerId = Vec<u8>;

struct WorkerRecord {
    queues: Vec<String>,
    last_heartbeat: Duration,
}

/// Result of popping a free slot for a queue.
#[derive(Debug, PartialEq, Eq)]
pub enum PopResult {
    /// A worker was available and has been popped off the front of the list.
    Worker(WorkerId),
    /// The queue is known but currently has no free slots.
    Empty,
    /// No worker has ever declared membership in this queue.
    Unknown,
}

pub struct WorkerRegistry {
    workers: HashMap<WorkerId, WorkerRecord>,
    availability: HashMap<String, VecDeque<WorkerId>>,
    timeout: Duration,
    cleanup_interval: Duration,
    last_sweep: Duration,
}

impl WorkerRegistry {
    pub fn new(timeout: Duration, cleanup_interval: Duration) -> Self {
        Self {
            workers: HashMap::new(),
            availability: HashMap::new(),
            timeout,
            cleanup_interval,
            last_sweep: Duration::ZERO,
        }
    }

    /// Create or replace the record for `id` with membership `{queue}`. Does
    /// not add the worker to its availability list — that happens on the
    /// first `READY`. Registers the queue name as "known" (an empty
    /// availability list is created if none exists yet) so a `REQUEST`
    /// arriving before the first `READY` is buffered rather than dropped as
    /// unknown-queue.
    pub fn add_worker(&mut self, id: WorkerId, queue: String, now: Duration) {
        self.availability.entry(queue.clone()).or_default();
        self.workers.insert(
            id,
            WorkerRecord {
                queues: vec![queue],
                last_heartbeat: now,
            },
        );
    }

    pub fn is_known(&self, id: &[u8]) -> bool {
        self.workers.contains_key(id)
    }

    /// Any message from a known worker counts as a heartbeat. Returns
    /// whether `id` was known.
    pub fn touch(&mut self, id: &[u8], now: Duration) -> bool {
        if let Some(record) = self.workers.get_mut(id) {
            record.last_heartbeat = now;
            true
        } else {
            false
        }
    }

    /// The queues `id` belongs to, or an empty slice if unknown.
    pub fn queues_of(&self, id: &[u8]) -> &[String] {
        self.workers
            .get(id)
            .map(|r| r.queues.as_slice())
            .unwrap_or(&[])
    }

    /// Append `id` to the availability list of every queue it belongs to,
    /// creating the list on first use. No-op for an unknown worker.
    pub fn requeue(&mut self, id: &[u8]) {
        let queues = match self.workers.get(id) {
            Some(record) => record.queues.clone(),
            None => return,
        };
        for queue in queues {
            self.availability.entry(queue).or_default().push_back(id.to_vec());
        }
    }

    /// Pop the front of `queue`'s availability list.
    pub fn pop_available(&mut self, queue: &str) -> PopResult {
        match self.availability.get_mut(queue) {
            None => PopResult::Unknown,
            Some(list) => match list.pop_front() {
                Some(id) => PopResult::Worker(id),
                None => PopResult::Empty,
            },
        }
    }

    /// Explicit removal, shared by `sweep` and `DISCONNECT` handling. Scrubs
    /// every occurrence of `id` from every queue list it could appear in.
    pub fn remove(&mut self, id: &[u8]) {
        if let Some(record) = self.workers.remove(id) {
            for queue in &record.queues {
                if let Some(list) = self.availability.get_mut(queue) {
                    list.retain(|w| w != id);
                }
            }
        }
    }

    /// Remove every worker whose last heartbeat is `timeout`-or-older.
    /// Rate-limited to at most once per `cleanup_interval`.
    pub fn sweep(&mut self, now: Duration) {
        if now.saturating_sub(self.last_sweep) < self.cleanup_interval {
            return;
        }
        self.last_sweep = now;

        let dead: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, r)| now.saturating_sub(r.last_heartbeat) >= self.timeout)
            .map(|(id, _)| id.clone())
            .collect();

        for id in dead {
            self.remove(&id);
        }
    }

    /// Snapshot of every currently-registered worker id, for heartbeat
    /// broadcast.
    pub fn all_ids(&self) -> Vec<WorkerId> {
        self.workers.keys().cloned().collect()
    }
}
