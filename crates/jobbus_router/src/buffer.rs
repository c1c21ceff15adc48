//! Waiting-message buffer: per-queue bounded FIFO of `REQUEST`s that arrived
//! when no worker was available.

use std::collections::{HashMap, VecDeque};

use jobbus_protocol::Message;

/// A raw inbound `REQUEST`, identity included, so it can be forwarded later
/// exactly as if it had just arrived.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub identity: Vec<u8>,
    pub message: Message,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueResult {
    Ok,
    Rejected,
}

pub struct WaitingBuffer {
    queues: HashMap<String, VecDeque<RawRequest>>,
    hwm: usize,
}

impl WaitingBuffer {
    pub fn new(hwm: usize) -> Self {
        Self {
            queues: HashMap::new(),
            hwm,
        }
    }

    pub fn enqueue(&mut self, queue: &str, req: RawRequest) -> EnqueueResult {
        let existing_len = self.queues.get(queue).map(VecDeque::len).unwrap_or(0);
        if existing_len >= self.hwm {
            return EnqueueResult::Rejected;
        }
        self.queues.entry(queue.to_string()).or_default().push_back(req);
        EnqueueResult::Ok
    }

    /// Pop the oldest buffered request for `queue`. Removes the queue's
    /// entry entirely once it empties, so a queue only appears in the map
    /// while non-empty.
    pub fn pop_front(&mut self, queue: &str) -> Option<RawRequest> {
        let Some(entry) = self.queues.get_mut(queue) else {
            return None;
        };
        let item = entry.pop_front();
        if entry.is_empty() {
            self.queues.remove(queue);
        }
        item
    }

    pub fn len(&self, queue: &str) -> usize {
        self.queues.get(queue).map(VecDeque::len).unwrap_or(0)
    }

    pub fn contains(&self, queue: &str) -> bool {
        self.queues.contains_key(queue)
    }
}
