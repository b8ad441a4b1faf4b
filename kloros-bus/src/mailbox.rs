//! A bounded per-subscriber inbox that, unlike a plain FIFO channel, sheds
//! load by intensity rather than by arrival order: once full, the lowest-
//! intensity queued envelope is evicted to make room for a new one of
//! higher intensity, and critical-topic envelopes always evict to get in.

use crate::envelope::Envelope;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// FIFO-ordered inbox with intensity-based eviction on overflow.
pub struct PriorityMailbox {
    capacity: usize,
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
}

impl PriorityMailbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
        }
    }

    /// Enqueue `envelope`. Returns the queue depth observed at enqueue time
    /// if something was dropped to make room -- either a lower-intensity
    /// envelope already queued, or `envelope` itself when nothing queued was
    /// lower-intensity and the envelope isn't on a critical topic.
    pub fn push(&self, envelope: Envelope, critical: bool) -> Option<usize> {
        let mut queue = self.queue.lock().unwrap();
        if queue.len() < self.capacity {
            queue.push_back(envelope);
            drop(queue);
            self.notify.notify_one();
            return None;
        }

        let depth = queue.len();
        let weakest = queue
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.intensity.partial_cmp(&b.intensity).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, env)| (idx, env.intensity));

        let evict = match weakest {
            Some((_, min_intensity)) => critical || min_intensity < envelope.intensity,
            None => false,
        };

        if evict {
            if let Some((idx, _)) = weakest {
                queue.remove(idx);
            }
            queue.push_back(envelope);
        }
        Some(depth)
    }

    /// Wait for and remove the oldest queued envelope.
    pub async fn recv(&self) -> Envelope {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if let Some(envelope) = queue.pop_front() {
                    return envelope;
                }
            }
            self.notify.notified().await;
        }
    }
}
