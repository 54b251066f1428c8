// Key naming for a queue's key family. Every key shares the `prefix:name`
// stem; the stem alone addresses the queue body.

fn key(prefix: &str, name: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("{prefix}:{name}")
    } else {
        format!("{prefix}:{name}:{suffix}")
    }
}

/// The full key family of one queue.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    /// The queue body: new messages at the head, consumers pop the tail.
    pub body: String,
    /// Existence sentinel and capacity. `0` means unbounded.
    pub bound: String,
    /// Identity of the client inside the producer critical section.
    pub producer: String,
    /// Identity of the client inside the consumer critical section.
    pub consumer: String,
    /// One-slot semaphore serializing producers.
    pub producer_free: String,
    /// One-slot semaphore serializing consumers.
    pub consumer_free: String,
    /// One-slot condition signaling free capacity.
    pub not_full: String,
    /// Present once the queue is closed; also wakes parked consumers.
    pub closed: String,
    pub stats_produced_messages: String,
    pub stats_produced_bytes: String,
    pub stats_consumed_messages: String,
    pub stats_consumed_bytes: String,
}

impl QueueKeys {
    pub fn new(prefix: &str, name: &str) -> Self {
        Self {
            body: key(prefix, name, ""),
            bound: key(prefix, name, "bound"),
            producer: key(prefix, name, "producer"),
            consumer: key(prefix, name, "consumer"),
            producer_free: key(prefix, name, "producer_free"),
            consumer_free: key(prefix, name, "consumer_free"),
            not_full: key(prefix, name, "not_full"),
            closed: key(prefix, name, "closed"),
            stats_produced_messages: key(prefix, name, "stats_produced_messages"),
            stats_produced_bytes: key(prefix, name, "stats_produced_bytes"),
            stats_consumed_messages: key(prefix, name, "stats_consumed_messages"),
            stats_consumed_bytes: key(prefix, name, "stats_consumed_bytes"),
        }
    }

    /// The four monotonic counters, for stats reads and teardown.
    pub(crate) fn stats(&self) -> [&str; 4] {
        [
            &self.stats_produced_messages,
            &self.stats_produced_bytes,
            &self.stats_consumed_messages,
            &self.stats_consumed_bytes,
        ]
    }
}
