use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use kf_types::EventKind;

/// Lock-free counters shared between the bus and its dispatcher.
#[derive(Debug, Default)]
pub struct EngineCounters {
    pub published: AtomicU64,
    pub dispatched: AtomicU64,
    pub dropped: AtomicU64,
}

impl EngineCounters {
    pub fn reset(&self) {
        self.published.store(0, Ordering::Relaxed);
        self.dispatched.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

/// Lock-free counters owned by a single subscriber.
#[derive(Debug, Default)]
pub struct SubscriberCounters {
    pub processed: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    pub active: AtomicBool,
}

impl SubscriberCounters {
    pub fn reset(&self) {
        self.processed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of one subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberStats {
    pub handler: String,
    pub kind: EventKind,
    pub inbox_size: usize,
    pub processed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub active: bool,
}

/// Point-in-time view of the whole engine, queryable at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: bool,
    pub queue_size: usize,
    pub published: u64,
    pub dispatched: u64,
    pub dropped: u64,
    pub subscribers: Vec<SubscriberStats>,
}

impl EngineStats {
    /// Aggregate drops across the main queue and all subscriber inboxes.
    pub fn total_dropped(&self) -> u64 {
        self.dropped + self.subscribers.iter().map(|s| s.dropped).sum::<u64>()
    }
}
