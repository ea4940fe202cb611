use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use kf_types::Event;

/// Events with priority above this value are shed under back-pressure.
const BACKPRESSURE_PRIORITY: u8 = 5;

/// An event stamped with its publication sequence number.
///
/// The heap orders by `(priority, seq)`: numerically smaller priority wins,
/// and the sequence number breaks ties so equal-priority events leave the
/// queue in publication order.
#[derive(Debug)]
struct QueuedEvent {
    priority: u8,
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so that BinaryHeap (a max-heap) pops the lowest
        // (priority, seq) pair first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Outcome of a push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Shed by the low-priority back-pressure rule.
    Shed,
}

/// The main priority queue feeding the dispatcher.
///
/// Capacity is soft: once the queue is 90% full, events with priority worse
/// than [`BACKPRESSURE_PRIORITY`] are shed; urgent events are always
/// accepted.  Publishers never block.
pub struct MainQueue {
    heap: Mutex<BinaryHeap<QueuedEvent>>,
    available: Condvar,
    capacity: usize,
    seq: AtomicU64,
}

impl MainQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            seq: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue length at which low-priority events start being shed.
    fn shed_threshold(&self) -> usize {
        self.capacity * 9 / 10
    }

    /// Non-blocking insert honoring the back-pressure rule.
    pub fn try_push(&self, event: Event) -> PushOutcome {
        let mut heap = self.heap.lock();
        if heap.len() >= self.shed_threshold() && event.priority > BACKPRESSURE_PRIORITY {
            return PushOutcome::Shed;
        }

        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        heap.push(QueuedEvent {
            priority: event.priority,
            seq,
            event,
        });
        drop(heap);
        self.available.notify_one();
        PushOutcome::Enqueued
    }

    /// Pop the most urgent event, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Event> {
        let mut heap = self.heap.lock();
        if heap.is_empty() {
            self.available.wait_for(&mut heap, timeout);
        }
        heap.pop().map(|q| q.event)
    }

    /// Wake any waiter without delivering an event (used on shutdown).
    pub fn notify_all(&self) {
        self.available.notify_all();
    }
}
