use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use kf_types::{EngineError, Event, EventKind, KfResult};

use crate::handler::EventHandler;
use crate::queue::{MainQueue, PushOutcome};
use crate::stats::{EngineCounters, EngineStats};
use crate::subscriber::{Subscriber, SubscriptionId};

/// Bound on joining workers at shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// The event bus: a single prioritized main queue, one dispatcher thread,
/// and one worker per subscription.
///
/// Publishing is non-blocking from any thread.  A slow or failing subscriber
/// affects only its own inbox; the dispatcher and other subscribers keep
/// running.
pub struct EventBus {
    queue: Arc<MainQueue>,
    subscribers: Arc<DashMap<EventKind, Vec<Arc<Subscriber>>>>,
    counters: Arc<EngineCounters>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    poll_timeout: Duration,
    inbox_capacity: usize,
}

impl EventBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_poll_timeout(queue_capacity, Duration::from_millis(100))
    }

    pub fn with_poll_timeout(queue_capacity: usize, poll_timeout: Duration) -> Self {
        Self {
            queue: Arc::new(MainQueue::new(queue_capacity)),
            subscribers: Arc::new(DashMap::new()),
            counters: Arc::new(EngineCounters::default()),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            dispatcher: Mutex::new(None),
            poll_timeout,
            inbox_capacity: (queue_capacity / 10).max(1),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enqueue an event onto the main queue.  Returns `false` (and drops)
    /// when the engine is not running or when the back-pressure rule sheds
    /// the event.  Never blocks the caller.
    pub fn publish(&self, event: Event) -> bool {
        if !self.is_running() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %event.kind(), "publish while engine not running; event dropped");
            return false;
        }

        match self.queue.try_push(event) {
            PushOutcome::Enqueued => {
                self.counters.published.fetch_add(1, Ordering::Relaxed);
                true
            }
            PushOutcome::Shed => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    queue_size = self.queue.len(),
                    capacity = self.queue.capacity(),
                    "main queue saturated; low-priority event dropped"
                );
                false
            }
        }
    }

    /// Register `handler` for events of `kind`.  The subscription gets its
    /// own inbox (capacity `queue_capacity / 10`) and worker thread.
    /// `handler.initialize()` runs first; failure abandons the registration.
    pub fn register(
        &self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> KfResult<SubscriptionId> {
        handler.initialize().map_err(|e| EngineError::SubscriberInitFailed {
            handler: handler.name().to_string(),
            message: e.to_string(),
        })?;

        let subscriber = Arc::new(Subscriber::new(kind, handler, self.inbox_capacity));
        let id = subscriber.id;

        if self.is_running() {
            subscriber.spawn_worker(self.poll_timeout);
        }

        info!(kind = %kind, handler = subscriber.handler_name(), "subscriber registered");
        self.subscribers.entry(kind).or_default().push(subscriber);
        Ok(id)
    }

    /// Stop and remove the subscription of `handler_name` on `kind`.  The
    /// worker drains its inbox best-effort, then `destroy()` runs.  The
    /// subscriber's statistics disappear with it.
    pub fn unregister(&self, kind: EventKind, handler_name: &str) -> KfResult<()> {
        let removed = {
            let mut entry = self.subscribers.entry(kind).or_default();
            let position = entry.iter().position(|s| s.handler_name() == handler_name);
            position.map(|i| entry.remove(i))
        };

        let Some(subscriber) = removed else {
            return Err(EngineError::SubscriberNotFound {
                handler: handler_name.to_string(),
                kind: kind.to_string(),
            }
            .into());
        };

        subscriber.stop_worker(Instant::now() + SHUTDOWN_DEADLINE);
        subscriber.handler.destroy();
        info!(kind = %kind, handler = handler_name, "subscriber unregistered");
        Ok(())
    }

    /// Start the dispatcher and all subscriber workers.  Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        for entry in self.subscribers.iter() {
            for subscriber in entry.value() {
                subscriber.spawn_worker(self.poll_timeout);
            }
        }

        let queue = Arc::clone(&self.queue);
        let subscribers = Arc::clone(&self.subscribers);
        let counters = Arc::clone(&self.counters);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let poll_timeout = self.poll_timeout;

        let handle = std::thread::Builder::new()
            .name("kf-dispatcher".to_string())
            .spawn(move || {
                dispatch_loop(&queue, &subscribers, &counters, &running, &paused, poll_timeout);
            })
            .unwrap_or_else(|e| panic!("failed to spawn dispatcher: {e}"));

        *self.dispatcher.lock() = Some(handle);
        info!(capacity = self.queue.capacity(), "event engine started");
    }

    /// Stop the dispatcher and workers, joining each within a bounded
    /// deadline, and return the final statistics.  Idempotent.
    pub fn stop(&self) -> EngineStats {
        if !self.running.swap(false, Ordering::AcqRel) {
            return self.stats();
        }

        self.queue.notify_all();
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }

        let deadline = Instant::now() + SHUTDOWN_DEADLINE;
        let mut abandoned = 0usize;
        for entry in self.subscribers.iter() {
            for subscriber in entry.value() {
                if !subscriber.stop_worker(deadline) {
                    abandoned += 1;
                }
            }
        }
        if abandoned > 0 {
            warn!(abandoned, "some workers were abandoned at shutdown");
        }

        let stats = self.stats();
        info!(
            published = stats.published,
            dispatched = stats.dispatched,
            dropped = stats.dropped,
            "event engine stopped"
        );
        stats
    }

    /// Hold the dispatcher without stopping it (events accumulate in the
    /// main queue).  Used by operators and tests to stage bursts.
    pub fn pause_dispatch(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume_dispatch(&self) {
        self.paused.store(false, Ordering::Release);
        self.queue.notify_all();
    }

    /// Point-in-time statistics snapshot.
    pub fn stats(&self) -> EngineStats {
        let mut subscribers = Vec::new();
        for entry in self.subscribers.iter() {
            for subscriber in entry.value() {
                subscribers.push(subscriber.stats());
            }
        }
        subscribers.sort_by(|a, b| a.handler.cmp(&b.handler));

        EngineStats {
            running: self.is_running(),
            queue_size: self.queue.len(),
            published: self.counters.published.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            subscribers,
        }
    }

    /// Zero all statistics counters (engine and per-subscriber).
    pub fn reset_stats(&self) {
        self.counters.reset();
        for entry in self.subscribers.iter() {
            for subscriber in entry.value() {
                subscriber.counters().reset();
            }
        }
    }
}

/// Dispatcher body: drain the main queue in priority order and forward each
/// event to every subscriber of its kind via non-blocking inserts.
fn dispatch_loop(
    queue: &MainQueue,
    subscribers: &DashMap<EventKind, Vec<Arc<Subscriber>>>,
    counters: &EngineCounters,
    running: &AtomicBool,
    paused: &AtomicBool,
    poll_timeout: Duration,
) {
    while running.load(Ordering::Acquire) {
        if paused.load(Ordering::Acquire) {
            std::thread::sleep(poll_timeout.min(Duration::from_millis(10)));
            continue;
        }

        let Some(event) = queue.pop_timeout(poll_timeout) else {
            continue;
        };

        let kind = event.kind();
        match subscribers.get(&kind) {
            Some(subs) if !subs.is_empty() => {
                for subscriber in subs.iter() {
                    if !subscriber.handler.enabled() {
                        continue;
                    }
                    if !subscriber.offer(event.clone()) {
                        warn!(
                            handler = subscriber.handler_name(),
                            kind = %kind,
                            event_id = %event.id,
                            "subscriber inbox full; event dropped for this subscriber"
                        );
                    }
                }
            }
            _ => {
                debug!(kind = %kind, event_id = %event.id, "no subscribers for event kind");
            }
        }
        counters.dispatched.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kf_types::KfError;
    use parking_lot::Mutex as PlMutex;
    use uuid::Uuid;

    struct Recorder {
        name: String,
        seen: PlMutex<Vec<(Uuid, u8)>>,
        delay: Option<Duration>,
        fail_init: bool,
        destroyed: AtomicBool,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: PlMutex::new(Vec::new()),
                delay: None,
                fail_init: false,
                destroyed: AtomicBool::new(false),
            })
        }

        fn slow(name: &str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: PlMutex::new(Vec::new()),
                delay: Some(delay),
                fail_init: false,
                destroyed: AtomicBool::new(false),
            })
        }

        fn failing_init(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: PlMutex::new(Vec::new()),
                delay: None,
                fail_init: true,
                destroyed: AtomicBool::new(false),
            })
        }

        fn count(&self) -> usize {
            self.seen.lock().len()
        }
    }

    impl EventHandler for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn initialize(&self) -> KfResult<()> {
            if self.fail_init {
                return Err(KfError::Internal("init refused".into()));
            }
            Ok(())
        }

        fn handle_event(&self, event: &Event) -> KfResult<()> {
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            self.seen.lock().push((event.id, event.priority));
            Ok(())
        }

        fn destroy(&self) {
            self.destroyed.store(true, Ordering::Release);
        }
    }

    fn wait_until(deadline_ms: u64, predicate: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        predicate()
    }

    #[test]
    fn test_publish_requires_running_engine() {
        let bus = EventBus::new(100);
        assert!(!bus.publish(Event::system("early")));
        assert_eq!(bus.stats().dropped, 1);

        bus.start();
        assert!(bus.publish(Event::system("ok")));
        bus.stop();
    }

    #[test]
    fn test_start_stop_idempotent() {
        let bus = EventBus::new(100);
        bus.start();
        bus.start();
        assert!(bus.is_running());
        let stats = bus.stop();
        assert!(!stats.running);
        let stats = bus.stop();
        assert!(!stats.running);
    }

    #[test]
    fn test_priority_ordering_observed_by_subscriber() {
        let bus = EventBus::new(100);
        let recorder = Recorder::new("ordered");
        bus.register(EventKind::System, recorder.clone()).unwrap();

        bus.start();
        bus.pause_dispatch();

        let low = Event::system("low").with_priority(9);
        let high = Event::system("high").with_priority(1);
        let mid = Event::system("mid").with_priority(5);
        assert!(bus.publish(low));
        assert!(bus.publish(high));
        assert!(bus.publish(mid));

        bus.resume_dispatch();
        assert!(wait_until(1000, || recorder.count() == 3));

        let priorities: Vec<u8> = recorder.seen.lock().iter().map(|(_, p)| *p).collect();
        assert_eq!(priorities, vec![1, 5, 9]);
        bus.stop();
    }

    #[test]
    fn test_backpressure_counted_in_stats() {
        let bus = EventBus::new(100);
        bus.start();
        bus.pause_dispatch();

        for _ in 0..90 {
            assert!(bus.publish(Event::system("filler").with_priority(7)));
        }
        assert!(!bus.publish(Event::system("shed").with_priority(7)));
        assert_eq!(bus.stats().dropped, 1);
        assert!(bus.publish(Event::system("urgent").with_priority(1)));

        bus.resume_dispatch();
        bus.stop();
    }

    #[test]
    fn test_failed_initialize_abandons_registration() {
        let bus = EventBus::new(100);
        let handler = Recorder::failing_init("bad");
        assert!(bus.register(EventKind::System, handler).is_err());
        assert!(bus.stats().subscribers.is_empty());
    }

    #[test]
    fn test_register_unregister_restores_stats() {
        let bus = EventBus::new(100);
        let before = bus.stats().subscribers;

        let handler = Recorder::new("transient");
        bus.register(EventKind::Market, handler.clone()).unwrap();
        assert_eq!(bus.stats().subscribers.len(), 1);

        bus.unregister(EventKind::Market, "transient").unwrap();
        assert_eq!(bus.stats().subscribers, before);
        assert!(handler.destroyed.load(Ordering::Acquire));

        // Unknown handler is an error
        assert!(bus.unregister(EventKind::Market, "transient").is_err());
    }

    #[test]
    fn test_no_subscribers_still_dispatches() {
        let bus = EventBus::new(100);
        bus.start();
        assert!(bus.publish(Event::system("unheard")));
        assert!(wait_until(1000, || bus.stats().dispatched == 1));
        bus.stop();
    }

    #[test]
    fn test_slow_subscriber_does_not_block_fast_one() {
        let bus = EventBus::new(100);
        let slow = Recorder::slow("slow", Duration::from_millis(150));
        let fast = Recorder::new("fast");
        bus.register(EventKind::System, slow.clone()).unwrap();
        bus.register(EventKind::System, fast.clone()).unwrap();

        bus.start();
        for _ in 0..10 {
            assert!(bus.publish(Event::system("x")));
        }

        // The fast subscriber finishes all 10 well before the slow one could.
        assert!(wait_until(2000, || fast.count() == 10));
        assert!(slow.count() < 10);

        bus.stop();
        let stats = bus.stats();
        let fast_stats = stats
            .subscribers
            .iter()
            .find(|s| s.handler == "fast")
            .unwrap();
        assert_eq!(fast_stats.dropped, 0);
        assert_eq!(fast_stats.processed, 10);
    }

    #[test]
    fn test_no_handler_invocation_after_stop() {
        let bus = EventBus::new(100);
        let recorder = Recorder::new("stopped");
        bus.register(EventKind::System, recorder.clone()).unwrap();

        bus.start();
        assert!(bus.publish(Event::system("before")));
        assert!(wait_until(1000, || recorder.count() == 1));
        bus.stop();

        let count_at_stop = recorder.count();
        assert!(!bus.publish(Event::system("after")));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.count(), count_at_stop);
    }

    #[test]
    fn test_restart_resumes_delivery_and_keeps_stats() {
        let bus = EventBus::new(100);
        let recorder = Recorder::new("restart");
        bus.register(EventKind::System, recorder.clone()).unwrap();

        bus.start();
        assert!(bus.publish(Event::system("one")));
        assert!(wait_until(1000, || recorder.count() == 1));
        bus.stop();

        bus.start();
        assert!(bus.publish(Event::system("two")));
        assert!(wait_until(1000, || recorder.count() == 2));
        let stats = bus.stop();

        // Statistics accumulate across runs until explicitly reset.
        assert_eq!(stats.published, 2);
        bus.reset_stats();
        assert_eq!(bus.stats().published, 0);
        assert_eq!(bus.stats().subscribers[0].processed, 0);
    }
}
