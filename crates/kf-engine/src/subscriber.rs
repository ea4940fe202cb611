use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, warn};
use uuid::Uuid;

use kf_types::{Event, EventKind};

use crate::handler::EventHandler;
use crate::stats::{SubscriberCounters, SubscriberStats};

/// Handler executions longer than this are logged as slow (but not killed).
const SLOW_HANDLER_THRESHOLD: Duration = Duration::from_secs(5);

/// Identifier returned by a successful registration.
pub type SubscriptionId = Uuid;

/// One `(event kind, handler)` subscription: a bounded FIFO inbox plus a
/// dedicated worker thread that serializes handler invocations.
pub struct Subscriber {
    pub id: SubscriptionId,
    pub kind: EventKind,
    pub handler: Arc<dyn EventHandler>,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    counters: Arc<SubscriberCounters>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    pub fn new(kind: EventKind, handler: Arc<dyn EventHandler>, inbox_capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(inbox_capacity.max(1));
        Self {
            id: Uuid::new_v4(),
            kind,
            handler,
            sender,
            receiver,
            counters: Arc::new(SubscriberCounters::default()),
            stop: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn handler_name(&self) -> &str {
        self.handler.name()
    }

    /// Non-blocking delivery into the inbox.  A full inbox drops the event
    /// for this subscriber only.
    pub fn offer(&self, event: Event) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Spawn the worker thread if it is not already running.
    pub fn spawn_worker(&self, poll_timeout: Duration) {
        let mut guard = self.worker.lock();
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        self.stop.store(false, Ordering::Release);
        self.counters.active.store(true, Ordering::Release);

        let receiver = self.receiver.clone();
        let handler = Arc::clone(&self.handler);
        let counters = Arc::clone(&self.counters);
        let stop = Arc::clone(&self.stop);
        let name = format!("kf-sub-{}-{}", self.kind, self.handler.name());

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                worker_loop(&receiver, handler.as_ref(), &counters, &stop, poll_timeout);
                counters.active.store(false, Ordering::Release);
            })
            .unwrap_or_else(|e| panic!("failed to spawn worker thread {name}: {e}"));

        *guard = Some(handle);
    }

    /// Signal the worker to stop after draining, then join it until
    /// `deadline`.  Returns `false` if the worker had to be abandoned.
    pub fn stop_worker(&self, deadline: Instant) -> bool {
        self.stop.store(true, Ordering::Release);

        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return true;
        };

        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    handler = self.handler.name(),
                    kind = %self.kind,
                    "worker did not exit before deadline; abandoning thread"
                );
                self.counters.active.store(false, Ordering::Release);
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = handle.join();
        true
    }

    pub fn is_active(&self) -> bool {
        self.counters.active.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> &SubscriberCounters {
        &self.counters
    }

    pub fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            handler: self.handler.name().to_string(),
            kind: self.kind,
            inbox_size: self.sender.len(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            active: self.is_active(),
        }
    }
}

/// Worker body: FIFO-consume the inbox and invoke the handler, isolating
/// panics and counting failures.  After the stop signal the remaining inbox
/// is drained before exiting.
fn worker_loop(
    receiver: &Receiver<Event>,
    handler: &dyn EventHandler,
    counters: &SubscriberCounters,
    stop: &AtomicBool,
    poll_timeout: Duration,
) {
    loop {
        match receiver.recv_timeout(poll_timeout) {
            Ok(event) => invoke(handler, counters, &event),
            Err(RecvTimeoutError::Timeout) => {
                if stop.load(Ordering::Acquire) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if stop.load(Ordering::Acquire) && receiver.is_empty() {
            break;
        }
    }
}

fn invoke(handler: &dyn EventHandler, counters: &SubscriberCounters, event: &Event) {
    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| handler.handle_event(event)));
    let elapsed = started.elapsed();

    if elapsed > SLOW_HANDLER_THRESHOLD {
        warn!(
            handler = handler.name(),
            event_id = %event.id,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow handler execution"
        );
    }

    match outcome {
        Ok(Ok(())) => {
            counters.processed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                handler = handler.name(),
                event_id = %event.id,
                kind = %event.kind(),
                error = %e,
                "handler returned error"
            );
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                handler = handler.name(),
                event_id = %event.id,
                kind = %event.kind(),
                "handler panicked; worker continues"
            );
        }
    }
}
