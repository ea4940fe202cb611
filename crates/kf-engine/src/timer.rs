use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use kf_types::{Event, TimerConfig, TimerKind};

use crate::bus::EventBus;

/// A recurring timer definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub kind: TimerKind,
    pub interval: Duration,
}

impl TimerSpec {
    pub fn new(kind: TimerKind, interval_ms: u64) -> Self {
        Self {
            kind,
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }
}

/// Periodic producer of `TimerEvent`s.
///
/// A single scheduler thread maintains a deadline heap over all specs; each
/// firing publishes a timer event at the kind-derived priority and rearms
/// the spec to `now + interval`.
pub struct TimerService {
    bus: Arc<EventBus>,
    specs: Vec<TimerSpec>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerService {
    pub fn new(bus: Arc<EventBus>, specs: Vec<TimerSpec>) -> Self {
        Self {
            bus,
            specs,
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// One spec per timer kind, with intervals from the configuration.
    pub fn from_config(bus: Arc<EventBus>, config: &TimerConfig) -> Self {
        let specs = vec![
            TimerSpec::new(TimerKind::MarketDataUpdate, config.market_data_update_ms),
            TimerSpec::new(TimerKind::RiskCheck, config.risk_check_ms),
            TimerSpec::new(TimerKind::Heartbeat, config.heartbeat_ms),
            TimerSpec::new(TimerKind::Cleanup, config.cleanup_ms),
            TimerSpec::new(TimerKind::StrategyTimer, config.strategy_timer_ms),
            TimerSpec::new(TimerKind::PortfolioRebalance, config.portfolio_rebalance_ms),
        ];
        Self::new(bus, specs)
    }

    /// Start the scheduler thread.  Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.specs.is_empty() {
            return;
        }

        let bus = Arc::clone(&self.bus);
        let specs = self.specs.clone();
        let running = Arc::clone(&self.running);

        let handle = std::thread::Builder::new()
            .name("kf-timer".to_string())
            .spawn(move || scheduler_loop(&bus, &specs, &running))
            .unwrap_or_else(|e| panic!("failed to spawn timer thread: {e}"));

        *self.worker.lock() = Some(handle);
        info!(timers = self.specs.len(), "timer service started");
    }

    /// Stop the scheduler thread.  Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        info!("timer service stopped");
    }
}

fn scheduler_loop(bus: &EventBus, specs: &[TimerSpec], running: &AtomicBool) {
    // Deadline heap of (next fire instant, spec index); Reverse for min-heap.
    let mut deadlines: BinaryHeap<Reverse<(Instant, usize)>> = specs
        .iter()
        .enumerate()
        .map(|(i, spec)| Reverse((Instant::now() + spec.interval, i)))
        .collect();

    while running.load(Ordering::Acquire) {
        let Some(&Reverse((next, index))) = deadlines.peek() else {
            break;
        };

        let now = Instant::now();
        if next > now {
            // Sleep in small slices so shutdown is observed promptly.
            let wait = (next - now).min(Duration::from_millis(50));
            std::thread::sleep(wait);
            continue;
        }

        deadlines.pop();
        let spec = &specs[index];
        let interval_ms = spec.interval.as_millis() as u64;
        if !bus.publish(Event::timer(spec.kind, interval_ms)) {
            debug!(kind = ?spec.kind, "timer event not accepted by the bus");
        }
        deadlines.push(Reverse((Instant::now() + spec.interval, index)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::EventHandler;
    use kf_types::{EventKind, EventPayload, KfResult};
    use parking_lot::Mutex as PlMutex;

    struct TimerRecorder {
        seen: PlMutex<Vec<TimerKind>>,
    }

    impl EventHandler for TimerRecorder {
        fn name(&self) -> &str {
            "timer-recorder"
        }

        fn handle_event(&self, event: &Event) -> KfResult<()> {
            if let EventPayload::Timer(timer) = &event.payload {
                self.seen.lock().push(timer.kind);
            }
            Ok(())
        }
    }

    #[test]
    fn test_timer_fires_and_rearms() {
        let bus = Arc::new(EventBus::new(100));
        let recorder = Arc::new(TimerRecorder {
            seen: PlMutex::new(Vec::new()),
        });
        bus.register(EventKind::Timer, recorder.clone()).unwrap();
        bus.start();

        let timers = TimerService::new(
            Arc::clone(&bus),
            vec![TimerSpec::new(TimerKind::Heartbeat, 30)],
        );
        timers.start();

        let deadline = Instant::now() + Duration::from_secs(2);
        while recorder.seen.lock().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        timers.stop();
        bus.stop();

        let seen = recorder.seen.lock();
        assert!(seen.len() >= 3, "timer fired {} times", seen.len());
        assert!(seen.iter().all(|k| *k == TimerKind::Heartbeat));
    }

    #[test]
    fn test_start_stop_idempotent() {
        let bus = Arc::new(EventBus::new(10));
        let timers = TimerService::new(bus, vec![TimerSpec::new(TimerKind::Cleanup, 1000)]);
        timers.start();
        timers.start();
        timers.stop();
        timers.stop();
    }

    #[test]
    fn test_from_config_covers_all_kinds() {
        let bus = Arc::new(EventBus::new(10));
        let timers = TimerService::from_config(bus, &TimerConfig::default());
        assert_eq!(timers.specs.len(), 6);
    }
}
