use kf_types::{Event, KfResult};

/// Capability set every bus subscriber implements.
///
/// Handlers are shared across subscriptions and invoked from dedicated worker
/// threads, so implementations use interior mutability and must be
/// `Send + Sync`.  A handler registered for several event kinds may be
/// invoked concurrently, once per subscription; invocations within a single
/// subscription are serialized.
pub trait EventHandler: Send + Sync {
    /// Stable name used for registry keys, statistics, and logs.
    fn name(&self) -> &str;

    /// Called once before the subscription is activated.  Returning an error
    /// abandons the registration.
    fn initialize(&self) -> KfResult<()> {
        Ok(())
    }

    /// Process one event.  Errors are counted against the subscriber and
    /// logged; they never propagate across the bus.
    fn handle_event(&self, event: &Event) -> KfResult<()>;

    /// Disabled handlers are skipped by the dispatcher without counting a
    /// drop.
    fn enabled(&self) -> bool {
        true
    }

    /// Called after the subscription's worker has stopped.
    fn destroy(&self) {}
}
