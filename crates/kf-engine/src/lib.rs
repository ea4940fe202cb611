pub mod bus;
pub mod handler;
pub mod queue;
pub mod stats;
pub mod subscriber;
pub mod timer;

pub use bus::EventBus;
pub use handler::EventHandler;
pub use queue::{MainQueue, PushOutcome};
pub use stats::{EngineStats, SubscriberStats};
pub use subscriber::{Subscriber, SubscriptionId};
pub use timer::{TimerService, TimerSpec};
