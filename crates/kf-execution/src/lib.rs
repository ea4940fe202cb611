pub mod handler;
pub mod live;
pub mod simulated;

pub use handler::{validate_order, ExecutionEventHandler, ExecutionHandler, OrderTracker};
pub use live::{BrokerAdapter, ExecutionReport, LiveExecutionHandler, ReportSink};
pub use simulated::SimulatedExecutionHandler;
