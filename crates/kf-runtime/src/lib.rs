pub mod app;
pub mod config;

pub use app::{App, AppStatus};
pub use config::{load_config, parse_config};
