pub mod archive;
pub mod catalog;
pub mod feed;
pub mod provider;
pub mod snapshot;

pub use archive::BarArchive;
pub use catalog::{Catalog, StockInfo};
pub use feed::{ReplayFeed, ReplayReport};
pub use provider::{ArchiveDataProvider, BarListener, MarketDataProvider};
pub use snapshot::MarketSnapshot;
