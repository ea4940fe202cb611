use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use kf_types::{Bar, Frequency, KfResult, Symbol};

use crate::archive::BarArchive;
use crate::catalog::Catalog;
use crate::snapshot::MarketSnapshot;

/// Receiver of real-time bar pushes.
pub trait BarListener: Send + Sync {
    fn on_bar(&self, bar: &Bar);
}

/// Upstream market-data surface consumed by the core.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Historical bars for a symbol, ascending by timestamp.
    async fn read_bars(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
    ) -> KfResult<Vec<Bar>>;

    /// The most recent bar known for a symbol.
    async fn latest_bar(&self, symbol: &Symbol, frequency: Frequency) -> KfResult<Option<Bar>>;

    fn is_trading_day(&self, date: NaiveDate) -> bool;

    fn trading_calendar(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate>;

    fn universe(&self, as_of: NaiveDate) -> HashSet<Symbol>;

    /// Register for real-time pushes of a symbol's bars.
    fn subscribe(&self, symbol: &Symbol, listener: Arc<dyn BarListener>);
}

/// Archive-backed provider: Parquet kline partitions plus CSV catalogs, with
/// a shared latest-bar snapshot and a push path for subscribed listeners.
pub struct ArchiveDataProvider {
    archive: BarArchive,
    catalog: Catalog,
    snapshot: Arc<MarketSnapshot>,
    listeners: DashMap<Symbol, Vec<Arc<dyn BarListener>>>,
}

impl ArchiveDataProvider {
    pub fn new(archive: BarArchive, catalog: Catalog, snapshot: Arc<MarketSnapshot>) -> Self {
        Self {
            archive,
            catalog,
            snapshot,
            listeners: DashMap::new(),
        }
    }

    pub fn archive(&self) -> &BarArchive {
        &self.archive
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Feed one bar through the provider: update the snapshot and notify the
    /// symbol's subscribers.  Both the replay feeder and live feeds land
    /// here.
    pub fn push_bar(&self, bar: &Bar) {
        self.snapshot.update(bar.clone());
        if let Some(listeners) = self.listeners.get(&bar.symbol) {
            for listener in listeners.iter() {
                listener.on_bar(bar);
            }
        }
    }
}

#[async_trait]
impl MarketDataProvider for ArchiveDataProvider {
    async fn read_bars(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        frequency: Frequency,
    ) -> KfResult<Vec<Bar>> {
        self.archive.read_bars(symbol, start, end, frequency)
    }

    async fn latest_bar(&self, symbol: &Symbol, frequency: Frequency) -> KfResult<Option<Bar>> {
        if let Some(bar) = self.snapshot.latest(symbol) {
            if bar.frequency == frequency {
                return Ok(Some(bar));
            }
        }
        self.archive.latest_bar(symbol, frequency)
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.catalog.is_trading_day(date)
    }

    fn trading_calendar(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        self.catalog.trading_calendar(start, end)
    }

    fn universe(&self, as_of: NaiveDate) -> HashSet<Symbol> {
        self.catalog.universe(as_of)
    }

    fn subscribe(&self, symbol: &Symbol, listener: Arc<dyn BarListener>) {
        debug!(symbol = %symbol, "bar listener subscribed");
        self.listeners
            .entry(symbol.clone())
            .or_default()
            .push(listener);
    }
}
