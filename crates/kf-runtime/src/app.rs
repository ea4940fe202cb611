//! Composition root: builds and wires the engine, data layer, strategy
//! framework, portfolio manager, and execution venue, and drives their
//! lifecycle in order.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

use kf_data::{
    ArchiveDataProvider, BarArchive, BarListener, Catalog, MarketDataProvider, MarketSnapshot,
    ReplayFeed,
};
use kf_engine::{EngineStats, EventBus, TimerService};
use kf_execution::{
    BrokerAdapter, ExecutionEventHandler, ExecutionHandler, LiveExecutionHandler,
    SimulatedExecutionHandler,
};
use kf_portfolio::{PortfolioRiskManager, PortfolioStats};
use kf_strategy::{StrategyManager, StrategySnapshot};
use kf_types::{
    Account, AppConfig, Bar, Event, ExecutionKind, KfError, KfResult, RunMode, Symbol,
};

/// Operator-facing status document served by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    pub running: bool,
    pub mode: String,
    pub engine: EngineStats,
    pub portfolio: PortfolioStats,
    pub strategies: Vec<StrategySnapshot>,
    pub active_orders: usize,
}

enum Venue {
    Simulated(Arc<SimulatedExecutionHandler>),
    Live(Arc<LiveExecutionHandler>),
}

impl Venue {
    fn as_execution_handler(&self) -> Arc<dyn ExecutionHandler> {
        match self {
            Venue::Simulated(venue) => Arc::clone(venue) as Arc<dyn ExecutionHandler>,
            Venue::Live(venue) => Arc::clone(venue) as Arc<dyn ExecutionHandler>,
        }
    }
}

/// Feeder-side bridge: every pushed bar lands in the simulated venue's
/// current-market map first, then goes out on the bus.
struct MarketBridge {
    bus: Arc<EventBus>,
    venue: Option<Arc<SimulatedExecutionHandler>>,
}

impl BarListener for MarketBridge {
    fn on_bar(&self, bar: &Bar) {
        if let Some(venue) = &self.venue {
            venue.update_market(bar.clone());
        }
        self.bus.publish(Event::market(bar.clone()));
    }
}

/// The assembled application.  Components are wired once in [`App::build`];
/// `start`/`stop` drive them in dependency order and are idempotent.
pub struct App {
    config: AppConfig,
    bus: Arc<EventBus>,
    provider: Arc<ArchiveDataProvider>,
    strategies: Arc<StrategyManager>,
    portfolio: Arc<PortfolioRiskManager>,
    venue: Venue,
    timers: TimerService,
    universe: Vec<Symbol>,
    started: AtomicBool,
    feed_worker: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Build and wire all components for the configured mode.  Live mode
    /// needs a broker adapter; use [`App::build_with_broker`].
    pub fn build(config: AppConfig) -> KfResult<Self> {
        if config.execution.kind == ExecutionKind::Live {
            return Err(KfError::Config(
                "live mode requires a broker adapter; use App::build_with_broker".to_string(),
            ));
        }
        Self::assemble(config, None)
    }

    /// Build for live trading against the given broker adapter.
    pub fn build_with_broker(
        config: AppConfig,
        adapter: Arc<dyn BrokerAdapter>,
        runtime: tokio::runtime::Handle,
    ) -> KfResult<Self> {
        Self::assemble(config, Some((adapter, runtime)))
    }

    fn assemble(
        config: AppConfig,
        broker: Option<(Arc<dyn BrokerAdapter>, tokio::runtime::Handle)>,
    ) -> KfResult<Self> {
        config.validate()?;

        let bus = Arc::new(EventBus::with_poll_timeout(
            config.engine.queue_capacity,
            Duration::from_millis(config.engine.timeout_ms.max(1)),
        ));

        // Data layer
        let snapshot = Arc::new(MarketSnapshot::new());
        let archive = BarArchive::new(&config.data.root_path);
        let mut catalog = Catalog::new();
        if let Some(path) = &config.data.calendar_path {
            let rows = catalog.load_calendar(path)?;
            info!(rows, path = path.as_str(), "trading calendar loaded");
        }
        if let Some(path) = &config.data.stock_info_path {
            let rows = catalog.load_stock_info(path)?;
            info!(rows, path = path.as_str(), "stock info loaded");
        }
        let provider = Arc::new(ArchiveDataProvider::new(
            archive,
            catalog,
            Arc::clone(&snapshot),
        ));

        // Strategy framework
        let strategies = StrategyManager::with_signal_timeout(
            Arc::clone(&bus),
            config.strategy.max_strategies,
            config.strategy.signal_timeout_seconds,
        );
        let universe: Vec<Symbol> = config
            .backtest
            .universe
            .iter()
            .map(|s| Symbol::parse(s))
            .collect::<KfResult<Vec<_>>>()?;
        let mut universe_set: HashSet<Symbol> = universe.iter().cloned().collect();
        if let Some(as_of) = config.backtest.start_date {
            universe_set.extend(provider.catalog().universe(as_of));
        }
        strategies.set_universe(universe_set);

        // Portfolio & risk
        let account = Account::new(&config.account.account_id, config.account.initial_capital)?;
        let portfolio = PortfolioRiskManager::new(
            Arc::clone(&bus),
            account,
            config.portfolio.clone(),
            config.risk.clone(),
        );

        // Execution venue
        let venue = match (&config.execution.kind, broker) {
            (ExecutionKind::Simulated, _) => Venue::Simulated(SimulatedExecutionHandler::new(
                Arc::clone(&bus),
                config.execution.simulation.clone(),
                config.execution.fees.clone(),
            )),
            (ExecutionKind::Live, Some((adapter, runtime))) => {
                let timeout = config
                    .execution
                    .broker
                    .as_ref()
                    .map(|b| Duration::from_millis(b.timeout_ms))
                    .unwrap_or(Duration::from_secs(5));
                Venue::Live(LiveExecutionHandler::new(
                    Arc::clone(&bus),
                    adapter,
                    config.execution.fees.clone(),
                    runtime,
                    timeout,
                    config.execution.max_retry_count,
                ))
            }
            (ExecutionKind::Live, None) => {
                return Err(KfError::Config("live mode requires a broker adapter".into()))
            }
        };

        // Bus subscriptions
        strategies.attach(&bus)?;
        portfolio.attach(&bus)?;
        ExecutionEventHandler::new(venue.as_execution_handler()).attach(&bus)?;

        // Feeder bridge for the configured universe
        let bridge = Arc::new(MarketBridge {
            bus: Arc::clone(&bus),
            venue: match &venue {
                Venue::Simulated(sim) => Some(Arc::clone(sim)),
                Venue::Live(_) => None,
            },
        });
        for symbol in &universe {
            provider.subscribe(symbol, Arc::clone(&bridge) as Arc<dyn BarListener>);
        }

        let timers = TimerService::from_config(Arc::clone(&bus), &config.timers);

        Ok(Self {
            config,
            bus,
            provider,
            strategies,
            portfolio,
            venue,
            timers,
            universe,
            started: AtomicBool::new(false),
            feed_worker: Mutex::new(None),
        })
    }

    /// Ordered startup: engine, broker connection, timers, strategies, then
    /// (in backtest mode) the replay feeder.  Idempotent.
    pub fn start(&self) -> KfResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.bus.start();
        if let Venue::Live(live) = &self.venue {
            live.connect()?;
        }
        self.timers.start();
        self.strategies.start_all();
        self.bus.publish(Event::system("kingfisher started"));
        info!(mode = ?self.config.mode, "kingfisher started");

        if self.config.mode == RunMode::Backtest {
            self.spawn_replay()?;
        }
        Ok(())
    }

    fn spawn_replay(&self) -> KfResult<()> {
        let (Some(start), Some(end)) = (self.config.backtest.start_date, self.config.backtest.end_date)
        else {
            warn!("backtest window not configured; no replay started");
            return Ok(());
        };

        // Extend the window backward so indicator lookbacks are warm by the
        // time the backtest window opens.
        let preload = chrono::Duration::days(self.config.data.preload_days as i64);
        let feed = ReplayFeed::new(
            self.provider.clone(),
            self.universe.clone(),
            self.config.backtest.frequency,
            start - preload,
            end,
        );
        let bus = Arc::clone(&self.bus);
        let handle = std::thread::Builder::new()
            .name("kf-replay".to_string())
            .spawn(move || match feed.run() {
                Ok(report) => {
                    bus.publish(Event::system(&format!(
                        "replay completed: {} bars pushed, {} skipped",
                        report.bars_pushed, report.bars_skipped_non_trading
                    )));
                }
                Err(e) => {
                    error!(error = %e, "replay failed");
                    bus.publish(Event::system(&format!("replay failed: {e}")));
                }
            })
            .map_err(|e| KfError::Internal(format!("failed to spawn replay thread: {e}")))?;

        *self.feed_worker.lock() = Some(handle);
        Ok(())
    }

    /// Ordered shutdown: cancel working orders, stop timers and strategies,
    /// join the feeder, then stop the engine.  A failing step never blocks
    /// the rest.  Returns the final engine statistics.
    pub fn stop(&self) -> EngineStats {
        if !self.started.swap(false, Ordering::AcqRel) {
            return self.bus.stats();
        }

        let handler = self.venue.as_execution_handler();
        for order in handler.active_orders() {
            match handler.cancel_order(order.id) {
                Ok(true) => info!(order = %order.id, "active order cancelled at shutdown"),
                Ok(false) => warn!(order = %order.id, "active order could not be cancelled"),
                Err(e) => warn!(order = %order.id, error = %e, "cancel failed at shutdown"),
            }
        }

        self.timers.stop();
        self.strategies.stop_all();
        if let Venue::Live(live) = &self.venue {
            if let Err(e) = live.disconnect() {
                warn!(error = %e, "broker disconnect failed");
            }
        }
        if let Some(handle) = self.feed_worker.lock().take() {
            let _ = handle.join();
        }

        let stats = self.bus.stop();
        info!("kingfisher stopped");
        stats
    }

    pub fn status(&self) -> AppStatus {
        AppStatus {
            running: self.started.load(Ordering::Acquire),
            mode: format!("{:?}", self.config.mode),
            engine: self.bus.stats(),
            portfolio: self.portfolio.stats(),
            strategies: self.strategies.snapshots(),
            active_orders: self.venue.as_execution_handler().active_orders().len(),
        }
    }

    // -- component access for callers that register strategies, feed data,
    //    or inspect state --------------------------------------------------

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn provider(&self) -> Arc<ArchiveDataProvider> {
        Arc::clone(&self.provider)
    }

    pub fn strategies(&self) -> Arc<StrategyManager> {
        Arc::clone(&self.strategies)
    }

    pub fn portfolio(&self) -> Arc<PortfolioRiskManager> {
        Arc::clone(&self.portfolio)
    }

    pub fn simulated_venue(&self) -> Option<Arc<SimulatedExecutionHandler>> {
        match &self.venue {
            Venue::Simulated(sim) => Some(Arc::clone(sim)),
            Venue::Live(_) => None,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
