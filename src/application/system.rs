use crate::application::execution::OrderManagementSystem;
use crate::application::journal::JournalService;
use crate::application::market_data::MarketDataService;
use crate::application::monitoring::ControlManager;
use crate::application::notification::{LogChannel, Notification, Notifier, NotifierConfig};
use crate::application::recovery::Reconciler;
use crate::application::risk::{PortfolioTracker, RiskValidator};
use crate::application::strategies::{MarketSnapshot, Strategy, StrategyContext, StrategyRegistry};
use crate::application::universe::default_universe;
use crate::config::{BrokerType, Settings};
use crate::domain::events::{
    ErrorEvent, ErrorSeverity, Event, EventHandler, EventKind, MarketData, SignalEvent,
};
use crate::domain::market::Timeframe;
use crate::domain::ports::{Broker, UniverseService};
use crate::domain::run::RunStatus;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::logging::TRADES_TARGET;
use crate::infrastructure::mock::MockBroker;
use crate::infrastructure::persistence::{Database, Repository};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Local, Timelike, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const UNIVERSE_SIZE: usize = 20;
const UNIVERSE_REFRESH_MINUTES: u64 = 30;
const STATUS_INTERVAL_SECS: u64 = 60;
const HISTORY_LIMIT: i64 = 250;
const BROKER_LOGIN_TIMEOUT_SECS: u64 = 120;
const SUBSCRIBE_TIMEOUT_SECS: u64 = 10;

fn is_market_open(settings: &Settings) -> bool {
    let now = Local::now();
    let minutes = now.hour() * 60 + now.minute();
    let start = settings.risk.trading_start_hour * 60 + settings.risk.trading_start_minute;
    let end = settings.risk.trading_end_hour * 60 + settings.risk.trading_end_minute;
    (start..=end).contains(&minutes)
}

/// Shared component graph handed to the event handlers.
struct Services {
    settings: Settings,
    bus: EventBus,
    repo: Repository,
    validator: Arc<RiskValidator>,
    oms: Arc<OrderManagementSystem>,
    tracker: Arc<PortfolioTracker>,
    market: Arc<MarketDataService>,
    control: Arc<ControlManager>,
    strategies: Vec<Arc<dyn Strategy>>,
    universe: RwLock<Vec<String>>,
    daily_trades: AtomicU32,
}

impl Services {
    fn strategy_context(
        &self,
        portfolio: crate::domain::portfolio::Portfolio,
        active_orders_count: usize,
        metadata: serde_json::Value,
    ) -> StrategyContext {
        StrategyContext {
            portfolio,
            active_orders_count,
            daily_trades_count: self.daily_trades.load(Ordering::SeqCst),
            is_market_open: is_market_open(&self.settings),
            metadata,
        }
    }
}

/// Candle events drive the strategies; tick events only refresh position
/// marks. Strategy panics-equivalents (Err returns) are counted toward the
/// error-rate kill switch.
struct MarketEventHandler {
    services: Arc<Services>,
}

#[async_trait]
impl EventHandler for MarketEventHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        let Event::Market(market_event) = event else {
            return Ok(());
        };
        let services = &self.services;

        if services.control.is_paused() {
            return Ok(());
        }

        match &market_event.data {
            MarketData::Tick(tick) => {
                services.tracker.update_price(&tick.symbol, tick.price).await;
                return Ok(());
            }
            MarketData::Candle(_) => {}
        }

        let symbol = market_event.symbol.clone();
        let mut historical = std::collections::HashMap::new();
        for timeframe in Timeframe::default_set() {
            let candles = services
                .repo
                .get_candles(&symbol, timeframe, HISTORY_LIMIT)
                .await?;
            if !candles.is_empty() {
                historical.insert(timeframe, candles);
            }
        }

        let snapshot = MarketSnapshot {
            symbol: symbol.clone(),
            timestamp: market_event.timestamp,
            last_tick: None,
            current_candles: services.market.current_candles(&symbol).await,
            historical_candles: historical,
        };
        let universe = services.universe.read().await.clone();
        let context = services.strategy_context(
            services.tracker.snapshot().await,
            services.oms.active_order_count().await,
            serde_json::json!({ "universe": universe }),
        );

        for strategy in &services.strategies {
            let strategy_symbols = strategy.symbols();
            if !strategy_symbols.is_empty() && !strategy_symbols.contains(&symbol) {
                continue;
            }

            match strategy.on_market_data(&snapshot, &context).await {
                Ok(signals) => {
                    for signal in signals {
                        services.bus.publish(Event::Signal(SignalEvent { signal }));
                    }
                }
                Err(e) => {
                    error!("Strategy {} error: {:#}", strategy.name(), e);
                    if services.control.record_error() {
                        services.control.handle_repeated_errors().await;
                    }
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "strategy_host"
    }
}

/// Persist → price → validate → submit. Successful submissions bump the
/// daily trade counter.
struct SignalEventHandler {
    services: Arc<Services>,
}

#[async_trait]
impl EventHandler for SignalEventHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        let Event::Signal(signal_event) = event else {
            return Ok(());
        };
        let services = &self.services;
        let signal = &signal_event.signal;

        if services.control.is_paused() {
            return Ok(());
        }
        if signal.action == crate::domain::signal::SignalAction::Hold {
            // Persisted for the audit trail, nothing else.
            services.repo.save_signal(signal).await?;
            return Ok(());
        }

        services.repo.save_signal(signal).await?;

        let current_price = services
            .market
            .current_candle(&signal.symbol, Timeframe::OneMin)
            .await
            .map(|candle| candle.close);

        let context = services.strategy_context(
            services.tracker.snapshot().await,
            services.oms.active_order_count().await,
            serde_json::json!({}),
        );

        let result = services.validator.validate_signal(
            signal,
            &context.portfolio,
            current_price,
            Some(&context),
        );

        if !result.approved {
            info!(
                "Signal rejected: {} - {}",
                signal.signal_id,
                result.reject_reason.as_deref().unwrap_or("unknown")
            );
            return Ok(());
        }

        let order = services
            .oms
            .process_approved_signal(signal, result.approved_quantity, current_price)
            .await?;

        if let Some(order) = order {
            services.daily_trades.fetch_add(1, Ordering::SeqCst);
            info!(
                target: TRADES_TARGET,
                event = "order_created",
                order_id = %order.order_id,
                signal_id = %signal.signal_id,
                symbol = %order.symbol,
                side = %order.side,
                quantity = order.quantity,
                status = %order.status,
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "signal_pipeline"
    }
}

/// Routes fills to the strategies' `on_fill`. Portfolio updates happen
/// independently through the tracker's own subscription.
struct FillEventHandler {
    services: Arc<Services>,
}

#[async_trait]
impl EventHandler for FillEventHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        let Event::Fill(fill) = event else {
            return Ok(());
        };
        let services = &self.services;

        info!(
            target: TRADES_TARGET,
            event = "fill_received",
            order_id = %fill.order_id,
            quantity = fill.quantity,
            price = %fill.price,
        );

        let Some(order) = services.repo.get_order(&fill.order_id).await? else {
            return Ok(());
        };

        for strategy in &services.strategies {
            let strategy_symbols = strategy.symbols();
            if strategy_symbols.is_empty() || strategy_symbols.contains(&order.symbol) {
                strategy
                    .on_fill(&order.symbol, order.side, fill.quantity, fill.price)
                    .await;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "strategy_fill_callback"
    }
}

/// Order lifecycle events become user notifications.
struct OrderNotificationHandler {
    notifier: Arc<Notifier>,
}

#[async_trait]
impl EventHandler for OrderNotificationHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        let Event::Order(order_event) = event else {
            return Ok(());
        };
        let order = &order_event.order;
        let label = match order_event.event_type {
            crate::domain::events::OrderEventType::New => "Order Submitted",
            crate::domain::events::OrderEventType::Partial => "Partial Fill",
            crate::domain::events::OrderEventType::Filled => "Order Filled",
            crate::domain::events::OrderEventType::Canceled => "Order Canceled",
            crate::domain::events::OrderEventType::Rejected => "Order Rejected",
        };
        self.notifier.enqueue(Notification::new(
            format!("{}-{}", order_event.order_id, order_event.event_type),
            format!("{label}: {} {}", order.symbol, order.side),
            format!(
                "order={} qty={} filled={} status={}",
                order.order_id, order.quantity, order.filled_quantity, order.status
            ),
        ));
        Ok(())
    }

    fn name(&self) -> &str {
        "order_notifications"
    }
}

/// ErrorEvents at error severity or above feed the error-rate trigger.
struct ErrorEventHandler {
    services: Arc<Services>,
}

#[async_trait]
impl EventHandler for ErrorEventHandler {
    async fn handle(&self, event: Event) -> Result<()> {
        let Event::Error(error_event) = event else {
            return Ok(());
        };
        warn!(
            "ErrorEvent [{}] {}: {}",
            error_event.severity, error_event.error_type, error_event.message
        );
        if error_event.severity >= ErrorSeverity::Error
            && self.services.control.record_error()
        {
            self.services.control.handle_repeated_errors().await;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "error_monitor"
    }
}

/// The wired application: owns the run lifecycle from reconciliation to
/// graceful teardown.
pub struct Application {
    services: Arc<Services>,
    db: Database,
    broker: Arc<dyn Broker>,
    reconciler: Arc<Reconciler>,
    notifier: Arc<Notifier>,
    journal: Arc<JournalService>,
    universe_service: Option<Arc<dyn UniverseService>>,
    universe_task: Mutex<Option<JoinHandle<()>>>,
}

impl Application {
    /// Construct the component graph. `broker_override` injects the real
    /// adapter (or a scripted mock in tests); absent, the configured
    /// broker type decides, and only `mock` can be built in-process.
    pub async fn build(
        settings: Settings,
        broker_override: Option<Arc<dyn Broker>>,
        universe_service: Option<Arc<dyn UniverseService>>,
        registry: &StrategyRegistry,
    ) -> Result<Self> {
        let db = Database::connect(&settings.database.url()).await?;
        let repo = Repository::new(db.clone());
        let bus = EventBus::new();

        let broker: Arc<dyn Broker> = match broker_override {
            Some(broker) => broker,
            None => match settings.broker.broker_type {
                BrokerType::Mock => Arc::new(MockBroker::new()),
                BrokerType::Real => anyhow::bail!(
                    "No real broker adapter is wired into this binary; run with --broker mock"
                ),
            },
        };

        let validator = Arc::new(RiskValidator::new(settings.risk.clone()));
        let oms = Arc::new(OrderManagementSystem::new(
            broker.clone(),
            repo.clone(),
            bus.clone(),
        ));
        let tracker = Arc::new(PortfolioTracker::new(repo.clone()));
        let reconciler = Arc::new(Reconciler::new(broker.clone(), repo.clone(), tracker.clone()));
        let market = Arc::new(MarketDataService::new(
            broker.clone(),
            repo.clone(),
            bus.clone(),
            Timeframe::default_set(),
        ));
        let control = Arc::new(ControlManager::new(bus.clone(), oms.clone(), validator.clone()));
        let notifier = Arc::new(Notifier::new(Arc::new(LogChannel), NotifierConfig::default()));
        let journal = Arc::new(JournalService::new(
            repo.clone(),
            settings.logging.log_dir.join("journal"),
            settings.strategy.clone(),
        ));

        let strategy = registry
            .create(&settings.strategy)
            .context("Failed to load configured strategy")?;
        info!("Loaded strategy: {} (available: {:?})", settings.strategy, registry.available());

        let services = Arc::new(Services {
            settings,
            bus,
            repo,
            validator,
            oms,
            tracker,
            market,
            control,
            strategies: vec![strategy],
            universe: RwLock::new(Vec::new()),
            daily_trades: AtomicU32::new(0),
        });

        Ok(Self {
            services,
            db,
            broker,
            reconciler,
            notifier,
            journal,
            universe_service,
            universe_task: Mutex::new(None),
        })
    }

    /// Full startup sequence. A reconciliation failure is fatal: the run
    /// is marked CRASHED and the application refuses to trade.
    pub async fn start(&self) -> Result<()> {
        let services = &self.services;
        info!("Starting trading system...");

        services.bus.start().await;
        self.notifier.start();

        match tokio::time::timeout(
            Duration::from_secs(BROKER_LOGIN_TIMEOUT_SECS),
            self.broker.connect(),
        )
        .await
        {
            Ok(result) => result.context("Broker connection failed")?,
            Err(_) => anyhow::bail!(
                "Broker login timed out after {BROKER_LOGIN_TIMEOUT_SECS}s"
            ),
        }
        self.register_broker_error_callback();

        services.oms.load_active_orders().await?;
        services.tracker.initialize().await?;

        let result = self.reconciler.reconcile().await;
        if !result.success {
            let message = result.error.unwrap_or_else(|| "unknown".to_string());
            self.reconciler
                .end_run(RunStatus::Crashed, Some(&message))
                .await
                .ok();
            anyhow::bail!("Reconciliation failed: {message}");
        }

        // Initial universe: service result, falling back to the default list.
        let universe = match &self.universe_service {
            Some(service) => match service.top_by_trading_value(UNIVERSE_SIZE).await {
                Ok(symbols) if !symbols.is_empty() => symbols,
                Ok(_) => {
                    warn!("No symbols from universe service, using default universe");
                    default_universe()
                }
                Err(e) => {
                    warn!("Failed to fetch universe, using default: {:#}", e);
                    default_universe()
                }
            },
            None => default_universe(),
        };
        info!("Universe: {} symbols", universe.len());
        *services.universe.write().await = universe.clone();

        let daily_trades = services.repo.count_orders_today().await?;
        services
            .daily_trades
            .store(daily_trades as u32, Ordering::SeqCst);
        info!("Daily trades count at startup: {}", daily_trades);

        self.subscribe_handlers().await;

        for strategy in &services.strategies {
            strategy.on_start().await?;
            let symbols = strategy.symbols();
            if !symbols.is_empty() {
                subscribe_with_timeout(&services.market, &symbols).await;
            }
        }
        subscribe_with_timeout(&services.market, &universe).await;

        if self.universe_service.is_some() {
            *self.universe_task.lock().await = Some(self.spawn_universe_refresh());
        }
        self.spawn_signal_handler();

        info!(
            "Trading system started (run_id={})",
            self.reconciler.run_id().unwrap_or_default()
        );
        Ok(())
    }

    async fn subscribe_handlers(&self) {
        let services = &self.services;
        services
            .bus
            .subscribe(
                EventKind::Market,
                Arc::new(MarketEventHandler {
                    services: services.clone(),
                }),
            )
            .await;
        services
            .bus
            .subscribe(
                EventKind::Signal,
                Arc::new(SignalEventHandler {
                    services: services.clone(),
                }),
            )
            .await;
        services
            .bus
            .subscribe(EventKind::Fill, services.tracker.clone())
            .await;
        services
            .bus
            .subscribe(
                EventKind::Fill,
                Arc::new(FillEventHandler {
                    services: services.clone(),
                }),
            )
            .await;
        services
            .bus
            .subscribe(
                EventKind::Order,
                Arc::new(OrderNotificationHandler {
                    notifier: self.notifier.clone(),
                }),
            )
            .await;
        services
            .bus
            .subscribe(
                EventKind::Error,
                Arc::new(ErrorEventHandler {
                    services: services.clone(),
                }),
            )
            .await;
    }

    fn register_broker_error_callback(&self) {
        let bus = self.services.bus.clone();
        self.broker.set_error_callback(Arc::new(
            move |error_type, message, severity, context| {
                let bus = bus.clone();
                Box::pin(async move {
                    bus.publish(Event::Error(ErrorEvent {
                        error_type,
                        message,
                        severity,
                        context,
                    }));
                })
            },
        ));
    }

    fn spawn_universe_refresh(&self) -> JoinHandle<()> {
        let services = self.services.clone();
        let universe_service = self.universe_service.clone().expect("checked by caller");
        tokio::spawn(async move {
            let interval = Duration::from_secs(UNIVERSE_REFRESH_MINUTES * 60);
            loop {
                tokio::select! {
                    _ = services.control.wait_for_shutdown() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if services.control.shutdown_requested() {
                    break;
                }
                refresh_universe(&services, universe_service.as_ref()).await;
            }
        })
    }

    fn spawn_signal_handler(&self) {
        let control = self.services.control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                control.request_shutdown("OS signal received");
            }
        });
    }

    /// Start, idle until shutdown is requested, then tear down. Returns
    /// the terminal run status.
    pub async fn run(&self) -> Result<RunStatus> {
        if let Err(e) = self.start().await {
            self.stop().await;
            return Err(e);
        }

        let services = &self.services;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut seconds: u64 = 0;
        let mut was_market_open = is_market_open(&services.settings);

        loop {
            tokio::select! {
                _ = services.control.wait_for_shutdown() => break,
                _ = ticker.tick() => {}
            }
            seconds += 1;

            if seconds % STATUS_INTERVAL_SECS == 0 {
                self.log_status().await;
            }

            let market_open = is_market_open(&services.settings);
            if was_market_open && !market_open {
                self.generate_daily_journal().await;
            }
            was_market_open = market_open;
        }

        let status = if services.control.is_kill_switch_active() {
            RunStatus::Killed
        } else {
            RunStatus::Completed
        };
        self.stop().await;
        Ok(status)
    }

    async fn log_status(&self) {
        let services = &self.services;
        let portfolio = services.tracker.snapshot().await;
        info!(
            "Status: paused={} kill_switch={} errors={} trades_today={} equity={} cash={} positions={}",
            services.control.is_paused(),
            services.control.is_kill_switch_active(),
            services.control.recent_error_count(),
            services.daily_trades.load(Ordering::SeqCst),
            portfolio.total_equity,
            portfolio.cash,
            portfolio.positions.len(),
        );
    }

    async fn generate_daily_journal(&self) {
        let portfolio = self.services.tracker.snapshot().await;
        if let Err(e) = self
            .journal
            .generate(Utc::now(), portfolio.total_equity, portfolio.cash)
            .await
        {
            error!("Journal generation failed: {:#}", e);
        }
    }

    /// Graceful teardown. Every step's failure is logged; shutdown
    /// proceeds regardless.
    pub async fn stop(&self) {
        let services = &self.services;
        info!("Stopping trading system...");

        if let Some(task) = self.universe_task.lock().await.take() {
            services.control.request_shutdown("stopping");
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                warn!("Universe refresh task did not stop in time, abandoning");
            }
        }

        for strategy in &services.strategies {
            if let Err(e) = strategy.on_stop().await {
                error!("Strategy {} on_stop failed: {:#}", strategy.name(), e);
            }
        }

        services.market.shutdown().await;
        self.notifier.stop().await;
        services.bus.stop().await;

        let status = if services.control.is_kill_switch_active() {
            RunStatus::Killed
        } else {
            RunStatus::Completed
        };
        if let Err(e) = self.reconciler.end_run(status, None).await {
            error!("Failed to end run record: {:#}", e);
        }

        if let Err(e) = self.broker.disconnect().await {
            error!("Broker disconnect failed: {}", e);
        }
        self.db.close().await;
        info!("Trading system stopped");
    }

    // Accessors used by embedding binaries and the integration tests.

    pub fn bus(&self) -> &EventBus {
        &self.services.bus
    }

    pub fn control(&self) -> &Arc<ControlManager> {
        &self.services.control
    }

    pub fn oms(&self) -> &Arc<OrderManagementSystem> {
        &self.services.oms
    }

    pub fn tracker(&self) -> &Arc<PortfolioTracker> {
        &self.services.tracker
    }

    pub fn market(&self) -> &Arc<MarketDataService> {
        &self.services.market
    }

    pub fn repo(&self) -> &Repository {
        &self.services.repo
    }

    pub fn daily_trades_count(&self) -> u32 {
        self.services.daily_trades.load(Ordering::SeqCst)
    }

    pub async fn universe(&self) -> Vec<String> {
        self.services.universe.read().await.clone()
    }
}

/// Subscriptions are best-effort at startup: a slow or failing subscribe
/// warns instead of aborting the run.
async fn subscribe_with_timeout(market: &Arc<MarketDataService>, symbols: &[String]) {
    match tokio::time::timeout(
        Duration::from_secs(SUBSCRIBE_TIMEOUT_SECS),
        market.subscribe(symbols),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Market data subscribe failed: {}", e),
        Err(_) => warn!(
            "Market data subscribe timed out after {SUBSCRIBE_TIMEOUT_SECS}s"
        ),
    }
}

/// Fetch the top-N universe and apply subscribe/unsubscribe deltas. An
/// empty result keeps the previous universe and emits a warning event.
async fn refresh_universe(services: &Arc<Services>, universe_service: &dyn UniverseService) {
    let new_universe = match universe_service.top_by_trading_value(UNIVERSE_SIZE).await {
        Ok(symbols) => symbols,
        Err(e) => {
            error!("Failed to refresh universe: {:#}", e);
            return;
        }
    };

    if new_universe.is_empty() {
        warn!("Universe refresh returned empty, keeping old universe");
        services.bus.publish(Event::Error(ErrorEvent {
            error_type: "universe_refresh".to_string(),
            message: "Universe refresh returned no symbols".to_string(),
            severity: ErrorSeverity::Warning,
            context: serde_json::json!({}),
        }));
        return;
    }

    let old_universe = services.universe.read().await.clone();
    let old_set: HashSet<&String> = old_universe.iter().collect();
    let new_set: HashSet<&String> = new_universe.iter().collect();

    let added: Vec<String> = new_universe
        .iter()
        .filter(|s| !old_set.contains(*s))
        .cloned()
        .collect();
    let removed: Vec<String> = old_universe
        .iter()
        .filter(|s| !new_set.contains(*s))
        .cloned()
        .collect();

    if !added.is_empty() {
        if let Err(e) = services.market.subscribe(&added).await {
            error!("Universe subscribe failed: {}", e);
        }
    }
    if !removed.is_empty() {
        if let Err(e) = services.market.unsubscribe(&removed).await {
            error!("Universe unsubscribe failed: {}", e);
        }
    }

    *services.universe.write().await = new_universe.clone();
    if !added.is_empty() || !removed.is_empty() {
        info!(
            "Universe refreshed: {} symbols (+{}/-{})",
            new_universe.len(),
            added.len(),
            removed.len()
        );
    }
}
