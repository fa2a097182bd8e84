//! Core supervisor.
//!
//! Owns lifecycle and all cross-component wiring; components talk through
//! channels and never hold references to each other.
//!
//! Startup order: venue adapters → cache ingestion → portfolio baseline →
//! scanner → execution coordinator. Shutdown reverses it: scanning stops,
//! intake closes, in-flight executions get the grace period, then the stop
//! signal cancels whatever remains.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use common::time::now_ms;
use execution::coordinator::{CoordinatorConfig, ExecutionCoordinator};
use execution::types::{ExecEvent, SubmitError};
use market::adapter::{VenueAdapter, with_retries};
use market::cache::MarketDataCache;
use market::types::{Side, Symbol, Venue, VenueId};
use portfolio::balances::BalanceBook;
use portfolio::exposure::ExposureBook;
use portfolio::performance::PerformanceTracker;
use risk::breaker::VenueBreakers;
use risk::gate;
use risk::types::{Decision, RejectReason, RiskAggregates, RiskLimits};
use scanner::engine::{Scanner, ScannerConfig, ScannerEvent, ScannerMode};
use strategy::config::StrategyEntry;
use strategy::types::{Opportunity, OpportunityStatus};

use crate::db::AuditWriter;
use crate::events::{CoreEvent, EventBus};

#[derive(Clone)]
pub struct SupervisorConfig {
    pub scanner: ScannerConfig,
    pub coordinator: CoordinatorConfig,
    pub risk_limits: RiskLimits,
    pub risk_cooldown: Duration,
    pub heartbeat_period: Duration,
    pub shutdown_grace: Duration,
    pub ingest_period: Duration,
}

pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: EventBus,
    cache: Arc<MarketDataCache>,
    scanner: Arc<Scanner>,
    coordinator: Arc<ExecutionCoordinator>,
    tracker: Arc<PerformanceTracker>,
    exposure: Arc<ExposureBook>,
    balances: Arc<BalanceBook>,
    breakers: Arc<VenueBreakers>,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    venues: HashMap<VenueId, Venue>,
    symbols_by_venue: HashMap<VenueId, Vec<Symbol>>,
    audit: Option<AuditWriter>,

    mode_tx: watch::Sender<ScannerMode>,
    emergency_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,

    scan_rx: Mutex<Option<mpsc::Receiver<ScannerEvent>>>,
    exec_rx: Mutex<Option<mpsc::Receiver<ExecEvent>>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Opportunity>>>,

    started_at: std::time::Instant,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        cfg: SupervisorConfig,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
        symbols_by_venue: HashMap<VenueId, Vec<Symbol>>,
        strategies: Vec<StrategyEntry>,
        audit: Option<AuditWriter>,
    ) -> Arc<Self> {
        let bus = EventBus::default();
        let cache = Arc::new(MarketDataCache::default());

        let venues: HashMap<VenueId, Venue> = adapters
            .iter()
            .map(|(id, a)| (id.clone(), a.venue()))
            .collect();

        let (scan_tx, scan_rx) = mpsc::channel(256);
        let scanner = Scanner::new(
            cfg.scanner.clone(),
            strategies,
            Arc::clone(&cache),
            venues.clone(),
            scan_tx,
        );

        let (exec_tx, exec_rx) = mpsc::channel(64);
        let (emergency_tx, emergency_rx) = watch::channel(false);
        let (coordinator, queue_rx) = ExecutionCoordinator::new(
            cfg.coordinator.clone(),
            adapters.clone(),
            exec_tx,
            emergency_rx,
        );

        let (mode_tx, _) = watch::channel(ScannerMode::Running);
        let (shutdown_tx, _) = watch::channel(false);

        Arc::new(Self {
            cfg,
            bus,
            cache,
            scanner,
            coordinator,
            tracker: Arc::new(PerformanceTracker::new()),
            exposure: Arc::new(ExposureBook::new()),
            balances: Arc::new(BalanceBook::new()),
            breakers: Arc::new(VenueBreakers::default()),
            adapters,
            venues,
            symbols_by_venue,
            audit,
            mode_tx,
            emergency_tx,
            shutdown_tx,
            scan_rx: Mutex::new(Some(scan_rx)),
            exec_rx: Mutex::new(Some(exec_rx)),
            queue_rx: Mutex::new(Some(queue_rx)),
            started_at: std::time::Instant::now(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn tracker(&self) -> Arc<PerformanceTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn scanner(&self) -> Arc<Scanner> {
        Arc::clone(&self.scanner)
    }

    pub fn emergency_stopped(&self) -> bool {
        *self.emergency_tx.borrow()
    }

    /// One-shot reachability probe over every adapter.
    pub async fn health_check(&self) -> bool {
        let mut healthy = true;
        for (id, adapter) in &self.adapters {
            match adapter.health_check().await {
                Ok(()) => info!(venue = %id, "venue reachable"),
                Err(e) => {
                    warn!(venue = %id, error = %e, "venue unreachable");
                    healthy = false;
                }
            }
        }
        healthy
    }

    /// Bring the pipeline up in dependency order.
    pub async fn start(self: &Arc<Self>) {
        info!(
            venues = self.adapters.len(),
            "supervisor starting"
        );

        // Adapters first: probe reachability, then seed the balance baseline.
        for (id, adapter) in &self.adapters {
            if let Err(e) = adapter.health_check().await {
                warn!(venue = %id, error = %e, "venue unhealthy at startup");
            }
        }
        self.reconcile_balances().await;

        // Cache ingestion before anything reads the cache.
        for (venue_id, symbols) in self.symbols_by_venue.clone() {
            if let Some(adapter) = self.adapters.get(&venue_id) {
                self.spawn(Arc::clone(self).ingest_loop(
                    venue_id,
                    Arc::clone(adapter),
                    symbols,
                ));
            }
        }
        self.spawn(Arc::clone(self).market_event_loop());

        // Scanner, then the gate feeding the coordinator.
        let scan_rx = self.scan_rx.lock().take().expect("start called once");
        self.spawn(Arc::clone(&self.scanner).run(
            now_ms,
            self.mode_tx.subscribe(),
            self.shutdown_tx.subscribe(),
        ));
        self.spawn(Arc::clone(self).gate_loop(scan_rx));

        // Coordinator and its outcome consumer.
        let queue_rx = self.queue_rx.lock().take().expect("start called once");
        self.spawn(Arc::clone(&self.coordinator).run(queue_rx));
        let exec_rx = self.exec_rx.lock().take().expect("start called once");
        self.spawn(Arc::clone(self).exec_event_loop(exec_rx));

        self.spawn(Arc::clone(self).heartbeat_loop());

        if let Some(audit) = self.audit.clone() {
            let rx = self.bus.subscribe();
            self.spawn(audit.run(rx));
        }

        info!("supervisor started");
    }

    /// Stop in reverse order: scanning halts, intake closes, in-flight work
    /// gets the grace period, then everything else is cancelled.
    pub async fn shutdown(&self) {
        info!("supervisor shutting down");

        let _ = self.shutdown_tx.send(true);

        let drained = self.coordinator.drain(self.cfg.shutdown_grace).await;
        if !drained {
            warn!(
                grace_ms = self.cfg.shutdown_grace.as_millis() as u64,
                "grace period expired; cancelling in-flight executions"
            );
            let _ = self.emergency_tx.send(true);
            // One more short wait for recovery paths to finish.
            let _ = self.coordinator.drain(Duration::from_secs(2)).await;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        info!("supervisor stopped");
    }

    /// Hard stop: no new executions begin after this signal; in-flight
    /// executions unwind at their next cancellable boundary.
    pub fn emergency_stop(&self, reason: &str) {
        error!(reason, "emergency stop");
        let _ = self.emergency_tx.send(true);
        let _ = self.mode_tx.send(ScannerMode::Paused);
        self.bus.publish(CoreEvent::EmergencyStop {
            reason: reason.to_string(),
        });
    }

    fn spawn(&self, fut: impl std::future::Future<Output = ()> + Send + 'static) {
        self.tasks.lock().push(tokio::spawn(fut));
    }

    async fn reconcile_balances(&self) {
        for (id, adapter) in &self.adapters {
            match adapter.fetch_balances().await {
                Ok(reported) => {
                    debug!(venue = %id, assets = reported.len(), "balances reconciled");
                    self.balances.reconcile(id, reported);
                }
                Err(e) => warn!(venue = %id, error = %e, "balance reconciliation failed"),
            }
        }
    }

    /// Poll one venue's tickers, books, and funding into the cache, tracking
    /// connection health transitions.
    async fn ingest_loop(
        self: Arc<Self>,
        venue_id: VenueId,
        adapter: Arc<dyn VenueAdapter>,
        symbols: Vec<Symbol>,
    ) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut tick = tokio::time::interval(self.cfg.ingest_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let is_perp = adapter.venue().kind == market::types::VenueKind::Perpetual;
        let mut connected = true;

        info!(venue = %venue_id, symbols = symbols.len(), "ingestion started");

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let mut tick_ok = true;

            for symbol in &symbols {
                let ticker = with_retries("fetch_ticker", || adapter.fetch_ticker(symbol)).await;
                match ticker {
                    Ok(t) => {
                        if let Err(e) = self.cache.put_ticker(t) {
                            warn!(venue = %venue_id, error = %e, "ticker rejected");
                        }
                    }
                    Err(e) => {
                        debug!(venue = %venue_id, %symbol, error = %e, "ticker fetch failed");
                        self.breakers.record_failure(&venue_id, now_ms());
                        tick_ok = false;
                        continue;
                    }
                }

                match with_retries("fetch_book", || adapter.fetch_book(symbol, 20)).await {
                    Ok(b) => {
                        if let Err(e) = self.cache.put_book(b) {
                            warn!(venue = %venue_id, error = %e, "book rejected");
                        }
                    }
                    Err(e) => {
                        debug!(venue = %venue_id, %symbol, error = %e, "book fetch failed");
                        tick_ok = false;
                    }
                }

                if is_perp {
                    if let Ok(Some(f)) = adapter.funding_rate(symbol).await {
                        self.cache.put_funding(f);
                    }
                }
            }

            if tick_ok {
                self.breakers.record_success(&venue_id, now_ms());
            }

            if tick_ok && !connected {
                connected = true;
                info!(venue = %venue_id, "venue connection restored");
                self.bus.publish(CoreEvent::VenueConnectionRestored {
                    venue: venue_id.clone(),
                });
            } else if !tick_ok && connected {
                connected = false;
                warn!(venue = %venue_id, "venue connection lost");
                if let Some(audit) = &self.audit {
                    let _ = audit
                        .record_error("network", &format!("venue {venue_id} unreachable"))
                        .await;
                }
                self.bus.publish(CoreEvent::VenueConnectionLost {
                    venue: venue_id.clone(),
                });
            }
        }

        debug!(venue = %venue_id, "ingestion stopped");
    }

    /// Forward cache-derived anomalies onto the bus.
    async fn market_event_loop(self: Arc<Self>) {
        let mut rx = self.cache.subscribe();
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                ev = rx.recv() => match ev {
                    Ok(market_ev) => self.bus.publish(market_ev.into()),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(_) => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Admission pipeline: detected candidates run the gate; approvals are
    /// claimed from the scanner and handed to the coordinator.
    async fn gate_loop(self: Arc<Self>, mut rx: mpsc::Receiver<ScannerEvent>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut loss_breached = false;

        loop {
            let event = tokio::select! {
                ev = rx.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match event {
                ScannerEvent::Detected(op) => {
                    self.bus.publish(CoreEvent::OpportunityDetected(op.clone()));
                    self.admit(op, &mut loss_breached).await;
                }
                ScannerEvent::Expired(op) => {
                    self.bus.publish(CoreEvent::OpportunityExpired(op));
                }
            }
        }

        debug!("gate loop stopped");
    }

    async fn admit(self: &Arc<Self>, op: Opportunity, loss_breached: &mut bool) {
        let now = now_ms();

        if op.is_expired(now) {
            return;
        }

        let aggregates = RiskAggregates {
            daily_realized_loss: self.tracker.daily_realized_loss(now),
        };

        let decision = gate::evaluate(
            &op,
            &self.exposure.snapshot(),
            &aggregates,
            &self.cfg.risk_limits,
            &self.venues,
            &self.breakers.open_venues(now),
            &self.cache,
            now,
        );

        // The breach alert fires exactly once per false→true transition.
        if aggregates.daily_realized_loss < self.cfg.risk_limits.max_loss_per_day_quote {
            *loss_breached = false;
        }

        match decision {
            Decision::Approve => {
                // Claim transfers ownership out of the scanner; a lost race
                // (sweep or duplicate approval) simply drops the candidate.
                let Some(mut claimed) = self.scanner.claim(&op.id) else {
                    return;
                };
                claimed.status = OpportunityStatus::Approved;

                self.exposure.reserve(&claimed, now);

                if let Err(e) = self.coordinator.submit(claimed.clone()) {
                    self.exposure.release(&claimed);
                    let reason = match e {
                        SubmitError::Backpressure => RejectReason::Backpressure.code(),
                        SubmitError::Closed => "coordinatorClosed",
                    };
                    warn!(opportunity_id = %claimed.id, reason, "approval not submitted");
                    self.bus.publish(CoreEvent::OpportunityRejected {
                        opportunity: claimed,
                        reason: reason.to_string(),
                    });
                }
            }

            Decision::Reject(reason) => {
                debug!(
                    opportunity_id = %op.id,
                    reason = reason.code(),
                    "candidate rejected"
                );

                if reason == RejectReason::DailyLoss && !*loss_breached {
                    *loss_breached = true;
                    self.on_daily_loss_breach(&aggregates);
                }

                self.bus.publish(CoreEvent::OpportunityRejected {
                    opportunity: op,
                    reason: reason.code().to_string(),
                });
            }
        }
    }

    /// Daily loss cap hit: alert once and pause scanning for the cooldown.
    fn on_daily_loss_breach(self: &Arc<Self>, aggregates: &RiskAggregates) {
        warn!(
            daily_loss = %aggregates.daily_realized_loss,
            cap = %self.cfg.risk_limits.max_loss_per_day_quote,
            "daily loss cap reached; pausing scanner"
        );

        self.bus.publish(CoreEvent::RiskAlert {
            limit: "dailyLoss".to_string(),
            value: aggregates.daily_realized_loss.to_string(),
        });

        let _ = self.mode_tx.send(ScannerMode::Paused);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.cfg.risk_cooldown).await;
            if !*this.shutdown_tx.borrow() && !*this.emergency_tx.borrow() {
                info!("risk cooldown elapsed; resuming scanner");
                let _ = this.mode_tx.send(ScannerMode::Running);
            }
        });
    }

    /// Apply execution outcomes: performance, exposure, balances, breakers,
    /// and the outward event stream.
    async fn exec_event_loop(self: Arc<Self>, mut rx: mpsc::Receiver<ExecEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ExecEvent::Started {
                    execution,
                    opportunity,
                } => {
                    self.tracker.on_started();
                    self.bus.publish(CoreEvent::ExecutionStarted {
                        execution,
                        opportunity,
                    });
                }

                ExecEvent::Completed {
                    execution,
                    opportunity,
                } => {
                    let latency = execution
                        .completed_at
                        .unwrap_or(execution.started_at)
                        .saturating_sub(execution.started_at);
                    self.tracker.on_finished(
                        true,
                        execution.realized_profit,
                        execution.total_fees,
                        latency,
                        now_ms(),
                    );
                    self.apply_fills(&execution);
                    for trade in execution.trades.iter().filter(|t| t.filled_amount > rust_decimal::Decimal::ZERO) {
                        self.breakers.record_success(&trade.venue, now_ms());
                    }
                    self.exposure.release(&opportunity);
                    self.bus.publish(CoreEvent::ExecutionCompleted {
                        execution,
                        opportunity,
                    });
                }

                ExecEvent::Failed {
                    execution,
                    opportunity,
                } => {
                    let latency = execution
                        .completed_at
                        .unwrap_or(execution.started_at)
                        .saturating_sub(execution.started_at);
                    self.tracker.on_finished(
                        false,
                        execution.realized_profit,
                        execution.total_fees,
                        latency,
                        now_ms(),
                    );
                    self.apply_fills(&execution);

                    // Venue-API failures feed the breaker for the leg that
                    // stopped the execution.
                    let venue_fault = execution.errors.iter().any(|e| e.starts_with("venue_"));
                    if venue_fault {
                        if let Some(last) = execution
                            .trades
                            .iter()
                            .filter(|t| !t.compensation)
                            .next_back()
                        {
                            self.breakers.record_failure(&last.venue, now_ms());
                        }
                    }

                    if let Some(audit) = &self.audit {
                        let _ = audit
                            .record_error(
                                "execution",
                                &format!("{}: {}", execution.id, execution.errors.join("; ")),
                            )
                            .await;
                    }

                    self.exposure.release(&opportunity);
                    self.bus.publish(CoreEvent::ExecutionFailed {
                        execution,
                        opportunity,
                    });
                }

                ExecEvent::MonitorOnly { opportunity } => {
                    self.exposure.release(&opportunity);
                }
            }
        }

        debug!("execution event loop stopped");
    }

    /// Book filled trades into the balance view.
    fn apply_fills(&self, execution: &execution::types::Execution) {
        for t in &execution.trades {
            if t.filled_amount <= rust_decimal::Decimal::ZERO {
                continue;
            }

            let notional = t.filled_amount * t.average_fill_price;
            match t.side {
                Side::Buy => {
                    self.balances.apply_fill(&t.venue, &t.symbol.base, t.filled_amount);
                    self.balances
                        .apply_fill(&t.venue, &t.symbol.quote, -(notional + t.fee));
                }
                Side::Sell => {
                    self.balances.apply_fill(&t.venue, &t.symbol.base, -t.filled_amount);
                    self.balances
                        .apply_fill(&t.venue, &t.symbol.quote, notional - t.fee);
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut tick = tokio::time::interval(self.cfg.heartbeat_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.bus.publish(CoreEvent::Heartbeat {
                uptime_ms: self.started_at.elapsed().as_millis() as u64,
                rss_bytes: rss_bytes(),
                live_opportunities: self.scanner.active_len(),
            });

            if let Some(audit) = &self.audit {
                if let Err(e) = audit.record_performance(&self.tracker.snapshot()).await {
                    warn!(error = ?e, "performance snapshot write failed");
                }
            }
        }
    }
}

/// Resident set size, best effort (procfs on Linux, zero elsewhere).
fn rss_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| {
            s.split_whitespace()
                .nth(1)
                .and_then(|pages| pages.parse::<u64>().ok())
        })
        .map(|pages| pages * 4_096)
        .unwrap_or(0)
}
