//! Execution coordination.
//!
//! This module drives **approved opportunities** through their legs.
//!
//! Design principles:
//! - **Strictly sequential legs**: leg N+1 never starts before leg N settles.
//! - **Bounded concurrency**: at most `max_concurrent` executions in flight;
//!   additional approvals wait FIFO in a bounded queue and overflow is
//!   rejected as backpressure.
//! - **Idempotent submission**: every venue order carries a client id derived
//!   from `(execution_id, step_index)`, so a retried placement cannot create
//!   a duplicate order.
//! - **Best-effort unwind**: when a leg fails after earlier legs filled, each
//!   filled leg gets a compensating market order before the execution is
//!   marked failed.
//!
//! This module NEVER:
//! - decides admission (the gate does)
//! - mutates balances or exposure directly (the supervisor reacts to events)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use common::logger::warn_if_slow;
use common::time::now_ms;
use market::adapter::{
    OrderFill, OrderRequest, OrderState, OrderType, VenueAdapter, VenueError, with_retries,
};
use market::types::VenueId;
use strategy::types::{Leg, Opportunity};

use crate::types::{
    ExecEvent, Execution, ExecutionStatus, SubmitError, Trade, TradeStatus, client_order_id,
    compensation_order_id,
};

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Executions allowed in flight at once.
    pub max_concurrent: usize,
    /// Approved opportunities allowed to wait; overflow is backpressure.
    pub queue_bound: usize,
    /// Cadence for polling order state while a leg is open.
    pub poll_interval: Duration,
    /// Monitor mode observes approvals without submitting orders.
    pub monitor_only: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            queue_bound: 16,
            poll_interval: Duration::from_millis(50),
            monitor_only: false,
        }
    }
}

pub struct ExecutionCoordinator {
    cfg: CoordinatorConfig,
    adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
    events: mpsc::Sender<ExecEvent>,
    emergency: watch::Receiver<bool>,
    queue_tx: mpsc::Sender<Opportunity>,
    slots: Arc<Semaphore>,
}

impl ExecutionCoordinator {
    /// Build the coordinator and hand back the queue receiver to pass into
    /// [`ExecutionCoordinator::run`].
    pub fn new(
        cfg: CoordinatorConfig,
        adapters: HashMap<VenueId, Arc<dyn VenueAdapter>>,
        events: mpsc::Sender<ExecEvent>,
        emergency: watch::Receiver<bool>,
    ) -> (Arc<Self>, mpsc::Receiver<Opportunity>) {
        let (queue_tx, queue_rx) = mpsc::channel(cfg.queue_bound);
        let slots = Arc::new(Semaphore::new(cfg.max_concurrent));

        (
            Arc::new(Self {
                cfg,
                adapters,
                events,
                emergency,
                queue_tx,
                slots,
            }),
            queue_rx,
        )
    }

    /// Enqueue an approved opportunity. Never blocks: a full queue is an
    /// immediate backpressure rejection.
    pub fn submit(&self, op: Opportunity) -> Result<(), SubmitError> {
        self.queue_tx.try_send(op).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Dispatcher loop: pulls approvals FIFO and runs each on a worker slot.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Opportunity>) {
        info!(
            max_concurrent = self.cfg.max_concurrent,
            queue_bound = self.cfg.queue_bound,
            monitor_only = self.cfg.monitor_only,
            "execution coordinator started"
        );

        while let Some(op) = rx.recv().await {
            if *self.emergency.borrow() {
                warn!(opportunity_id = %op.id, "emergency stop active; approval dropped");
                continue;
            }

            let permit = match Arc::clone(&self.slots).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.execute(op).await;
                drop(permit);
            });
        }

        info!("execution queue closed; coordinator exiting");
    }

    /// Wait for every in-flight execution to settle, up to `grace`.
    pub async fn drain(&self, grace: Duration) -> bool {
        let all = self.cfg.max_concurrent as u32;
        tokio::time::timeout(grace, Arc::clone(&self.slots).acquire_many_owned(all))
            .await
            .is_ok_and(|r| r.is_ok())
    }

    async fn execute(&self, op: Opportunity) {
        if self.cfg.monitor_only {
            info!(
                opportunity_id = %op.id,
                projected_profit = %op.projected_profit_quote,
                "monitor mode: approval observed, no orders submitted"
            );
            self.emit(ExecEvent::MonitorOnly { opportunity: op }).await;
            return;
        }

        let mut exec = Execution::new(op.id, now_ms());
        exec.status = ExecutionStatus::Executing;

        self.emit(ExecEvent::Started {
            execution: exec.clone(),
            opportunity: op.clone(),
        })
        .await;

        match self.run_legs(&mut exec, &op).await {
            Ok(()) => {
                exec.realized_profit = exec.compute_realized_profit();
                exec.total_fees = exec.fees();
                exec.status = ExecutionStatus::Completed;
                exec.completed_at = Some(now_ms());

                info!(
                    execution_id = %exec.id,
                    realized_profit = %exec.realized_profit,
                    "execution completed"
                );
                self.emit(ExecEvent::Completed {
                    execution: exec,
                    opportunity: op,
                })
                .await;
            }
            Err(reason) => {
                exec.errors.push(reason.clone());
                self.recover(&mut exec, &op).await;

                exec.realized_profit = exec.compute_realized_profit();
                exec.total_fees = exec.fees();
                exec.status = ExecutionStatus::Failed;
                exec.completed_at = Some(now_ms());

                warn!(execution_id = %exec.id, reason, "execution failed");
                self.emit(ExecEvent::Failed {
                    execution: exec,
                    opportunity: op,
                })
                .await;
            }
        }
    }

    /// Drive every leg in step order. On error the failing leg's trade is
    /// already recorded; the caller runs recovery.
    async fn run_legs(&self, exec: &mut Execution, op: &Opportunity) -> Result<(), String> {
        let mut legs: Vec<&Leg> = op.legs.iter().collect();
        legs.sort_by_key(|l| l.step_index);

        // Shrinks below one when an earlier leg only partially filled.
        let mut scale = Decimal::ONE;

        for leg in legs {
            if *self.emergency.borrow() {
                return Err("emergency_stop".to_string());
            }

            let Some(adapter) = self.adapters.get(&leg.venue) else {
                return Err(format!("no_adapter:{}", leg.venue));
            };

            let amount = leg.amount * scale;
            let client_id = client_order_id(&exec.id, leg.step_index);

            let mut trade = Trade {
                step_index: leg.step_index,
                venue: leg.venue.clone(),
                symbol: leg.symbol.clone(),
                side: leg.side,
                requested_amount: amount,
                requested_price: (!leg.market_order).then_some(leg.reference_price),
                filled_amount: Decimal::ZERO,
                average_fill_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                status: TradeStatus::Pending,
                external_order_id: None,
                created_at: now_ms(),
                filled_at: None,
                compensation: false,
            };

            let req = OrderRequest {
                client_id: client_id.clone(),
                symbol: leg.symbol.clone(),
                side: leg.side,
                order_type: if leg.market_order {
                    OrderType::Market
                } else {
                    OrderType::Limit
                },
                amount,
                price: (!leg.market_order).then_some(leg.reference_price),
            };

            let placed = warn_if_slow(
                "place_order",
                Duration::from_millis(250),
                with_retries("place_order", || adapter.place_order(req.clone())),
            )
            .await;

            let external = match placed {
                Ok(id) => id,
                Err(e) => {
                    trade.status = TradeStatus::Rejected;
                    exec.trades.push(trade);
                    return Err(classify_venue_error(&e));
                }
            };

            trade.external_order_id = Some(external.0.clone());
            trade.status = TradeStatus::Open;

            debug!(
                execution_id = %exec.id,
                step = leg.step_index,
                venue = %leg.venue,
                %amount,
                "leg submitted"
            );

            match self
                .await_terminal(adapter.as_ref(), &client_id, leg)
                .await
            {
                Wait::Terminal(OrderState::Filled(fill)) => {
                    apply_fill(&mut trade, &fill, TradeStatus::Filled);
                    exec.trades.push(trade);
                }

                Wait::Terminal(OrderState::Cancelled(fill)) => {
                    if fill.filled_amount > Decimal::ZERO && op.enable_partial_fills {
                        // The filled slice stands; the rest of the plan shrinks.
                        scale = scale * fill.filled_amount / amount;
                        apply_fill(&mut trade, &fill, TradeStatus::Filled);
                        exec.trades.push(trade);
                        continue;
                    }

                    let status = if fill.filled_amount > Decimal::ZERO {
                        TradeStatus::Partial
                    } else {
                        TradeStatus::Cancelled
                    };
                    apply_fill(&mut trade, &fill, status);
                    exec.trades.push(trade);
                    return Err("leg_cancelled".to_string());
                }

                Wait::Terminal(OrderState::Rejected(reason)) => {
                    trade.status = TradeStatus::Rejected;
                    exec.trades.push(trade);
                    return Err(format!("venue_rejected:{reason}"));
                }

                // Non-terminal states never escape await_terminal.
                Wait::Terminal(_) => unreachable!("await_terminal yields terminal states only"),

                Wait::Timeout => {
                    let residual = self
                        .cancel_and_settle(adapter.as_ref(), &external, &client_id, leg)
                        .await;

                    if residual.filled_amount > Decimal::ZERO && op.enable_partial_fills {
                        scale = scale * residual.filled_amount / amount;
                        apply_fill(&mut trade, &residual, TradeStatus::Filled);
                        exec.trades.push(trade);
                        exec.errors.push("leg_timeout".to_string());
                        continue;
                    }

                    let status = if residual.filled_amount > Decimal::ZERO {
                        TradeStatus::Partial
                    } else {
                        TradeStatus::Cancelled
                    };
                    apply_fill(&mut trade, &residual, status);
                    exec.trades.push(trade);
                    return Err("leg_timeout".to_string());
                }

                Wait::Emergency => {
                    let residual = self
                        .cancel_and_settle(adapter.as_ref(), &external, &client_id, leg)
                        .await;
                    let status = if residual.filled_amount > Decimal::ZERO {
                        TradeStatus::Partial
                    } else {
                        TradeStatus::Cancelled
                    };
                    apply_fill(&mut trade, &residual, status);
                    exec.trades.push(trade);
                    return Err("emergency_stop".to_string());
                }

                Wait::Venue(e) => {
                    let residual = self
                        .cancel_and_settle(adapter.as_ref(), &external, &client_id, leg)
                        .await;
                    let status = if residual.filled_amount > Decimal::ZERO {
                        TradeStatus::Partial
                    } else {
                        TradeStatus::Cancelled
                    };
                    apply_fill(&mut trade, &residual, status);
                    exec.trades.push(trade);
                    return Err(classify_venue_error(&e));
                }
            }
        }

        Ok(())
    }

    /// Poll for a terminal order state within the leg's latency budget.
    async fn await_terminal(
        &self,
        adapter: &dyn VenueAdapter,
        client_id: &str,
        leg: &Leg,
    ) -> Wait {
        let deadline = Instant::now() + Duration::from_millis(leg.max_latency_ms);

        loop {
            if *self.emergency.borrow() {
                return Wait::Emergency;
            }

            match adapter.fetch_order(client_id, &leg.symbol).await {
                Ok(state) if state.is_terminal() => return Wait::Terminal(state),
                Ok(_) => {}
                // Transient polling hiccups burn budget, not the leg.
                Err(e) if e.is_retryable() => {
                    debug!(client_id, error = %e, "order poll failed; retrying")
                }
                Err(e) => return Wait::Venue(e),
            }

            if Instant::now() >= deadline {
                return Wait::Timeout;
            }
            tokio::time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// Cancel an outstanding order and report whatever filled before the
    /// cancel landed.
    async fn cancel_and_settle(
        &self,
        adapter: &dyn VenueAdapter,
        external: &market::adapter::ExternalOrderId,
        client_id: &str,
        leg: &Leg,
    ) -> OrderFill {
        if let Err(e) = adapter.cancel_order(external, &leg.symbol).await {
            warn!(client_id, error = %e, "order cancel failed");
        }

        match adapter.fetch_order(client_id, &leg.symbol).await {
            Ok(state) => state.fill().cloned().unwrap_or_default(),
            Err(e) => {
                warn!(client_id, error = %e, "post-cancel order lookup failed");
                OrderFill::default()
            }
        }
    }

    /// Unwind already-filled legs with opposite-side market orders. Every
    /// compensation attempt is recorded; failures never mask the original
    /// error.
    async fn recover(&self, exec: &mut Execution, op: &Opportunity) {
        let to_unwind: Vec<Trade> = exec
            .trades
            .iter()
            .filter(|t| !t.compensation && t.filled_amount > Decimal::ZERO)
            .rev()
            .cloned()
            .collect();

        for filled in to_unwind {
            let Some(adapter) = self.adapters.get(&filled.venue) else {
                exec.errors
                    .push(format!("compensation_no_adapter:{}", filled.venue));
                continue;
            };

            let client_id = compensation_order_id(&exec.id, filled.step_index);
            let side = filled.side.opposite();

            let mut comp = Trade {
                step_index: filled.step_index,
                venue: filled.venue.clone(),
                symbol: filled.symbol.clone(),
                side,
                requested_amount: filled.filled_amount,
                requested_price: None,
                filled_amount: Decimal::ZERO,
                average_fill_price: Decimal::ZERO,
                fee: Decimal::ZERO,
                status: TradeStatus::Pending,
                external_order_id: None,
                created_at: now_ms(),
                filled_at: None,
                compensation: true,
            };

            let req = OrderRequest {
                client_id: client_id.clone(),
                symbol: filled.symbol.clone(),
                side,
                order_type: OrderType::Market,
                amount: filled.filled_amount,
                price: None,
            };

            let placed = warn_if_slow(
                "compensation_order",
                Duration::from_millis(250),
                with_retries("compensation_order", || adapter.place_order(req.clone())),
            )
            .await;

            let external = match placed {
                Ok(id) => id,
                Err(e) => {
                    comp.status = TradeStatus::Rejected;
                    exec.trades.push(comp);
                    exec.errors
                        .push(format!("compensation_failed:{}", classify_venue_error(&e)));
                    continue;
                }
            };

            comp.external_order_id = Some(external.0.clone());

            // Market orders settle fast; reuse the leg deadline for the wait.
            let deadline = op
                .legs
                .iter()
                .find(|l| l.step_index == filled.step_index)
                .map(|l| l.max_latency_ms)
                .unwrap_or(5_000);

            let wait = tokio::time::timeout(Duration::from_millis(deadline), async {
                loop {
                    match adapter.fetch_order(&client_id, &filled.symbol).await {
                        Ok(state) if state.is_terminal() => break state,
                        _ => tokio::time::sleep(self.cfg.poll_interval).await,
                    }
                }
            })
            .await;

            match wait {
                Ok(OrderState::Filled(fill)) => {
                    apply_fill(&mut comp, &fill, TradeStatus::Filled);
                }
                Ok(other) => {
                    comp.status = TradeStatus::Cancelled;
                    if let Some(fill) = other.fill() {
                        comp.filled_amount = fill.filled_amount;
                        comp.average_fill_price = fill.average_price;
                        comp.fee = fill.fee;
                    }
                    exec.errors.push("compensation_incomplete".to_string());
                }
                Err(_) => {
                    comp.status = TradeStatus::Cancelled;
                    exec.errors.push("compensation_timeout".to_string());
                }
            }

            exec.trades.push(comp);
        }
    }

    async fn emit(&self, event: ExecEvent) {
        if self.events.send(event).await.is_err() {
            warn!("event channel closed; execution outcome dropped");
        }
    }
}

enum Wait {
    Terminal(OrderState),
    Timeout,
    Emergency,
    Venue(VenueError),
}

fn apply_fill(trade: &mut Trade, fill: &OrderFill, status: TradeStatus) {
    trade.filled_amount = fill.filled_amount;
    trade.average_fill_price = fill.average_price;
    trade.fee = fill.fee;
    trade.status = status;
    if fill.filled_amount > Decimal::ZERO {
        trade.filled_at = Some(now_ms());
    }
}

/// Normalize venue errors into stable bounded strings for `errors[]`.
fn classify_venue_error(e: &VenueError) -> String {
    match e {
        VenueError::Transient(_) => "venue_transient".to_string(),
        VenueError::RateLimited { .. } => "venue_rate_limited".to_string(),
        VenueError::Auth(_) => "venue_auth".to_string(),
        VenueError::Permanent(_) => "venue_permanent".to_string(),
        VenueError::NotFound(_) => "venue_not_found".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use market::adapter::ExternalOrderId;
    use market::types::{
        Balance, BookSnapshot, FeeSchedule, FundingSnapshot, Side, Symbol, TickerSnapshot,
        TradeLimits, Venue, VenueHealth, VenueKind,
    };
    use strategy::types::{OpportunityKind, OpportunityStatus};

    #[derive(Clone, Copy, PartialEq)]
    enum Script {
        /// Fill completely on first poll.
        Fill,
        /// Stay open until cancelled.
        Hang,
        /// Reject at placement.
        RejectPlace,
        /// Create the order, then report the placement as transient failure.
        CreateThenError,
        /// Cancel terminal with half the requested amount filled.
        HalfFillThenCancel,
    }

    struct MockOrder {
        side: Side,
        amount: Decimal,
        price: Decimal,
        cancelled: bool,
        script: Script,
    }

    struct MockVenue {
        venue: Venue,
        script_per_step: StdHashMap<String, Script>,
        orders: Mutex<StdHashMap<String, MockOrder>>,
        placements: AtomicU32,
        cancels: Mutex<Vec<String>>,
    }

    impl MockVenue {
        fn new(id: &str, scripts: &[(&str, Script)]) -> Arc<Self> {
            Arc::new(Self {
                venue: Venue {
                    id: id.into(),
                    kind: VenueKind::Demo,
                    health: VenueHealth::Active,
                    fees: Some(FeeSchedule {
                        maker_rate: dec!(0.001),
                        taker_rate: dec!(0.001),
                        withdraw_fees: StdHashMap::new(),
                    }),
                    limits: TradeLimits {
                        min_amount: StdHashMap::new(),
                        max_amount: StdHashMap::new(),
                        max_position_quote: dec!(1_000_000),
                    },
                    flagged_high_risk: false,
                },
                script_per_step: scripts
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                orders: Mutex::new(StdHashMap::new()),
                placements: AtomicU32::new(0),
                cancels: Mutex::new(Vec::new()),
            })
        }

        /// Scripts are keyed by client-id suffix ("1", "2", "comp-1", ...).
        fn script_for(&self, client_id: &str) -> Script {
            let key = if let Some((_, step)) = client_id.rsplit_once("-comp-") {
                format!("comp-{step}")
            } else {
                client_id.rsplit('-').next().unwrap_or("").to_string()
            };

            self.script_per_step
                .get(&key)
                .copied()
                .unwrap_or(Script::Fill)
        }
    }

    #[async_trait]
    impl VenueAdapter for MockVenue {
        fn venue(&self) -> Venue {
            self.venue.clone()
        }

        async fn fetch_ticker(&self, _: &Symbol) -> Result<TickerSnapshot, VenueError> {
            Err(VenueError::NotFound("not scripted".into()))
        }

        async fn fetch_book(&self, _: &Symbol, _: usize) -> Result<BookSnapshot, VenueError> {
            Err(VenueError::NotFound("not scripted".into()))
        }

        async fn fetch_balances(&self) -> Result<StdHashMap<String, Balance>, VenueError> {
            Ok(StdHashMap::new())
        }

        async fn place_order(&self, req: OrderRequest) -> Result<ExternalOrderId, VenueError> {
            let script = self.script_for(&req.client_id);

            if script == Script::RejectPlace {
                return Err(VenueError::Permanent("placement rejected".into()));
            }

            let mut orders = self.orders.lock();
            if orders.contains_key(&req.client_id) {
                // Idempotent resubmission: same order, no new placement.
                return Ok(ExternalOrderId(format!("ext-{}", req.client_id)));
            }

            self.placements.fetch_add(1, Ordering::SeqCst);
            orders.insert(
                req.client_id.clone(),
                MockOrder {
                    side: req.side,
                    amount: req.amount,
                    price: req.price.unwrap_or(dec!(100)),
                    cancelled: false,
                    script,
                },
            );
            drop(orders);

            if script == Script::CreateThenError {
                return Err(VenueError::Transient("ack lost".into()));
            }

            Ok(ExternalOrderId(format!("ext-{}", req.client_id)))
        }

        async fn fetch_order(&self, client_id: &str, _: &Symbol) -> Result<OrderState, VenueError> {
            let orders = self.orders.lock();
            let Some(order) = orders.get(client_id) else {
                return Err(VenueError::NotFound(client_id.to_string()));
            };

            let fee = order.amount * order.price * dec!(0.001);
            let full = OrderFill {
                filled_amount: order.amount,
                average_price: order.price,
                fee,
            };

            Ok(match order.script {
                Script::Fill | Script::CreateThenError => OrderState::Filled(full),
                Script::Hang => {
                    if order.cancelled {
                        OrderState::Cancelled(OrderFill::default())
                    } else {
                        OrderState::Open
                    }
                }
                Script::HalfFillThenCancel => {
                    let half = OrderFill {
                        filled_amount: order.amount / dec!(2),
                        average_price: order.price,
                        fee: fee / dec!(2),
                    };
                    OrderState::Cancelled(half)
                }
                Script::RejectPlace => OrderState::Rejected("unreachable".into()),
            })
        }

        async fn cancel_order(
            &self,
            external_id: &ExternalOrderId,
            _: &Symbol,
        ) -> Result<(), VenueError> {
            let client_id = external_id.0.trim_start_matches("ext-").to_string();
            self.cancels.lock().push(client_id.clone());
            if let Some(order) = self.orders.lock().get_mut(&client_id) {
                order.cancelled = true;
            }
            Ok(())
        }

        async fn funding_rate(&self, _: &Symbol) -> Result<Option<FundingSnapshot>, VenueError> {
            Ok(None)
        }

        async fn health_check(&self) -> Result<(), VenueError> {
            Ok(())
        }
    }

    fn two_leg_op(latency_ms: u64, partial_fills: bool) -> Opportunity {
        let symbol = Symbol::new("BTC", "USDT");
        let leg = |step: u32, venue: &str, side: Side, price: Decimal| Leg {
            step_index: step,
            venue: venue.into(),
            symbol: symbol.clone(),
            side,
            amount: dec!(0.8),
            reference_price: price,
            fee_estimate: dec!(0.08),
            max_latency_ms: latency_ms,
            market_order: false,
        };

        Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::Simple,
            legs: vec![
                leg(1, "a", Side::Buy, dec!(100.0)),
                leg(2, "b", Side::Sell, dec!(100.4)),
            ],
            symbol,
            projected_profit_quote: dec!(0.16),
            projected_profit_pct: dec!(0.2),
            volume_quote: dec!(80),
            confidence: 1.0,
            risks: vec![],
            created_at: 0,
            expires_at: 30_000,
            status: OpportunityStatus::Approved,
            enable_partial_fills: partial_fills,
            funding_annualized_pct: None,
        }
    }

    struct Harness {
        coordinator: Arc<ExecutionCoordinator>,
        events: mpsc::Receiver<ExecEvent>,
        emergency_tx: watch::Sender<bool>,
        venues: StdHashMap<VenueId, Arc<MockVenue>>,
    }

    fn harness(scripts_a: &[(&str, Script)], scripts_b: &[(&str, Script)]) -> Harness {
        harness_with(CoordinatorConfig::default(), scripts_a, scripts_b)
    }

    fn harness_with(
        cfg: CoordinatorConfig,
        scripts_a: &[(&str, Script)],
        scripts_b: &[(&str, Script)],
    ) -> Harness {
        let a = MockVenue::new("a", scripts_a);
        let b = MockVenue::new("b", scripts_b);

        let adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> = HashMap::from([
            (VenueId::from("a"), a.clone() as Arc<dyn VenueAdapter>),
            (VenueId::from("b"), b.clone() as Arc<dyn VenueAdapter>),
        ]);

        let (events_tx, events_rx) = mpsc::channel(64);
        let (emergency_tx, emergency_rx) = watch::channel(false);

        let (coordinator, queue_rx) =
            ExecutionCoordinator::new(cfg, adapters, events_tx, emergency_rx);

        tokio::spawn(Arc::clone(&coordinator).run(queue_rx));

        Harness {
            coordinator,
            events: events_rx,
            emergency_tx,
            venues: StdHashMap::from([(VenueId::from("a"), a), (VenueId::from("b"), b)]),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn both_legs_fill_and_profit_is_booked() {
        let mut h = harness(&[("1", Script::Fill)], &[("2", Script::Fill)]);

        h.coordinator.submit(two_leg_op(1_000, false)).unwrap();

        let started = h.events.recv().await.unwrap();
        assert!(matches!(started, ExecEvent::Started { .. }));

        match h.events.recv().await.unwrap() {
            ExecEvent::Completed { execution, .. } => {
                assert_eq!(execution.status, ExecutionStatus::Completed);
                assert_eq!(execution.trades.len(), 2);
                assert!(
                    execution
                        .trades
                        .iter()
                        .all(|t| t.status == TradeStatus::Filled)
                );
                // 0.8 * 0.4 gross - (0.08 + 0.08032) fees
                assert_eq!(execution.realized_profit, dec!(0.15968));
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_leg_times_out_and_compensates() {
        let mut h = harness(
            &[("1", Script::Fill), ("comp-1", Script::Fill)],
            &[("2", Script::Hang)],
        );

        h.coordinator.submit(two_leg_op(1_000, false)).unwrap();

        let _started = h.events.recv().await.unwrap();
        match h.events.recv().await.unwrap() {
            ExecEvent::Failed { execution, .. } => {
                assert_eq!(execution.status, ExecutionStatus::Failed);
                assert!(execution.errors.iter().any(|e| e == "leg_timeout"));

                // Leg 2 was cancelled at the venue: no orphan order remains.
                let b = &h.venues[&VenueId::from("b")];
                assert_eq!(b.cancels.lock().len(), 1);

                // Compensation sold back the filled leg-1 amount on venue a.
                let comp = execution
                    .trades
                    .iter()
                    .find(|t| t.compensation)
                    .expect("compensation trade recorded");
                assert_eq!(comp.side, Side::Sell);
                assert_eq!(comp.venue, VenueId::from("a"));
                assert_eq!(comp.requested_amount, dec!(0.8));
                assert_eq!(comp.status, TradeStatus::Filled);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_first_leg_needs_no_compensation() {
        let mut h = harness(&[("1", Script::RejectPlace)], &[("2", Script::Fill)]);

        h.coordinator.submit(two_leg_op(1_000, false)).unwrap();

        let _started = h.events.recv().await.unwrap();
        match h.events.recv().await.unwrap() {
            ExecEvent::Failed { execution, .. } => {
                assert!(execution.errors.iter().any(|e| e == "venue_permanent"));
                assert!(execution.trades.iter().all(|t| !t.compensation));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn lost_ack_retry_does_not_duplicate_the_order() {
        let mut h = harness(
            &[("1", Script::CreateThenError)],
            &[("2", Script::Fill)],
        );

        h.coordinator.submit(two_leg_op(1_000, false)).unwrap();

        let _started = h.events.recv().await.unwrap();
        match h.events.recv().await.unwrap() {
            ExecEvent::Completed { .. } => {
                let a = &h.venues[&VenueId::from("a")];
                assert_eq!(
                    a.placements.load(Ordering::SeqCst),
                    1,
                    "retried placement must reuse the existing order"
                );
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn partial_fill_rescales_the_next_leg() {
        let mut h = harness(
            &[("1", Script::HalfFillThenCancel)],
            &[("2", Script::Fill)],
        );

        h.coordinator.submit(two_leg_op(1_000, true)).unwrap();

        let _started = h.events.recv().await.unwrap();
        match h.events.recv().await.unwrap() {
            ExecEvent::Completed { execution, .. } => {
                assert_eq!(execution.trades.len(), 2);
                assert_eq!(execution.trades[0].filled_amount, dec!(0.4));
                // Leg 2 was resized to what leg 1 actually bought.
                assert_eq!(execution.trades[1].requested_amount, dec!(0.4));
                assert_eq!(execution.trades[1].status, TradeStatus::Filled);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emergency_stop_blocks_new_executions() {
        let mut h = harness(&[("1", Script::Fill)], &[("2", Script::Fill)]);

        h.emergency_tx.send(true).unwrap();
        h.coordinator.submit(two_leg_op(1_000, false)).unwrap();

        // Nothing is emitted for the dropped approval.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn queue_overflow_is_backpressure() {
        let a = MockVenue::new("a", &[]);
        let adapters: HashMap<VenueId, Arc<dyn VenueAdapter>> =
            HashMap::from([(VenueId::from("a"), a as Arc<dyn VenueAdapter>)]);

        let (events_tx, _events_rx) = mpsc::channel(64);
        let (_emergency_tx, emergency_rx) = watch::channel(false);

        let cfg = CoordinatorConfig {
            queue_bound: 2,
            ..CoordinatorConfig::default()
        };
        // Dispatcher deliberately not started: the queue fills up.
        let (coordinator, _queue_rx) =
            ExecutionCoordinator::new(cfg, adapters, events_tx, emergency_rx);

        coordinator.submit(two_leg_op(1_000, false)).unwrap();
        coordinator.submit(two_leg_op(1_000, false)).unwrap();

        match coordinator.submit(two_leg_op(1_000, false)) {
            Err(SubmitError::Backpressure) => {}
            other => panic!("expected backpressure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_mode_submits_nothing() {
        let cfg = CoordinatorConfig {
            monitor_only: true,
            ..CoordinatorConfig::default()
        };
        let mut h = harness_with(cfg, &[("1", Script::Fill)], &[("2", Script::Fill)]);

        h.coordinator.submit(two_leg_op(1_000, false)).unwrap();

        match h.events.recv().await.unwrap() {
            ExecEvent::MonitorOnly { .. } => {
                let a = &h.venues[&VenueId::from("a")];
                assert_eq!(a.placements.load(Ordering::SeqCst), 0);
            }
            other => panic!("expected monitor-only event, got {other:?}"),
        }
    }
}
