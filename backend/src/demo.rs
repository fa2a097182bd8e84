//! In-process demo venue.
//!
//! Deterministic adapter for running the full pipeline without credentials:
//! mid prices follow a fixed triangular wobble around a per-venue bias (two
//! demo venues with different biases produce a steady cross-venue spread),
//! orders fill instantly at their requested price, and client ids are
//! idempotent the way a careful venue integration would be.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use common::time::now_ms;
use market::adapter::{
    ExternalOrderId, OrderFill, OrderRequest, OrderState, VenueAdapter, VenueError,
};
use market::types::{
    Balance, BookLevel, BookSnapshot, FeeSchedule, FundingSnapshot, Symbol, TickerSnapshot,
    TradeLimits, Venue, VenueHealth, VenueKind,
};

#[derive(Clone, Debug)]
pub struct DemoVenueConfig {
    pub id: String,
    pub kind: VenueKind,
    /// Static skew on every mid, in basis points. Different biases across
    /// demo venues are what the simple strategy feeds on.
    pub bias_bp: i64,
    /// Half-spread around the mid, in basis points.
    pub half_spread_bp: i64,
    /// Mid price anchor per symbol.
    pub anchors: HashMap<Symbol, Decimal>,
    /// Funding rate reported per period (perpetual venues).
    pub funding_rate: Option<Decimal>,
}

struct DemoOrder {
    fill: OrderFill,
}

pub struct DemoVenue {
    cfg: DemoVenueConfig,
    venue: Venue,
    ticks: AtomicU64,
    orders: Mutex<HashMap<String, DemoOrder>>,
    balances: Mutex<HashMap<String, Balance>>,
}

impl DemoVenue {
    pub fn new(cfg: DemoVenueConfig) -> Self {
        let venue = Venue {
            id: cfg.id.as_str().into(),
            kind: cfg.kind,
            health: VenueHealth::Active,
            fees: Some(FeeSchedule {
                maker_rate: Decimal::new(1, 3),
                taker_rate: Decimal::new(1, 3),
                withdraw_fees: HashMap::new(),
            }),
            limits: TradeLimits {
                min_amount: HashMap::new(),
                max_amount: HashMap::new(),
                max_position_quote: Decimal::from(100_000),
            },
            flagged_high_risk: false,
        };

        let balances = HashMap::from([
            (
                "USDT".to_string(),
                Balance {
                    free: Decimal::from(100_000),
                    locked: Decimal::ZERO,
                    quote_value: Decimal::from(100_000),
                },
            ),
            (
                "BTC".to_string(),
                Balance {
                    free: Decimal::from(10),
                    locked: Decimal::ZERO,
                    quote_value: Decimal::from(1_000_000),
                },
            ),
        ]);

        Self {
            cfg,
            venue,
            ticks: AtomicU64::new(0),
            orders: Mutex::new(HashMap::new()),
            balances: Mutex::new(balances),
        }
    }

    /// Mid price for the current tick: anchor shifted by the venue bias plus
    /// a slow triangular wobble of ±10 bp.
    fn mid(&self, symbol: &Symbol, tick: u64) -> Option<Decimal> {
        let anchor = self.cfg.anchors.get(symbol)?;
        let wobble_bp = ((tick % 21) as i64) - 10;
        let shift = Decimal::new(self.cfg.bias_bp + wobble_bp, 4);
        Some(anchor * (Decimal::ONE + shift))
    }

    fn taker_rate(&self) -> Decimal {
        self.venue.taker_rate()
    }
}

#[async_trait]
impl VenueAdapter for DemoVenue {
    fn venue(&self) -> Venue {
        self.venue.clone()
    }

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<TickerSnapshot, VenueError> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let mid = self
            .mid(symbol, tick)
            .ok_or_else(|| VenueError::NotFound(symbol.code()))?;

        let half = Decimal::new(self.cfg.half_spread_bp, 4);
        Ok(TickerSnapshot {
            venue: self.venue.id.clone(),
            symbol: symbol.clone(),
            bid: mid * (Decimal::ONE - half),
            ask: mid * (Decimal::ONE + half),
            last: mid,
            volume: Decimal::from(1_000_000),
            change_24h: Decimal::ZERO,
            observed_at: now_ms(),
        })
    }

    async fn fetch_book(&self, symbol: &Symbol, depth: usize) -> Result<BookSnapshot, VenueError> {
        let tick = self.ticks.load(Ordering::Relaxed);
        let mid = self
            .mid(symbol, tick)
            .ok_or_else(|| VenueError::NotFound(symbol.code()))?;

        let half = Decimal::new(self.cfg.half_spread_bp, 4);
        let step = Decimal::new(1, 4);
        let levels = depth.clamp(1, 20);

        let mut bids = Vec::with_capacity(levels);
        let mut asks = Vec::with_capacity(levels);
        for i in 0..levels {
            let away = Decimal::from(i as u64) * step;
            bids.push(BookLevel {
                price: mid * (Decimal::ONE - half - away),
                size: Decimal::from(2),
            });
            asks.push(BookLevel {
                price: mid * (Decimal::ONE + half + away),
                size: Decimal::from(2),
            });
        }

        Ok(BookSnapshot {
            venue: self.venue.id.clone(),
            symbol: symbol.clone(),
            bids,
            asks,
            observed_at: now_ms(),
        })
    }

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, VenueError> {
        Ok(self.balances.lock().clone())
    }

    async fn place_order(&self, req: OrderRequest) -> Result<ExternalOrderId, VenueError> {
        let mut orders = self.orders.lock();

        if !orders.contains_key(&req.client_id) {
            let tick = self.ticks.load(Ordering::Relaxed);
            let price = match req.price {
                Some(p) => p,
                None => self
                    .mid(&req.symbol, tick)
                    .ok_or_else(|| VenueError::NotFound(req.symbol.code()))?,
            };

            let fee = req.amount * price * self.taker_rate();
            orders.insert(
                req.client_id.clone(),
                DemoOrder {
                    fill: OrderFill {
                        filled_amount: req.amount,
                        average_price: price,
                        fee,
                    },
                },
            );
        }

        Ok(ExternalOrderId(format!("demo-{}", req.client_id)))
    }

    async fn fetch_order(&self, client_id: &str, _: &Symbol) -> Result<OrderState, VenueError> {
        let orders = self.orders.lock();
        let order = orders
            .get(client_id)
            .ok_or_else(|| VenueError::NotFound(client_id.to_string()))?;
        Ok(OrderState::Filled(order.fill.clone()))
    }

    async fn cancel_order(&self, _: &ExternalOrderId, _: &Symbol) -> Result<(), VenueError> {
        // Demo orders fill instantly; there is never anything to cancel.
        Ok(())
    }

    async fn funding_rate(&self, symbol: &Symbol) -> Result<Option<FundingSnapshot>, VenueError> {
        let Some(rate) = self.cfg.funding_rate else {
            return Ok(None);
        };

        Ok(Some(FundingSnapshot {
            venue: self.venue.id.clone(),
            symbol: symbol.clone(),
            rate_per_period: rate,
            periods_per_year: 3 * 365,
            observed_at: now_ms(),
        }))
    }

    async fn health_check(&self) -> Result<(), VenueError> {
        Ok(())
    }
}

/// Two spot venues with opposite biases (a persistent ~40 bp dislocation on
/// BTC/USDT) plus a funding-positive perpetual venue.
pub fn default_demo_fleet() -> Vec<DemoVenueConfig> {
    let btc = Symbol::new("BTC", "USDT");
    let eth = Symbol::new("ETH", "USDT");
    let anchors = HashMap::from([
        (btc.clone(), Decimal::from(60_000)),
        (eth.clone(), Decimal::from(3_000)),
    ]);

    vec![
        DemoVenueConfig {
            id: "demo-a".to_string(),
            kind: VenueKind::Demo,
            bias_bp: -20,
            half_spread_bp: 2,
            anchors: anchors.clone(),
            funding_rate: None,
        },
        DemoVenueConfig {
            id: "demo-b".to_string(),
            kind: VenueKind::Demo,
            bias_bp: 20,
            half_spread_bp: 2,
            anchors: anchors.clone(),
            funding_rate: None,
        },
        DemoVenueConfig {
            id: "demo-perp".to_string(),
            kind: VenueKind::Perpetual,
            bias_bp: 5,
            half_spread_bp: 2,
            anchors,
            funding_rate: Some(Decimal::new(1, 4)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use market::adapter::{OrderType, VenueAdapter};
    use market::types::Side;
    use rust_decimal_macros::dec;

    fn demo() -> DemoVenue {
        let cfg = default_demo_fleet().remove(0);
        DemoVenue::new(cfg)
    }

    #[tokio::test]
    async fn tickers_are_valid_and_biased() {
        let venue = demo();
        let t = venue.fetch_ticker(&Symbol::new("BTC", "USDT")).await.unwrap();

        assert!(t.is_valid());
        // bias -20bp keeps the mid under the anchor even at peak wobble
        assert!(t.last < dec!(60_000));
    }

    #[tokio::test]
    async fn books_satisfy_the_ordering_invariant() {
        let venue = demo();
        let b = venue.fetch_book(&Symbol::new("BTC", "USDT"), 5).await.unwrap();

        assert!(b.is_valid());
        assert_eq!(b.bids.len(), 5);
    }

    #[tokio::test]
    async fn orders_fill_idempotently() {
        let venue = demo();
        let req = OrderRequest {
            client_id: "x-1".to_string(),
            symbol: Symbol::new("BTC", "USDT"),
            side: Side::Buy,
            order_type: OrderType::Limit,
            amount: dec!(0.5),
            price: Some(dec!(59_000)),
        };

        let first = venue.place_order(req.clone()).await.unwrap();
        let second = venue.place_order(req).await.unwrap();
        assert_eq!(first, second);

        match venue
            .fetch_order("x-1", &Symbol::new("BTC", "USDT"))
            .await
            .unwrap()
        {
            OrderState::Filled(fill) => {
                assert_eq!(fill.filled_amount, dec!(0.5));
                assert_eq!(fill.average_price, dec!(59_000));
            }
            other => panic!("expected fill, got {other:?}"),
        }
    }
}
