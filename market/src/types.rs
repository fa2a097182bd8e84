use std::collections::HashMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Stable short identifier for a trading venue ("binance", "kraken-perp", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Asset code ("BTC", "USDT").
pub type Asset = String;

/// Trading pair identity (base priced in quote).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: Asset,
    pub quote: Asset,
}

impl Symbol {
    pub fn new(base: impl Into<Asset>, quote: impl Into<Asset>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Display form, e.g. "BTC/USDT".
    pub fn code(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Per-venue activation and precision record for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub symbol: Symbol,
    pub active: bool,
    /// Integer digits of precision for order amounts.
    pub amount_precision: u32,
    /// Integer digits of precision for prices.
    pub price_precision: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueKind {
    Spot,
    Perpetual,
    Dex,
    Demo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueHealth {
    Active,
    Degraded,
    Down,
}

/// Maker/taker rates plus per-asset withdraw fees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker_rate: Decimal,
    pub taker_rate: Decimal,
    #[serde(default)]
    pub withdraw_fees: HashMap<Asset, Decimal>,
}

/// Per-asset min/max order sizes and the venue-wide position cap in quote units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeLimits {
    #[serde(default)]
    pub min_amount: HashMap<Asset, Decimal>,
    #[serde(default)]
    pub max_amount: HashMap<Asset, Decimal>,
    pub max_position_quote: Decimal,
}

/// Venue identity and static configuration. Immutable once loaded
/// except for `health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub kind: VenueKind,
    pub health: VenueHealth,
    pub fees: Option<FeeSchedule>,
    pub limits: TradeLimits,
    /// Set for venues the desk treats as elevated counterparty risk.
    #[serde(default)]
    pub flagged_high_risk: bool,
}

impl Venue {
    /// Taker rate from the fee schedule, or the global default when the
    /// venue has no schedule loaded.
    pub fn taker_rate(&self) -> Decimal {
        self.fees
            .as_ref()
            .map(|f| f.taker_rate)
            .unwrap_or_else(default_fee_rate)
    }
}

/// Fallback fee rate (0.001) applied when a venue schedule is absent.
pub fn default_fee_rate() -> Decimal {
    Decimal::new(1, 3)
}

/// Latest top-of-book view for one (venue, symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub last: Decimal,
    /// 24h traded volume in quote units.
    pub volume: Decimal,
    pub change_24h: Decimal,
    pub observed_at: u64,
}

impl TickerSnapshot {
    /// Invariant: `0 < bid <= ask`.
    pub fn is_valid(&self) -> bool {
        self.bid > Decimal::ZERO && self.bid <= self.ask
    }

    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Maximum levels retained per book side.
pub const MAX_BOOK_LEVELS: usize = 20;

/// Depth snapshot for one (venue, symbol). Bids are strictly decreasing in
/// price, asks strictly increasing, and the top of book does not cross.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub observed_at: u64,
}

impl BookSnapshot {
    pub fn is_valid(&self) -> bool {
        let bids_ordered = self.bids.windows(2).all(|w| w[0].price > w[1].price);
        let asks_ordered = self.asks.windows(2).all(|w| w[0].price < w[1].price);
        let uncrossed = match (self.bids.first(), self.asks.first()) {
            (Some(b), Some(a)) => b.price < a.price,
            _ => true,
        };
        let positive = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .all(|l| l.price > Decimal::ZERO && l.size > Decimal::ZERO);

        bids_ordered && asks_ordered && uncrossed && positive
    }

    /// Drop levels beyond [`MAX_BOOK_LEVELS`] per side.
    pub fn truncate(&mut self) {
        self.bids.truncate(MAX_BOOK_LEVELS);
        self.asks.truncate(MAX_BOOK_LEVELS);
    }
}

/// Funding terms observed on a perpetual venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSnapshot {
    pub venue: VenueId,
    pub symbol: Symbol,
    /// Rate paid per funding period (positive: longs pay shorts).
    pub rate_per_period: Decimal,
    /// Funding periods per year (e.g. 3 per day * 365).
    pub periods_per_year: u32,
    pub observed_at: u64,
}

impl FundingSnapshot {
    /// Annualized funding in percent.
    pub fn annualized_pct(&self) -> Decimal {
        self.rate_per_period * Decimal::from(self.periods_per_year) * Decimal::ONE_HUNDRED
    }
}

/// Funds held at a venue for one asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Balance {
    pub free: Decimal,
    pub locked: Decimal,
    /// Valuation of `total()` in the portfolio quote currency.
    pub quote_value: Decimal,
}

impl Balance {
    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}
