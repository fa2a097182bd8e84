//! Venue adapter contract.
//!
//! The core never talks to a venue directly; it consumes this trait. Concrete
//! adapters live outside the core (the demo adapter ships with the binary) and
//! are responsible for transport, signing, and error normalization.
//!
//! Retry policy: `Transient` and `RateLimited` errors are retried here, inside
//! the adapter wrapper, with exponential backoff bounded by 3 attempts and a
//! 5 s total budget. Everything else surfaces immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use crate::types::{
    Balance, BookSnapshot, FundingSnapshot, Side, Symbol, TickerSnapshot, Venue,
};

#[derive(Debug, Clone, Error)]
pub enum VenueError {
    #[error("transient venue failure: {0}")]
    Transient(String),

    #[error("rate limited; retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("credentials rejected: {0}")]
    Auth(String),

    #[error("permanent venue failure: {0}")]
    Permanent(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl VenueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VenueError::Transient(_) | VenueError::RateLimited { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
}

/// Venue-assigned identifier for a live order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalOrderId(pub String);

/// Fill progress attached to the states that carry one.
#[derive(Debug, Clone, Default)]
pub struct OrderFill {
    pub filled_amount: Decimal,
    pub average_price: Decimal,
    pub fee: Decimal,
}

/// Observable lifecycle of a venue order.
#[derive(Debug, Clone)]
pub enum OrderState {
    Pending,
    Open,
    Partial(OrderFill),
    Filled(OrderFill),
    Cancelled(OrderFill),
    Rejected(String),
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled(_) | OrderState::Cancelled(_) | OrderState::Rejected(_)
        )
    }

    pub fn fill(&self) -> Option<&OrderFill> {
        match self {
            OrderState::Partial(f) | OrderState::Filled(f) | OrderState::Cancelled(f) => Some(f),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Client-side identifier; resubmission with the same id must not
    /// create a second venue order.
    pub client_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub amount: Decimal,
    /// Required for limit orders, ignored for market orders.
    pub price: Option<Decimal>,
}

/// Uniform access to one venue.
#[async_trait]
pub trait VenueAdapter: Send + Sync + 'static {
    /// Static identity, fee schedule, and limits.
    fn venue(&self) -> Venue;

    async fn fetch_ticker(&self, symbol: &Symbol) -> Result<TickerSnapshot, VenueError>;

    async fn fetch_book(&self, symbol: &Symbol, depth: usize) -> Result<BookSnapshot, VenueError>;

    async fn fetch_balances(&self) -> Result<HashMap<String, Balance>, VenueError>;

    async fn place_order(&self, req: OrderRequest) -> Result<ExternalOrderId, VenueError>;

    /// Current state of an order previously placed with `client_id`.
    async fn fetch_order(&self, client_id: &str, symbol: &Symbol)
    -> Result<OrderState, VenueError>;

    async fn cancel_order(
        &self,
        external_id: &ExternalOrderId,
        symbol: &Symbol,
    ) -> Result<(), VenueError>;

    /// `None` for venues without perpetual funding.
    async fn funding_rate(&self, symbol: &Symbol) -> Result<Option<FundingSnapshot>, VenueError>;

    async fn health_check(&self) -> Result<(), VenueError>;
}

const RETRY_MAX_ATTEMPTS: u32 = 3;
const RETRY_TOTAL_BUDGET: Duration = Duration::from_secs(5);
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Run `op` with the standard retry policy for retryable venue errors.
pub async fn with_retries<T, F, Fut>(label: &'static str, mut op: F) -> Result<T, VenueError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, VenueError>>,
{
    let start = Instant::now();
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < RETRY_MAX_ATTEMPTS => {
                let wait = match &e {
                    VenueError::RateLimited { retry_after_ms } => {
                        delay.max(Duration::from_millis(*retry_after_ms))
                    }
                    _ => delay,
                };

                if start.elapsed() + wait > RETRY_TOTAL_BUDGET {
                    return Err(e);
                }

                warn!(label, attempt, error = %e, "retrying venue call");
                tokio::time::sleep(wait).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Token bucket enforcing a venue's requests-per-second budget.
///
/// Exhaustion surfaces as `RateLimited` so callers share the standard retry
/// path instead of blocking inside the limiter.
pub struct TokenBucket {
    capacity: u32,
    refill_per_sec: u32,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        })
    }

    /// Take `weight` tokens or report how long until they become available.
    pub fn acquire(&self, weight: u32) -> Result<(), VenueError> {
        let mut s = self.state.lock();

        let elapsed = s.last_refill.elapsed().as_secs_f64();
        s.tokens = (s.tokens + elapsed * self.refill_per_sec as f64).min(self.capacity as f64);
        s.last_refill = Instant::now();

        if s.tokens >= weight as f64 {
            s.tokens -= weight as f64;
            return Ok(());
        }

        let deficit = weight as f64 - s.tokens;
        let retry_after_ms = (deficit / self.refill_per_sec as f64 * 1_000.0).ceil() as u64;
        Err(VenueError::RateLimited { retry_after_ms })
    }
}
