//! Market data cache.
//!
//! Single source of truth for the scanner and the risk gate:
//!   • Latest ticker/book/funding snapshot per (venue, symbol)
//!   • Monotone replacement by `observed_at`; late updates are dropped
//!   • Staleness filtering on every read
//!   • Price/volume anomaly events derived on write
//!
//! Adapters push into the cache; the cache never polls. Event emission is
//! synchronous inside `put_ticker` but observers consume from a broadcast
//! channel on their own tasks and cannot mutate cache state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{BookSnapshot, FundingSnapshot, Symbol, TickerSnapshot, VenueId};

/// Snapshots older than this are invisible to readers.
pub const STALE_AFTER_MS: u64 = 10_000;

/// Funding sources refresh far slower than tickers, so they get a wider
/// staleness window.
pub const FUNDING_STALE_AFTER_MS: u64 = 120_000;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("ticker invariant violated for {venue}/{symbol}: bid={bid} ask={ask}")]
    InvalidTicker {
        venue: VenueId,
        symbol: Symbol,
        bid: Decimal,
        ask: Decimal,
    },

    #[error("book ordering invariant violated for {venue}/{symbol}")]
    InvalidBook { venue: VenueId, symbol: Symbol },
}

/// Anomalies derived while ingesting ticker snapshots.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    PriceAlert {
        venue: VenueId,
        symbol: Symbol,
        previous_last: Decimal,
        last: Decimal,
        change_pct: Decimal,
        observed_at: u64,
    },
    VolumeSpike {
        venue: VenueId,
        symbol: Symbol,
        previous_volume: Decimal,
        volume: Decimal,
        observed_at: u64,
    },
}

/// Ingestion counters for operational visibility.
#[derive(Clone, Default)]
pub struct CacheCounters {
    pub accepted: Arc<AtomicU64>,
    pub dropped_stale: Arc<AtomicU64>,
    pub rejected_invalid: Arc<AtomicU64>,
}

#[derive(Default)]
struct PairSlot {
    ticker: Option<TickerSnapshot>,
    book: Option<BookSnapshot>,
    funding: Option<FundingSnapshot>,
}

/// Tunables for staleness and anomaly thresholds.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub stale_after_ms: u64,
    pub funding_stale_after_ms: u64,
    /// Relative last-price move (fraction) that triggers a price alert.
    pub price_alert_pct: Decimal,
    /// Volume multiple over the prior snapshot that triggers a spike event.
    pub volume_spike_mult: Decimal,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: STALE_AFTER_MS,
            funding_stale_after_ms: FUNDING_STALE_AFTER_MS,
            price_alert_pct: Decimal::new(1, 2),
            volume_spike_mult: Decimal::TWO,
        }
    }
}

type PairKey = (VenueId, Symbol);

/// Per-(venue, symbol) latest snapshot store.
pub struct MarketDataCache {
    cfg: CacheConfig,
    slots: RwLock<HashMap<PairKey, PairSlot>>,
    events: broadcast::Sender<MarketEvent>,
    pub counters: CacheCounters,
}

impl MarketDataCache {
    pub fn new(cfg: CacheConfig) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            cfg,
            slots: RwLock::new(HashMap::new()),
            events,
            counters: CacheCounters::default(),
        }
    }

    /// Subscribe to derived market events. Observers are read-only; a lagging
    /// observer loses events rather than blocking ingestion.
    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.events.subscribe()
    }

    /// Store a ticker snapshot.
    ///
    /// Replaces the prior snapshot only when `observed_at` moved forward;
    /// out-of-order updates are dropped. Emits `PriceAlert`/`VolumeSpike`
    /// relative to the replaced snapshot.
    pub fn put_ticker(&self, t: TickerSnapshot) -> Result<(), SnapshotError> {
        if !t.is_valid() {
            self.counters.rejected_invalid.fetch_add(1, Ordering::Relaxed);
            return Err(SnapshotError::InvalidTicker {
                venue: t.venue.clone(),
                symbol: t.symbol.clone(),
                bid: t.bid,
                ask: t.ask,
            });
        }

        let mut derived: Vec<MarketEvent> = Vec::new();

        {
            let mut slots = self.slots.write();
            let slot = slots
                .entry((t.venue.clone(), t.symbol.clone()))
                .or_default();

            if let Some(prev) = &slot.ticker {
                if t.observed_at <= prev.observed_at {
                    self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }

                if prev.last > Decimal::ZERO {
                    let change = (t.last - prev.last).abs() / prev.last;
                    if change > self.cfg.price_alert_pct {
                        derived.push(MarketEvent::PriceAlert {
                            venue: t.venue.clone(),
                            symbol: t.symbol.clone(),
                            previous_last: prev.last,
                            last: t.last,
                            change_pct: change * Decimal::ONE_HUNDRED,
                            observed_at: t.observed_at,
                        });
                    }
                }

                if prev.volume > Decimal::ZERO && t.volume > self.cfg.volume_spike_mult * prev.volume
                {
                    derived.push(MarketEvent::VolumeSpike {
                        venue: t.venue.clone(),
                        symbol: t.symbol.clone(),
                        previous_volume: prev.volume,
                        volume: t.volume,
                        observed_at: t.observed_at,
                    });
                }
            }

            slot.ticker = Some(t);
        }

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);

        for ev in derived {
            // No receivers is fine; events are advisory.
            let _ = self.events.send(ev);
        }

        Ok(())
    }

    /// Store a book snapshot under the same monotonicity rule. Books failing
    /// the ordering invariant are rejected; sides are truncated to the level
    /// cap before storage.
    pub fn put_book(&self, mut b: BookSnapshot) -> Result<(), SnapshotError> {
        if !b.is_valid() {
            self.counters.rejected_invalid.fetch_add(1, Ordering::Relaxed);
            return Err(SnapshotError::InvalidBook {
                venue: b.venue.clone(),
                symbol: b.symbol.clone(),
            });
        }

        b.truncate();

        let mut slots = self.slots.write();
        let slot = slots
            .entry((b.venue.clone(), b.symbol.clone()))
            .or_default();

        if let Some(prev) = &slot.book {
            if b.observed_at <= prev.observed_at {
                self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }

        slot.book = Some(b);
        drop(slots);

        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Store a funding snapshot (perpetual venues only).
    pub fn put_funding(&self, f: FundingSnapshot) {
        let mut slots = self.slots.write();
        let slot = slots
            .entry((f.venue.clone(), f.symbol.clone()))
            .or_default();

        if let Some(prev) = &slot.funding {
            if f.observed_at <= prev.observed_at {
                self.counters.dropped_stale.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        debug!(venue = %f.venue, symbol = %f.symbol, rate = %f.rate_per_period, "funding updated");
        slot.funding = Some(f);
    }

    /// Latest non-stale ticker, if any.
    pub fn get_ticker(&self, venue: &VenueId, symbol: &Symbol, now_ms: u64) -> Option<TickerSnapshot> {
        let slots = self.slots.read();
        let t = slots.get(&(venue.clone(), symbol.clone()))?.ticker.as_ref()?;
        fresh(t.observed_at, now_ms, self.cfg.stale_after_ms).then(|| t.clone())
    }

    /// Latest non-stale book, if any.
    pub fn get_book(&self, venue: &VenueId, symbol: &Symbol, now_ms: u64) -> Option<BookSnapshot> {
        let slots = self.slots.read();
        let b = slots.get(&(venue.clone(), symbol.clone()))?.book.as_ref()?;
        fresh(b.observed_at, now_ms, self.cfg.stale_after_ms).then(|| b.clone())
    }

    /// Latest non-stale funding snapshot, if any.
    pub fn get_funding(
        &self,
        venue: &VenueId,
        symbol: &Symbol,
        now_ms: u64,
    ) -> Option<FundingSnapshot> {
        let slots = self.slots.read();
        let f = slots.get(&(venue.clone(), symbol.clone()))?.funding.as_ref()?;
        fresh(f.observed_at, now_ms, self.cfg.funding_stale_after_ms).then(|| f.clone())
    }

    /// All venues carrying a fresh ticker *and* a fresh book for `symbol`,
    /// ordered by venue id for deterministic iteration.
    pub fn list_fresh(
        &self,
        symbol: &Symbol,
        now_ms: u64,
    ) -> Vec<(VenueId, TickerSnapshot, BookSnapshot)> {
        let slots = self.slots.read();

        let mut out: Vec<_> = slots
            .iter()
            .filter(|((_, s), _)| s == symbol)
            .filter_map(|((venue, _), slot)| {
                let t = slot.ticker.as_ref()?;
                let b = slot.book.as_ref()?;
                (fresh(t.observed_at, now_ms, self.cfg.stale_after_ms)
                    && fresh(b.observed_at, now_ms, self.cfg.stale_after_ms))
                .then(|| (venue.clone(), t.clone(), b.clone()))
            })
            .collect();

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for MarketDataCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn fresh(observed_at: u64, now_ms: u64, window_ms: u64) -> bool {
    now_ms.saturating_sub(observed_at) <= window_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BookLevel;
    use rust_decimal_macros::dec;

    fn ticker(venue: &str, observed_at: u64, last: Decimal, volume: Decimal) -> TickerSnapshot {
        TickerSnapshot {
            venue: venue.into(),
            symbol: Symbol::new("BTC", "USDT"),
            bid: last - dec!(0.1),
            ask: last + dec!(0.1),
            last,
            volume,
            change_24h: Decimal::ZERO,
            observed_at,
        }
    }

    fn book(venue: &str, observed_at: u64) -> BookSnapshot {
        BookSnapshot {
            venue: venue.into(),
            symbol: Symbol::new("BTC", "USDT"),
            bids: vec![BookLevel {
                price: dec!(99.9),
                size: dec!(1),
            }],
            asks: vec![BookLevel {
                price: dec!(100.0),
                size: dec!(1),
            }],
            observed_at,
        }
    }

    #[test]
    fn out_of_order_ticker_is_dropped() {
        let cache = MarketDataCache::default();
        let sym = Symbol::new("BTC", "USDT");

        cache.put_ticker(ticker("a", 2_000, dec!(100), dec!(10))).unwrap();
        cache.put_ticker(ticker("a", 1_000, dec!(50), dec!(10))).unwrap();

        let t = cache.get_ticker(&"a".into(), &sym, 2_500).unwrap();
        assert_eq!(t.observed_at, 2_000);
        assert_eq!(t.last, dec!(100));
        assert_eq!(cache.counters.dropped_stale.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn stale_ticker_is_invisible() {
        let cache = MarketDataCache::default();
        let sym = Symbol::new("BTC", "USDT");

        cache.put_ticker(ticker("a", 1_000, dec!(100), dec!(10))).unwrap();

        assert!(cache.get_ticker(&"a".into(), &sym, 11_000).is_some());
        assert!(cache.get_ticker(&"a".into(), &sym, 11_001).is_none());
    }

    #[test]
    fn invalid_ticker_is_rejected() {
        let cache = MarketDataCache::default();
        let mut t = ticker("a", 1_000, dec!(100), dec!(10));
        t.bid = t.ask + dec!(1);

        assert!(cache.put_ticker(t).is_err());
        assert_eq!(cache.counters.rejected_invalid.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn price_alert_on_large_move() {
        let cache = MarketDataCache::default();
        let mut rx = cache.subscribe();

        cache.put_ticker(ticker("a", 1_000, dec!(100), dec!(10))).unwrap();
        // +2% move over the 1% threshold
        cache.put_ticker(ticker("a", 2_000, dec!(102), dec!(10))).unwrap();

        match rx.try_recv().unwrap() {
            MarketEvent::PriceAlert { change_pct, .. } => {
                assert_eq!(change_pct, dec!(2));
            }
            other => panic!("expected price alert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn volume_spike_on_multiple() {
        let cache = MarketDataCache::default();
        let mut rx = cache.subscribe();

        cache.put_ticker(ticker("a", 1_000, dec!(100), dec!(10))).unwrap();
        cache.put_ticker(ticker("a", 2_000, dec!(100), dec!(25))).unwrap();

        match rx.try_recv().unwrap() {
            MarketEvent::VolumeSpike { volume, .. } => assert_eq!(volume, dec!(25)),
            other => panic!("expected volume spike, got {other:?}"),
        }
    }

    #[test]
    fn crossed_book_is_rejected() {
        let cache = MarketDataCache::default();
        let mut b = book("a", 1_000);
        b.bids[0].price = dec!(100.5);

        assert!(cache.put_book(b).is_err());
    }

    #[test]
    fn list_fresh_requires_paired_snapshots() {
        let cache = MarketDataCache::default();
        let sym = Symbol::new("BTC", "USDT");

        // venue a: ticker + book, both fresh
        cache.put_ticker(ticker("a", 10_000, dec!(100), dec!(10))).unwrap();
        cache.put_book(book("a", 10_000)).unwrap();

        // venue b: ticker fresh, book stale
        cache.put_ticker(ticker("b", 10_000, dec!(100), dec!(10))).unwrap();
        cache.put_book(book("b", 1_000)).unwrap();

        // venue c: ticker only
        cache.put_ticker(ticker("c", 10_000, dec!(100), dec!(10))).unwrap();

        let fresh = cache.list_fresh(&sym, 12_000);
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh[0].0, VenueId::from("a"));
    }

    #[test]
    fn observed_at_never_decreases_for_readers() {
        let cache = MarketDataCache::default();
        let sym = Symbol::new("BTC", "USDT");

        let mut last_seen = 0u64;
        for ts in [5u64, 3, 8, 7, 12, 11, 20] {
            let _ = cache.put_ticker(ticker("a", ts * 1_000, dec!(100), dec!(10)));
            if let Some(t) = cache.get_ticker(&"a".into(), &sym, ts * 1_000) {
                assert!(t.observed_at >= last_seen, "monotonicity violated");
                last_seen = t.observed_at;
            }
        }
    }
}
