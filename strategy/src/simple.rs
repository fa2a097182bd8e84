//! Cross-venue spread capture.
//!
//! For each configured symbol, every ordered venue pair whose buy-side ask
//! sits under the sell-side bid is sized against visible depth and scored net
//! of fees. At most one candidate per symbol survives: highest net profit,
//! then freshest snapshots, then lexicographic venue order.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use market::cache::MarketDataCache;
use market::types::{
    BookLevel, BookSnapshot, Side, Symbol, TickerSnapshot, Venue, VenueId, default_fee_rate,
};

use crate::config::SimpleParams;
use crate::score;
use crate::types::{
    DEFAULT_LEG_LATENCY_MS, Leg, OPPORTUNITY_TTL_MS, Opportunity, OpportunityKind,
    OpportunityStatus,
};

/// Depth-walk cap in quote units.
fn depth_quote_cap() -> Decimal {
    Decimal::from(10_000)
}

/// Depth-walk cap in base units.
fn depth_base_cap() -> Decimal {
    Decimal::from(100)
}

/// Fraction of the sized amount actually planned.
fn safety_margin() -> Decimal {
    Decimal::new(8, 1)
}

pub fn scan_simple(
    cache: &MarketDataCache,
    venues: &HashMap<VenueId, Venue>,
    params: &SimpleParams,
    now_ms: u64,
) -> Vec<Opportunity> {
    let mut out = Vec::new();

    for symbol in &params.symbols {
        let mut fresh = cache.list_fresh(symbol, now_ms);
        if !params.venues.is_empty() {
            fresh.retain(|(v, _, _)| params.venues.contains(v));
        }

        let mut best: Option<Candidate> = None;

        for (i, (buy_venue, buy_ticker, buy_book)) in fresh.iter().enumerate() {
            for (j, (sell_venue, sell_ticker, sell_book)) in fresh.iter().enumerate() {
                if i == j || buy_ticker.ask >= sell_ticker.bid {
                    continue;
                }

                let Some(cand) = price_pair(
                    venues,
                    params,
                    (buy_venue, buy_ticker, buy_book),
                    (sell_venue, sell_ticker, sell_book),
                ) else {
                    continue;
                };

                if cand.net_pct < params.min_profit_pct {
                    continue;
                }

                best = Some(match best.take() {
                    None => cand,
                    Some(prev) => pick_better(prev, cand),
                });
            }
        }

        if let Some(cand) = best {
            out.push(cand.into_opportunity(symbol.clone(), fresh.len(), params, now_ms));
        }
    }

    out
}

struct Candidate {
    buy_venue: VenueId,
    sell_venue: VenueId,
    buy_ask: Decimal,
    sell_bid: Decimal,
    size: Decimal,
    volume_quote: Decimal,
    buy_fee: Decimal,
    sell_fee: Decimal,
    net_quote: Decimal,
    net_pct: Decimal,
    /// Pair freshness is limited by its older snapshot; lower key is fresher.
    worst_age_key: u64,
    snapshot_ages: [u64; 2],
    buy_volume_24h: Decimal,
    sell_volume_24h: Decimal,
}

fn price_pair(
    venues: &HashMap<VenueId, Venue>,
    params: &SimpleParams,
    (buy_venue, buy_ticker, buy_book): (&VenueId, &TickerSnapshot, &BookSnapshot),
    (sell_venue, sell_ticker, sell_book): (&VenueId, &TickerSnapshot, &BookSnapshot),
) -> Option<Candidate> {
    let buy_depth = consumable_base(&buy_book.asks);
    let sell_depth = consumable_base(&sell_book.bids);

    if buy_ticker.ask <= Decimal::ZERO {
        return None;
    }

    let position_cap = params.max_position_quote / buy_ticker.ask;
    let size = buy_depth.min(sell_depth).min(position_cap) * safety_margin();
    if size <= Decimal::ZERO {
        return None;
    }

    let volume_quote = size * buy_ticker.ask;
    let buy_fee = volume_quote * taker_rate(venues, buy_venue);
    let sell_fee = volume_quote * taker_rate(venues, sell_venue);

    let gross = size * (sell_ticker.bid - buy_ticker.ask);
    let net_quote = gross - buy_fee - sell_fee;
    let net_pct = net_quote / volume_quote * Decimal::ONE_HUNDRED;

    let older = buy_ticker.observed_at.min(sell_ticker.observed_at);

    Some(Candidate {
        buy_venue: buy_venue.clone(),
        sell_venue: sell_venue.clone(),
        buy_ask: buy_ticker.ask,
        sell_bid: sell_ticker.bid,
        size,
        volume_quote,
        buy_fee,
        sell_fee,
        net_quote,
        net_pct,
        worst_age_key: u64::MAX - older,
        snapshot_ages: [buy_ticker.observed_at, sell_ticker.observed_at],
        buy_volume_24h: buy_ticker.volume,
        sell_volume_24h: sell_ticker.volume,
    })
}

/// Tie-break: highest net, then freshest pair, then lexicographic venues.
fn pick_better(a: Candidate, b: Candidate) -> Candidate {
    let key_a = (
        std::cmp::Reverse(a.net_quote),
        a.worst_age_key,
        a.buy_venue.clone(),
        a.sell_venue.clone(),
    );
    let key_b = (
        std::cmp::Reverse(b.net_quote),
        b.worst_age_key,
        b.buy_venue.clone(),
        b.sell_venue.clone(),
    );
    if key_b < key_a { b } else { a }
}

/// Base amount consumable from one book side before either depth cap is hit.
fn consumable_base(levels: &[BookLevel]) -> Decimal {
    let quote_cap = depth_quote_cap();
    let base_cap = depth_base_cap();

    let mut base = Decimal::ZERO;
    let mut quote = Decimal::ZERO;

    for level in levels {
        if level.price <= Decimal::ZERO {
            break;
        }

        let level_quote = level.price * level.size;

        if quote + level_quote >= quote_cap {
            base += (quote_cap - quote) / level.price;
            break;
        }
        if base + level.size >= base_cap {
            base = base_cap;
            break;
        }

        base += level.size;
        quote += level_quote;
    }

    base.min(base_cap)
}

fn taker_rate(venues: &HashMap<VenueId, Venue>, id: &VenueId) -> Decimal {
    venues
        .get(id)
        .map(|v| v.taker_rate())
        .unwrap_or_else(default_fee_rate)
}

impl Candidate {
    fn into_opportunity(
        self,
        symbol: Symbol,
        sources: usize,
        params: &SimpleParams,
        now_ms: u64,
    ) -> Opportunity {
        let legs = vec![
            Leg {
                step_index: 1,
                venue: self.buy_venue.clone(),
                symbol: symbol.clone(),
                side: Side::Buy,
                amount: self.size,
                reference_price: self.buy_ask,
                fee_estimate: self.buy_fee,
                max_latency_ms: DEFAULT_LEG_LATENCY_MS,
                market_order: false,
            },
            Leg {
                step_index: 2,
                venue: self.sell_venue.clone(),
                symbol: symbol.clone(),
                side: Side::Sell,
                amount: self.size,
                reference_price: self.sell_bid,
                fee_estimate: self.sell_fee,
                max_latency_ms: DEFAULT_LEG_LATENCY_MS,
                market_order: false,
            },
        ];

        let ages = self
            .snapshot_ages
            .map(|observed| now_ms.saturating_sub(observed));

        let mut risks = Vec::new();
        let thin_volume = self.buy_volume_24h.min(self.sell_volume_24h);
        if thin_volume < score::thin_volume_threshold() {
            let thin_venue = if self.buy_volume_24h <= self.sell_volume_24h {
                &self.buy_venue
            } else {
                &self.sell_venue
            };
            risks.push(score::liquidity_risk(thin_venue, thin_volume));
        }

        let mut op = Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::Simple,
            symbol,
            legs,
            projected_profit_quote: Decimal::ZERO,
            projected_profit_pct: self.net_pct,
            volume_quote: self.volume_quote,
            confidence: score::confidence(sources, &ages),
            risks,
            created_at: now_ms,
            expires_at: now_ms + OPPORTUNITY_TTL_MS,
            status: OpportunityStatus::Detected,
            enable_partial_fills: params.enable_partial_fills,
            funding_annualized_pct: None,
        };

        op.projected_profit_quote = op.recompute_profit_quote();
        op
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use market::cache::CacheConfig;
    use market::types::{FeeSchedule, TradeLimits, VenueHealth, VenueKind};

    fn venue(id: &str, taker: Decimal) -> Venue {
        Venue {
            id: id.into(),
            kind: VenueKind::Spot,
            health: VenueHealth::Active,
            fees: Some(FeeSchedule {
                maker_rate: taker,
                taker_rate: taker,
                withdraw_fees: HashMap::new(),
            }),
            limits: TradeLimits {
                min_amount: HashMap::new(),
                max_amount: HashMap::new(),
                max_position_quote: dec!(1_000_000),
            },
            flagged_high_risk: false,
        }
    }

    fn venue_map(taker: Decimal) -> HashMap<VenueId, Venue> {
        [("a", taker), ("b", taker)]
            .into_iter()
            .map(|(id, t)| (VenueId::from(id), venue(id, t)))
            .collect()
    }

    fn ticker(v: &str, bid: Decimal, ask: Decimal, observed_at: u64) -> TickerSnapshot {
        TickerSnapshot {
            venue: v.into(),
            symbol: Symbol::new("BTC", "USDT"),
            bid,
            ask,
            last: (bid + ask) / Decimal::TWO,
            volume: dec!(1_000_000),
            change_24h: Decimal::ZERO,
            observed_at,
        }
    }

    fn book(v: &str, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)], observed_at: u64) -> BookSnapshot {
        let lvl = |&(price, size): &(Decimal, Decimal)| BookLevel { price, size };
        BookSnapshot {
            venue: v.into(),
            symbol: Symbol::new("BTC", "USDT"),
            bids: bids.iter().map(lvl).collect(),
            asks: asks.iter().map(lvl).collect(),
            observed_at,
        }
    }

    fn seed_two_venue_market(cache: &MarketDataCache, t: u64) {
        cache.put_ticker(ticker("a", dec!(99.9), dec!(100.0), t)).unwrap();
        cache.put_ticker(ticker("b", dec!(100.4), dec!(100.5), t)).unwrap();
        cache
            .put_book(book(
                "a",
                &[(dec!(99.9), dec!(1.0))],
                &[(dec!(100.0), dec!(1.0)), (dec!(100.1), dec!(1.0))],
                t,
            ))
            .unwrap();
        cache
            .put_book(book(
                "b",
                &[(dec!(100.4), dec!(1.0)), (dec!(100.3), dec!(1.0))],
                &[(dec!(100.5), dec!(1.0))],
                t,
            ))
            .unwrap();
    }

    fn params(min_profit_pct: Decimal) -> SimpleParams {
        SimpleParams {
            symbols: vec![Symbol::new("BTC", "USDT")],
            venues: vec![],
            min_profit_pct,
            max_position_quote: dec!(100),
            enable_partial_fills: false,
        }
    }

    #[test]
    fn profitable_pair_produces_one_candidate() {
        let cache = MarketDataCache::new(CacheConfig::default());
        seed_two_venue_market(&cache, 1_000);

        let ops = scan_simple(&cache, &venue_map(dec!(0.001)), &params(dec!(0.2)), 1_500);

        assert_eq!(ops.len(), 1);
        let op = &ops[0];
        assert_eq!(op.legs[0].venue, VenueId::from("a"));
        assert_eq!(op.legs[1].venue, VenueId::from("b"));
        assert_eq!(op.legs[0].side, Side::Buy);
        assert_eq!(op.legs[0].amount, dec!(0.80));
        assert_eq!(op.projected_profit_pct, dec!(0.2));
        assert_eq!(op.projected_profit_quote, op.recompute_profit_quote());
    }

    #[test]
    fn fees_can_erase_the_edge() {
        let cache = MarketDataCache::new(CacheConfig::default());
        seed_two_venue_market(&cache, 1_000);

        let ops = scan_simple(&cache, &venue_map(dec!(0.003)), &params(dec!(0.2)), 1_500);
        assert!(ops.is_empty());
    }

    #[test]
    fn stale_leg_removes_the_pair() {
        let cache = MarketDataCache::new(CacheConfig::default());
        let now = 20_000;

        cache.put_ticker(ticker("a", dec!(99.9), dec!(100.0), now)).unwrap();
        cache
            .put_book(book("a", &[(dec!(99.9), dec!(1.0))], &[(dec!(100.0), dec!(1.0))], now))
            .unwrap();
        // 11 s old, past the 10 s staleness window
        cache.put_ticker(ticker("b", dec!(100.4), dec!(100.5), now - 11_000)).unwrap();
        cache
            .put_book(book("b", &[(dec!(100.4), dec!(1.0))], &[(dec!(100.5), dec!(1.0))], now - 11_000))
            .unwrap();

        assert_eq!(cache.list_fresh(&Symbol::new("BTC", "USDT"), now).len(), 1);

        let ops = scan_simple(&cache, &venue_map(dec!(0.001)), &params(dec!(0.1)), now);
        assert!(ops.is_empty());
    }

    #[test]
    fn depth_walk_respects_quote_cap() {
        // 200 units at price 100 => 20_000 quote; the 10_000 cap stops at 100 base,
        // which is also the base cap.
        let levels = [(dec!(100), dec!(200))].map(|(p, s)| BookLevel { price: p, size: s });
        assert_eq!(consumable_base(&levels), dec!(100));

        // Thin levels below both caps are fully consumable.
        let levels = [
            (dec!(100), dec!(1)),
            (dec!(101), dec!(2)),
        ]
        .map(|(p, s)| BookLevel { price: p, size: s });
        assert_eq!(consumable_base(&levels), dec!(3));
    }

    #[test]
    fn tie_break_prefers_higher_net() {
        let cache = MarketDataCache::new(CacheConfig::default());
        let t = 1_000;

        // Venue c undercuts a: buying on c nets more.
        seed_two_venue_market(&cache, t);
        cache.put_ticker(ticker("c", dec!(99.5), dec!(99.6), t)).unwrap();
        cache
            .put_book(book("c", &[(dec!(99.5), dec!(1.0))], &[(dec!(99.6), dec!(1.0))], t))
            .unwrap();

        let mut venues = venue_map(dec!(0.001));
        venues.insert("c".into(), venue("c", dec!(0.001)));

        let ops = scan_simple(&cache, &venues, &params(dec!(0.2)), 1_500);

        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].legs[0].venue, VenueId::from("c"));
        assert_eq!(ops[0].legs[1].venue, VenueId::from("b"));
    }
}
