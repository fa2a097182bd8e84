//! Admission gate.
//!
//! One deliberately pure function: no IO, no clocks, no shared state. Every
//! input the decision depends on — portfolio exposure, loss aggregates,
//! breaker states, book depth — is passed in by the caller, so the same
//! inputs always produce the same decision.
//!
//! Checks run in a fixed order and the first failure wins.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;

use market::cache::MarketDataCache;
use market::types::{Side, Venue, VenueId};
use strategy::types::Opportunity;

use crate::types::{Decision, PortfolioSnapshot, RejectReason, RiskAggregates, RiskLimits};

/// Book levels inspected when checking depth coverage for a leg.
const DEPTH_LEVELS: usize = 5;

pub fn evaluate(
    op: &Opportunity,
    portfolio: &PortfolioSnapshot,
    aggregates: &RiskAggregates,
    limits: &RiskLimits,
    venues: &HashMap<VenueId, Venue>,
    open_breakers: &HashSet<VenueId>,
    cache: &MarketDataCache,
    now_ms: u64,
) -> Decision {
    // Venues under an open circuit breaker accept no legs at all.
    for leg in &op.legs {
        if open_breakers.contains(&leg.venue) {
            return Decision::Reject(RejectReason::VenueCircuitOpen {
                venue: leg.venue.clone(),
            });
        }
    }

    // 1. Projected edge clears the global floor.
    if op.projected_profit_pct < limits.global_min_profit_pct {
        return Decision::Reject(RejectReason::BelowMinProfit);
    }

    // 2. Total exposure headroom.
    let headroom = limits.max_total_exposure_quote - portfolio.current_exposure_quote;
    if op.volume_quote > headroom {
        return Decision::Reject(RejectReason::ExposureExceeded);
    }

    // 3. Per-venue exposure headroom.
    for leg in &op.legs {
        let venue_cap = venues
            .get(&leg.venue)
            .map(|v| v.limits.max_position_quote)
            .unwrap_or(Decimal::ZERO);
        let used = portfolio
            .venue_exposure_quote
            .get(&leg.venue)
            .copied()
            .unwrap_or(Decimal::ZERO);

        if leg.notional() > venue_cap - used {
            return Decision::Reject(RejectReason::VenueExposureExceeded {
                venue: leg.venue.clone(),
            });
        }
    }

    // 4. Daily loss cap; trading halts once the cap is reached.
    if aggregates.daily_realized_loss >= limits.max_loss_per_day_quote {
        return Decision::Reject(RejectReason::DailyLoss);
    }

    // 5. Visible depth covers every leg near the top of book.
    for leg in &op.legs {
        if !depth_covers(cache, leg, now_ms) {
            return Decision::Reject(RejectReason::InsufficientDepth {
                venue: leg.venue.clone(),
            });
        }
    }

    // 6. Correlated-position age, only when the correlation check is armed.
    if limits.correlation_threshold.is_some() {
        let max_age_ms = limits.max_position_age_hours * 3_600_000;
        for leg in &op.legs {
            let stale_position = portfolio.open_positions.iter().find(|p| {
                p.asset == leg.symbol.base && now_ms.saturating_sub(p.opened_at) > max_age_ms
            });
            if let Some(p) = stale_position {
                return Decision::Reject(RejectReason::CorrelatedPositionTooOld {
                    asset: p.asset.clone(),
                });
            }
        }
    }

    Decision::Approve
}

/// A missing or stale book fails closed.
fn depth_covers(cache: &MarketDataCache, leg: &strategy::types::Leg, now_ms: u64) -> bool {
    let Some(book) = cache.get_book(&leg.venue, &leg.symbol, now_ms) else {
        return false;
    };

    let side = match leg.side {
        Side::Buy => &book.asks,
        Side::Sell => &book.bids,
    };

    let visible: Decimal = side.iter().take(DEPTH_LEVELS).map(|l| l.size).sum();
    visible >= leg.amount
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use market::cache::CacheConfig;
    use market::types::{
        BookLevel, BookSnapshot, FeeSchedule, Symbol, TradeLimits, VenueHealth, VenueKind,
    };
    use strategy::types::{
        DEFAULT_LEG_LATENCY_MS, Leg, OPPORTUNITY_TTL_MS, OpportunityKind, OpportunityStatus,
    };

    use crate::types::OpenPosition;

    const NOW: u64 = 1_000;

    fn venue(id: &str, max_position_quote: Decimal) -> Venue {
        Venue {
            id: id.into(),
            kind: VenueKind::Spot,
            health: VenueHealth::Active,
            fees: Some(FeeSchedule {
                maker_rate: dec!(0.001),
                taker_rate: dec!(0.001),
                withdraw_fees: HashMap::new(),
            }),
            limits: TradeLimits {
                min_amount: HashMap::new(),
                max_amount: HashMap::new(),
                max_position_quote,
            },
            flagged_high_risk: false,
        }
    }

    fn venues() -> HashMap<VenueId, Venue> {
        [
            (VenueId::from("a"), venue("a", dec!(10_000))),
            (VenueId::from("b"), venue("b", dec!(10_000))),
        ]
        .into()
    }

    fn op() -> Opportunity {
        let symbol = Symbol::new("BTC", "USDT");
        let leg = |step: u32, venue: &str, side: Side, price: Decimal| Leg {
            step_index: step,
            venue: venue.into(),
            symbol: symbol.clone(),
            side,
            amount: dec!(0.8),
            reference_price: price,
            fee_estimate: dec!(0.08),
            max_latency_ms: DEFAULT_LEG_LATENCY_MS,
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
            created_at: NOW,
            expires_at: NOW + OPPORTUNITY_TTL_MS,
            status: OpportunityStatus::Detected,
            enable_partial_fills: false,
            funding_annualized_pct: None,
        }
    }

    fn cache_with_fresh_books(now: u64) -> MarketDataCache {
        let cache = MarketDataCache::new(CacheConfig::default());
        let symbol = Symbol::new("BTC", "USDT");

        for (venue, bid, ask) in [("a", dec!(99.9), dec!(100.0)), ("b", dec!(100.4), dec!(100.5))]
        {
            cache
                .put_book(BookSnapshot {
                    venue: venue.into(),
                    symbol: symbol.clone(),
                    bids: vec![BookLevel {
                        price: bid,
                        size: dec!(1.0),
                    }],
                    asks: vec![BookLevel {
                        price: ask,
                        size: dec!(1.0),
                    }],
                    observed_at: now,
                })
                .unwrap();
        }

        cache
    }

    fn approve_ctx() -> (PortfolioSnapshot, RiskAggregates, RiskLimits, MarketDataCache) {
        (
            PortfolioSnapshot::default(),
            RiskAggregates::default(),
            RiskLimits::default(),
            cache_with_fresh_books(NOW),
        )
    }

    #[test]
    fn clean_candidate_is_approved() {
        let (portfolio, agg, limits, cache) = approve_ctx();

        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        assert!(d.is_approved());
    }

    #[test]
    fn evaluation_is_deterministic() {
        let (portfolio, agg, limits, cache) = approve_ctx();
        let candidate = op();

        let first = evaluate(
            &candidate,
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        for _ in 0..10 {
            let again = evaluate(
                &candidate,
                &portfolio,
                &agg,
                &limits,
                &venues(),
                &HashSet::new(),
                &cache,
                NOW,
            );
            assert_eq!(first, again);
        }
    }

    #[test]
    fn open_breaker_rejects_before_anything_else() {
        let (portfolio, agg, limits, cache) = approve_ctx();
        let open: HashSet<VenueId> = [VenueId::from("b")].into();

        let d = evaluate(&op(), &portfolio, &agg, &limits, &venues(), &open, &cache, NOW);
        assert_eq!(
            d,
            Decision::Reject(RejectReason::VenueCircuitOpen { venue: "b".into() })
        );
    }

    #[test]
    fn thin_edge_is_rejected() {
        let (portfolio, agg, limits, cache) = approve_ctx();
        let mut candidate = op();
        candidate.projected_profit_pct = dec!(0.05);

        let d = evaluate(
            &candidate,
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        assert_eq!(d, Decision::Reject(RejectReason::BelowMinProfit));
    }

    #[test]
    fn exposure_headroom_is_enforced() {
        let (mut portfolio, agg, limits, cache) = approve_ctx();
        portfolio.current_exposure_quote = limits.max_total_exposure_quote - dec!(50);

        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        assert_eq!(d, Decision::Reject(RejectReason::ExposureExceeded));
    }

    #[test]
    fn venue_headroom_is_enforced_per_leg() {
        let (mut portfolio, agg, limits, cache) = approve_ctx();
        portfolio
            .venue_exposure_quote
            .insert("b".into(), dec!(9_950));

        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        assert_eq!(
            d,
            Decision::Reject(RejectReason::VenueExposureExceeded { venue: "b".into() })
        );
    }

    #[test]
    fn daily_loss_at_cap_halts_admission() {
        let (portfolio, mut agg, limits, cache) = approve_ctx();
        agg.daily_realized_loss = limits.max_loss_per_day_quote;

        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        assert_eq!(d, Decision::Reject(RejectReason::DailyLoss));
    }

    #[test]
    fn missing_book_fails_closed() {
        let (portfolio, agg, limits, _) = approve_ctx();
        let empty_cache = MarketDataCache::new(CacheConfig::default());

        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &empty_cache,
            NOW,
        );
        assert_eq!(
            d,
            Decision::Reject(RejectReason::InsufficientDepth { venue: "a".into() })
        );
    }

    #[test]
    fn shallow_book_is_rejected() {
        let (portfolio, agg, limits, cache) = approve_ctx();
        let mut candidate = op();
        candidate.legs[0].amount = dec!(5.0);

        let d = evaluate(
            &candidate,
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            NOW,
        );
        assert_eq!(
            d,
            Decision::Reject(RejectReason::InsufficientDepth { venue: "a".into() })
        );
    }

    #[test]
    fn old_correlated_position_blocks_when_armed() {
        let (mut portfolio, agg, mut limits, _) = approve_ctx();
        limits.correlation_threshold = Some(0.8);
        limits.max_position_age_hours = 1;

        portfolio.open_positions.push(OpenPosition {
            venue: "a".into(),
            asset: "BTC".into(),
            quote_value: dec!(500),
            opened_at: 0,
        });

        // Books must stay fresh at evaluation time so the depth check
        // passes and the age check is what decides.
        let now = 2 * 3_600_000;
        let cache = cache_with_fresh_books(now);
        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            now,
        );
        assert_eq!(
            d,
            Decision::Reject(RejectReason::CorrelatedPositionTooOld {
                asset: "BTC".into()
            })
        );

        // Same portfolio with the check disarmed sails through.
        limits.correlation_threshold = None;
        let d = evaluate(
            &op(),
            &portfolio,
            &agg,
            &limits,
            &venues(),
            &HashSet::new(),
            &cache,
            now,
        );
        assert!(d.is_approved());
    }
}
