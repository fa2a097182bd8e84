//! Spot/perpetual funding capture.
//!
//! When annualized funding on the perpetual leg clears the configured edge
//! after a haircut for the entry basis, the candidate buys spot and sells the
//! perp. Detection TTL stays short; the funding accrual itself is booked over
//! the execution's hold.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use market::cache::MarketDataCache;
use market::types::{Side, Venue, VenueId, default_fee_rate};

use crate::config::BasisParams;
use crate::score;
use crate::types::{
    DEFAULT_LEG_LATENCY_MS, Leg, OPPORTUNITY_TTL_MS, Opportunity, OpportunityKind,
    OpportunityStatus,
};

pub fn scan_basis(
    cache: &MarketDataCache,
    venues: &HashMap<VenueId, Venue>,
    params: &BasisParams,
    now_ms: u64,
) -> Vec<Opportunity> {
    let Some(spot) = cache.get_ticker(&params.spot_venue, &params.symbol, now_ms) else {
        return Vec::new();
    };
    let Some(perp) = cache.get_ticker(&params.perp_venue, &params.symbol, now_ms) else {
        return Vec::new();
    };
    let Some(funding) = cache.get_funding(&params.perp_venue, &params.symbol, now_ms) else {
        return Vec::new();
    };

    // Shorting the perp only earns when longs are paying.
    if funding.rate_per_period <= Decimal::ZERO {
        return Vec::new();
    }

    if spot.mid() <= Decimal::ZERO || spot.ask <= Decimal::ZERO {
        return Vec::new();
    }

    let basis_pct = ((perp.mid() - spot.mid()) / spot.mid() * Decimal::ONE_HUNDRED).abs();
    let edge_pct = funding.annualized_pct() - basis_pct;
    if edge_pct < params.min_annualized_pct {
        return Vec::new();
    }

    // TODO: revisit the 30 s detection TTL with the risk owner once funding
    // positions are held across multiple periods.

    let size = params.max_position_quote / spot.ask;
    if size <= Decimal::ZERO {
        return Vec::new();
    }

    let volume_quote = size * spot.ask;
    let spot_fee = volume_quote * taker_rate(venues, &params.spot_venue);
    let perp_fee = volume_quote * taker_rate(venues, &params.perp_venue);

    let legs = vec![
        Leg {
            step_index: 1,
            venue: params.spot_venue.clone(),
            symbol: params.symbol.clone(),
            side: Side::Buy,
            amount: size,
            reference_price: spot.ask,
            fee_estimate: spot_fee,
            max_latency_ms: DEFAULT_LEG_LATENCY_MS,
            market_order: false,
        },
        Leg {
            step_index: 2,
            venue: params.perp_venue.clone(),
            symbol: params.symbol.clone(),
            side: Side::Sell,
            amount: size,
            reference_price: perp.bid,
            fee_estimate: perp_fee,
            max_latency_ms: DEFAULT_LEG_LATENCY_MS,
            market_order: false,
        },
    ];

    let ages = [
        now_ms.saturating_sub(spot.observed_at),
        now_ms.saturating_sub(perp.observed_at),
    ];

    let mut risks = vec![score::timing_risk(
        "funding accrues over the hold; the hedge is exposed until both legs fill",
    )];
    for venue_id in [&params.spot_venue, &params.perp_venue] {
        if venues.get(venue_id).is_some_and(|v| v.flagged_high_risk) {
            risks.push(score::exchange_risk(venue_id));
        }
    }
    let thin_volume = spot.volume.min(perp.volume);
    if thin_volume < score::thin_volume_threshold() {
        let thin_venue = if spot.volume <= perp.volume {
            &params.spot_venue
        } else {
            &params.perp_venue
        };
        risks.push(score::liquidity_risk(thin_venue, thin_volume));
    }

    let mut op = Opportunity {
        id: Uuid::new_v4(),
        kind: OpportunityKind::Basis,
        symbol: params.symbol.clone(),
        legs,
        projected_profit_quote: Decimal::ZERO,
        projected_profit_pct: Decimal::ZERO,
        volume_quote,
        confidence: score::confidence(2, &ages),
        risks,
        created_at: now_ms,
        expires_at: now_ms + OPPORTUNITY_TTL_MS,
        status: OpportunityStatus::Detected,
        enable_partial_fills: false,
        funding_annualized_pct: Some(funding.annualized_pct()),
    };

    op.projected_profit_quote = op.recompute_profit_quote();
    op.projected_profit_pct = op.projected_profit_quote / volume_quote * Decimal::ONE_HUNDRED;

    vec![op]
}

fn taker_rate(venues: &HashMap<VenueId, Venue>, id: &VenueId) -> Decimal {
    venues
        .get(id)
        .map(|v| v.taker_rate())
        .unwrap_or_else(default_fee_rate)
}
