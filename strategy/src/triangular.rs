//! Single-venue three-leg cycle.
//!
//! Both cycle directions are priced with the correct side per hop (ask when
//! buying the hop's base asset, bid when selling it) and the more profitable
//! direction is kept when it clears the threshold. Leg amounts are rescaled
//! by intermediate proceeds so each leg trades exactly what the prior leg
//! produced.

use std::collections::HashMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use market::cache::MarketDataCache;
use market::types::{Asset, Side, Symbol, Venue, VenueId, default_fee_rate};

use crate::config::TriangularParams;
use crate::score;
use crate::types::{
    DEFAULT_LEG_LATENCY_MS, Leg, OPPORTUNITY_TTL_MS, Opportunity, OpportunityKind,
    OpportunityStatus,
};

pub fn scan_triangular(
    cache: &MarketDataCache,
    venues: &HashMap<VenueId, Venue>,
    params: &TriangularParams,
    now_ms: u64,
) -> Vec<Opportunity> {
    let [a, b, c] = &params.assets;

    let forward = price_cycle(cache, params, [a, b, c], now_ms);
    let reverse = price_cycle(cache, params, [a, c, b], now_ms);

    let best = match (forward, reverse) {
        (Some(f), Some(r)) => Some(if f.gross_quote >= r.gross_quote { f } else { r }),
        (f, r) => f.or(r),
    };

    let Some(cycle) = best else {
        return Vec::new();
    };

    let fee_rate = venues
        .get(&params.venue)
        .map(|v| v.taker_rate())
        .unwrap_or_else(default_fee_rate);

    let fee_per_leg = cycle.start_quote * fee_rate;
    let fees = fee_per_leg * Decimal::from(3u8);
    let net_quote = cycle.gross_quote - fees;
    let net_pct = net_quote / cycle.start_quote * Decimal::ONE_HUNDRED;

    if net_pct < params.min_profit_pct {
        return Vec::new();
    }

    // TODO: confirm final-leg rescaling against the desk's profit accounting
    // before raising position caps on this strategy.
    let legs: Vec<Leg> = cycle
        .hops
        .iter()
        .enumerate()
        .map(|(i, hop)| Leg {
            step_index: (i + 1) as u32,
            venue: params.venue.clone(),
            symbol: hop.symbol.clone(),
            side: hop.side,
            amount: hop.amount,
            reference_price: hop.price,
            fee_estimate: fee_per_leg,
            max_latency_ms: DEFAULT_LEG_LATENCY_MS,
            market_order: false,
        })
        .collect();

    let ages: Vec<u64> = cycle
        .hops
        .iter()
        .map(|h| now_ms.saturating_sub(h.observed_at))
        .collect();

    let mut risks = vec![score::timing_risk(
        "sequential cycle legs are exposed to requote between fills",
    )];
    if venues
        .get(&params.venue)
        .is_some_and(|v| v.flagged_high_risk)
    {
        risks.push(score::exchange_risk(&params.venue));
    }
    if cycle.min_volume_24h < score::thin_volume_threshold() {
        risks.push(score::liquidity_risk(&params.venue, cycle.min_volume_24h));
    }

    let symbol = legs[0].symbol.clone();
    let mut op = Opportunity {
        id: Uuid::new_v4(),
        kind: OpportunityKind::Triangular,
        symbol,
        legs,
        projected_profit_quote: Decimal::ZERO,
        projected_profit_pct: net_pct,
        volume_quote: cycle.start_quote,
        confidence: score::confidence(cycle.hops.len(), &ages),
        risks,
        created_at: now_ms,
        expires_at: now_ms + OPPORTUNITY_TTL_MS,
        status: OpportunityStatus::Detected,
        enable_partial_fills: params.enable_partial_fills,
        funding_annualized_pct: None,
    };

    op.projected_profit_quote = op.recompute_profit_quote();
    vec![op]
}

struct Hop {
    symbol: Symbol,
    side: Side,
    price: Decimal,
    /// Base units traded on this hop after rescaling by prior proceeds.
    amount: Decimal,
    observed_at: u64,
}

struct PricedCycle {
    hops: Vec<Hop>,
    start_quote: Decimal,
    gross_quote: Decimal,
    min_volume_24h: Decimal,
}

/// Walk `start -> mid1 -> mid2 -> start` through the venue's fresh tickers.
/// Returns `None` when any hop lacks a tradable symbol or fresh data.
fn price_cycle(
    cache: &MarketDataCache,
    params: &TriangularParams,
    cycle: [&Asset; 3],
    now_ms: u64,
) -> Option<PricedCycle> {
    let start_quote = params.max_position_quote;

    let route = [
        (cycle[0], cycle[1]),
        (cycle[1], cycle[2]),
        (cycle[2], cycle[0]),
    ];

    let mut hops = Vec::with_capacity(3);
    let mut held = start_quote;
    let mut min_volume = Decimal::MAX;

    for (from, to) in route {
        let (hop, volume, out) = price_hop(cache, &params.venue, from, to, held, now_ms)?;
        min_volume = min_volume.min(volume);
        hops.push(hop);
        held = out;
    }

    Some(PricedCycle {
        hops,
        start_quote,
        gross_quote: held - start_quote,
        min_volume_24h: min_volume,
    })
}

/// Convert `held` units of `from` into `to` using whichever orientation of
/// the pair the venue quotes. Returns the hop, the pair's 24h volume, and the
/// resulting amount of `to`.
fn price_hop(
    cache: &MarketDataCache,
    venue: &VenueId,
    from: &Asset,
    to: &Asset,
    held: Decimal,
    now_ms: u64,
) -> Option<(Hop, Decimal, Decimal)> {
    // Buying the target asset: pair quoted as to/from, lift the ask.
    if let Some(t) = cache.get_ticker(venue, &Symbol::new(to.clone(), from.clone()), now_ms) {
        if t.ask <= Decimal::ZERO {
            return None;
        }
        let amount = held / t.ask;
        let hop = Hop {
            symbol: t.symbol.clone(),
            side: Side::Buy,
            price: t.ask,
            amount,
            observed_at: t.observed_at,
        };
        return Some((hop, t.volume, amount));
    }

    // Selling what we hold: pair quoted as from/to, hit the bid.
    if let Some(t) = cache.get_ticker(venue, &Symbol::new(from.clone(), to.clone()), now_ms) {
        let out = held * t.bid;
        let hop = Hop {
            symbol: t.symbol.clone(),
            side: Side::Sell,
            price: t.bid,
            amount: held,
            observed_at: t.observed_at,
        };
        return Some((hop, t.volume, out));
    }

    None
}
