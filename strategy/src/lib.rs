pub mod basis;
pub mod config;
pub mod score;
pub mod simple;
pub mod triangular;
pub mod types;

use std::collections::HashMap;

use market::cache::MarketDataCache;
use market::types::{Venue, VenueId};

use crate::config::StrategyConfig;
use crate::types::Opportunity;

/// Run one strategy against the current cache state.
///
/// Strategies are pure: they read the cache, never mutate it, and emit no
/// events. All candidate bookkeeping belongs to the scanner.
pub fn synthesize(
    cfg: &StrategyConfig,
    cache: &MarketDataCache,
    venues: &HashMap<VenueId, Venue>,
    now_ms: u64,
) -> Vec<Opportunity> {
    match cfg {
        StrategyConfig::Simple(p) => simple::scan_simple(cache, venues, p, now_ms),
        StrategyConfig::Triangular(p) => triangular::scan_triangular(cache, venues, p, now_ms),
        StrategyConfig::Basis(p) => basis::scan_basis(cache, venues, p, now_ms),
    }
}
