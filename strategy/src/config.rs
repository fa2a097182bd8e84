//! Strategy configuration.
//!
//! Each strategy kind carries a strongly-typed parameter record. Parameter
//! bags are adjacently tagged (`kind` + `params`) so unknown fields inside a
//! record are rejected at load time.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use market::types::{Asset, Symbol, VenueId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params", rename_all = "lowercase")]
pub enum StrategyConfig {
    Simple(SimpleParams),
    Triangular(TriangularParams),
    Basis(BasisParams),
}

impl StrategyConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StrategyConfig::Simple(_) => "simple",
            StrategyConfig::Triangular(_) => "triangular",
            StrategyConfig::Basis(_) => "basis",
        }
    }
}

/// Cross-venue spread capture on a shared symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimpleParams {
    pub symbols: Vec<Symbol>,
    /// Venues considered; empty means every venue with fresh data.
    #[serde(default)]
    pub venues: Vec<VenueId>,
    pub min_profit_pct: Decimal,
    pub max_position_quote: Decimal,
    #[serde(default)]
    pub enable_partial_fills: bool,
}

/// Three-leg cycle on a single venue. The cycle starts (and ends) in
/// `assets[0]`, which must be the quote currency positions are sized in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriangularParams {
    pub venue: VenueId,
    pub assets: [Asset; 3],
    pub min_profit_pct: Decimal,
    pub max_position_quote: Decimal,
    #[serde(default)]
    pub enable_partial_fills: bool,
}

/// Cash-and-carry between a spot venue and a perpetual venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasisParams {
    pub spot_venue: VenueId,
    pub perp_venue: VenueId,
    pub symbol: Symbol,
    /// Minimum annualized funding edge (percent) after the basis haircut.
    pub min_annualized_pct: Decimal,
    pub max_position_quote: Decimal,
}

/// A named, switchable strategy slot, in configuration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyEntry {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(flatten)]
    pub config: StrategyConfig,
}

fn default_enabled() -> bool {
    true
}

/// Parse a strategy set from JSON, rejecting malformed parameter records.
pub fn parse_strategies(raw: &str) -> anyhow::Result<Vec<StrategyEntry>> {
    let entries: Vec<StrategyEntry> = serde_json::from_str(raw)?;
    Ok(entries)
}
