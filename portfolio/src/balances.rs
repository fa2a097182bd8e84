//! Balance book.
//!
//! Per (venue, asset) funds view. Only two writers exist: execution outcomes
//! applied by the coordinator's completion path, and periodic reconciliation
//! against the venue adapters (last-writer-wins per pair).

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::debug;

use market::types::{Asset, Balance, VenueId};

#[derive(Default)]
pub struct BalanceBook {
    inner: RwLock<HashMap<(VenueId, Asset), Balance>>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, venue: &VenueId, asset: &str) -> Option<Balance> {
        self.inner
            .read()
            .get(&(venue.clone(), asset.to_string()))
            .cloned()
    }

    /// Apply a fill delta. Positive `amount` credits the asset, negative
    /// debits it; balances never go below zero.
    pub fn apply_fill(&self, venue: &VenueId, asset: &str, amount: Decimal) {
        let mut inner = self.inner.write();
        let entry = inner
            .entry((venue.clone(), asset.to_string()))
            .or_default();

        entry.free = (entry.free + amount).max(Decimal::ZERO);
        debug!(%venue, asset, %amount, free = %entry.free, "balance adjusted by fill");
    }

    /// Replace every balance reported by a venue. Assets the venue stops
    /// reporting keep their last known value.
    pub fn reconcile(&self, venue: &VenueId, reported: HashMap<Asset, Balance>) {
        let mut inner = self.inner.write();
        for (asset, balance) in reported {
            inner.insert((venue.clone(), asset), balance);
        }
    }

    /// Total quote valuation across all venues.
    pub fn total_quote_value(&self) -> Decimal {
        self.inner.read().values().map(|b| b.quote_value).sum()
    }
}
