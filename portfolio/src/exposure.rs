//! Committed-exposure tracking.
//!
//! Exposure is reserved when an execution is admitted and released when it
//! reaches a terminal state, so the gate always sees the quote value of
//! everything in flight.

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;

use market::types::VenueId;
use risk::types::{OpenPosition, PortfolioSnapshot};
use strategy::types::Opportunity;

#[derive(Default)]
struct Inner {
    total_quote: Decimal,
    per_venue: HashMap<VenueId, Decimal>,
    open_positions: Vec<OpenPosition>,
}

#[derive(Default)]
pub struct ExposureBook {
    inner: RwLock<Inner>,
}

impl ExposureBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve exposure for an admitted opportunity.
    pub fn reserve(&self, op: &Opportunity, now_ms: u64) {
        let mut inner = self.inner.write();
        inner.total_quote += op.volume_quote;

        for leg in &op.legs {
            *inner.per_venue.entry(leg.venue.clone()).or_default() += leg.notional();
        }

        inner.open_positions.push(OpenPosition {
            venue: op.legs[0].venue.clone(),
            asset: op.symbol.base.clone(),
            quote_value: op.volume_quote,
            opened_at: now_ms,
        });
    }

    /// Release the reservation once the execution is terminal.
    pub fn release(&self, op: &Opportunity) {
        let mut inner = self.inner.write();
        inner.total_quote = (inner.total_quote - op.volume_quote).max(Decimal::ZERO);

        for leg in &op.legs {
            if let Some(v) = inner.per_venue.get_mut(&leg.venue) {
                *v = (*v - leg.notional()).max(Decimal::ZERO);
            }
        }

        if let Some(idx) = inner
            .open_positions
            .iter()
            .position(|p| p.asset == op.symbol.base && p.quote_value == op.volume_quote)
        {
            inner.open_positions.remove(idx);
        }
    }

    /// Point-in-time view for the gate.
    pub fn snapshot(&self) -> PortfolioSnapshot {
        let inner = self.inner.read();
        PortfolioSnapshot {
            current_exposure_quote: inner.total_quote,
            venue_exposure_quote: inner.per_venue.clone(),
            open_positions: inner.open_positions.clone(),
        }
    }
}
