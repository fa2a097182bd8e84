use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use market::types::{Asset, VenueId};

/// A held position considered by the correlation age check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    pub venue: VenueId,
    pub asset: Asset,
    pub quote_value: Decimal,
    pub opened_at: u64,
}

/// Read-only view of portfolio state at evaluation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Total committed exposure across venues, quote units.
    pub current_exposure_quote: Decimal,
    /// Exposure committed per venue, quote units.
    #[serde(default)]
    pub venue_exposure_quote: HashMap<VenueId, Decimal>,
    #[serde(default)]
    pub open_positions: Vec<OpenPosition>,
}

/// Rolling aggregates maintained outside the gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskAggregates {
    /// Realized loss booked today, as a positive quote amount.
    pub daily_realized_loss: Decimal,
}

/// Global admission limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub global_min_profit_pct: Decimal,
    pub max_total_exposure_quote: Decimal,
    pub max_loss_per_day_quote: Decimal,
    pub max_position_age_hours: u64,
    /// When set, the correlated-position age check applies.
    pub correlation_threshold: Option<f64>,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            global_min_profit_pct: Decimal::new(1, 1),
            max_total_exposure_quote: Decimal::from(100_000),
            max_loss_per_day_quote: Decimal::from(1_000),
            max_position_age_hours: 24,
            correlation_threshold: None,
        }
    }
}

/// Machine-readable rejection reasons, stable for logs and events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    VenueCircuitOpen { venue: VenueId },
    BelowMinProfit,
    ExposureExceeded,
    VenueExposureExceeded { venue: VenueId },
    DailyLoss,
    InsufficientDepth { venue: VenueId },
    CorrelatedPositionTooOld { asset: Asset },
    Backpressure,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::VenueCircuitOpen { .. } => "venueCircuitOpen",
            RejectReason::BelowMinProfit => "belowMinProfit",
            RejectReason::ExposureExceeded => "exposureExceeded",
            RejectReason::VenueExposureExceeded { .. } => "venueExposureExceeded",
            RejectReason::DailyLoss => "dailyLoss",
            RejectReason::InsufficientDepth { .. } => "insufficientDepth",
            RejectReason::CorrelatedPositionTooOld { .. } => "correlatedPositionTooOld",
            RejectReason::Backpressure => "backpressure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject(RejectReason),
}

impl Decision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Decision::Approve)
    }
}
