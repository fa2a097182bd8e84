use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use market::types::{Side, Symbol, VenueId};

/// Default lifetime of a detected candidate.
pub const OPPORTUNITY_TTL_MS: u64 = 30_000;

/// Default per-leg fill deadline.
pub const DEFAULT_LEG_LATENCY_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityKind {
    Simple,
    Triangular,
    Basis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Detected,
    Approved,
    Executing,
    Completed,
    Failed,
    Expired,
    Rejected,
}

impl OpportunityStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OpportunityStatus::Completed
                | OpportunityStatus::Failed
                | OpportunityStatus::Expired
                | OpportunityStatus::Rejected
        )
    }
}

/// One atomic order inside a multi-step plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Leg {
    /// Numbered consecutively from 1.
    pub step_index: u32,
    pub venue: VenueId,
    pub symbol: Symbol,
    pub side: Side,
    /// Base units.
    pub amount: Decimal,
    pub reference_price: Decimal,
    /// Quote units, estimated at synthesis time.
    pub fee_estimate: Decimal,
    pub max_latency_ms: u64,
    /// When set the leg is submitted as a market order instead of
    /// limit-at-reference.
    pub market_order: bool,
}

impl Leg {
    pub fn notional(&self) -> Decimal {
        self.amount * self.reference_price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskFactorKind {
    Liquidity,
    Exchange,
    Timing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Advisory tag attached by the synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: RiskFactorKind,
    pub severity: Severity,
    pub impact: String,
}

/// Structural identity used for candidate deduplication: two candidates with
/// the same fingerprint describe the same trade shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub kind: OpportunityKind,
    pub symbol: String,
    pub legs: Vec<(VenueId, Side)>,
}

/// A candidate multi-leg trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub kind: OpportunityKind,
    /// Primary symbol for display and deduplication.
    pub symbol: Symbol,
    pub legs: Vec<Leg>,
    pub projected_profit_quote: Decimal,
    pub projected_profit_pct: Decimal,
    /// Entry notional in quote units.
    pub volume_quote: Decimal,
    pub confidence: f64,
    pub risks: Vec<RiskFactor>,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: OpportunityStatus,
    /// Carried from strategy config: partially filled legs rescale the rest
    /// of the plan instead of failing it.
    pub enable_partial_fills: bool,
    /// Present on funding-rate candidates; needed to reprice them from legs.
    pub funding_annualized_pct: Option<Decimal>,
}

impl Opportunity {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            kind: self.kind,
            symbol: self.symbol.code(),
            legs: self
                .legs
                .iter()
                .map(|l| (l.venue.clone(), l.side))
                .collect(),
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    /// Total of the per-leg fee estimates.
    pub fn total_fee_estimate(&self) -> Decimal {
        self.legs.iter().map(|l| l.fee_estimate).sum()
    }

    /// Reprice the candidate from its legs.
    ///
    /// Synthesizers compute `projected_profit_quote` through this function so
    /// the stored value and a later recomputation are bit-identical.
    pub fn recompute_profit_quote(&self) -> Decimal {
        let fees = self.total_fee_estimate();

        match self.kind {
            // Net of buy costs against sell proceeds on the shared symbol.
            OpportunityKind::Simple => {
                let mut net = Decimal::ZERO;
                for leg in &self.legs {
                    match leg.side {
                        Side::Buy => net -= leg.notional(),
                        Side::Sell => net += leg.notional(),
                    }
                }
                net - fees
            }

            // Walk the cycle: each buy swaps the running amount into the leg's
            // base asset, each sell swaps it back through the reference price.
            OpportunityKind::Triangular => {
                let mut held = self.volume_quote;
                for leg in &self.legs {
                    held = match leg.side {
                        Side::Buy => leg.amount,
                        Side::Sell => leg.amount * leg.reference_price,
                    };
                }
                held - self.volume_quote - fees
            }

            // Annualized funding edge after the entry-basis haircut.
            OpportunityKind::Basis => {
                let ann_pct = self.funding_annualized_pct.unwrap_or(Decimal::ZERO);
                let spot = &self.legs[0];
                let perp = &self.legs[1];
                let basis_pct = ((perp.reference_price - spot.reference_price)
                    / spot.reference_price
                    * Decimal::ONE_HUNDRED)
                    .abs();
                self.volume_quote * (ann_pct - basis_pct) / Decimal::ONE_HUNDRED - fees
            }
        }
    }
}
