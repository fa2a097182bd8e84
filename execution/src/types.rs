use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use market::types::{Side, Symbol, VenueId};
use strategy::types::Opportunity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Pending,
    Open,
    Filled,
    Partial,
    Cancelled,
    Rejected,
}

/// One venue order issued while driving an execution, including best-effort
/// compensation orders placed during recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Leg this trade belongs to; compensation trades reuse the unwound
    /// leg's index.
    pub step_index: u32,
    pub venue: VenueId,
    pub symbol: Symbol,
    pub side: Side,
    pub requested_amount: Decimal,
    pub requested_price: Option<Decimal>,
    pub filled_amount: Decimal,
    pub average_fill_price: Decimal,
    pub fee: Decimal,
    pub status: TradeStatus,
    pub external_order_id: Option<String>,
    pub created_at: u64,
    pub filled_at: Option<u64>,
    /// Set on recovery trades that unwind an already-filled leg.
    pub compensation: bool,
}

/// Progress record for one approved opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub status: ExecutionStatus,
    pub trades: Vec<Trade>,
    pub realized_profit: Decimal,
    pub total_fees: Decimal,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub errors: Vec<String>,
}

impl Execution {
    pub fn new(opportunity_id: Uuid, started_at: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            status: ExecutionStatus::Pending,
            trades: Vec::new(),
            realized_profit: Decimal::ZERO,
            total_fees: Decimal::ZERO,
            started_at,
            completed_at: None,
            errors: Vec::new(),
        }
    }

    /// Sum of fees over every recorded trade.
    pub fn fees(&self) -> Decimal {
        self.trades.iter().map(|t| t.fee).sum()
    }

    /// Realized result over filled quantity: sell proceeds minus buy costs
    /// minus fees, compensation trades included.
    pub fn compute_realized_profit(&self) -> Decimal {
        let mut net = Decimal::ZERO;
        for t in &self.trades {
            let notional = t.filled_amount * t.average_fill_price;
            match t.side {
                Side::Buy => net -= notional,
                Side::Sell => net += notional,
            }
        }
        net - self.fees()
    }
}

/// Stable client-side order identifier for a leg. Resubmitting with the same
/// identifier must not create a second venue order.
pub fn client_order_id(execution_id: &Uuid, step_index: u32) -> String {
    format!("{execution_id}-{step_index}")
}

/// Client identifier for the compensation order unwinding `step_index`.
pub fn compensation_order_id(execution_id: &Uuid, step_index: u32) -> String {
    format!("{execution_id}-comp-{step_index}")
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("execution queue full")]
    Backpressure,

    #[error("coordinator is shut down")]
    Closed,
}

/// Outcomes published to the supervisor. Every event carries the opportunity
/// so downstream bookkeeping (exposure, balances, audit) needs no lookups.
#[derive(Debug, Clone)]
pub enum ExecEvent {
    Started {
        execution: Execution,
        opportunity: Opportunity,
    },
    Completed {
        execution: Execution,
        opportunity: Opportunity,
    },
    Failed {
        execution: Execution,
        opportunity: Opportunity,
    },
    /// Monitor mode observed an approved candidate without trading it.
    MonitorOnly { opportunity: Opportunity },
}
