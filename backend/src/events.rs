//! Event fan-out.
//!
//! Components publish into a broadcast bus; external observers (dashboard,
//! notifications, audit writer) subscribe read-only. A lagging observer
//! drops events instead of slowing the pipeline.

use rust_decimal::Decimal;
use tokio::sync::broadcast;

use execution::types::Execution;
use market::cache::MarketEvent;
use market::types::{Symbol, VenueId};
use strategy::types::Opportunity;

#[derive(Debug, Clone)]
pub enum CoreEvent {
    OpportunityDetected(Opportunity),
    OpportunityExpired(Opportunity),
    OpportunityRejected {
        opportunity: Opportunity,
        reason: String,
    },
    ExecutionStarted {
        execution: Execution,
        opportunity: Opportunity,
    },
    ExecutionCompleted {
        execution: Execution,
        opportunity: Opportunity,
    },
    ExecutionFailed {
        execution: Execution,
        opportunity: Opportunity,
    },
    RiskAlert {
        limit: String,
        value: String,
    },
    EmergencyStop {
        reason: String,
    },
    PriceAlert {
        venue: VenueId,
        symbol: Symbol,
        previous_last: Decimal,
        last: Decimal,
        change_pct: Decimal,
    },
    VolumeSpike {
        venue: VenueId,
        symbol: Symbol,
        previous_volume: Decimal,
        volume: Decimal,
    },
    VenueConnectionLost {
        venue: VenueId,
    },
    VenueConnectionRestored {
        venue: VenueId,
    },
    Heartbeat {
        uptime_ms: u64,
        rss_bytes: u64,
        live_opportunities: usize,
    },
}

impl CoreEvent {
    /// Stable event name used in logs and the audit store.
    pub fn name(&self) -> &'static str {
        match self {
            CoreEvent::OpportunityDetected(_) => "opportunityDetected",
            CoreEvent::OpportunityExpired(_) => "opportunityExpired",
            CoreEvent::OpportunityRejected { .. } => "opportunityRejected",
            CoreEvent::ExecutionStarted { .. } => "executionStarted",
            CoreEvent::ExecutionCompleted { .. } => "executionCompleted",
            CoreEvent::ExecutionFailed { .. } => "executionFailed",
            CoreEvent::RiskAlert { .. } => "riskAlert",
            CoreEvent::EmergencyStop { .. } => "emergencyStop",
            CoreEvent::PriceAlert { .. } => "priceAlert",
            CoreEvent::VolumeSpike { .. } => "volumeSpike",
            CoreEvent::VenueConnectionLost { .. } => "venueConnectionLost",
            CoreEvent::VenueConnectionRestored { .. } => "venueConnectionRestored",
            CoreEvent::Heartbeat { .. } => "heartbeat",
        }
    }
}

impl From<MarketEvent> for CoreEvent {
    fn from(ev: MarketEvent) -> Self {
        match ev {
            MarketEvent::PriceAlert {
                venue,
                symbol,
                previous_last,
                last,
                change_pct,
                ..
            } => CoreEvent::PriceAlert {
                venue,
                symbol,
                previous_last,
                last,
                change_pct,
            },
            MarketEvent::VolumeSpike {
                venue,
                symbol,
                previous_volume,
                volume,
                ..
            } => CoreEvent::VolumeSpike {
                venue,
                symbol,
                previous_volume,
                volume,
            },
        }
    }
}

/// Cloneable publish handle over a broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: CoreEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1_024)
    }
}
