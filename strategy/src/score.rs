//! Confidence and risk-factor heuristics shared by the synthesizers.

use rust_decimal::Decimal;

use market::types::VenueId;

use crate::types::{RiskFactor, RiskFactorKind, Severity};

/// Snapshots older than this degrade confidence.
const FRESH_AGE_MS: u64 = 5_000;

/// 24h quote volume under which a venue is tagged thin.
const THIN_VOLUME_QUOTE: u32 = 100_000;

pub fn thin_volume_threshold() -> Decimal {
    Decimal::from(THIN_VOLUME_QUOTE)
}

/// Score in [0.1, 1.0]: starts at full confidence, knocked down for a thin
/// snapshot base and again for each snapshot past the freshness horizon.
pub fn confidence(sources: usize, snapshot_ages_ms: &[u64]) -> f64 {
    let mut c = 1.0_f64;

    if sources < 3 {
        c *= 0.8;
    }

    for &age in snapshot_ages_ms {
        if age > FRESH_AGE_MS {
            c *= 0.9;
        }
    }

    c.max(0.1)
}

pub fn liquidity_risk(venue: &VenueId, volume: Decimal) -> RiskFactor {
    RiskFactor {
        kind: RiskFactorKind::Liquidity,
        severity: Severity::Medium,
        impact: format!("{venue} 24h volume {volume} below {THIN_VOLUME_QUOTE}"),
    }
}

pub fn exchange_risk(venue: &VenueId) -> RiskFactor {
    RiskFactor {
        kind: RiskFactorKind::Exchange,
        severity: Severity::High,
        impact: format!("{venue} is flagged high-risk"),
    }
}

pub fn timing_risk(detail: &str) -> RiskFactor {
    RiskFactor {
        kind: RiskFactorKind::Timing,
        severity: Severity::Low,
        impact: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_confidence_with_fresh_broad_base() {
        assert_eq!(confidence(3, &[100, 200]), 1.0);
    }

    #[test]
    fn thin_base_and_old_snapshots_compound() {
        let c = confidence(2, &[6_000, 100]);
        assert!((c - 0.8 * 0.9).abs() < 1e-12);
    }

    #[test]
    fn floored_at_point_one() {
        let ages = [10_000u64; 40];
        assert_eq!(confidence(1, &ages), 0.1);
    }
}
