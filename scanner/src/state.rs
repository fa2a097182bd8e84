//! Live candidate set.
//!
//! Guarantees:
//! - No two live candidates share a fingerprint; collisions keep the higher
//!   net candidate.
//! - Size never exceeds the cap; overflow evicts the lowest-net candidate.
//! - Ownership transfer is explicit: `claim` removes a candidate for the
//!   gate, expiry sweeps remove and mark the rest.

use std::collections::HashMap;

use uuid::Uuid;

use strategy::types::{Fingerprint, Opportunity, OpportunityStatus};

/// Default cap on live candidates.
pub const MAX_ACTIVE: usize = 50;

#[derive(Debug, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Candidate stored; a previously live candidate may have been evicted.
    Stored { evicted: Option<Uuid> },
    /// Same trade shape already live with at least this much edge.
    DuplicateWeaker,
    /// Set full and the candidate is weaker than everything live.
    FullWeakest,
}

pub struct ActiveSet {
    max_active: usize,
    by_id: HashMap<Uuid, Opportunity>,
    by_fingerprint: HashMap<Fingerprint, Uuid>,
}

impl ActiveSet {
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active: max_active.max(1),
            by_id: HashMap::new(),
            by_fingerprint: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn get(&self, id: &Uuid) -> Option<&Opportunity> {
        self.by_id.get(id)
    }

    /// Try to store a freshly synthesized candidate.
    pub fn admit(&mut self, op: Opportunity) -> AdmitOutcome {
        let fp = op.fingerprint();

        if let Some(&existing_id) = self.by_fingerprint.get(&fp) {
            let existing = self
                .by_id
                .get(&existing_id)
                .expect("fingerprint index points at a live candidate");

            if op.projected_profit_quote <= existing.projected_profit_quote {
                return AdmitOutcome::DuplicateWeaker;
            }

            self.by_id.remove(&existing_id);
            self.by_fingerprint.insert(fp, op.id);
            self.by_id.insert(op.id, op);
            return AdmitOutcome::Stored {
                evicted: Some(existing_id),
            };
        }

        if self.by_id.len() >= self.max_active {
            let weakest = self
                .by_id
                .values()
                .min_by_key(|o| o.projected_profit_quote)
                .map(|o| (o.id, o.projected_profit_quote))
                .expect("full set is non-empty");

            if op.projected_profit_quote <= weakest.1 {
                return AdmitOutcome::FullWeakest;
            }

            self.remove(&weakest.0);
            let evicted = Some(weakest.0);
            self.by_fingerprint.insert(fp, op.id);
            self.by_id.insert(op.id, op);
            return AdmitOutcome::Stored { evicted };
        }

        self.by_fingerprint.insert(fp, op.id);
        self.by_id.insert(op.id, op);
        AdmitOutcome::Stored { evicted: None }
    }

    /// Transfer a candidate out of the set (to the gate). The candidate no
    /// longer participates in deduplication.
    pub fn claim(&mut self, id: &Uuid) -> Option<Opportunity> {
        self.remove(id)
    }

    /// Remove candidates past their expiry and return them marked expired.
    pub fn sweep_expired(&mut self, now_ms: u64) -> Vec<Opportunity> {
        let expired_ids: Vec<Uuid> = self
            .by_id
            .values()
            .filter(|o| o.status == OpportunityStatus::Detected && o.is_expired(now_ms))
            .map(|o| o.id)
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| {
                let mut op = self.remove(&id)?;
                op.status = OpportunityStatus::Expired;
                Some(op)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_fingerprint.clear();
    }

    fn remove(&mut self, id: &Uuid) -> Option<Opportunity> {
        let op = self.by_id.remove(id)?;
        self.by_fingerprint.remove(&op.fingerprint());
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use market::types::{Side, Symbol};
    use strategy::types::{Leg, OpportunityKind};

    fn op(venue_pair: (&str, &str), net: Decimal, expires_at: u64) -> Opportunity {
        let symbol = Symbol::new("BTC", "USDT");
        let leg = |step: u32, venue: &str, side: Side| Leg {
            step_index: step,
            venue: venue.into(),
            symbol: symbol.clone(),
            side,
            amount: dec!(1),
            reference_price: dec!(100),
            fee_estimate: Decimal::ZERO,
            max_latency_ms: 5_000,
            market_order: false,
        };

        Opportunity {
            id: Uuid::new_v4(),
            kind: OpportunityKind::Simple,
            legs: vec![
                leg(1, venue_pair.0, Side::Buy),
                leg(2, venue_pair.1, Side::Sell),
            ],
            symbol,
            projected_profit_quote: net,
            projected_profit_pct: net,
            volume_quote: dec!(100),
            confidence: 1.0,
            risks: vec![],
            created_at: 0,
            expires_at,
            status: OpportunityStatus::Detected,
            enable_partial_fills: false,
            funding_annualized_pct: None,
        }
    }

    #[test]
    fn duplicate_fingerprint_keeps_higher_net() {
        let mut set = ActiveSet::new(MAX_ACTIVE);

        let weak = op(("a", "b"), dec!(1), 30_000);
        let weak_id = weak.id;
        assert_eq!(set.admit(weak), AdmitOutcome::Stored { evicted: None });

        // Weaker duplicate bounces off.
        assert_eq!(set.admit(op(("a", "b"), dec!(0.5), 30_000)), AdmitOutcome::DuplicateWeaker);
        assert_eq!(set.len(), 1);

        // Stronger duplicate replaces.
        let strong = op(("a", "b"), dec!(2), 30_000);
        let strong_id = strong.id;
        assert_eq!(
            set.admit(strong),
            AdmitOutcome::Stored {
                evicted: Some(weak_id)
            }
        );
        assert_eq!(set.len(), 1);
        assert!(set.get(&strong_id).is_some());
    }

    #[test]
    fn overflow_evicts_the_weakest() {
        let mut set = ActiveSet::new(2);

        set.admit(op(("a", "b"), dec!(5), 30_000));
        let weak = op(("a", "c"), dec!(1), 30_000);
        let weak_id = weak.id;
        set.admit(weak);

        // Weaker than everything live: dropped.
        assert_eq!(set.admit(op(("a", "d"), dec!(0.5), 30_000)), AdmitOutcome::FullWeakest);

        // Stronger: weakest live candidate goes.
        assert_eq!(
            set.admit(op(("a", "e"), dec!(3), 30_000)),
            AdmitOutcome::Stored {
                evicted: Some(weak_id)
            }
        );
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn set_never_exceeds_cap_and_fingerprints_stay_unique() {
        let mut set = ActiveSet::new(10);

        for i in 0..100u32 {
            let venues = (format!("v{}", i % 20), "sink".to_string());
            set.admit(op(
                (venues.0.as_str(), venues.1.as_str()),
                Decimal::from(i),
                30_000,
            ));

            assert!(set.len() <= 10);

            let fps: std::collections::HashSet<_> =
                set.by_id.values().map(|o| o.fingerprint()).collect();
            assert_eq!(fps.len(), set.len());
        }
    }

    #[test]
    fn claim_removes_from_dedup() {
        let mut set = ActiveSet::new(MAX_ACTIVE);

        let first = op(("a", "b"), dec!(5), 30_000);
        let first_id = first.id;
        set.admit(first);

        let claimed = set.claim(&first_id).unwrap();
        assert_eq!(claimed.id, first_id);
        assert!(set.is_empty());

        // The same shape can be detected again afterwards.
        assert_eq!(
            set.admit(op(("a", "b"), dec!(1), 30_000)),
            AdmitOutcome::Stored { evicted: None }
        );
    }

    #[test]
    fn sweep_marks_and_removes_expired() {
        let mut set = ActiveSet::new(MAX_ACTIVE);

        set.admit(op(("a", "b"), dec!(1), 10_000));
        set.admit(op(("a", "c"), dec!(1), 50_000));

        let expired = set.sweep_expired(10_000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, OpportunityStatus::Expired);
        assert_eq!(set.len(), 1);
    }
}
