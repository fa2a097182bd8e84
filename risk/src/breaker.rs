//! Per-venue circuit breakers.
//!
//! A breaker opens after a burst of venue-API failures and keeps the gate
//! from routing legs to that venue. After the cooldown the breaker moves to
//! half-open: the next leg is allowed through as a probe, a success closes
//! the breaker, a failure re-opens it.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{info, warn};

use market::types::VenueId;

#[derive(Clone, Debug)]
pub struct BreakerConfig {
    /// Failures within `window_ms` that open the breaker.
    pub failure_threshold: usize,
    pub window_ms: u64,
    /// Time the breaker stays fully open before half-open probing.
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_ms: 5 * 60_000,
            cooldown_ms: 10 * 60_000,
        }
    }
}

#[derive(Default)]
struct BreakerState {
    /// Failure timestamps within the rolling window.
    failures: VecDeque<u64>,
    opened_at: Option<u64>,
}

/// Breaker book shared between the coordinator (writer) and the gate task
/// (reader via [`VenueBreakers::open_venues`]).
pub struct VenueBreakers {
    cfg: BreakerConfig,
    states: Mutex<HashMap<VenueId, BreakerState>>,
}

impl VenueBreakers {
    pub fn new(cfg: BreakerConfig) -> Self {
        Self {
            cfg,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record a venue-API failure. Returns true when this failure opened the
    /// breaker (open and half-open re-trips count too).
    pub fn record_failure(&self, venue: &VenueId, now_ms: u64) -> bool {
        let mut states = self.states.lock();
        let state = states.entry(venue.clone()).or_default();

        // A failed half-open probe re-opens immediately.
        if let Some(opened) = state.opened_at {
            if now_ms.saturating_sub(opened) >= self.cfg.cooldown_ms {
                warn!(%venue, "half-open probe failed; breaker re-opened");
                state.opened_at = Some(now_ms);
                return true;
            }
            return false;
        }

        state.failures.push_back(now_ms);
        while let Some(&front) = state.failures.front() {
            if now_ms.saturating_sub(front) > self.cfg.window_ms {
                state.failures.pop_front();
            } else {
                break;
            }
        }

        if state.failures.len() >= self.cfg.failure_threshold {
            warn!(
                %venue,
                failures = state.failures.len(),
                window_ms = self.cfg.window_ms,
                "venue breaker opened"
            );
            state.failures.clear();
            state.opened_at = Some(now_ms);
            return true;
        }

        false
    }

    /// Record a successful venue call; closes a half-open breaker.
    pub fn record_success(&self, venue: &VenueId, now_ms: u64) {
        let mut states = self.states.lock();
        let Some(state) = states.get_mut(venue) else {
            return;
        };

        if let Some(opened) = state.opened_at {
            if now_ms.saturating_sub(opened) >= self.cfg.cooldown_ms {
                info!(%venue, "half-open probe succeeded; breaker closed");
                state.opened_at = None;
                state.failures.clear();
            }
        }
    }

    /// Venues currently refusing legs. Half-open breakers are absent from
    /// this set so a probe leg can go through.
    pub fn open_venues(&self, now_ms: u64) -> HashSet<VenueId> {
        let states = self.states.lock();
        states
            .iter()
            .filter_map(|(venue, state)| {
                let opened = state.opened_at?;
                (now_ms.saturating_sub(opened) < self.cfg.cooldown_ms).then(|| venue.clone())
            })
            .collect()
    }
}

impl Default for VenueBreakers {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
