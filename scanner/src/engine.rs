//! Opportunity scanner.
//!
//! Periodic driver over the strategy set:
//!   1. Each scan tick runs enabled strategies in configuration order.
//!   2. Candidates deduplicate by fingerprint, keeping the higher net edge.
//!   3. The live set is capped; overflow evicts the lowest-net candidate.
//!   4. A slower sweep expires candidates past their TTL.
//!
//! `pause` suspends both timers but preserves the live set; `resume` picks
//! ticks back up immediately; shutdown clears the set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use market::cache::MarketDataCache;
use market::types::{Venue, VenueId};
use strategy::config::StrategyEntry;
use strategy::synthesize;
use strategy::types::Opportunity;

use crate::state::{ActiveSet, AdmitOutcome, MAX_ACTIVE};

#[derive(Clone, Debug)]
pub struct ScannerConfig {
    pub scan_period: Duration,
    pub sweep_period: Duration,
    pub max_active: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_secs(1),
            sweep_period: Duration::from_secs(5),
            max_active: MAX_ACTIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScannerMode {
    Running,
    Paused,
}

/// Candidate lifecycle notifications for the pipeline.
#[derive(Debug, Clone)]
pub enum ScannerEvent {
    Detected(Opportunity),
    Expired(Opportunity),
}

pub struct Scanner {
    cfg: ScannerConfig,
    strategies: Vec<StrategyEntry>,
    cache: Arc<MarketDataCache>,
    venues: HashMap<VenueId, Venue>,
    active: Mutex<ActiveSet>,
    events: mpsc::Sender<ScannerEvent>,
}

impl Scanner {
    pub fn new(
        cfg: ScannerConfig,
        strategies: Vec<StrategyEntry>,
        cache: Arc<MarketDataCache>,
        venues: HashMap<VenueId, Venue>,
        events: mpsc::Sender<ScannerEvent>,
    ) -> Arc<Self> {
        let max_active = cfg.max_active;
        Arc::new(Self {
            cfg,
            strategies,
            cache,
            venues,
            active: Mutex::new(ActiveSet::new(max_active)),
            events,
        })
    }

    pub fn active_len(&self) -> usize {
        self.active.lock().len()
    }

    /// Transfer a live candidate to the caller (the gate task).
    pub fn claim(&self, id: &Uuid) -> Option<Opportunity> {
        self.active.lock().claim(id)
    }

    /// Run every enabled strategy once and store the survivors. Returns the
    /// newly stored candidates in detection order.
    pub fn scan_once(&self, now_ms: u64) -> Vec<Opportunity> {
        let mut detected = Vec::new();

        for entry in self.strategies.iter().filter(|e| e.enabled) {
            let candidates = synthesize(&entry.config, &self.cache, &self.venues, now_ms);

            if candidates.is_empty() {
                continue;
            }

            debug!(
                strategy = %entry.name,
                candidates = candidates.len(),
                "strategy produced candidates"
            );

            let mut active = self.active.lock();
            for op in candidates {
                match active.admit(op.clone()) {
                    AdmitOutcome::Stored { evicted } => {
                        if let Some(evicted_id) = evicted {
                            debug!(%evicted_id, "candidate displaced by stronger duplicate or cap");
                        }
                        detected.push(op);
                    }
                    AdmitOutcome::DuplicateWeaker | AdmitOutcome::FullWeakest => {}
                }
            }
        }

        detected
    }

    /// Remove candidates past their TTL; returns them marked expired.
    pub fn sweep_expired(&self, now_ms: u64) -> Vec<Opportunity> {
        self.active.lock().sweep_expired(now_ms)
    }

    /// Drop the entire live set (shutdown semantics).
    pub fn clear(&self) {
        self.active.lock().clear();
    }

    /// Timer loop. `mode` toggles pause/resume, `shutdown` ends the loop and
    /// clears the set.
    pub async fn run(
        self: Arc<Self>,
        now_ms: fn() -> u64,
        mut mode: watch::Receiver<ScannerMode>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut scan_tick = tokio::time::interval(self.cfg.scan_period);
        let mut sweep_tick = tokio::time::interval(self.cfg.sweep_period);
        scan_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sweep_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            strategies = self.strategies.iter().filter(|e| e.enabled).count(),
            scan_period_ms = self.cfg.scan_period.as_millis() as u64,
            "scanner started"
        );

        loop {
            tokio::select! {
                _ = scan_tick.tick() => {
                    if *mode.borrow() == ScannerMode::Paused {
                        continue;
                    }
                    for op in self.scan_once(now_ms()) {
                        self.send(ScannerEvent::Detected(op)).await;
                    }
                }

                _ = sweep_tick.tick() => {
                    if *mode.borrow() == ScannerMode::Paused {
                        continue;
                    }
                    for op in self.sweep_expired(now_ms()) {
                        debug!(opportunity_id = %op.id, "candidate expired");
                        self.send(ScannerEvent::Expired(op)).await;
                    }
                }

                changed = mode.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    info!(mode = ?*mode.borrow(), "scanner mode changed");
                }

                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.clear();
        info!("scanner stopped; live set cleared");
    }

    async fn send(&self, event: ScannerEvent) {
        if self.events.send(event).await.is_err() {
            warn!("scanner event channel closed");
        }
    }
}
