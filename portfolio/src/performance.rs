//! Rolling performance aggregation.
//!
//! Single writer (the coordinator's completion path), many readers (the
//! snapshot accessor). The tracker observes execution outcomes and never
//! triggers actions itself.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, NaiveDate};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

/// Most recent per-execution samples retained.
const ROLLING_SAMPLES: usize = 1_000;

/// Days of per-day profit history retained.
const DAILY_WINDOW: usize = 30;

/// Daily risk-free rate used by the Sharpe-style ratio.
const DAILY_RISK_FREE: f64 = 0.02 / 365.0;

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub success_rate: f64,
    pub cumulative_profit_quote: Decimal,
    pub cumulative_fees_quote: Decimal,
    pub average_latency_ms: f64,
    pub peak_profit_quote: Decimal,
    pub max_drawdown: f64,
    pub sharpe_ratio: Option<f64>,
}

#[derive(Default)]
struct Inner {
    total_executions: u64,
    successful_executions: u64,
    cumulative_profit: Decimal,
    cumulative_fees: Decimal,
    profits: VecDeque<Decimal>,
    latencies_ms: VecDeque<u64>,
    daily_profit: BTreeMap<NaiveDate, Decimal>,
    peak_profit: Decimal,
    max_drawdown: f64,
}

#[derive(Default)]
pub struct PerformanceTracker {
    inner: RwLock<Inner>,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// An execution entered the pipeline. Totals count starts; successes are
    /// only counted on completion.
    pub fn on_started(&self) {
        self.inner.write().total_executions += 1;
    }

    /// An execution reached a terminal state.
    pub fn on_finished(
        &self,
        success: bool,
        realized_profit: Decimal,
        fees: Decimal,
        latency_ms: u64,
        now_ms: u64,
    ) {
        let mut inner = self.inner.write();

        if success {
            inner.successful_executions += 1;
        }

        inner.cumulative_profit += realized_profit;
        inner.cumulative_fees += fees;

        push_bounded(&mut inner.profits, realized_profit);
        push_bounded(&mut inner.latencies_ms, latency_ms);

        let day = day_of(now_ms);
        *inner.daily_profit.entry(day).or_default() += realized_profit;
        while inner.daily_profit.len() > DAILY_WINDOW {
            let oldest = *inner.daily_profit.keys().next().expect("non-empty map");
            inner.daily_profit.remove(&oldest);
        }

        if inner.cumulative_profit > inner.peak_profit {
            inner.peak_profit = inner.cumulative_profit;
        }
        if inner.peak_profit > Decimal::ZERO {
            let dd = ((inner.peak_profit - inner.cumulative_profit) / inner.peak_profit)
                .to_f64()
                .unwrap_or(0.0);
            if dd > inner.max_drawdown {
                inner.max_drawdown = dd;
            }
        }
    }

    /// Today's realized loss as a positive quote amount (zero when in profit).
    pub fn daily_realized_loss(&self, now_ms: u64) -> Decimal {
        let inner = self.inner.read();
        let today = inner
            .daily_profit
            .get(&day_of(now_ms))
            .copied()
            .unwrap_or(Decimal::ZERO);

        if today < Decimal::ZERO {
            -today
        } else {
            Decimal::ZERO
        }
    }

    pub fn snapshot(&self) -> PerformanceSnapshot {
        let inner = self.inner.read();

        let success_rate = if inner.total_executions > 0 {
            inner.successful_executions as f64 / inner.total_executions as f64
        } else {
            0.0
        };

        let average_latency_ms = if inner.latencies_ms.is_empty() {
            0.0
        } else {
            inner.latencies_ms.iter().sum::<u64>() as f64 / inner.latencies_ms.len() as f64
        };

        PerformanceSnapshot {
            total_executions: inner.total_executions,
            successful_executions: inner.successful_executions,
            success_rate,
            cumulative_profit_quote: inner.cumulative_profit,
            cumulative_fees_quote: inner.cumulative_fees,
            average_latency_ms,
            peak_profit_quote: inner.peak_profit,
            max_drawdown: inner.max_drawdown,
            sharpe_ratio: sharpe(&inner.daily_profit),
        }
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T) {
    if buf.len() == ROLLING_SAMPLES {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn day_of(now_ms: u64) -> NaiveDate {
    DateTime::from_timestamp_millis(now_ms as i64)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Sharpe-style ratio over the daily return window; needs at least two days.
fn sharpe(daily: &BTreeMap<NaiveDate, Decimal>) -> Option<f64> {
    if daily.len() < 2 {
        return None;
    }

    let returns: Vec<f64> = daily
        .values()
        .filter_map(|p| p.to_f64())
        .collect();

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();

    if std > 0.0 {
        Some((mean - DAILY_RISK_FREE) / std)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DAY_MS: u64 = 86_400_000;

    #[test]
    fn totals_count_starts_and_successes_count_completions() {
        let tracker = PerformanceTracker::new();

        tracker.on_started();
        tracker.on_started();
        tracker.on_finished(true, dec!(5), dec!(1), 120, DAY_MS);
        tracker.on_finished(false, dec!(-2), dec!(1), 300, DAY_MS);

        let snap = tracker.snapshot();
        assert_eq!(snap.total_executions, 2);
        assert_eq!(snap.successful_executions, 1);
        assert_eq!(snap.success_rate, 0.5);
        assert_eq!(snap.cumulative_profit_quote, dec!(3));
        assert_eq!(snap.cumulative_fees_quote, dec!(2));
    }

    #[test]
    fn drawdown_tracks_decline_from_peak() {
        let tracker = PerformanceTracker::new();

        tracker.on_started();
        tracker.on_finished(true, dec!(100), Decimal::ZERO, 10, DAY_MS);
        tracker.on_started();
        tracker.on_finished(false, dec!(-25), Decimal::ZERO, 10, DAY_MS);

        let snap = tracker.snapshot();
        assert_eq!(snap.peak_profit_quote, dec!(100));
        assert!((snap.max_drawdown - 0.25).abs() < 1e-12);
    }

    #[test]
    fn daily_loss_is_positive_and_resets_next_day() {
        let tracker = PerformanceTracker::new();

        tracker.on_started();
        tracker.on_finished(false, dec!(-40), Decimal::ZERO, 10, DAY_MS);

        assert_eq!(tracker.daily_realized_loss(DAY_MS), dec!(40));
        assert_eq!(tracker.daily_realized_loss(2 * DAY_MS), Decimal::ZERO);
    }

    #[test]
    fn sharpe_needs_two_days() {
        let tracker = PerformanceTracker::new();

        tracker.on_started();
        tracker.on_finished(true, dec!(10), Decimal::ZERO, 10, DAY_MS);
        assert!(tracker.snapshot().sharpe_ratio.is_none());

        tracker.on_started();
        tracker.on_finished(true, dec!(20), Decimal::ZERO, 10, 2 * DAY_MS);
        assert!(tracker.snapshot().sharpe_ratio.is_some());
    }

    #[test]
    fn daily_window_is_trimmed() {
        let tracker = PerformanceTracker::new();

        for day in 1..=40u64 {
            tracker.on_started();
            tracker.on_finished(true, dec!(1), Decimal::ZERO, 10, day * DAY_MS);
        }

        let inner = tracker.inner.read();
        assert_eq!(inner.daily_profit.len(), DAILY_WINDOW);
    }
}
