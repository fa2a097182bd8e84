//! Audit store.
//!
//! Append-mostly persistence of the event stream: opportunities, executions
//! and their trades, balances (last-writer-wins), heartbeat metrics, and raw
//! events. Write failures are logged and never stall the pipeline.

pub mod schema;

use std::time::Duration;

use chrono::Utc;
use sqlx::AnyPool;
use sqlx::any::AnyPoolOptions;
use tracing::{info, warn};
use uuid::Uuid;

use common::logger::warn_if_slow;

use execution::types::{Execution, Trade};
use market::types::{Balance, VenueId};
use portfolio::performance::PerformanceSnapshot;
use rust_decimal::prelude::ToPrimitive;
use strategy::types::Opportunity;

use crate::events::CoreEvent;

pub struct Db {
    pub pool: AnyPool,
}

impl Db {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        schema::migrate(&self.pool).await
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone)]
pub struct AuditWriter {
    pool: AnyPool,
}

impl AuditWriter {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Consume the bus until it closes, appending every event.
    pub async fn run(self, mut rx: tokio::sync::broadcast::Receiver<CoreEvent>) {
        info!("audit writer started");

        loop {
            let event = match rx.recv().await {
                Ok(ev) => ev,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "audit writer lagged; events skipped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };

            let write = warn_if_slow("audit_persist", Duration::from_millis(200), async {
                self.persist(&event).await
            })
            .await;

            if let Err(e) = write {
                warn!(event = event.name(), error = ?e, "audit write failed");
            }
        }

        info!("audit writer stopped");
    }

    async fn persist(&self, event: &CoreEvent) -> anyhow::Result<()> {
        self.record_event(event).await?;

        match event {
            CoreEvent::OpportunityDetected(op) => self.insert_opportunity(op).await?,
            CoreEvent::OpportunityExpired(op) => {
                self.update_opportunity_status(op, "expired").await?
            }
            CoreEvent::OpportunityRejected { opportunity, .. } => {
                self.update_opportunity_status(opportunity, "rejected").await?
            }
            CoreEvent::ExecutionCompleted {
                execution,
                opportunity,
            } => {
                self.update_opportunity_status(opportunity, "completed").await?;
                self.insert_execution(execution).await?;
            }
            CoreEvent::ExecutionFailed {
                execution,
                opportunity,
            } => {
                self.update_opportunity_status(opportunity, "failed").await?;
                self.insert_execution(execution).await?;
            }
            CoreEvent::Heartbeat {
                uptime_ms,
                rss_bytes,
                live_opportunities,
            } => {
                self.insert_metric(*uptime_ms, *rss_bytes, *live_opportunities)
                    .await?
            }
            _ => {}
        }

        Ok(())
    }

    async fn record_event(&self, event: &CoreEvent) -> anyhow::Result<()> {
        let payload = match event {
            CoreEvent::OpportunityDetected(op) | CoreEvent::OpportunityExpired(op) => {
                serde_json::to_string(op)?
            }
            CoreEvent::OpportunityRejected { opportunity, reason } => serde_json::json!({
                "opportunity_id": opportunity.id,
                "reason": reason,
            })
            .to_string(),
            CoreEvent::ExecutionStarted { execution, .. }
            | CoreEvent::ExecutionCompleted { execution, .. }
            | CoreEvent::ExecutionFailed { execution, .. } => serde_json::to_string(execution)?,
            other => format!("{other:?}"),
        };

        sqlx::query(
            "INSERT INTO market_events (event_id, name, payload_json, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(event.name())
        .bind(payload)
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_opportunity(&self, op: &Opportunity) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO opportunities
               (opportunity_id, kind, symbol, status, projected_profit_quote,
                projected_profit_pct, volume_quote, confidence, legs_json, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (opportunity_id) DO NOTHING",
        )
        .bind(op.id.to_string())
        .bind(format!("{:?}", op.kind).to_lowercase())
        .bind(op.symbol.code())
        .bind("detected")
        .bind(op.projected_profit_quote.to_string())
        .bind(op.projected_profit_pct.to_string())
        .bind(op.volume_quote.to_string())
        .bind(op.confidence)
        .bind(serde_json::to_string(&op.legs)?)
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_opportunity_status(
        &self,
        op: &Opportunity,
        status: &str,
    ) -> anyhow::Result<()> {
        sqlx::query("UPDATE opportunities SET status = $1 WHERE opportunity_id = $2")
            .bind(status)
            .bind(op.id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_execution(&self, exec: &Execution) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO executions
               (execution_id, opportunity_id, status, realized_profit, total_fees,
                errors_json, started_at, completed_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (execution_id) DO NOTHING",
        )
        .bind(exec.id.to_string())
        .bind(exec.opportunity_id.to_string())
        .bind(format!("{:?}", exec.status).to_lowercase())
        .bind(exec.realized_profit.to_string())
        .bind(exec.total_fees.to_string())
        .bind(serde_json::to_string(&exec.errors)?)
        .bind(ms_to_utc(exec.started_at))
        .bind(exec.completed_at.map(ms_to_utc))
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        for trade in &exec.trades {
            self.insert_trade(&exec.id, trade).await?;
        }

        Ok(())
    }

    async fn insert_trade(&self, execution_id: &Uuid, trade: &Trade) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO trades
               (trade_id, execution_id, step_index, venue_id, symbol, side,
                requested_amount, filled_amount, average_fill_price, fee, status,
                compensation, external_order_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(execution_id.to_string())
        .bind(trade.step_index as i64)
        .bind(trade.venue.to_string())
        .bind(trade.symbol.code())
        .bind(trade.side.to_string())
        .bind(trade.requested_amount.to_string())
        .bind(trade.filled_amount.to_string())
        .bind(trade.average_fill_price.to_string())
        .bind(trade.fee.to_string())
        .bind(format!("{:?}", trade.status).to_lowercase())
        .bind(trade.compensation)
        .bind(trade.external_order_id.clone())
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Last-writer-wins upsert per (venue, asset).
    pub async fn upsert_balance(
        &self,
        venue: &VenueId,
        asset: &str,
        balance: &Balance,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO balances (venue_id, asset, free, locked, quote_value, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (venue_id, asset) DO UPDATE SET
               free = excluded.free,
               locked = excluded.locked,
               quote_value = excluded.quote_value,
               updated_at = excluded.updated_at",
        )
        .bind(venue.to_string())
        .bind(asset)
        .bind(balance.free.to_f64().unwrap_or(0.0))
        .bind(balance.locked.to_f64().unwrap_or(0.0))
        .bind(balance.quote_value.to_f64().unwrap_or(0.0))
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_performance(&self, snap: &PerformanceSnapshot) -> anyhow::Result<()> {
        warn_if_slow("db_record_performance", Duration::from_millis(100), async {
            self.insert_performance(snap).await
        })
        .await
    }

    async fn insert_performance(&self, snap: &PerformanceSnapshot) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO performance_snapshots
               (snapshot_id, total_executions, successful_executions,
                cumulative_profit, cumulative_fees, max_drawdown, sharpe_ratio, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(snap.total_executions as i64)
        .bind(snap.successful_executions as i64)
        .bind(snap.cumulative_profit_quote.to_string())
        .bind(snap.cumulative_fees_quote.to_string())
        .bind(snap.max_drawdown)
        .bind(snap.sharpe_ratio)
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn record_error(&self, kind: &str, message: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO error_logs (error_id, kind, message, created_at)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(kind)
        .bind(message)
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_metric(
        &self,
        uptime_ms: u64,
        rss_bytes: u64,
        live_opportunities: usize,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO system_metrics
               (metric_id, uptime_ms, rss_bytes, live_opportunities, created_at)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(uptime_ms as i64)
        .bind(rss_bytes as i64)
        .bind(live_opportunities as i64)
        .bind(now_utc())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn ms_to_utc(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
