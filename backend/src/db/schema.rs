use sqlx::AnyPool;

/// Create the audit store tables. Three logical groups:
/// trading (venues, pairs, opportunities, executions, trades, balances),
/// monitoring (metrics, errors, performance), analytics (events + views).
pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // -- trading --------------------------------------------------------

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS venues (
  venue_id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  health TEXT NOT NULL,
  taker_rate TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS trading_pairs (
  pair_id TEXT PRIMARY KEY,
  base_asset TEXT NOT NULL,
  quote_asset TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS opportunities (
  opportunity_id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  symbol TEXT NOT NULL,
  status TEXT NOT NULL,
  projected_profit_quote TEXT NOT NULL,
  projected_profit_pct TEXT NOT NULL,
  volume_quote TEXT NOT NULL,
  confidence DOUBLE PRECISION NOT NULL,
  legs_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS executions (
  execution_id TEXT PRIMARY KEY,
  opportunity_id TEXT NOT NULL,
  status TEXT NOT NULL,
  realized_profit TEXT NOT NULL,
  total_fees TEXT NOT NULL,
  errors_json TEXT NOT NULL,
  started_at TEXT NOT NULL,
  completed_at TEXT,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS trades (
  trade_id TEXT PRIMARY KEY,
  execution_id TEXT NOT NULL,
  step_index INTEGER NOT NULL,
  venue_id TEXT NOT NULL,
  symbol TEXT NOT NULL,
  side TEXT NOT NULL,
  requested_amount TEXT NOT NULL,
  filled_amount TEXT NOT NULL,
  average_fill_price TEXT NOT NULL,
  fee TEXT NOT NULL,
  status TEXT NOT NULL,
  compensation BOOLEAN NOT NULL,
  external_order_id TEXT,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS balances (
  venue_id TEXT NOT NULL,
  asset TEXT NOT NULL,
  free DOUBLE PRECISION NOT NULL,
  locked DOUBLE PRECISION NOT NULL,
  total DOUBLE PRECISION GENERATED ALWAYS AS (free + locked) STORED,
  quote_value DOUBLE PRECISION NOT NULL,
  updated_at TEXT NOT NULL,
  PRIMARY KEY (venue_id, asset)
);
"#,
    )
    .execute(pool)
    .await?;

    // -- monitoring -----------------------------------------------------

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS system_metrics (
  metric_id TEXT PRIMARY KEY,
  uptime_ms BIGINT NOT NULL,
  rss_bytes BIGINT NOT NULL,
  live_opportunities INTEGER NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS error_logs (
  error_id TEXT PRIMARY KEY,
  kind TEXT NOT NULL,
  message TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS performance_snapshots (
  snapshot_id TEXT PRIMARY KEY,
  total_executions BIGINT NOT NULL,
  successful_executions BIGINT NOT NULL,
  cumulative_profit TEXT NOT NULL,
  cumulative_fees TEXT NOT NULL,
  max_drawdown DOUBLE PRECISION NOT NULL,
  sharpe_ratio DOUBLE PRECISION,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // -- analytics ------------------------------------------------------

    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS market_events (
  event_id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE VIEW IF NOT EXISTS daily_performance AS
SELECT
  substr(started_at, 1, 10) AS day,
  COUNT(*) AS executions,
  SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
  SUM(CAST(realized_profit AS REAL)) AS realized_profit
FROM executions
GROUP BY substr(started_at, 1, 10);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
CREATE VIEW IF NOT EXISTS venue_performance AS
SELECT
  venue_id,
  COUNT(*) AS trades,
  SUM(CAST(filled_amount AS REAL) * CAST(average_fill_price AS REAL)) AS traded_notional,
  SUM(CAST(fee AS REAL)) AS fees
FROM trades
GROUP BY venue_id;
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_trades_execution ON trades(execution_id);"#)
        .execute(pool)
        .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_executions_opportunity ON executions(opportunity_id);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(r#"CREATE INDEX IF NOT EXISTS idx_events_name ON market_events(name);"#)
        .execute(pool)
        .await?;

    Ok(())
}
