use std::collections::HashMap;
use std::str::FromStr;

use rust_decimal::Decimal;

use risk::types::RiskLimits;

use crate::error::AppError;

#[derive(Clone, Debug)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string for the audit store.
    pub database_url: String,

    /// Port the external dashboard process attaches to. The core only
    /// exposes the event stream; it never serves HTTP itself.
    pub dashboard_port: u16,

    /// Run against in-process demo venues instead of real adapters.
    pub demo_mode: bool,

    /// Optional path to the strategy set (JSON). Demo mode falls back to a
    /// built-in set when absent.
    pub strategies_path: Option<String>,

    // =========================
    // Risk configuration
    // =========================
    /// Global admission limits enforced by the gate.
    pub risk_limits: RiskLimits,

    /// Scanner pause after a daily-loss breach.
    pub risk_cooldown_ms: u64,

    // =========================
    // Scanner configuration
    // =========================
    pub scan_period_ms: u64,
    pub sweep_period_ms: u64,
    pub max_active_opportunities: usize,

    // =========================
    // Execution configuration
    // =========================
    /// In-flight execution ceiling; the worker pool size.
    pub max_concurrent_executions: usize,

    /// Approvals allowed to queue behind the pool. Overflow is rejected as
    /// backpressure rather than buffered without bound.
    pub execution_queue_bound: usize,

    // =========================
    // Supervisor configuration
    // =========================
    pub heartbeat_period_ms: u64,

    /// How long shutdown waits on in-flight executions before cancelling.
    pub shutdown_grace_ms: u64,

    /// Venue ingestion poll cadence.
    pub ingest_period_ms: u64,

    /// Per-venue API credentials collected from `VENUE_<ID>_API_KEY` /
    /// `VENUE_<ID>_API_SECRET`.
    pub venue_credentials: HashMap<String, VenueCredentials>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://arbalest_dev.db".to_string());

        let risk_limits = RiskLimits {
            global_min_profit_pct: env_decimal("GLOBAL_MIN_PROFIT_PCT", "0.1")?,
            max_total_exposure_quote: env_decimal("MAX_TOTAL_EXPOSURE_QUOTE", "100000")?,
            max_loss_per_day_quote: env_decimal("MAX_LOSS_PER_DAY_QUOTE", "1000")?,
            max_position_age_hours: env_parse("MAX_POSITION_AGE_HOURS", 24)?,
            correlation_threshold: match std::env::var("CORRELATION_THRESHOLD") {
                Ok(raw) => Some(raw.parse::<f64>().map_err(|_| {
                    AppError::Configuration(format!("CORRELATION_THRESHOLD invalid: {raw}"))
                })?),
                Err(_) => None,
            },
        };

        Ok(Self {
            database_url,
            dashboard_port: env_parse("DASHBOARD_PORT", 8080)?,
            demo_mode: env_flag("DEMO_MODE"),
            strategies_path: std::env::var("STRATEGIES_FILE").ok(),

            risk_limits,
            risk_cooldown_ms: env_parse("RISK_COOLDOWN_MS", 60_000)?,

            scan_period_ms: env_parse("SCAN_PERIOD_MS", 1_000)?,
            sweep_period_ms: env_parse("SWEEP_PERIOD_MS", 5_000)?,
            max_active_opportunities: env_parse("MAX_ACTIVE_OPPORTUNITIES", 50)?,

            max_concurrent_executions: env_parse("MAX_CONCURRENT_EXECUTIONS", 4)?,
            execution_queue_bound: env_parse("EXECUTION_QUEUE_BOUND", 16)?,

            heartbeat_period_ms: env_parse("HEARTBEAT_PERIOD_MS", 30_000)?,
            shutdown_grace_ms: env_parse("SHUTDOWN_GRACE_MS", 30_000)?,
            ingest_period_ms: env_parse("INGEST_PERIOD_MS", 500)?,

            venue_credentials: collect_credentials(),
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::Configuration(format!("{key} invalid: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal, AppError> {
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(&raw).map_err(|_| AppError::Configuration(format!("{key} invalid: {raw}")))
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Scan the environment for `VENUE_<ID>_API_KEY` / `VENUE_<ID>_API_SECRET`
/// pairs. The venue id is the middle segment, lowercased.
fn collect_credentials() -> HashMap<String, VenueCredentials> {
    let mut out = HashMap::new();

    for (name, value) in std::env::vars() {
        let Some(middle) = name
            .strip_prefix("VENUE_")
            .and_then(|rest| rest.strip_suffix("_API_KEY"))
        else {
            continue;
        };

        let secret_name = format!("VENUE_{middle}_API_SECRET");
        let Ok(api_secret) = std::env::var(&secret_name) else {
            tracing::warn!(venue = middle, "api key present but secret missing; skipped");
            continue;
        };

        out.insert(
            middle.to_lowercase().replace('_', "-"),
            VenueCredentials {
                api_key: value,
                api_secret,
            },
        );
    }

    out
}
