use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rust_decimal::Decimal;
use tracing::{error, info};

use backend::config::AppConfig;
use backend::db::{AuditWriter, Db};
use backend::demo::{DemoVenue, default_demo_fleet};
use backend::supervisor::{Supervisor, SupervisorConfig};
use common::logger::init_tracing;
use execution::coordinator::CoordinatorConfig;
use market::adapter::VenueAdapter;
use market::types::{Symbol, VenueId};
use scanner::engine::ScannerConfig;
use strategy::config::{
    BasisParams, SimpleParams, StrategyConfig, StrategyEntry, parse_strategies,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Full pipeline, but the coordinator submits no orders.
    Monitor,
    /// Live order submission.
    Execute,
}

#[derive(Debug, Parser)]
#[clap(name = "arbalest", version)]
struct Cli {
    #[clap(long, value_enum, default_value_t = RunMode::Monitor)]
    mode: RunMode,

    /// Probe venue reachability, print one line, and exit.
    #[clap(long)]
    health_check: bool,

    /// Run without announcing the event stream to a dashboard observer.
    #[clap(long)]
    no_dashboard: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    let cli = Cli::parse();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return ExitCode::from(1);
        }
    };

    match run(cli, cfg).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "startup failed");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli, cfg: AppConfig) -> anyhow::Result<ExitCode> {
    let (adapters, symbols_by_venue) = build_adapters(&cfg)?;

    if cli.health_check {
        let mut healthy = true;
        for (id, adapter) in &adapters {
            if let Err(e) = adapter.health_check().await {
                eprintln!("venue {id} unreachable: {e}");
                healthy = false;
            }
        }
        if healthy {
            println!("health: ok ({} venues)", adapters.len());
            return Ok(ExitCode::SUCCESS);
        }
        println!("health: degraded");
        return Ok(ExitCode::from(1));
    }

    let db = Db::connect(&cfg.database_url).await?;
    db.migrate().await?;
    let audit = AuditWriter::new(db.pool.clone());

    let strategies = load_strategies(&cfg)?;

    let sup_cfg = SupervisorConfig {
        scanner: ScannerConfig {
            scan_period: Duration::from_millis(cfg.scan_period_ms),
            sweep_period: Duration::from_millis(cfg.sweep_period_ms),
            max_active: cfg.max_active_opportunities,
        },
        coordinator: CoordinatorConfig {
            max_concurrent: cfg.max_concurrent_executions,
            queue_bound: cfg.execution_queue_bound,
            poll_interval: Duration::from_millis(50),
            monitor_only: cli.mode == RunMode::Monitor,
        },
        risk_limits: cfg.risk_limits.clone(),
        risk_cooldown: Duration::from_millis(cfg.risk_cooldown_ms),
        heartbeat_period: Duration::from_millis(cfg.heartbeat_period_ms),
        shutdown_grace: Duration::from_millis(cfg.shutdown_grace_ms),
        ingest_period: Duration::from_millis(cfg.ingest_period_ms),
    };

    let supervisor = Supervisor::new(
        sup_cfg,
        adapters,
        symbols_by_venue,
        strategies,
        Some(audit),
    );

    supervisor.start().await;

    if cli.no_dashboard {
        info!("dashboard observer disabled");
    } else {
        info!(
            port = cfg.dashboard_port,
            "event stream available for dashboard observer"
        );
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    supervisor.shutdown().await;

    if supervisor.emergency_stopped() {
        Ok(ExitCode::from(3))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

type AdapterMap = HashMap<VenueId, Arc<dyn VenueAdapter>>;

/// Demo mode builds the in-process fleet. Real venue adapters are linked in
/// by deployment-specific builds; without them, configured credentials are a
/// startup failure rather than a silent no-op.
fn build_adapters(cfg: &AppConfig) -> anyhow::Result<(AdapterMap, HashMap<VenueId, Vec<Symbol>>)> {
    if !cfg.demo_mode && !cfg.venue_credentials.is_empty() {
        anyhow::bail!(
            "credentials configured for {:?} but no venue adapter implementation is linked; \
             set DEMO_MODE=1 to run the demo fleet",
            cfg.venue_credentials.keys().collect::<Vec<_>>()
        );
    }

    let mut adapters: AdapterMap = HashMap::new();
    let mut symbols: HashMap<VenueId, Vec<Symbol>> = HashMap::new();

    for venue_cfg in default_demo_fleet() {
        let id = VenueId::new(venue_cfg.id.clone());
        let venue_symbols: Vec<Symbol> = venue_cfg.anchors.keys().cloned().collect();

        adapters.insert(id.clone(), Arc::new(DemoVenue::new(venue_cfg)));
        symbols.insert(id, venue_symbols);
    }

    info!(venues = adapters.len(), "demo venue fleet initialized");
    Ok((adapters, symbols))
}

fn load_strategies(cfg: &AppConfig) -> anyhow::Result<Vec<StrategyEntry>> {
    if let Some(path) = &cfg.strategies_path {
        let raw = std::fs::read_to_string(path)?;
        let entries = parse_strategies(&raw)?;
        info!(path, strategies = entries.len(), "strategy set loaded");
        return Ok(entries);
    }

    // Built-in demo set: cross-venue spread capture plus funding capture.
    Ok(vec![
        StrategyEntry {
            name: "demo-cross".to_string(),
            enabled: true,
            config: StrategyConfig::Simple(SimpleParams {
                symbols: vec![Symbol::new("BTC", "USDT"), Symbol::new("ETH", "USDT")],
                venues: vec!["demo-a".into(), "demo-b".into()],
                min_profit_pct: Decimal::new(1, 1),
                max_position_quote: Decimal::from(1_000),
                enable_partial_fills: false,
            }),
        },
        StrategyEntry {
            name: "demo-basis".to_string(),
            enabled: true,
            config: StrategyConfig::Basis(BasisParams {
                spot_venue: "demo-a".into(),
                perp_venue: "demo-perp".into(),
                symbol: Symbol::new("BTC", "USDT"),
                min_annualized_pct: Decimal::from(5),
                max_position_quote: Decimal::from(1_000),
            }),
        },
    ])
}
