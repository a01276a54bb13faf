//! OTC Pilot — OTC binary options bot with martingale recovery
//!
//! Usage:
//!   otc-pilot run                          — Scan and trade the configured assets
//!   otc-pilot run --assets EURUSD-OTC      — Override the asset list
//!   otc-pilot status                       — Inspect saved state and trade history

use clap::{Parser, Subcommand};
use engine::{BotConfig, Coordinator, RestBroker, ShutdownToken};
use persistence::repository::{StateRepository, TradeLogRepository};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "otc-pilot")]
#[command(about = "OTC binary options bot with martingale recovery", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and run the scan loop
    Run {
        /// Assets to scan (comma-separated), overriding ASSETS
        #[arg(long, value_delimiter = ',')]
        assets: Vec<String>,
    },
    /// Print saved sequence states and trade history
    Status {
        /// Number of recent trades to show
        #[arg(long, default_value_t = 5)]
        last: i64,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,otc_pilot=debug")
    } else {
        EnvFilter::new("info,engine=info,otc_pilot=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Run { assets } => cmd_run(assets).await?,
        Commands::Status { last } => cmd_status(last).await?,
    }

    Ok(())
}

// ============================================================================
// Run command — scan loop
// ============================================================================

async fn cmd_run(assets: Vec<String>) -> anyhow::Result<()> {
    let mut cfg = BotConfig::from_env()?;
    if !assets.is_empty() {
        cfg.assets = assets;
    }
    cfg.require_credentials()?;

    println!("\n=== OTC Pilot v{} ===", APP_VERSION);
    println!("Account mode: {}", cfg.account_mode.as_str());
    println!("Assets: {}", cfg.assets.join(", "));
    println!(
        "Base stake: {} | Multiplier: {} | Max losses: {} | Take profit: {}",
        cfg.base_stake, cfg.recovery_multiplier, cfg.max_losses, cfg.take_profit
    );
    println!("Database: {}", cfg.db_path);
    println!("\nPress Ctrl+C to stop\n");

    let db = persistence::Database::new(&cfg.db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", cfg.db_path);

    let broker = RestBroker::connect(&cfg).await?;
    info!(broker = %cfg.broker_url, mode = cfg.account_mode.as_str(), "Broker session established");

    let shutdown = ShutdownToken::new();
    let shutdown_for_ctrlc = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, requesting shutdown...");
        shutdown_for_ctrlc.request();
    });

    let pool = db.pool_clone();
    Coordinator::new(cfg, Arc::new(broker), pool, shutdown)
        .run()
        .await
}

// ============================================================================
// Status command — read-only inspection of the SQLite store
// ============================================================================

async fn cmd_status(last: i64) -> anyhow::Result<()> {
    let cfg = BotConfig::from_env()?;

    println!("\n=== OTC Pilot v{} ===", APP_VERSION);
    println!("Database: {}", cfg.db_path);

    let db = persistence::Database::new(&cfg.db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;

    let states = StateRepository::new(db.pool()).load_all().await?;
    println!("\nSequence states:");
    if states.is_empty() {
        println!("  (none saved)");
    } else {
        println!(
            "  {:<12} {:>10} {:>8} {:>12} {:>8}  {}",
            "Asset", "Stake", "Losses", "Profit", "Trades", "Updated"
        );
        println!("  {}", "-".repeat(75));
        let mut net = Decimal::ZERO;
        for s in &states {
            net += Decimal::from_str_exact(s.total_profit.trim()).unwrap_or_default();
            println!(
                "  {:<12} {:>10} {:>8} {:>12} {:>8}  {}",
                s.asset,
                s.current_stake,
                s.consecutive_losses,
                s.total_profit,
                s.trade_count,
                &s.last_update[..s.last_update.len().min(19)],
            );
        }
        println!("  {}", "-".repeat(75));
        println!("  Net profit across assets: {}", net);
    }

    let trades = TradeLogRepository::new(db.pool());
    let stats = trades.get_stats().await?;
    println!(
        "\nTrade log: {} trades | {} wins | {} losses | win rate {:.1}%",
        stats.total_trades, stats.wins, stats.losses, stats.win_rate
    );

    let recent = trades.recent(last).await?;
    if !recent.is_empty() {
        println!("\nLast {} trades:", recent.len());
        println!(
            "  {:<20} {:<12} {:<5} {:>8} {:<8} {:>10}",
            "Time", "Asset", "Dir", "Stake", "Outcome", "Profit"
        );
        println!("  {}", "-".repeat(70));
        for t in &recent {
            println!(
                "  {:<20} {:<12} {:<5} {:>8} {:<8} {:>10}",
                &t.timestamp[..t.timestamp.len().min(19)],
                t.asset,
                t.direction,
                t.stake,
                t.outcome,
                t.profit,
            );
        }
    }

    Ok(())
}
