//! Premium Gap Farmer - Main Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use premium_gap_farmer::config::{Config, MultiAssetFile, StrategyConfig};
use premium_gap_farmer::exchange::QuoteVariant;
use premium_gap_farmer::persistence::StateStore;
use premium_gap_farmer::server::{self, AppState};
use premium_gap_farmer::strategy::{InstanceRegistry, Launcher, StopReason};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const CLI_OWNER: &str = "cli";

/// Premium Gap Farmer CLI
#[derive(Parser)]
#[command(name = "premium-gap-farmer")]
#[command(version, about = "BUSD/USDT premium-gap hedging on Binance Futures")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single strategy instance until it completes or Ctrl-C
    Run(RunArgs),

    /// Run every entry of a multi-asset file concurrently
    Multi {
        /// Path to the YAML (or JSON) file
        file: String,
    },

    /// Serve the HTTP control surface and resume stored instances
    Serve {
        /// Bind address, overrides server.bind
        #[arg(short, long)]
        bind: Option<String>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Base asset, e.g. BTC
    #[arg(short, long)]
    symbol: String,

    /// Quantity per order
    #[arg(short, long)]
    quantity: Decimal,

    /// Total quantity to build or unwind
    #[arg(short, long)]
    total: Decimal,

    #[arg(long, env = "BINANCE_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "BINANCE_SECRET_KEY", hide_env_values = true)]
    api_secret: String,

    /// Only reduce existing exposure
    #[arg(long)]
    reduce: bool,

    /// Open and close on mark price gap thresholds
    #[arg(long)]
    arbitrage: bool,

    /// Mark price gap threshold (0 = default)
    #[arg(long, default_value = "0")]
    difference: Decimal,

    /// Leverage (0 = default)
    #[arg(long, default_value_t = 0)]
    leverage: u32,

    /// Quote variant bought while reducing (BUSD or USDT)
    #[arg(long)]
    bid_side: Option<QuoteVariant>,

    /// Resume from live positions at startup
    #[arg(long)]
    monitor: bool,

    /// Minutes before funding in which a reversal may commit (0 = default)
    #[arg(long, default_value_t = 0)]
    before: u32,

    /// Minimum annualized yield for a reversal (0 = default)
    #[arg(long, default_value = "0")]
    threshold: Decimal,

    /// Webhook receiving lifecycle events
    #[arg(long)]
    webhook: Option<String>,
}

impl From<RunArgs> for StrategyConfig {
    fn from(args: RunArgs) -> Self {
        let mut config = StrategyConfig::new(args.symbol, args.quantity, args.total);
        config.api_key = args.api_key;
        config.api_secret = args.api_secret;
        config.reduce = args.reduce;
        config.arbitrage = args.arbitrage;
        config.difference = args.difference;
        config.leverage = args.leverage;
        config.bid_side = args.bid_side;
        config.monitor = args.monitor;
        config.before = args.before;
        config.threshold = args.threshold;
        config.webhook = args.webhook;
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    info!(
        "Premium Gap Farmer v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    let root = CancellationToken::new();
    let shutdown = root.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Shutdown signal received");
        shutdown.cancel();
    });

    match cli.command {
        Commands::Run(args) => run_instances(&config, vec![args.into()], root).await,
        Commands::Multi { file } => {
            let settings = MultiAssetFile::load(&file)?.resolve(&config.defaults);
            info!(count = settings.len(), %file, "Multi-asset file loaded");
            run_instances(&config, settings, root).await
        }
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.server.bind.clone());
            serve(&config, &bind, root).await
        }
    }
}

/// Run instances side by side and wait until all of them stop.
async fn run_instances(
    config: &Config,
    settings: Vec<StrategyConfig>,
    root: CancellationToken,
) -> Result<()> {
    anyhow::ensure!(!settings.is_empty(), "No strategy settings to run");

    let launcher = Launcher::new(config)?;
    let registry = InstanceRegistry::with_root(root);

    for setting in settings {
        let id = Uuid::new_v4().to_string();
        let token = registry.child_token();
        let symbol = setting.symbol.clone();
        let engine = launcher.build(&id, setting, token.clone())?;
        registry
            .insert(id, CLI_OWNER, symbol, token, engine.run())
            .await;
    }

    let results = registry.wait_all().await;
    for (id, reason) in &results {
        match reason {
            StopReason::Completed => info!(%id, "✅ Instance completed"),
            StopReason::Cancelled => warn!(%id, "Instance cancelled"),
        }
    }

    info!(stopped = results.len(), "All instances stopped");
    Ok(())
}

async fn serve(config: &Config, bind: &str, root: CancellationToken) -> Result<()> {
    anyhow::ensure!(
        !config.store.secret.is_empty(),
        "store.secret must be set to serve the control surface"
    );

    let store = StateStore::new(&config.store.path, &config.store.secret)
        .context("Failed to open state store")?;
    let registry = Arc::new(InstanceRegistry::with_root(root.clone()));
    let state = Arc::new(AppState::new(
        registry.clone(),
        store,
        Launcher::new(config)?,
    ));

    let result = server::serve(state, bind, root.clone()).await;
    if let Err(e) = &result {
        error!("❌ Control surface stopped: {:#}", e);
    }

    registry.shutdown().await;
    info!("Shutdown complete");
    result
}

/// Initialize logging with file and console output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "premium-gap-farmer.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("premium_gap_farmer=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Binance: {}", config.binance.base_url);
    info!("   Premium Feed: {}", config.feed.url);
    info!("   Gap Threshold: {}", config.defaults.gap_threshold);
    info!(
        "   Arbitrage Gap Threshold: {}",
        config.defaults.arbitrage_gap_threshold
    );
    info!("   Default Leverage: {}x", config.defaults.leverage);
    info!(
        "   Funding Window: {} min",
        config.defaults.funding_window_minutes
    );
    info!("   Failure Policy: {:?}", config.defaults.failure_policy);
    info!("   Tick Interval: {}ms", config.defaults.tick_interval_ms);
}
