//! CLI Command Handlers
//!
//! Implementation of all CLI commands for the XRP ticker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde_json::json;

use crate::adapters::coinbase::{CoinbaseClient, CoinbaseConfig};
use crate::adapters::xrpl::XrplConnector;
use crate::application::{
    fetch_balances, fetch_price, BalanceService, BalanceServiceConfig, ChannelListener, DataSource, PriceService,
    PriceServiceConfig, ServiceEvent,
};
use crate::config::{create_default_config, find_config_file, load_config, Config};
use crate::domain::{BalanceSnapshot, PriceSnapshot, ServiceStatus};
use crate::security::{generate_request_id, mask_address, sanitize_error, validate_xrp_address};

/// Environment variable that forces debug logging
pub const DEBUG_ENV_VAR: &str = "XRP_TICKER_DEBUG";

/// XRP Ticker - live XRP price and XRPL wallet balances
#[derive(Parser, Debug)]
#[command(
    name = "xrp-ticker",
    version = env!("CARGO_PKG_VERSION"),
    about = "Live XRP price and XRPL wallet balances",
    long_about = "Polls the Coinbase Exchange XRP-USD ticker and streams XRPL account \
                  balances over TLS WebSockets, with rate limiting, retry backoff and \
                  circuit breaking on both connections."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream price and balance updates until Ctrl+C
    Run(RunCmd),

    /// Fetch price and balances once and exit
    Once(OnceCmd),

    /// Write a starter config file for a wallet
    Init(InitCmd),

    /// Validate a config file
    Check(CheckCmd),
}

/// Stream updates
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file (searched in standard locations if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print one JSON object per event
    #[arg(long)]
    pub json: bool,

    /// Track these wallets instead of the configured ones
    #[arg(short, long = "wallet", value_name = "ADDRESS")]
    pub wallets: Vec<String>,
}

/// One-shot fetch
#[derive(Parser, Debug)]
pub struct OnceCmd {
    /// Path to configuration file (searched in standard locations if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Track these wallets instead of the configured ones
    #[arg(short, long = "wallet", value_name = "ADDRESS")]
    pub wallets: Vec<String>,
}

/// Create config
#[derive(Parser, Debug)]
pub struct InitCmd {
    /// XRP classic address (r...)
    #[arg(value_name = "ADDRESS")]
    pub address: String,

    /// Where to write the file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub output: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

/// Validate config
#[derive(Parser, Debug)]
pub struct CheckCmd {
    /// Path to configuration file (searched in standard locations if omitted)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

/// Execute the CLI command
///
/// Commands that read a config load it first so its `[logging] level` can
/// seed the log filter.
pub async fn execute(app: CliApp) -> Result<()> {
    match app.command {
        Command::Run(cmd) => {
            let config = resolve_config(cmd.config.clone(), &cmd.wallets)?;
            init_logging(app.verbose, app.debug, Some(&config.logging.level))?;
            run_command(cmd, config).await
        }
        Command::Once(cmd) => {
            let config = resolve_config(cmd.config.clone(), &cmd.wallets)?;
            init_logging(app.verbose, app.debug, Some(&config.logging.level))?;
            once_command(cmd, config).await
        }
        Command::Init(cmd) => {
            init_logging(app.verbose, app.debug, None)?;
            init_command(cmd)
        }
        Command::Check(cmd) => {
            init_logging(app.verbose, app.debug, None)?;
            check_command(cmd)
        }
    }
}

/// Pick the base level: debug flags, then `--verbose`, then the config file
fn base_level(verbose: bool, debug: bool, forced: bool, configured: Option<&str>) -> String {
    if debug || forced {
        "debug".to_string()
    } else if verbose {
        "info".to_string()
    } else {
        configured.unwrap_or("warn").to_ascii_lowercase()
    }
}

/// Initialize logging system
fn init_logging(verbose: bool, debug: bool, configured: Option<&str>) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let forced = std::env::var(DEBUG_ENV_VAR).map_or(false, |v| v == "1" || v.eq_ignore_ascii_case("true"));
    let level = base_level(verbose, debug, forced, configured);

    // transport crates are chatty at debug and may echo request details
    let directives = format!(
        "{},tungstenite=warn,tokio_tungstenite=warn,hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn",
        level
    );
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Price client honoring the configured request timeout
fn price_client(config: &Config) -> Result<CoinbaseClient> {
    let coinbase = CoinbaseConfig {
        timeout: Duration::from_secs(config.connections.request_timeout_secs),
        ..CoinbaseConfig::default()
    };
    CoinbaseClient::with_config(coinbase).context("Failed to create price client")
}

/// Load the explicit or discovered config, then apply `--wallet` overrides
fn resolve_config(path: Option<PathBuf>, wallets: &[String]) -> Result<Config> {
    let path = path.or_else(find_config_file);

    let mut config = match (path, wallets.first()) {
        (Some(path), _) => {
            load_config(&path).with_context(|| format!("Failed to load configuration from {}", path.display()))?
        }
        (None, Some(first)) => Config::for_address(first),
        (None, None) => bail!("No config file found. Create one with `xrp-ticker init <ADDRESS>`"),
    };

    if !wallets.is_empty() {
        config.wallet.address = None;
        config.wallet.addresses = wallets.to_vec();
        config.validate().context("Invalid --wallet override")?;
    }

    Ok(config)
}

/// Handle run command
async fn run_command(cmd: RunCmd, config: Config) -> Result<()> {
    let addresses = config.wallet.all_addresses();
    tracing::info!("Tracking {} wallet(s)", addresses.len());

    let feed = price_client(&config)?;
    let connector = XrplConnector::new().context("Failed to create XRPL connector")?;

    let price = PriceService::new(Arc::new(feed), PriceServiceConfig::from(&config));
    let balances = BalanceService::new(Arc::new(connector), BalanceServiceConfig::from(&config));

    let (price_listener, mut price_rx) = ChannelListener::channel();
    let (balance_listener, mut balance_rx) = ChannelListener::channel();
    price.set_listener(price_listener);
    balances.set_listener(balance_listener);

    price.start().await.context("Failed to start price service")?;
    if let Err(e) = balances.start().await {
        price.stop().await;
        return Err(e).context("Failed to start balance service");
    }

    let mut printer = Printer::new(cmd.json);
    let mut price_open = true;
    let mut balance_open = true;

    while price_open || balance_open {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            event = price_rx.recv(), if price_open => match event {
                Some(ServiceEvent::Status(status)) => printer.status(&status),
                Some(ServiceEvent::Update(snapshot)) => printer.price(&snapshot),
                None => price_open = false,
            },
            event = balance_rx.recv(), if balance_open => match event {
                Some(ServiceEvent::Status(status)) => printer.status(&status),
                Some(ServiceEvent::Update(snapshot)) => printer.balances(&snapshot),
                None => balance_open = false,
            },
        }
    }

    tokio::join!(price.stop(), balances.stop());
    tracing::info!("XRP ticker stopped");
    Ok(())
}

/// Handle once command
async fn once_command(cmd: OnceCmd, config: Config) -> Result<()> {
    let timeout = Duration::from_secs(config.connections.request_timeout_secs);

    let feed = price_client(&config)?;
    let connector = XrplConnector::new().context("Failed to create XRPL connector")?;
    let balance_config = BalanceServiceConfig::from(&config);
    let endpoints = balance_config
        .validated_endpoints()
        .context("Invalid XRPL endpoints")?;

    let (price, balances) = tokio::join!(
        fetch_price(&feed, timeout),
        fetch_balances(&connector, &endpoints, &balance_config.addresses, timeout),
    );

    let mut printer = Printer::new(cmd.json);
    let mut failed = false;

    match price {
        Ok(snapshot) => printer.price(&snapshot),
        Err(e) => {
            failed = true;
            let request_id = generate_request_id();
            eprintln!("Price unavailable: {}", sanitize_error(&e, &request_id));
        }
    }
    match balances {
        Ok(snapshot) => printer.balances(&snapshot),
        Err(e) => {
            failed = true;
            let request_id = generate_request_id();
            eprintln!("Balances unavailable: {}", sanitize_error(&e, &request_id));
        }
    }

    if failed {
        bail!("One or more fetches failed");
    }
    Ok(())
}

/// Handle init command
fn init_command(cmd: InitCmd) -> Result<()> {
    validate_xrp_address(&cmd.address).context("Invalid wallet address")?;

    if cmd.output.exists() && !cmd.force {
        bail!("{} already exists (use --force to overwrite)", cmd.output.display());
    }

    let path = create_default_config(&cmd.address, Some(&cmd.output)).context("Failed to write config")?;
    println!("✓ Created {}", path.display());
    println!("  Wallet: {}", mask_address(&cmd.address));
    Ok(())
}

/// Handle check command
fn check_command(cmd: CheckCmd) -> Result<()> {
    let path = cmd
        .config
        .or_else(find_config_file)
        .context("No config file found. Create one with `xrp-ticker init <ADDRESS>`")?;

    let config = load_config(&path).with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("✓ {} is valid", path.display());
    for address in config.wallet.all_addresses() {
        println!("  Wallet:   {}", mask_address(&address));
    }
    for endpoint in &config.connections.xrpl_endpoints {
        println!("  Endpoint: {}", endpoint);
    }
    println!(
        "  Polling:  price every {}s, balances every {}s",
        config.connections.price_poll_interval, config.connections.xrpl_poll_interval
    );
    Ok(())
}

/// Renders events as text lines or JSON objects
struct Printer {
    json: bool,
    last_price: Option<Decimal>,
}

impl Printer {
    fn new(json: bool) -> Self {
        Self { json, last_price: None }
    }

    fn status(&self, status: &ServiceStatus) {
        if self.json {
            println!("{}", json!({ "event": "status", "status": status }));
            return;
        }

        match status.last_error() {
            Some(error) => println!("[{}] {} ({})", status.service(), status.state().label(), error),
            None => println!("[{}] {}", status.service(), status.state().label()),
        }
    }

    fn price(&mut self, snapshot: &PriceSnapshot) {
        self.last_price = Some(snapshot.price);
        if self.json {
            println!("{}", json!({ "event": "price", "price": snapshot }));
            return;
        }

        println!(
            "{} ${:.4}  {} ({}%)  24h {:.4}-{:.4}",
            snapshot.symbol,
            snapshot.price,
            signed(snapshot.price_change_24h, 4),
            signed(snapshot.change_pct_24h, 2),
            snapshot.low_24h,
            snapshot.high_24h
        );
    }

    fn balances(&self, snapshot: &BalanceSnapshot) {
        let value = self.last_price.map(|price| (snapshot.total * price).round_dp(2));
        if self.json {
            println!(
                "{}",
                json!({ "event": "balances", "balances": snapshot, "value_usd": value })
            );
            return;
        }

        for (address, balance) in &snapshot.balances {
            println!("  {}  {} XRP", mask_address(address), balance);
        }
        match value {
            Some(value) => println!(
                "Portfolio: {} XRP across {} wallet(s) (${})",
                snapshot.total,
                snapshot.wallet_count(),
                value
            ),
            None => println!(
                "Portfolio: {} XRP across {} wallet(s)",
                snapshot.total,
                snapshot.wallet_count()
            ),
        }
    }
}

/// Fixed-point rendering with an explicit sign
fn signed(value: Decimal, dp: u32) -> String {
    let rounded = value.round_dp(dp);
    if rounded.is_sign_negative() && !rounded.is_zero() {
        format!("{:.*}", dp as usize, rounded)
    } else {
        format!("+{:.*}", dp as usize, rounded.abs())
    }
}
