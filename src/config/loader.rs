//! Configuration Loader
//!
//! Loads and validates configuration from TOML files matching config.toml structure.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::application::{
    BalanceServiceConfig, PriceServiceConfig, ResilienceConfig, DEFAULT_ENDPOINTS, MIN_PRICE_INTERVAL,
};
use crate::domain::{DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD, DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW_SECS};
use crate::security::{validate_endpoint, validate_xrp_address, MAX_CONFIG_FILE};

/// File name looked up in every search location
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory under the user config root
pub const CONFIG_DIR_NAME: &str = "xrp-ticker";

/// Accepted values of `[logging] level`
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Config {
    pub wallet: WalletSection,
    #[serde(default)]
    pub connections: ConnectionsSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Tracked wallets
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct WalletSection {
    /// Single wallet address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Additional wallet addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
}

impl WalletSection {
    /// `address` first, then `addresses`, without duplicates
    pub fn all_addresses(&self) -> Vec<String> {
        let mut all: Vec<String> = Vec::new();
        for address in self.address.iter().chain(self.addresses.iter()) {
            if !all.contains(address) {
                all.push(address.clone());
            }
        }
        all
    }
}

/// Network settings
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ConnectionsSection {
    /// XRPL WebSocket endpoints in priority order
    #[serde(default = "default_endpoints")]
    pub xrpl_endpoints: Vec<String>,
    /// Seconds between balance refreshes (10-300)
    #[serde(default = "default_xrpl_poll_interval")]
    pub xrpl_poll_interval: u64,
    /// Seconds between price polls (at least 5)
    #[serde(default = "default_price_poll_interval")]
    pub price_poll_interval: u64,
    /// Per-request timeout in seconds (1-60)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ConnectionsSection {
    fn default() -> Self {
        Self {
            xrpl_endpoints: default_endpoints(),
            xrpl_poll_interval: default_xrpl_poll_interval(),
            price_poll_interval: default_price_poll_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Outbound request limits
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LimitsSection {
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: usize,
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub breaker_failure_threshold: u32,
    /// First cooldown after the circuit opens
    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_requests_per_window: default_max_requests(),
            rate_window_secs: default_rate_window(),
            breaker_failure_threshold: default_failure_threshold(),
            breaker_cooldown_secs: default_breaker_cooldown(),
        }
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_endpoints() -> Vec<String> {
    DEFAULT_ENDPOINTS.iter().map(|e| e.to_string()).collect()
}

fn default_xrpl_poll_interval() -> u64 {
    30
}

fn default_price_poll_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_requests() -> usize {
    DEFAULT_MAX_REQUESTS
}

fn default_rate_window() -> u64 {
    DEFAULT_WINDOW_SECS
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_breaker_cooldown() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to write TOML: {0}")]
    SerializeError(#[from] toml::ser::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = read_capped(path.as_ref())?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    tracing::info!("Configuration loaded from {}", path.as_ref().display());
    Ok(config)
}

/// Read at most `MAX_CONFIG_FILE` bytes, rejecting anything larger
fn read_capped(path: &Path) -> Result<String, ConfigError> {
    let file = std::fs::File::open(path)?;
    let too_large = |size: u64| {
        ConfigError::ValidationError(format!(
            "config file is {} bytes, limit is {} bytes",
            size, MAX_CONFIG_FILE
        ))
    };

    let declared = file.metadata()?.len();
    if declared > MAX_CONFIG_FILE as u64 {
        return Err(too_large(declared));
    }

    // metadata can lie for special files, so cap the read as well
    let mut content = String::new();
    file.take(MAX_CONFIG_FILE as u64 + 1).read_to_string(&mut content)?;
    if content.len() > MAX_CONFIG_FILE {
        return Err(too_large(content.len() as u64));
    }
    Ok(content)
}

impl Config {
    /// Minimal configuration tracking one wallet
    pub fn for_address(address: &str) -> Self {
        Self {
            wallet: WalletSection {
                address: Some(address.to_string()),
                addresses: Vec::new(),
            },
            connections: ConnectionsSection::default(),
            limits: LimitsSection::default(),
            logging: LoggingSection::default(),
        }
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        let addresses = self.wallet.all_addresses();
        if addresses.is_empty() {
            return Err(ConfigError::ValidationError(
                "[wallet] needs an address or addresses".to_string(),
            ));
        }
        for address in &addresses {
            validate_xrp_address(address).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        if self.connections.xrpl_endpoints.is_empty() {
            return Err(ConfigError::ValidationError(
                "xrpl_endpoints cannot be empty".to_string(),
            ));
        }
        for endpoint in &self.connections.xrpl_endpoints {
            validate_endpoint(endpoint).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        if !(10..=300).contains(&self.connections.xrpl_poll_interval) {
            return Err(ConfigError::ValidationError(format!(
                "xrpl_poll_interval must be 10-300, got {}",
                self.connections.xrpl_poll_interval
            )));
        }

        if self.connections.price_poll_interval < MIN_PRICE_INTERVAL.as_secs() {
            return Err(ConfigError::ValidationError(format!(
                "price_poll_interval must be >= {}, got {}",
                MIN_PRICE_INTERVAL.as_secs(),
                self.connections.price_poll_interval
            )));
        }

        if !(1..=60).contains(&self.connections.request_timeout_secs) {
            return Err(ConfigError::ValidationError(format!(
                "request_timeout_secs must be 1-60, got {}",
                self.connections.request_timeout_secs
            )));
        }

        if self.limits.max_requests_per_window == 0 {
            return Err(ConfigError::ValidationError(
                "max_requests_per_window must be > 0".to_string(),
            ));
        }

        if self.limits.rate_window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "rate_window_secs must be > 0".to_string(),
            ));
        }

        if self.limits.breaker_failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "breaker_failure_threshold must be > 0".to_string(),
            ));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "logging level must be one of {}, got {:?}",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Shared rate limit, breaker and timeout settings
    pub fn resilience(&self) -> ResilienceConfig {
        ResilienceConfig {
            max_requests_per_window: self.limits.max_requests_per_window,
            rate_window: Duration::from_secs(self.limits.rate_window_secs),
            failure_threshold: self.limits.breaker_failure_threshold,
            breaker_cooldown: Duration::from_secs(self.limits.breaker_cooldown_secs),
            request_timeout: Duration::from_secs(self.connections.request_timeout_secs),
            ..ResilienceConfig::default()
        }
    }
}

impl From<&Config> for PriceServiceConfig {
    fn from(config: &Config) -> Self {
        PriceServiceConfig::default()
            .with_interval(Duration::from_secs(config.connections.price_poll_interval))
            .with_resilience(config.resilience())
    }
}

impl From<&Config> for BalanceServiceConfig {
    fn from(config: &Config) -> Self {
        BalanceServiceConfig::new(config.wallet.all_addresses())
            .with_endpoints(config.connections.xrpl_endpoints.clone())
            .with_interval(Duration::from_secs(config.connections.xrpl_poll_interval))
            .with_resilience(config.resilience())
    }
}

/// Candidate config locations, in search order
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            paths.push(PathBuf::from(xdg).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
        }
    }

    let home = shellexpand::tilde("~/.config").to_string();
    paths.push(PathBuf::from(home).join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    paths
}

/// First existing config file in the standard locations
pub fn find_config_file() -> Option<PathBuf> {
    let found = config_search_paths().into_iter().find(|path| path.is_file());
    match &found {
        Some(path) => tracing::debug!("Found config file: {}", path.display()),
        None => tracing::debug!("No config file in standard locations"),
    }
    found
}

/// Write a starter config for `address` to `path` (default `./config.toml`)
pub fn create_default_config(address: &str, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    validate_xrp_address(address).map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    let body = toml::to_string_pretty(&Config::for_address(address))?;
    let content = format!("# XRP Ticker configuration\n\n{}", body);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&path, content)?;
    tracing::info!("Created config file: {}", path.display());
    Ok(path)
}
