//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{
    config_search_paths, create_default_config, find_config_file, load_config, Config, ConfigError,
    ConnectionsSection, LimitsSection, LoggingSection, WalletSection, LOG_LEVELS,
};
