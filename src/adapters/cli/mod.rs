//! CLI Adapter
//!
//! Command-line interface for the XRP ticker.
//! Uses clap derive macros for argument parsing.

mod commands;

pub use commands::{execute, CheckCmd, CliApp, Command, InitCmd, OnceCmd, RunCmd, DEBUG_ENV_VAR};
