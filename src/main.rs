//! XRP Ticker
//!
//! Live XRP price and XRPL wallet balances in the terminal.

use anyhow::Result;
use clap::Parser;

use xrp_ticker::adapters::cli::{execute, CliApp};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (XRP_TICKER_DEBUG, RUST_LOG)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    execute(app).await
}
