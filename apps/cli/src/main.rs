//! ShopAlly CLI: AI-assisted product search and price-drop alerts.
//!
//! Searches the product catalog with LLM-enriched, relevance-ranked results
//! and watches saved products for price drops.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
