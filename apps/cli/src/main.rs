//! sitekb CLI: crawl websites into searchable knowledge bases.
//!
//! Crawls a site (from its sitemap when it has one, by following links
//! otherwise), embeds every page and answers semantic queries against the
//! result.

mod commands;
mod serve;

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
