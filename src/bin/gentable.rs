//! Gentable CLI Binary

use anyhow::Context;
use clap::Parser;
use gentable::logging::init_logging;
use gentable::tooling::cli::{Cli, CliContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let context = CliContext::new(cli.config.clone()).context("Failed to load configuration")?;
    let logging = cli.logging_config(&context.config().logging);
    init_logging(Some(&logging)).context("Failed to initialize logging")?;

    let output = context.execute(&cli.command).await?;
    println!("{}", output);
    Ok(())
}
