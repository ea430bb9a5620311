use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use rcprint::cli::{CacheCommand, Cli, Command};
use rcprint::pipeline;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    rcprint::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        Command::Pivot(args) => pipeline::pivot(args).context("pivot")?,
        Command::Render(args) => pipeline::render(args).await.context("render")?,
        Command::Toc(args) => pipeline::toc(args).context("toc")?,
        Command::Print(args) => pipeline::print(args).await.context("print")?,
        Command::Cache {
            command: CacheCommand::Get(args),
        } => pipeline::cache_get(args).await.context("cache get")?,
    }

    Ok(())
}
