mod config;
mod consts;
mod fetcher;
mod header;
mod pipeline;
mod registry;
mod s3;
mod util;
use crate::config::Environment;
use crate::consts::DEFAULT_CONFIG_PATH;
use crate::fetcher::fetch_incoming;
use crate::pipeline::StockUpdatePipeline;
use crate::registry::RestRegistry;
use crate::s3::S3Client;
use crate::util::{archive_file, list_stock_files};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::{stderr, IsTerminal};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{filter::Targets, fmt::time::OffsetTime, prelude::*};

/// Apply SKU/quantity CSV files staged on AWS S3 to a product stock API
#[derive(Clone, Debug, Parser)]
#[command(version)]
struct Arguments {
    /// JSON file containing per-environment settings
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    /// Section of the config file to use.  "development" selects the
    /// development settings; anything else selects the local settings.
    #[arg(
        short,
        long,
        env = "ENVIRONMENT",
        default_value = "local",
        global = true
    )]
    environment: Environment,

    /// Set logging level
    #[arg(
        short,
        long,
        default_value = "INFO",
        value_name = "ERROR|WARN|INFO|DEBUG|TRACE",
        global = true
    )]
    log_level: Level,

    /// Also append log messages to the given file
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Eq, PartialEq, Subcommand)]
enum Command {
    /// Download incoming stock files and update inventory stock quantities
    /// via SKU
    UpdateStockQuantities,
}

// See
// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/time/struct.OffsetTime.html#method.local_rfc_3339>
// for an explanation of the main + #[tokio::main]run thing
fn main() -> anyhow::Result<()> {
    let args = Arguments::parse();
    let timer =
        OffsetTime::local_rfc_3339().context("failed to determine local timezone offset")?;
    let file_layer = match args.log_file {
        Some(ref path) => {
            let fp = fs_err::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context("failed to open log file")?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_timer(timer.clone())
                    .with_ansi(false)
                    .with_writer(Mutex::new(fp)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_timer(timer)
                .with_ansi(stderr().is_terminal())
                .with_writer(stderr),
        )
        .with(file_layer)
        .with(
            Targets::new()
                .with_target(env!("CARGO_CRATE_NAME"), args.log_level)
                .with_target("aws_config", Level::WARN.min(args.log_level))
                .with_target("aws_smithy_runtime", Level::WARN.min(args.log_level))
                .with_default(Level::INFO.min(args.log_level)),
        )
        .init();
    run(args)
}

#[tokio::main]
async fn run(args: Arguments) -> anyhow::Result<()> {
    match args.command {
        Command::UpdateStockQuantities => update_stock_quantities(&args).await,
    }
}

async fn update_stock_quantities(args: &Arguments) -> anyhow::Result<()> {
    println!("Starting stock updater");
    let settings = config::load(&args.config, args.environment)?;
    tracing::info!(environment = %args.environment, "Loaded settings");

    let store = S3Client::new(&settings).await?;
    let fetched = fetch_incoming(&store, &settings).await?;
    tracing::info!(count = fetched.len(), "Fetched new stock files");

    let registry = RestRegistry::new(settings.store_url()?, settings.store_token()?)?;
    let pipeline = StockUpdatePipeline::new(&registry);
    let incoming = settings.local_incoming()?;
    let archive = settings.local_archive()?;
    let files = list_stock_files(incoming).with_context(|| {
        format!(
            "failed to list stock files in {}",
            incoming.display()
        )
    })?;
    for path in files {
        let summary = pipeline
            .run(&path)
            .await
            .with_context(|| format!("failed to process stock file {}", path.display()))?;
        let dest = archive_file(&path, archive)
            .with_context(|| format!("failed to archive {}", path.display()))?;
        tracing::info!(
            path = %dest.display(),
            succeeded = summary.counts.succeeded,
            "Archived processed stock file"
        );
    }
    println!("Finished stock updater.");
    Ok(())
}
