//! Xetra ETL
//!
//! Runs one Xetra daily report: reads the configuration, plans the missing
//! dates from the meta file, extracts, transforms and loads the report.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xetra_etl::config::parse_date;
use xetra_etl::{Config, S3Helper, XetraETL};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(name = "xetra-etl")]
#[command(about = "Build the Xetra daily report from the raw trading files", long_about = None)]
struct Args {
    /// Path to the configuration YAML file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// First reporting date, overrides source.src_first_extract_date
    #[arg(short, long, value_name = "DATE")]
    date: Option<String>,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .context("Failed to load configuration")?;

    init_tracing(&config.logging.level);
    info!("Loaded configuration from {:?}", args.config);

    if let Err(e) = run(config, args.date).await {
        error!("Xetra ETL job failed: {:#}", e);
        return Err(e);
    }

    info!("Xetra ETL job finished");
    Ok(())
}

async fn run(config: Config, date_override: Option<String>) -> Result<()> {
    let arg_date = match date_override {
        Some(date) => parse_date(&date, &config.source.src_date_format)?,
        None => config.source.first_extract_date()?,
    };
    info!("Reporting from {}", arg_date);

    let src = S3Helper::new(config.s3.source()).await
        .context("Failed to connect to source bucket")?;
    let trg = S3Helper::new(config.s3.target()).await
        .context("Failed to connect to target bucket")?;
    info!(
        "Source bucket: {} ({:?}), target bucket: {} ({:?})",
        src.bucket(),
        src.provider(),
        trg.bucket(),
        trg.provider()
    );

    let etl = XetraETL::new(
        Arc::new(src),
        Arc::new(trg),
        config.meta.meta_key,
        config.source,
        config.target,
    );

    match etl.run(arg_date).await? {
        Some(key) => info!("Report written to {}", key),
        None => info!("No new report written"),
    }

    Ok(())
}
