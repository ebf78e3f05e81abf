//! carelink-bridge: polls a CareLink relay and uploads new readings,
//! pump status, boluses and fingersticks to Nightscout.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use carelink_bridge::config::{Config, LogLevel};
use carelink_bridge::error::{AddressParseSnafu, BridgeError, ConfigSnafu, MetricsSnafu};
use carelink_bridge::{metrics, run_bridge};

/// CareLink to Nightscout bridge.
#[derive(Parser, Debug)]
#[command(name = "carelink-bridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file. Environment variables are used
    /// when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides the configured level.
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Dry run - validate configuration and exit.
    #[arg(long)]
    dry_run: bool,
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), BridgeError> {
    let args = Args::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_logging(args.log_level.unwrap_or_default());
            if e.is_configuration_missing() {
                error!("Required configuration is missing, refusing to start");
            }
            return Err(e);
        }
    };

    init_logging(args.log_level.unwrap_or(config.logging.level));
    info!("carelink-bridge starting");

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Source: {}", config.source.url);
        info!("Store: {}", config.store.base_url().unwrap_or_default());
        info!(
            "Limits: {} samples, {} treatments, {} checks",
            config.limits.samples, config.limits.treatments, config.limits.checks
        );
        info!(
            "Drift: trusted device {:?}, window {}s, {} matches required",
            config.trusted_device_tag(),
            config.reconcile.match_window_secs,
            config.reconcile.min_match_count
        );
        info!("Configuration is valid");
        return Ok(());
    }

    if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        metrics::init(addr).context(MetricsSnafu)?;
    }

    run_bridge(config).await?;

    info!("carelink-bridge stopped");
    Ok(())
}

/// `RUST_LOG` wins over the configured level.
fn init_logging(level: LogLevel) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load configuration from the file given on the command line, or from the
/// environment.
fn build_config(args: &Args) -> Result<Config, BridgeError> {
    match &args.config {
        Some(path) => Config::from_file(path).context(ConfigSnafu),
        None => Config::from_env().context(ConfigSnafu),
    }
}
