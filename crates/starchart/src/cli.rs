//! Exposes the command line application.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

use starchart_service::config::Config;
use starchart_service::metrics;

use crate::logging;
use crate::server;

/// Starchart commands.
#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Run the web server.
    Run,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: `execute` runs before any threads are spawned.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        );
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
    }

    Ok(())
}
