//! Binary entry point for the `snapkeep` CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use snapkeep::{
    AwsCliApi, ConfigError, Orchestrator, Region, ReportEvent, Reporter, RunError,
    SnapshotConfig, StdoutReporter, SystemClock, proxy_from_env,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("snapshot run aborted: {0}")]
    Run(#[from] RunError),
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let exit_code = match execute(&cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn execute(cli: &Cli) -> Result<(), CliError> {
    let mut config = SnapshotConfig::load_without_cli_args()?;
    if cli.dry_run {
        config.dry_run = true;
    }
    config.validate()?;
    let region = Region::parse(&cli.region)?;
    let proxy = proxy_from_env(|name| env::var(name).ok());
    if let Some(url) = &proxy {
        tracing::debug!(proxy = %url, "routing provider calls through proxy");
    }

    let api = AwsCliApi::with_process_runner(config.aws_bin.clone(), region.clone())
        .with_proxy(proxy);
    let reporter = StdoutReporter;
    reporter.report(&ReportEvent::Region {
        region: region.to_string(),
    });

    let summary = Orchestrator::new(api, reporter, SystemClock, &config).run()?;
    tracing::info!(
        created = summary.creation.completed.len(),
        failed = summary.creation.failed.len(),
        deleted = summary.cleanup.deleted().len(),
        dry_run = config.dry_run,
        "run finished"
    );
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
