mod config;
mod data_dir;
mod db;
mod driver;
mod extract;
mod params;
mod pgbench;
mod queries;
mod record;
mod reinit;
mod report;
mod session;

use clap::{Parser, ValueEnum};
use config::BenchConfig;
use driver::Driver;
use reinit::ReinitPolicy;
use std::path::PathBuf;

/// A Rust CLI tool that drives pgbench and psql against one or more
/// PostgreSQL instances, extracts metrics from their output, and writes
/// one CSV report per scenario.
#[derive(Parser, Debug)]
#[command(name = "dbbench", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "dbbench.toml")]
    config: PathBuf,

    /// Output directory (overrides config)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Only benchmark these instances (repeatable)
    #[arg(long = "instance", value_name = "NAME")]
    instances: Vec<String>,

    /// Only run these benchmarks (repeatable)
    #[arg(long = "benchmark", value_name = "NAME")]
    benchmarks: Vec<String>,

    /// When to re-initialize the pgbench dataset
    #[arg(long, value_enum, default_value_t = ReinitMode::Prompt)]
    reinit: ReinitMode,

    /// Validate config and print the plan, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (commands, per-query timings)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings, errors and the summary
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReinitMode {
    Always,
    Never,
    Auto,
    Prompt,
}

impl ReinitMode {
    fn policy(self) -> Box<dyn ReinitPolicy> {
        match self {
            ReinitMode::Always => Box::new(reinit::Always),
            ReinitMode::Never => Box::new(reinit::Never),
            ReinitMode::Auto => Box::new(reinit::Auto),
            ReinitMode::Prompt => Box::new(reinit::Prompt::new(
                std::io::stdin().lock(),
                std::io::stderr(),
            )),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, config = %cli.config.display(), "invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        instances = config.instances.len(),
        benchmarks = config.benchmarks.len(),
        output_dir = %config.output_dir.display(),
        "dbbench starting"
    );

    let driver = Driver::new(config, cli.reinit.policy());

    if cli.dry_run {
        println!("Dry run: config valid, not running.");
        for line in driver.plan() {
            println!("  {line}");
        }
        return;
    }

    match driver.run().await {
        Ok(summaries) => {
            for s in &summaries {
                println!(
                    "{}/{}: {} rows, {} failed -> {}",
                    s.instance,
                    s.benchmark,
                    s.rows,
                    s.failures,
                    s.report.display()
                );
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "benchmark run aborted");
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                tracing::error!(cause = %cause, "caused by");
                source = cause.source();
            }
            std::process::exit(1);
        }
    }
}

/// Load the config file, apply CLI overrides and filters, then validate.
fn load_config(cli: &Cli) -> Result<BenchConfig, config::ConfigError> {
    let mut config = BenchConfig::load(&cli.config)?;
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    config.retain(&cli.instances, &cli.benchmarks);
    config.validate()?;
    Ok(config)
}
