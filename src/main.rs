use anyhow::{Context, Result};
use clap::Parser;
use fire_ledger::{ConsoleGate, PipelineConfig};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fire-ledger")]
#[command(about = "Rebuild, categorize and reconcile the personal finance ledger", version)]
struct Cli {
    /// Pipeline settings (also read from `FIRE_CONFIG`). Defaults apply when
    /// the file does not exist.
    #[arg(long, env = "FIRE_CONFIG", default_value = "fire.toml")]
    config: PathBuf,

    /// Log at debug level and write a snapshot of every stage
    #[arg(long)]
    debug: bool,
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = if cli.config.is_file() {
        PipelineConfig::load(&cli.config)
            .with_context(|| format!("failed to load config {}", cli.config.display()))?
    } else {
        PipelineConfig::default()
            .with_env(|key| std::env::var(key).ok())
            .resolved(Path::new(""))
    };

    if cli.debug {
        config.debug = true;
        config.log_level = "debug".to_string();
    }
    Ok(config)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("❌ {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fire_ledger={}", config.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::debug!("config: {:?}", config);

    let mut gate = ConsoleGate::stdio();
    match fire_ledger::run(&config, &mut gate).context("pipeline interrupted") {
        Ok(summary) => {
            tracing::info!(
                "✅ {} rows from {} files written to {}",
                summary.rows,
                summary.source_files,
                summary.ledger.display()
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
