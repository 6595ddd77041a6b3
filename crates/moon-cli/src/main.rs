//! moon server binary.
//!
//! Loads the YAML configuration, initializes logging, runs the startup
//! sequence (system tables, consistency check, bootstrap admin) and
//! serves until SIGINT/SIGTERM. Exits non-zero when shutdown had to be
//! forced or startup failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use moon_api::{serve, AppState, Config};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "moon", version, about = "Schemaless-at-the-API dynamic data backend")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "moon.yaml")]
    config: PathBuf,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match &config.logging.path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

async fn run(args: Args) -> Result<i32> {
    let text = std::fs::read_to_string(&args.config)
        .with_context(|| format!("cannot read configuration {}", args.config.display()))?;
    let mut config = Config::from_yaml(&text).context("configuration rejected")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if args.check {
        println!("configuration ok: {}", args.config.display());
        return Ok(0);
    }

    init_logging(&config)?;
    let state = AppState::initialize(config).await.context("startup failed")?;
    let exit_code = serve(state).await.context("server failed")?;
    Ok(exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    match run(args).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            // Logging may not be initialized yet on early failures.
            eprintln!("moon: {:#}", err);
            error!(error = %err, "fatal");
            ExitCode::FAILURE
        }
    }
}
