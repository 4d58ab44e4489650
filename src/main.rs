// src/main.rs - Watchdog entry point
use clap::Parser;
use std::path::PathBuf;

use printmon_rs::config;
use printmon_rs::logging;
use printmon_rs::{PrintStateLock, PrinterStatusClient, ReconnectSupervisor, SupervisorSettings, TokioSleeper};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

const DEFAULT_CONFIG_NAME: &str = "printmon.toml";

#[derive(Parser, Debug)]
#[command(name = "printmon", version, about = "Reconnects the printer when it is safe to do so")]
struct Cli {
    /// Configuration file (TOML, or legacy JSON when ending in .config/.json)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run a single check and exit
    #[arg(long)]
    once: bool,
}

fn default_config_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DEFAULT_CONFIG_NAME)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME))
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    // Logging settings live in the config, so a config failure is reported
    // through a plain console subscriber.
    let config = match config::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing_subscriber::fmt().init();
            tracing::error!("Failed to load config ({}) - exiting: {}", config_path.display(), e);
            return Err(e.into());
        }
    };

    let _logging_guard = logging::init(&config.logging)?;

    tracing::info!("printmon start");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration: {}", config_path.display());
    config.log_summary();

    let settings = SupervisorSettings::from_config(&config)?;
    let client = PrinterStatusClient::from_config(&config).map_err(|e| {
        tracing::error!("Failed to set up API client: {}", e);
        Box::new(e) as BoxError
    })?;
    let lock = PrintStateLock::new(config.state.lock_file.clone());
    let mut supervisor = ReconnectSupervisor::new(client, lock, settings, TokioSleeper);

    if cli.once {
        let report = supervisor.run_iteration().await;
        tracing::info!(
            connection = ?report.connection,
            connect_attempted = report.connect_attempted,
            printing = report.printing,
            "Single check complete"
        );
        return Ok(());
    }

    supervisor.run().await;
    Ok(())
}
