// slm-gateway: mediates between field-deployed sound level meters and
// HTTP consumers, polling device state and relaying start/stop cycles.

use clap::Parser;
use gateway::{load_config_from_path, GatewayState};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "slm-gateway", version, about)]
struct Cli {
    /// Path to the gateway TOML config file.
    #[arg(long, env = "SLM_GATEWAY_CONFIG", default_value = gateway::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "slm-gateway starting");

    let cli = Cli::parse();

    let config = match load_config_from_path(&cli.config) {
        Ok(cfg) => {
            info!(
                config_path = %cli.config.display(),
                devices = cfg.devices.len(),
                ops_http_bind = %cfg.ops_http_bind,
                "config loaded"
            );
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config from {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let mut state = match GatewayState::bootstrap(&config) {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to bootstrap gateway state");
            return ExitCode::FAILURE;
        }
    };

    match state.start_ops_http(&config.ops_http_bind).await {
        Ok(addr) => info!(%addr, "ops http listening"),
        Err(e) => {
            error!(error = %e, "failed to start ops http");
            return ExitCode::FAILURE;
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutdown signal received, draining poller");
    state.shutdown().await;
    info!("slm-gateway stopped");

    ExitCode::SUCCESS
}
