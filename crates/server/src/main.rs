//! SEPEX server binary

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sepex_server::api_router::create_api_router;
use sepex_server::bootstrap::initialize_server;
use sepex_server::config::{AppConfig, Cli};

/// How long shutdown waits for live jobs to finish closing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("starting {}", config.api_name);
    let host = config.host.clone();
    let port = config.port;

    let state = match initialize_server(config).await {
        Ok(state) => state,
        Err(err) => {
            error!("failed to initialize server: {err}");
            return ExitCode::FAILURE;
        }
    };

    let app = create_api_router(state.clone());
    let listener = match tokio::net::TcpListener::bind((host.as_str(), port)).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("could not bind {host}:{port}: {err}");
            return ExitCode::FAILURE;
        }
    };
    info!("listening on http://{host}:{port}");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        error!("server error: {err}");
        return ExitCode::FAILURE;
    }

    // Intake has stopped; dismiss live jobs and drop the queue.
    state.dispatcher.shutdown(SHUTDOWN_GRACE).await;
    info!("server shutdown complete");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        return;
    }
    info!("received shutdown signal, draining connections");
}
