use std::error::Error;

use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};

use client::bootstrap::state::ClientState;
use client::config_loader;
use client::observability;
use client::run_loop;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    let config = config_loader::load_config()?;

    observability::tracing::setup_logging(&config)?;

    info!("Starting Oekaki Drawing Client");
    info!("Configuration loaded successfully");

    let state = ClientState::new(config.clone()).await?;

    observability::startup_info::print_session_info(&config);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_tx.send(()).await.ok();
    });

    if let Err(e) = run_loop::run(state, shutdown_rx).await {
        error!("Client error: {}", e);
        return Err(e.into());
    }

    info!("Client shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, starting graceful shutdown...");
        },
        () = terminate => {
            info!("Received terminate signal, starting graceful shutdown...");
        },
    }
}
