//! Greeting Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client,
//! verifies the GreetingService kind is registered, and runs the
//! reconciliation loop until a shutdown signal arrives.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use greeting_operator::{
    config::OperatorConfig,
    controllers::{greeting_controller, Context},
    metrics,
    store::{KubeStore, ResourceStore},
    watch,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    let config = OperatorConfig::parse();
    config.validate()?;

    info!("Starting Greeting Operator");

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let store = Arc::new(KubeStore::new(client.clone()));

    // Refuse to start without the CRD rather than watching nothing
    if let Err(e) = store.ensure_kind_registered().await {
        error!("{}", e);
        return Err(e.into());
    }

    // Create shared context
    let context = Context::new(store, config.settings());

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    // Run the GreetingService controller
    let shutdown = CancellationToken::new();
    let events = watch::kube_events(client, config.namespace.clone());
    let mut controller_handle = tokio::spawn(greeting_controller::run(
        events,
        context,
        shutdown.clone(),
    ));

    // Handle graceful shutdown
    tokio::select! {
        _ = &mut controller_handle => {
            error!("GreetingService controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
            shutdown.cancel();
            let _ = controller_handle.await;
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            shutdown.cancel();
            let _ = controller_handle.await;
        }
    }

    info!("Greeting Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,greeting_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
