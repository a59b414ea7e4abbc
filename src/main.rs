//! Service container launcher.
//!
//! Loads the TOML config, builds one listener per `[[listeners]]` entry,
//! runs until SIGINT/SIGTERM, stops the container and finally tells an
//! optional sidecar proxy to quit.

use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use service_container::config::{load_config, ContainerConfig};
use service_container::container::{
    Container, ContainerEnvironment, ListenerDefinition, PeriodicTaskDefinition, ServiceHandler,
};
use service_container::lifecycle::signals::shutdown_signal;
use service_container::lifecycle::LifecycleState;
use service_container::observability::init_logging;

#[derive(Parser)]
#[command(name = "service-container")]
#[command(about = "Run a service container from a TOML config", long_about = None)]
struct Cli {
    /// Path to the container config.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Built-in `info` capability so a bare container has something to serve.
fn info_handler(environment: &ContainerEnvironment) -> Vec<ServiceHandler> {
    let environment = environment.clone();
    let router = Router::new()
        .route("/", get(info))
        .with_state(environment);
    vec![ServiceHandler::new("info", router)]
}

async fn info(State(environment): State<ContainerEnvironment>) -> Json<serde_json::Value> {
    Json(json!({
        "service": environment.in_process_name(),
        "state": environment.lifecycle().state().as_str(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ContainerConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(
        service = %config.service.name,
        listeners = config.listeners.len(),
        admin_enabled = config.admin.enabled,
        "service-container v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let definitions = config
        .listeners
        .iter()
        .map(|listener| ListenerDefinition::from_config(listener).map(|d| d.with_factory(info_handler)))
        .collect::<Result<Vec<_>, _>>()?;
    let sidecar_quit_url = config.launcher.sidecar_quit_url.clone();

    let container = Arc::new(Container::new(config));
    container.initialize(definitions).await?;

    container.register_task(PeriodicTaskDefinition::new(
        "heartbeat",
        Duration::from_secs(30),
        Duration::from_secs(30),
        {
            let container = Arc::clone(&container);
            move || {
                let container = Arc::clone(&container);
                async move {
                    let healthy = container.health_check().await;
                    tracing::info!(healthy, "Heartbeat");
                }
            }
        },
    ))?;

    let running = {
        let container = Arc::clone(&container);
        tokio::spawn(async move { container.start().await })
    };
    tokio::pin!(running);

    let result = tokio::select! {
        signal = shutdown_signal() => {
            tracing::info!(signal, "Stopping container");
            // stop() only acts once Started; a failed start ends `running` instead.
            let lifecycle = container.lifecycle();
            let finished = tokio::select! {
                _ = lifecycle.wait_for(|state| state >= LifecycleState::Started) => None,
                result = &mut running => Some(result),
            };
            container.stop().await;
            match finished {
                Some(result) => result,
                None => running.await,
            }
        }
        result = &mut running => {
            container.stop().await;
            result
        }
    };
    match result {
        Ok(result) => result?,
        Err(e) => tracing::error!(error = %e, "Container task failed"),
    }

    if let Some(url) = sidecar_quit_url {
        notify_sidecar(&url).await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn notify_sidecar(url: &str) {
    let client = reqwest::Client::new();
    match client.post(url).timeout(Duration::from_secs(5)).send().await {
        Ok(res) => tracing::info!(url = %url, status = %res.status(), "Sidecar asked to quit"),
        Err(e) => tracing::warn!(url = %url, error = %e, "Failed to notify sidecar"),
    }
}
