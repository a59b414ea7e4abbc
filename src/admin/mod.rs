//! Admin surface: a small HTTP server for load balancers and scrapers.
//!
//! # Routes
//! - `GET /health`: 200 "OK" when the container health check passes, else 500 "BAD"
//! - `GET /metrics`: Prometheus exposition (404 when metrics are disabled)
//! - `GET /status`: lifecycle state and listener addresses as JSON

pub mod handlers;

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::health::HealthProbe;
use crate::lifecycle::LifecycleHandle;
use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub service_name: Arc<str>,
    pub probe: HealthProbe,
    pub lifecycle: LifecycleHandle,
    pub metrics: Option<PrometheusHandle>,
    pub listeners: Arc<Vec<(String, Option<SocketAddr>)>>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .route("/status", get(get_status))
        .with_state(state)
}

/// A running admin server.
pub struct AdminServer {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl AdminServer {
    pub async fn start(bind_address: &str, state: AdminState) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind_address).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let app = setup_admin_router(state);
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        tracing::info!(address = %local_addr, "Admin server started");
        Ok(Self {
            local_addr,
            shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop gracefully, aborting if it takes longer than `deadline`.
    pub async fn stop(self, deadline: Duration) {
        let _ = self.shutdown_tx.send(());
        let mut task = self.task;
        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => tracing::info!(address = %self.local_addr, "Admin server stopped"),
            Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Admin server exited with error"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Admin server task failed"),
            Err(_) => {
                tracing::warn!(
                    deadline_ms = deadline.as_millis() as u64,
                    "Admin server did not stop in time, aborting"
                );
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Lifecycle, LifecycleState};
    use crate::net::channel::ChannelRegistry;
    use std::collections::HashMap;

    fn state(lifecycle: &Lifecycle) -> AdminState {
        let registry = ChannelRegistry::new(["orders".to_string()], HashMap::new());
        AdminState {
            service_name: Arc::from("orders"),
            probe: HealthProbe::new(lifecycle.handle(), registry, "orders", Duration::from_secs(1)),
            lifecycle: lifecycle.handle(),
            metrics: None,
            listeners: Arc::new(vec![(
                "public".to_string(),
                Some("127.0.0.1:9000".parse().unwrap()),
            )]),
        }
    }

    #[tokio::test]
    async fn serves_status_and_health() {
        let lifecycle = Lifecycle::new();
        let server = AdminServer::start("127.0.0.1:0", state(&lifecycle)).await.unwrap();
        let base = format!("http://{}", server.local_addr());

        let health = reqwest::get(format!("{base}/health")).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(health.text().await.unwrap(), "BAD");

        let status: serde_json::Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["service"], "orders");
        assert_eq!(status["state"], LifecycleState::NotStarted.as_str());
        assert_eq!(status["listeners"][0]["name"], "public");
        assert_eq!(status["listeners"][0]["address"], "127.0.0.1:9000");

        let metrics = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(metrics.status(), reqwest::StatusCode::NOT_FOUND);

        server.stop(Duration::from_secs(2)).await;
        assert!(reqwest::get(format!("{base}/status")).await.is_err());
    }
}
