//! Loopback health probe.
//!
//! Asks the container's own health capability, through the in-process
//! channel, whether the overall service is serving. The probe never
//! reaches the network.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use thiserror::Error;

use crate::health::reporter::ServingStatus;
use crate::health::service::{HealthCheckResponse, HEALTH_CHECK_PATH};
use crate::lifecycle::{LifecycleHandle, LifecycleState};
use crate::net::channel::{ChannelError, ChannelRegistry};

#[derive(Debug, Error)]
enum ProbeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to build probe request: {0}")]
    Request(#[from] axum::http::Error),
    #[error("health capability answered {0}")]
    Status(StatusCode),
    #[error("failed to read probe response: {0}")]
    Body(#[from] axum::Error),
    #[error("malformed probe response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Cloneable health probe bound to one container.
#[derive(Clone)]
pub struct HealthProbe {
    lifecycle: LifecycleHandle,
    registry: ChannelRegistry,
    target: String,
    deadline: Duration,
}

impl HealthProbe {
    pub fn new(
        lifecycle: LifecycleHandle,
        registry: ChannelRegistry,
        target: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        Self {
            lifecycle,
            registry,
            target: target.into(),
            deadline,
        }
    }

    /// `true` only when the container is Started and its overall status is
    /// not NotServing. Errors and timeouts count as unhealthy.
    pub async fn check(&self) -> bool {
        let state = self.lifecycle.state();
        if state != LifecycleState::Started {
            tracing::debug!(state = %state, "Health check failed, container is not started");
            return false;
        }

        match self.query().await {
            Ok(ServingStatus::NotServing) => {
                tracing::warn!(channel = %self.target, "Health check failed, service is not serving");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::error!(channel = %self.target, error = %e, "Health check failed");
                false
            }
        }
    }

    async fn query(&self) -> Result<ServingStatus, ProbeError> {
        let channel = self.registry.for_name(&self.target)?;
        let request = Request::get(HEALTH_CHECK_PATH).body(Body::empty())?;
        let response = channel.call(request, self.deadline).await?;
        if !response.status().is_success() {
            return Err(ProbeError::Status(response.status()));
        }
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024).await?;
        let body: HealthCheckResponse = serde_json::from_slice(&bytes)?;
        Ok(body.status)
    }
}

impl std::fmt::Debug for HealthProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthProbe")
            .field("target", &self.target)
            .field("deadline", &self.deadline)
            .finish()
    }
}
