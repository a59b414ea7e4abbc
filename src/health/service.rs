//! Health capability served by the self-listener.
//!
//! `GET /health/check?service=<name>` answers with the recorded status of
//! `<name>` (the overall status when `service` is omitted), mirroring the
//! usual health-checking protocol: unknown names are a 404.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::container::ServiceHandler;
use crate::health::reporter::{HealthReporter, ServingStatus, OVERALL_SERVICE};

/// Handler name the health capability is mounted under.
pub const HEALTH_HANDLER_NAME: &str = "health";

/// Path of the check call, relative to the listener root.
pub const HEALTH_CHECK_PATH: &str = "/health/check";

#[derive(Debug, Default, Deserialize)]
pub struct HealthCheckRequest {
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckResponse {
    pub status: ServingStatus,
}

/// Build the handler exposing `reporter`.
pub fn health_handler(reporter: HealthReporter) -> ServiceHandler {
    let router = Router::new()
        .route("/check", get(check))
        .with_state(reporter);
    ServiceHandler::new(HEALTH_HANDLER_NAME, router)
}

async fn check(
    State(reporter): State<HealthReporter>,
    Query(request): Query<HealthCheckRequest>,
) -> Response {
    let service = request.service.as_deref().unwrap_or(OVERALL_SERVICE);
    match reporter.status(service) {
        Some(status) => Json(HealthCheckResponse { status }).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(HealthCheckResponse {
                status: ServingStatus::Unknown,
            }),
        )
            .into_response(),
    }
}
