use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::admin::AdminState;

#[derive(Serialize)]
pub struct ContainerStatus {
    pub version: &'static str,
    pub service: String,
    pub state: &'static str,
    pub listeners: Vec<ListenerStatus>,
}

#[derive(Serialize)]
pub struct ListenerStatus {
    pub name: String,
    pub address: Option<String>,
}

/// Load-balancer style probe: 200 "OK" or 500 "BAD".
pub async fn get_health(State(state): State<AdminState>) -> impl IntoResponse {
    if state.probe.check().await {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "BAD")
    }
}

pub async fn get_metrics(State(state): State<AdminState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled\n".to_string()),
    }
}

pub async fn get_status(State(state): State<AdminState>) -> Json<ContainerStatus> {
    Json(ContainerStatus {
        version: env!("CARGO_PKG_VERSION"),
        service: state.service_name.to_string(),
        state: state.lifecycle.state().as_str(),
        listeners: state
            .listeners
            .iter()
            .map(|(name, address)| ListenerStatus {
                name: name.clone(),
                address: address.map(|a| a.to_string()),
            })
            .collect(),
    })
}
