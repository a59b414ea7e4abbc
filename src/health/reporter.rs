//! Per-service serving status registry.
//!
//! # States
//! - Serving: service accepts traffic
//! - NotServing: service is up but must not receive traffic
//! - Unknown: no status recorded (only ever reported, never stored)
//!
//! # Design Decisions
//! - One registry per container, passed by reference (no process-wide singleton)
//! - The overall service is the empty name `""` and starts as Serving
//! - Terminal state: every known service flips to NotServing and later
//!   updates are ignored, so a shutdown cannot be undone by a late report

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Name under which the overall serving status is recorded.
pub const OVERALL_SERVICE: &str = "";

/// Serving status of one named service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
    #[serde(rename = "SERVICE_UNKNOWN")]
    Unknown,
}

#[derive(Debug, Default)]
struct Statuses {
    by_service: HashMap<String, ServingStatus>,
    terminal: bool,
}

/// Shared, cloneable health status registry.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    inner: Arc<Mutex<Statuses>>,
}

impl HealthReporter {
    pub fn new() -> Self {
        let mut by_service = HashMap::new();
        by_service.insert(OVERALL_SERVICE.to_string(), ServingStatus::Serving);
        Self {
            inner: Arc::new(Mutex::new(Statuses {
                by_service,
                terminal: false,
            })),
        }
    }

    /// Record the status of `service`. Ignored once terminal.
    pub fn set_status(&self, service: &str, status: ServingStatus) {
        let mut inner = self.inner.lock();
        if inner.terminal {
            tracing::info!(
                service = %service,
                status = ?status,
                "Ignoring health status update, reporter is in terminal state"
            );
            return;
        }
        inner.by_service.insert(service.to_string(), status);
    }

    /// Forget the status of `service`. Ignored once terminal.
    pub fn clear_status(&self, service: &str) {
        let mut inner = self.inner.lock();
        if inner.terminal {
            return;
        }
        inner.by_service.remove(service);
    }

    /// Recorded status, if any.
    pub fn status(&self, service: &str) -> Option<ServingStatus> {
        self.inner.lock().by_service.get(service).copied()
    }

    /// Flip every known service to NotServing and freeze the registry.
    pub fn enter_terminal_state(&self) {
        let mut inner = self.inner.lock();
        if inner.terminal {
            return;
        }
        inner.terminal = true;
        for status in inner.by_service.values_mut() {
            *status = ServingStatus::NotServing;
        }
        tracing::info!(
            services = inner.by_service.len(),
            "Health reporter entered terminal state"
        );
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.lock().terminal
    }
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overall_service_starts_serving() {
        let reporter = HealthReporter::new();
        assert_eq!(reporter.status(OVERALL_SERVICE), Some(ServingStatus::Serving));
        assert_eq!(reporter.status("orders"), None);
    }

    #[test]
    fn terminal_state_flips_everything_and_freezes() {
        let reporter = HealthReporter::new();
        reporter.set_status("orders", ServingStatus::Serving);
        reporter.set_status("billing", ServingStatus::Unknown);

        reporter.enter_terminal_state();
        assert!(reporter.is_terminal());
        assert_eq!(reporter.status(OVERALL_SERVICE), Some(ServingStatus::NotServing));
        assert_eq!(reporter.status("orders"), Some(ServingStatus::NotServing));
        assert_eq!(reporter.status("billing"), Some(ServingStatus::NotServing));

        reporter.set_status("orders", ServingStatus::Serving);
        reporter.clear_status("billing");
        assert_eq!(reporter.status("orders"), Some(ServingStatus::NotServing));
        assert_eq!(reporter.status("billing"), Some(ServingStatus::NotServing));
    }

    #[test]
    fn status_serializes_like_the_health_protocol() {
        assert_eq!(
            serde_json::to_string(&ServingStatus::NotServing).unwrap(),
            "\"NOT_SERVING\""
        );
        assert_eq!(
            serde_json::to_string(&ServingStatus::Unknown).unwrap(),
            "\"SERVICE_UNKNOWN\""
        );
    }

    #[test]
    fn clones_share_state() {
        let reporter = HealthReporter::new();
        let clone = reporter.clone();
        clone.set_status("orders", ServingStatus::NotServing);
        assert_eq!(reporter.status("orders"), Some(ServingStatus::NotServing));
    }
}
