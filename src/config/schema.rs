//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for a container.
//! All types derive Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Root configuration for a service container.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ContainerConfig {
    /// Service identity; also names the self-listener.
    pub service: ServiceConfig,

    /// Networked listeners, in start order.
    pub listeners: Vec<ListenerConfig>,

    /// Teardown and probe deadlines.
    pub deadlines: DeadlineConfig,

    /// Admin surface (health, metrics, status).
    pub admin: AdminConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,

    /// Free-form per-service settings handed to handler factories.
    pub services: HashMap<String, toml::Table>,

    /// Launcher-only settings.
    pub launcher: LauncherConfig,
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service name; the self-listener and in-process channel use it.
    pub name: String,

    /// Authorities that channels resolve to the self-listener instead of the
    /// network.
    pub authorities: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "service-container".to_string(),
            authorities: Vec::new(),
        }
    }
}

/// One networked listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listener name, unique within the container.
    pub name: String,

    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum request body in bytes (0 = unlimited).
    pub max_inbound_message_size: usize,

    /// HTTP/2 pending reset stream cap (0 = disabled).
    pub max_pending_reset_streams: usize,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            name: "networked".to_string(),
            bind_address: "0.0.0.0:8080".to_string(),
            max_inbound_message_size: 0,
            max_pending_reset_streams: 500,
            max_connections: 10_000,
        }
    }
}

/// Deadlines for teardown steps and the health probe.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeadlineConfig {
    /// Per-listener drain deadline in milliseconds.
    pub listener_shutdown_ms: u64,

    /// Channel registry release deadline in milliseconds.
    pub registry_shutdown_ms: u64,

    /// Loopback health probe deadline in milliseconds.
    pub health_check_ms: u64,

    /// Admin surface stop deadline in milliseconds.
    pub admin_shutdown_ms: u64,
}

impl DeadlineConfig {
    pub fn listener_shutdown(&self) -> Duration {
        Duration::from_millis(self.listener_shutdown_ms)
    }

    pub fn registry_shutdown(&self) -> Duration {
        Duration::from_millis(self.registry_shutdown_ms)
    }

    pub fn health_check(&self) -> Duration {
        Duration::from_millis(self.health_check_ms)
    }

    pub fn admin_shutdown(&self) -> Duration {
        Duration::from_millis(self.admin_shutdown_ms)
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            listener_shutdown_ms: 30_000,
            registry_shutdown_ms: 10_000,
            health_check_ms: 10_000,
            admin_shutdown_ms: 2_000,
        }
    }
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Start the admin surface with the container.
    pub enabled: bool,

    /// Admin bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8099".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) used when RUST_LOG is unset.
    pub log_level: String,

    /// Install the Prometheus recorder.
    pub metrics_enabled: bool,

    /// Largest latency histogram bucket in milliseconds.
    pub max_latency_bucket_ms: u64,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            max_latency_bucket_ms: 10_000,
        }
    }
}

/// Settings only the launcher binary reads.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct LauncherConfig {
    /// Optional URL POSTed after shutdown so a sidecar proxy exits too.
    pub sidecar_quit_url: Option<String>,
}
