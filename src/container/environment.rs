//! Shared context handed to handler factories.

use std::collections::HashMap;
use std::sync::Arc;

use crate::health::{HealthReporter, ServingStatus};
use crate::lifecycle::LifecycleHandle;
use crate::net::channel::ChannelRegistry;

/// What a handler factory may use while building its handlers: the channel
/// registry, the health reporter, per-service configuration and a read-only
/// view of the container lifecycle.
#[derive(Clone)]
pub struct ContainerEnvironment {
    service_name: Arc<str>,
    registry: ChannelRegistry,
    health: HealthReporter,
    lifecycle: LifecycleHandle,
    service_configs: Arc<HashMap<String, toml::Table>>,
}

impl ContainerEnvironment {
    pub fn new(
        service_name: impl Into<Arc<str>>,
        registry: ChannelRegistry,
        health: HealthReporter,
        lifecycle: LifecycleHandle,
        service_configs: HashMap<String, toml::Table>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            registry,
            health,
            lifecycle,
            service_configs: Arc::new(service_configs),
        }
    }

    pub fn channel_registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn health_reporter(&self) -> &HealthReporter {
        &self.health
    }

    /// Shorthand for `health_reporter().set_status(..)`.
    pub fn report_service_status(&self, service: &str, status: ServingStatus) {
        self.health.set_status(service, status);
    }

    /// The `[services.<name>]` table, or an empty table.
    pub fn service_config(&self, service: &str) -> toml::Table {
        self.service_configs
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    pub fn lifecycle(&self) -> &LifecycleHandle {
        &self.lifecycle
    }

    /// Authority that resolves to the in-process self-listener.
    pub fn in_process_name(&self) -> &str {
        &self.service_name
    }
}

impl std::fmt::Debug for ContainerEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEnvironment")
            .field("service_name", &self.service_name)
            .field("lifecycle", &self.lifecycle.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{Lifecycle, LifecycleState};

    fn environment(lifecycle: &Lifecycle) -> ContainerEnvironment {
        let mut configs = HashMap::new();
        configs.insert(
            "orders".to_string(),
            toml::from_str::<toml::Table>("page_size = 25").unwrap(),
        );
        ContainerEnvironment::new(
            "orders",
            ChannelRegistry::new(["orders".to_string()], HashMap::new()),
            HealthReporter::new(),
            lifecycle.handle(),
            configs,
        )
    }

    #[test]
    fn service_config_defaults_to_empty() {
        let lifecycle = Lifecycle::new();
        let env = environment(&lifecycle);
        assert_eq!(
            env.service_config("orders").get("page_size").and_then(|v| v.as_integer()),
            Some(25)
        );
        assert!(env.service_config("billing").is_empty());
    }

    #[test]
    fn reports_status_through_shared_reporter() {
        let lifecycle = Lifecycle::new();
        let env = environment(&lifecycle);
        env.report_service_status("orders", ServingStatus::NotServing);
        assert_eq!(
            env.clone().health_reporter().status("orders"),
            Some(ServingStatus::NotServing)
        );
    }

    #[test]
    fn lifecycle_view_follows_owner() {
        let lifecycle = Lifecycle::new();
        let env = environment(&lifecycle);
        lifecycle
            .transition(LifecycleState::NotStarted, LifecycleState::Initializing)
            .unwrap();
        assert_eq!(env.lifecycle().state(), LifecycleState::Initializing);
        assert_eq!(env.in_process_name(), "orders");
    }
}
