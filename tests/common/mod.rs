//! Shared utilities for container integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{routing::get, Router};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use service_container::config::ContainerConfig;
use service_container::container::{ContainerEnvironment, ListenerDefinition, ServiceHandler};
use service_container::health::{HealthReporter, OVERALL_SERVICE};
use service_container::net::{ChannelRegistry, InProcessState, Listener, ListenerError, Transport};

/// Config with short deadlines and metrics off.
pub fn test_config(service: &str) -> ContainerConfig {
    let mut config = ContainerConfig::default();
    config.service.name = service.to_string();
    config.deadlines.listener_shutdown_ms = 200;
    config.deadlines.registry_shutdown_ms = 200;
    config.deadlines.health_check_ms = 1_000;
    config.deadlines.admin_shutdown_ms = 200;
    config.observability.metrics_enabled = false;
    config
}

/// Definition on an ephemeral loopback port serving one `ping` handler.
pub fn ping_definition(name: &str) -> ListenerDefinition {
    ListenerDefinition::new(name, "127.0.0.1:0".parse().unwrap()).with_factory(ping_factory)
}

pub fn ping_factory(_: &ContainerEnvironment) -> Vec<ServiceHandler> {
    vec![ServiceHandler::new(
        "ping",
        Router::new().route("/", get(|| async { "pong" })),
    )]
}

/// Ordered log of listener lifecycle events. When a self-listener is
/// observed, its state at each event is recorded too.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
    self_listener: Arc<Mutex<Option<(ChannelRegistry, String)>>>,
    self_states: Arc<Mutex<HashMap<String, InProcessState>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        let event = event.into();
        let observed = self.self_listener.lock().clone();
        if let Some((registry, name)) = observed {
            if let Some(state) = registry.in_process_state(&name) {
                self.self_states.lock().insert(event.clone(), state);
            }
        }
        self.entries.lock().push(event);
    }

    /// State of the observed self-listener when `event` was recorded.
    pub fn self_state_at(&self, event: &str) -> Option<InProcessState> {
        self.self_states.lock().get(event).copied()
    }

    pub fn events(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == event)
    }
}

/// Transport that builds [`RecordingListener`]s instead of binding sockets.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub events: EventLog,
    hanging: Arc<HashSet<String>>,
    failing: Arc<HashSet<String>>,
    start_delay: Duration,
    health: Arc<Mutex<Option<HealthReporter>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners with these names ignore graceful shutdown.
    pub fn hanging(mut self, names: &[&str]) -> Self {
        self.hanging = Arc::new(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Listeners with these names fail to start.
    pub fn failing(mut self, names: &[&str]) -> Self {
        self.failing = Arc::new(names.iter().map(|n| n.to_string()).collect());
        self
    }

    /// Every listener takes `delay` to start.
    pub fn slow_start(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Record the overall health status each listener observes at shutdown.
    pub fn observe_health(&self, reporter: HealthReporter) {
        *self.health.lock() = Some(reporter);
    }

    /// Record the state of the self-listener `name` at every event.
    pub fn observe_self_listener(&self, registry: ChannelRegistry, name: &str) {
        *self.events.self_listener.lock() = Some((registry, name.to_string()));
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn bind(
        &self,
        definition: &ListenerDefinition,
        _router: Router,
    ) -> Result<Arc<dyn Listener>, ListenerError> {
        let name = definition.name().to_string();
        self.events.push(format!("bind:{name}"));
        let (terminated, _) = watch::channel(false);
        Ok(Arc::new(RecordingListener {
            hangs: self.hanging.contains(&name),
            fails: self.failing.contains(&name),
            start_delay: self.start_delay,
            name,
            events: self.events.clone(),
            health: Arc::clone(&self.health),
            terminated,
        }))
    }
}

pub struct RecordingListener {
    name: String,
    events: EventLog,
    health: Arc<Mutex<Option<HealthReporter>>>,
    hangs: bool,
    fails: bool,
    start_delay: Duration,
    terminated: watch::Sender<bool>,
}

#[async_trait]
impl Listener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn start(&self) -> Result<(), ListenerError> {
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fails {
            self.events.push(format!("start-failed:{}", self.name));
            return Err(ListenerError::NotStartable {
                listener: self.name.clone(),
            });
        }
        self.events.push(format!("start:{}", self.name));
        Ok(())
    }

    fn shutdown(&self) {
        let status = self
            .health
            .lock()
            .as_ref()
            .and_then(|reporter| reporter.status(OVERALL_SERVICE));
        match status {
            Some(status) => self.events.push(format!("shutdown:{}:{:?}", self.name, status)),
            None => self.events.push(format!("shutdown:{}", self.name)),
        }
        if !self.hangs {
            self.terminated.send_replace(true);
        }
    }

    fn shutdown_now(&self) {
        self.events.push(format!("shutdown-now:{}", self.name));
        self.terminated.send_replace(true);
    }

    async fn await_termination(&self) {
        let mut rx = self.terminated.subscribe();
        let _ = rx.wait_for(|terminated| *terminated).await;
    }
}
