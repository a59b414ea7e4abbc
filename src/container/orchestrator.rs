//! The container: builds, starts, supervises and stops every listener.
//!
//! # Data Flow
//! ```text
//! initialize(definitions)
//!     → validate listener names
//!     → per definition: factories(env) → handlers → interceptors
//!         → networked router   → Transport::bind
//!         → in-process router  (every handler, plus health)
//!     → self-listener registered with the channel registry
//!
//! start()
//!     → admin surface → flush queued tasks → start listeners in order
//!     → Started → wait for every listener to terminate
//!
//! stop()
//!     → cancel tasks → health terminal → drain listeners in order
//!     → release channel registry → release admin → Stopped
//! ```

use arc_swap::ArcSwap;
use axum::middleware;
use axum::Router;
use futures_util::future::join_all;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::admin::{AdminServer, AdminState};
use crate::config::ContainerConfig;
use crate::container::definition::{is_valid_handler_name, ListenerDefinition};
use crate::container::environment::ContainerEnvironment;
use crate::container::error::ContainerError;
use crate::container::task::{PeriodicTaskDefinition, TaskScheduler};
use crate::health::{health_handler, HealthProbe, HealthReporter, HEALTH_HANDLER_NAME};
use crate::lifecycle::{Lifecycle, LifecycleHandle, LifecycleState};
use crate::net::channel::ChannelRegistry;
use crate::net::in_process::InProcessListener;
use crate::net::listener::{Listener, TcpTransport, Transport};
use crate::observability::metrics;

struct ConstructedListener {
    name: String,
    listener: Arc<dyn Listener>,
}

/// Owns the listeners of one process-level service and drives their
/// lifecycle. Share it as `Arc<Container>`: `start` blocks until shutdown,
/// so `stop` is called from another task.
pub struct Container {
    service_name: String,
    config: ContainerConfig,
    transport: Arc<dyn Transport>,
    lifecycle: Lifecycle,
    health: HealthReporter,
    registry: ChannelRegistry,
    probe: HealthProbe,
    listeners: ArcSwap<Vec<ConstructedListener>>,
    tasks: Mutex<TaskScheduler>,
    admin: Mutex<Option<AdminServer>>,
    metrics: Mutex<Option<PrometheusHandle>>,
}

impl Container {
    pub fn new(config: ContainerConfig) -> Self {
        let service_name = config.service.name.clone();
        let overrides: HashMap<String, String> = config
            .service
            .authorities
            .iter()
            .map(|authority| (authority.clone(), service_name.clone()))
            .collect();

        let lifecycle = Lifecycle::new();
        let registry = ChannelRegistry::new([service_name.clone()], overrides);
        let probe = HealthProbe::new(
            lifecycle.handle(),
            registry.clone(),
            service_name.clone(),
            config.deadlines.health_check(),
        );

        Self {
            service_name,
            config,
            transport: Arc::new(TcpTransport),
            lifecycle,
            health: HealthReporter::new(),
            registry,
            probe,
            listeners: ArcSwap::from_pointee(Vec::new()),
            tasks: Mutex::new(TaskScheduler::new()),
            admin: Mutex::new(None),
            metrics: Mutex::new(None),
        }
    }

    /// Replace the transport used to bind networked listeners.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> LifecycleHandle {
        self.lifecycle.handle()
    }

    pub fn health_reporter(&self) -> &HealthReporter {
        &self.health
    }

    pub fn channel_registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// The environment handed to handler factories.
    pub fn environment(&self) -> ContainerEnvironment {
        ContainerEnvironment::new(
            self.service_name.as_str(),
            self.registry.clone(),
            self.health.clone(),
            self.lifecycle.handle(),
            self.config.services.clone(),
        )
    }

    /// Listener names in start order; the self-listener is last.
    pub fn listener_names(&self) -> Vec<String> {
        self.listeners
            .load()
            .iter()
            .map(|constructed| constructed.name.clone())
            .collect()
    }

    /// Bound address of each networked listener.
    pub fn listener_addresses(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .load()
            .iter()
            .filter_map(|constructed| {
                constructed
                    .listener
                    .local_addr()
                    .map(|addr| (constructed.name.clone(), addr))
            })
            .collect()
    }

    pub fn admin_address(&self) -> Option<SocketAddr> {
        self.admin.lock().as_ref().map(AdminServer::local_addr)
    }

    /// Build every listener. Only acts in NotStarted; later calls are logged
    /// and ignored. On error the container stays in Initializing.
    pub async fn initialize(
        &self,
        definitions: Vec<ListenerDefinition>,
    ) -> Result<(), ContainerError> {
        if let Err(state) = self
            .lifecycle
            .transition(LifecycleState::NotStarted, LifecycleState::Initializing)
        {
            tracing::info!(
                service = %self.service_name,
                state = %state,
                "Expecting state NOT_STARTED, skipping initialize"
            );
            return Ok(());
        }

        tracing::info!(
            service = %self.service_name,
            listeners = definitions.len(),
            "Initializing container"
        );
        *self.metrics.lock() = metrics::install_recorder(&self.config.observability);

        let constructed = self.build_listeners(&definitions).await?;
        let names: Vec<&str> = constructed.iter().map(|c| c.name.as_str()).collect();
        tracing::info!(listeners = ?names, "Listeners constructed");
        self.listeners.store(Arc::new(constructed));

        self.advance(LifecycleState::Initializing, LifecycleState::Initialized);
        Ok(())
    }

    async fn build_listeners(
        &self,
        definitions: &[ListenerDefinition],
    ) -> Result<Vec<ConstructedListener>, ContainerError> {
        self.check_listener_names(definitions)?;

        let environment = self.environment();
        let mut in_process_router = Router::new();
        let mut in_process_handlers = HashSet::new();
        let mut constructed = Vec::with_capacity(definitions.len() + 1);

        for definition in definitions {
            let listener_name = definition.name();
            tracing::info!(
                listener = %listener_name,
                address = %definition.bind_address(),
                "Building listener"
            );

            let mut router = Router::new();
            let mut handlers = HashSet::new();
            for factory in definition.factories() {
                for handler in factory.build_handlers(&environment) {
                    let (handler_name, handler_router) = handler.into_parts();
                    if !is_valid_handler_name(&handler_name) {
                        return Err(ContainerError::InvalidHandlerName {
                            listener: listener_name.to_string(),
                            handler: handler_name,
                        });
                    }
                    if handler_name == HEALTH_HANDLER_NAME || !handlers.insert(handler_name.clone()) {
                        return Err(ContainerError::DuplicateHandler {
                            listener: listener_name.to_string(),
                            handler: handler_name,
                        });
                    }

                    let handler_router = definition.intercept(handler_router);
                    let path = format!("/{handler_name}");
                    tracing::info!(handler = %handler_name, listener = %listener_name, "Adding handler to listener");
                    router = router.nest(&path, handler_router.clone());

                    // Several listeners may expose the same capability; the
                    // self-listener serves the first copy.
                    if in_process_handlers.insert(handler_name.clone()) {
                        tracing::debug!(handler = %handler_name, listener = %self.service_name, "Adding handler to in-process listener");
                        in_process_router = in_process_router.nest(&path, handler_router);
                    } else {
                        tracing::debug!(handler = %handler_name, listener = %listener_name, "Handler already served in-process, skipping copy");
                    }
                }
            }

            let router = router.layer(middleware::from_fn_with_state(
                Arc::<str>::from(listener_name),
                metrics::track_requests,
            ));
            let listener = self
                .transport
                .bind(definition, router)
                .await
                .map_err(|source| ContainerError::Build {
                    listener: listener_name.to_string(),
                    source,
                })?;
            constructed.push(ConstructedListener {
                name: listener_name.to_string(),
                listener,
            });
        }

        let (health_name, health_router) = health_handler(self.health.clone()).into_parts();
        let in_process_router = in_process_router
            .nest(&format!("/{health_name}"), health_router)
            .layer(middleware::from_fn_with_state(
                Arc::<str>::from(self.service_name.as_str()),
                metrics::track_requests,
            ));
        let self_listener = Arc::new(InProcessListener::new(
            self.service_name.clone(),
            in_process_router,
        ));
        self.registry.register_in_process(Arc::clone(&self_listener));
        constructed.push(ConstructedListener {
            name: self.service_name.clone(),
            listener: self_listener,
        });

        Ok(constructed)
    }

    fn check_listener_names(&self, definitions: &[ListenerDefinition]) -> Result<(), ContainerError> {
        let mut seen = HashSet::new();
        for definition in definitions {
            let name = definition.name();
            if name == self.service_name {
                return Err(ContainerError::NameCollision(name.to_string()));
            }
            if !seen.insert(name) {
                return Err(ContainerError::DuplicateListener(name.to_string()));
            }
        }
        Ok(())
    }

    /// Start every listener in order, then block until all have terminated.
    ///
    /// Only acts in Initialized; other calls are logged and return at once.
    /// If a listener fails to start, already-started listeners and scheduled
    /// tasks are torn down and the container stays in Starting.
    pub async fn start(&self) -> Result<(), ContainerError> {
        if let Err(state) = self
            .lifecycle
            .transition(LifecycleState::Initialized, LifecycleState::Starting)
        {
            tracing::info!(
                service = %self.service_name,
                state = %state,
                "Expecting state INITIALIZED, skipping start"
            );
            return Ok(());
        }

        tracing::info!(service = %self.service_name, "Starting all listeners");
        let listeners = self.listeners.load_full();

        if let Err(e) = self.start_admin(&listeners).await {
            self.abort_start(&listeners).await;
            return Err(e);
        }

        let flushed = self.tasks.lock().flush();
        tracing::info!(tasks = flushed, "Managed periodic tasks scheduled");

        for constructed in listeners.iter() {
            tracing::info!(listener = %constructed.name, "Starting listener");
            if let Err(source) = constructed.listener.start().await {
                tracing::error!(
                    listener = %constructed.name,
                    error = %source,
                    "Failed to start listener, aborting startup"
                );
                self.abort_start(&listeners).await;
                return Err(ContainerError::Start {
                    listener: constructed.name.clone(),
                    source,
                });
            }
        }

        {
            let mut tasks = self.tasks.lock();
            self.advance(LifecycleState::Starting, LifecycleState::Started);
            let late = tasks.flush();
            if late > 0 {
                tracing::info!(tasks = late, "Scheduled tasks registered during startup");
            }
        }
        tracing::info!(
            service = %self.service_name,
            listeners = listeners.len(),
            "Container is started"
        );

        join_all(listeners.iter().map(|c| c.listener.await_termination())).await;
        tracing::info!(service = %self.service_name, "All listeners terminated");
        Ok(())
    }

    async fn start_admin(&self, listeners: &[ConstructedListener]) -> Result<(), ContainerError> {
        let admin = &self.config.admin;
        if !admin.enabled {
            return Ok(());
        }
        let state = AdminState {
            service_name: Arc::from(self.service_name.as_str()),
            probe: self.probe.clone(),
            lifecycle: self.lifecycle.handle(),
            metrics: self.metrics.lock().clone(),
            listeners: Arc::new(
                listeners
                    .iter()
                    .map(|c| (c.name.clone(), c.listener.local_addr()))
                    .collect(),
            ),
        };
        let server = AdminServer::start(&admin.bind_address, state)
            .await
            .map_err(ContainerError::Admin)?;
        *self.admin.lock() = Some(server);
        Ok(())
    }

    async fn abort_start(&self, listeners: &[ConstructedListener]) {
        let cancelled = self.tasks.lock().cancel_all();
        tracing::warn!(tasks = cancelled, "Rolling back partial startup");
        let deadline = self.config.deadlines.listener_shutdown();
        for constructed in listeners {
            shutdown_listener(constructed, deadline).await;
        }
        self.release_admin().await;
    }

    /// Stop the container. Only acts in Started; other calls are logged and
    /// only release what is already held: the admin surface, and in
    /// Initialized the bound listeners. The state is left unchanged.
    pub async fn stop(&self) {
        let cancelled = {
            let mut tasks = self.tasks.lock();
            self.lifecycle
                .transition(LifecycleState::Started, LifecycleState::Stopping)
                .map(|()| tasks.cancel_all())
        };
        let cancelled = match cancelled {
            Ok(cancelled) => cancelled,
            Err(state) => {
                tracing::info!(
                    service = %self.service_name,
                    state = %state,
                    "Expecting state STARTED, skipping stop"
                );
                if state == LifecycleState::Initialized {
                    self.release_listeners();
                }
                self.release_admin().await;
                return;
            }
        };

        tracing::info!(service = %self.service_name, "Stopping container");
        tracing::info!(tasks = cancelled, "Cancelled managed periodic tasks");

        self.health.enter_terminal_state();

        let deadline = self.config.deadlines.listener_shutdown();
        for constructed in self.listeners.load_full().iter() {
            shutdown_listener(constructed, deadline).await;
        }

        self.registry
            .shutdown(self.config.deadlines.registry_shutdown())
            .await;
        self.release_admin().await;

        self.advance(LifecycleState::Stopping, LifecycleState::Stopped);
        tracing::info!(service = %self.service_name, "Container is stopped");
    }

    /// Loopback health check through the self-listener.
    pub async fn health_check(&self) -> bool {
        self.probe.check().await
    }

    /// Register a periodic task. Before Started it is queued; in Started it is
    /// scheduled at once; afterwards it is rejected.
    pub fn register_task(&self, task: PeriodicTaskDefinition) -> Result<(), ContainerError> {
        if task.period().is_zero() {
            return Err(ContainerError::InvalidTask(task.name().to_string()));
        }

        let mut tasks = self.tasks.lock();
        match self.lifecycle.state() {
            LifecycleState::Started => {
                tasks.schedule(task);
                Ok(())
            }
            state if state < LifecycleState::Started => {
                tasks.enqueue(task);
                Ok(())
            }
            state => {
                tracing::warn!(
                    task = %task.name(),
                    state = %state,
                    "Rejecting periodic task, container is shutting down"
                );
                Err(ContainerError::NotAcceptingTasks { state })
            }
        }
    }

    /// Close sockets bound by `initialize` that were never started.
    fn release_listeners(&self) {
        for constructed in self.listeners.load().iter() {
            tracing::info!(listener = %constructed.name, "Releasing listener that never started");
            constructed.listener.shutdown_now();
        }
    }

    async fn release_admin(&self) {
        let server = self.admin.lock().take();
        if let Some(server) = server {
            server.stop(self.config.deadlines.admin_shutdown()).await;
        }
    }

    fn advance(&self, from: LifecycleState, to: LifecycleState) {
        if let Err(state) = self.lifecycle.transition(from, to) {
            tracing::warn!(expected = %from, observed = %state, target_state = %to, "Unexpected lifecycle state");
        }
    }
}

async fn shutdown_listener(constructed: &ConstructedListener, deadline: Duration) {
    tracing::info!(
        listener = %constructed.name,
        deadline_ms = deadline.as_millis() as u64,
        "Shutting down listener"
    );
    constructed.listener.shutdown();
    match tokio::time::timeout(deadline, constructed.listener.await_termination()).await {
        Ok(()) => tracing::info!(listener = %constructed.name, "Listener shut down"),
        Err(_) => {
            tracing::warn!(
                listener = %constructed.name,
                "Listener did not terminate before its deadline, forcing shutdown"
            );
            constructed.listener.shutdown_now();
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("service_name", &self.service_name)
            .field("state", &self.state())
            .field("listeners", &self.listener_names())
            .finish()
    }
}
