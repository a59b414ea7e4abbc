//! Listener abstraction and the TCP transport.
//!
//! # Responsibilities
//! - Define the lifecycle surface every listener exposes to the container
//! - Bind networked listeners during build so address conflicts fail early
//! - Accept connections with a `max_connections` backpressure semaphore
//! - Serve HTTP/1.1 and HTTP/2 on each connection, draining gracefully
//!
//! # Data Flow
//! ```text
//! ListenerDefinition + Router
//!     → Transport::bind (socket bound, not accepting)
//!     → Listener::start (accept loop spawned on the executor)
//!     → Listener::shutdown (stop accepting, drain connections)
//!     → Listener::await_termination
//! ```

use async_trait::async_trait;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::container::{ListenerDefinition, ListenerLimits};
use crate::net::connection::ConnectionTracker;

/// Pause after a failed accept so a persistent error (e.g. EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind listener `{listener}` to {address}: {source}")]
    Bind {
        listener: String,
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("listener `{listener}` failed to start accepting: {source}")]
    Start {
        listener: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listener `{listener}` cannot be started in its current state")]
    NotStartable { listener: String },
}

/// A constructed endpoint the container starts, drains and awaits.
#[async_trait]
pub trait Listener: Send + Sync {
    fn name(&self) -> &str;

    /// Bound address, for listeners that have one.
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Begin accepting. Fails if the listener cannot accept traffic.
    async fn start(&self) -> Result<(), ListenerError>;

    /// Stop accepting new work and let in-flight work finish.
    fn shutdown(&self);

    /// Abandon in-flight work.
    fn shutdown_now(&self);

    /// Resolves once the listener has fully terminated.
    async fn await_termination(&self);
}

/// Turns a definition and its assembled router into a bound listener.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn bind(
        &self,
        definition: &ListenerDefinition,
        router: Router,
    ) -> Result<Arc<dyn Listener>, ListenerError>;
}

/// Default transport: plain TCP serving HTTP/1.1 and HTTP/2.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn bind(
        &self,
        definition: &ListenerDefinition,
        router: Router,
    ) -> Result<Arc<dyn Listener>, ListenerError> {
        Ok(Arc::new(NetworkListener::bind(definition, router)?))
    }
}

/// A TCP listener bound at build time and serving once started.
pub struct NetworkListener {
    name: String,
    local_addr: SocketAddr,
    limits: ListenerLimits,
    router: Router,
    executor: Handle,
    /// Bound socket waiting for `start`; taken exactly once.
    pending: Mutex<Option<std::net::TcpListener>>,
    shutdown_tx: watch::Sender<bool>,
    terminated: Arc<watch::Sender<bool>>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    connections: ConnectionTracker,
}

impl NetworkListener {
    /// Bind the definition's address. The socket is listening but nothing is
    /// accepted until [`Listener::start`].
    pub fn bind(definition: &ListenerDefinition, router: Router) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            listener: definition.name().to_string(),
            address: definition.bind_address(),
            source,
        };

        let socket = std::net::TcpListener::bind(definition.bind_address()).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        let limits = definition.limits();
        tracing::info!(
            listener = %definition.name(),
            address = %local_addr,
            max_connections = limits.max_connections,
            max_inbound_message_size = limits.max_inbound_message_size,
            "Listener bound"
        );

        let mut router = router.layer(TraceLayer::new_for_http());
        if limits.max_inbound_message_size > 0 {
            router = router.layer(RequestBodyLimitLayer::new(limits.max_inbound_message_size));
        }

        let executor = definition
            .executor()
            .cloned()
            .unwrap_or_else(Handle::current);

        let (shutdown_tx, _) = watch::channel(false);
        let (terminated, _) = watch::channel(false);

        Ok(Self {
            name: definition.name().to_string(),
            local_addr,
            limits,
            router,
            executor,
            pending: Mutex::new(Some(socket)),
            shutdown_tx,
            terminated: Arc::new(terminated),
            serve_task: Mutex::new(None),
            connections: ConnectionTracker::new(),
        })
    }

    /// Connections currently being served.
    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }
}

#[async_trait]
impl Listener for NetworkListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }

    async fn start(&self) -> Result<(), ListenerError> {
        let socket = self
            .pending
            .lock()
            .take()
            .ok_or_else(|| ListenerError::NotStartable {
                listener: self.name.clone(),
            })?;

        // Register the socket with the executor's reactor, not the caller's.
        let listener = {
            let _runtime = self.executor.enter();
            TcpListener::from_std(socket)
        }
        .map_err(|source| ListenerError::Start {
            listener: self.name.clone(),
            source,
        })?;

        let name = self.name.clone();
        let router = self.router.clone();
        let limits = self.limits;
        let connections = self.connections.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let terminated = Arc::clone(&self.terminated);

        let task = self.executor.spawn(async move {
            serve(&name, listener, router, limits, connections, shutdown_rx).await;
            terminated.send_replace(true);
            tracing::info!(listener = %name, "Listener terminated");
        });
        *self.serve_task.lock() = Some(task);

        tracing::info!(listener = %self.name, address = %self.local_addr, "Listener accepting connections");
        Ok(())
    }

    fn shutdown(&self) {
        tracing::info!(
            listener = %self.name,
            active_connections = self.connections.active_count(),
            "Listener draining"
        );
        self.shutdown_tx.send_replace(true);
        // Never started: release the socket, nothing to drain.
        if self.pending.lock().take().is_some() {
            self.terminated.send_replace(true);
        }
    }

    fn shutdown_now(&self) {
        tracing::warn!(
            listener = %self.name,
            active_connections = self.connections.active_count(),
            "Forcing listener shutdown"
        );
        self.shutdown_tx.send_replace(true);
        self.pending.lock().take();
        if let Some(task) = self.serve_task.lock().take() {
            task.abort();
        }
        self.terminated.send_replace(true);
    }

    async fn await_termination(&self) {
        let mut rx = self.terminated.subscribe();
        // The sender lives in `self`, so the channel stays open while we wait.
        let _ = rx.wait_for(|terminated| *terminated).await;
    }
}

/// Resolves once shutdown is requested, even if that happened before `rx`
/// subscribed.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopping| *stopping).await;
}

/// Accept loop. Returns once shutdown was requested and every connection
/// has finished.
async fn serve(
    name: &str,
    listener: TcpListener,
    router: Router,
    limits: ListenerLimits,
    connections: ConnectionTracker,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(limits.max_connections.max(1)));
    let mut builder = auto::Builder::new(TokioExecutor::new());
    if limits.max_pending_reset_streams > 0 {
        builder
            .http2()
            .max_pending_accept_reset_streams(limits.max_pending_reset_streams);
    }
    let mut tasks = JoinSet::new();

    loop {
        // Acquire a slot first (backpressure), then accept.
        let permit = tokio::select! {
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown_requested(&mut shutdown_rx) => break,
        };

        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(listener = %name, error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            },
            _ = shutdown_requested(&mut shutdown_rx) => break,
        };

        let guard = connections.track();
        tracing::debug!(
            listener = %name,
            peer_addr = %peer,
            connection_id = %guard.id(),
            available_permits = permits.available_permits(),
            "Connection accepted"
        );

        let builder = builder.clone();
        let service = TowerToHyperService::new(router.clone());
        let mut connection_shutdown = shutdown_rx.clone();
        let listener_name = name.to_string();
        tasks.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let connection = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(connection);
            tokio::select! {
                result = connection.as_mut() => {
                    if let Err(e) = result {
                        tracing::debug!(listener = %listener_name, peer_addr = %peer, error = %e, "Connection error");
                    }
                }
                _ = shutdown_requested(&mut connection_shutdown) => {
                    connection.as_mut().graceful_shutdown();
                    if let Err(e) = connection.await {
                        tracing::debug!(listener = %listener_name, peer_addr = %peer, error = %e, "Connection error while draining");
                    }
                }
            }
        });

        while tasks.try_join_next().is_some() {}
    }

    drop(listener);
    tracing::info!(
        listener = %name,
        active_connections = connections.active_count(),
        "Stopped accepting connections"
    );
    while tasks.join_next().await.is_some() {}
}
