//! Declarative listener descriptors.
//!
//! A [`ListenerDefinition`] says what to build: where to bind, which handler
//! factories contribute capabilities, which interceptors wrap them, and what
//! transport limits apply. It is plain data; the container does the building.

use axum::Router;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::config::ListenerConfig;
use crate::container::environment::ContainerEnvironment;

/// One capability contributed to a listener, mounted at `/{name}`.
#[derive(Clone)]
pub struct ServiceHandler {
    name: String,
    router: Router,
}

impl ServiceHandler {
    pub fn new(name: impl Into<String>, router: Router) -> Self {
        Self {
            name: name.into(),
            router,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub(crate) fn into_parts(self) -> (String, Router) {
        (self.name, self.router)
    }
}

impl fmt::Debug for ServiceHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandler").field("name", &self.name).finish()
    }
}

/// Produces the handlers a listener serves, given the shared environment.
pub trait HandlerFactory: Send + Sync {
    fn build_handlers(&self, environment: &ContainerEnvironment) -> Vec<ServiceHandler>;
}

impl<F> HandlerFactory for F
where
    F: Fn(&ContainerEnvironment) -> Vec<ServiceHandler> + Send + Sync,
{
    fn build_handlers(&self, environment: &ContainerEnvironment) -> Vec<ServiceHandler> {
        self(environment)
    }
}

/// Wraps a handler's router. Applied in declaration order, so the last one
/// added sees requests first.
pub type Interceptor = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Build an [`Interceptor`] from a closure.
pub fn interceptor<F>(f: F) -> Interceptor
where
    F: Fn(Router) -> Router + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Transport guards for one listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerLimits {
    /// Maximum request body in bytes; 0 disables the check.
    pub max_inbound_message_size: usize,
    /// HTTP/2 reset streams allowed to pile up before the connection is
    /// closed; 0 disables the guard.
    pub max_pending_reset_streams: usize,
    /// Maximum concurrent connections (accept backpressure).
    pub max_connections: usize,
}

impl ListenerLimits {
    pub const DEFAULT_MAX_PENDING_RESET_STREAMS: usize = 500;
    pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;
}

impl Default for ListenerLimits {
    fn default() -> Self {
        Self {
            max_inbound_message_size: 0,
            max_pending_reset_streams: Self::DEFAULT_MAX_PENDING_RESET_STREAMS,
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Immutable descriptor of one networked listener.
#[derive(Clone)]
pub struct ListenerDefinition {
    name: String,
    bind_address: SocketAddr,
    limits: ListenerLimits,
    factories: Vec<Arc<dyn HandlerFactory>>,
    interceptors: Vec<Interceptor>,
    executor: Option<Handle>,
}

impl ListenerDefinition {
    /// A definition with default limits and nothing to serve yet.
    pub fn new(name: impl Into<String>, bind_address: SocketAddr) -> Self {
        Self {
            name: name.into(),
            bind_address,
            limits: ListenerLimits::default(),
            factories: Vec::new(),
            interceptors: Vec::new(),
            executor: None,
        }
    }

    /// Build a definition from its `[[listeners]]` config entry.
    pub fn from_config(config: &ListenerConfig) -> Result<Self, std::net::AddrParseError> {
        let bind_address: SocketAddr = config.bind_address.parse()?;
        Ok(Self::new(config.name.clone(), bind_address).with_limits(ListenerLimits {
            max_inbound_message_size: config.max_inbound_message_size,
            max_pending_reset_streams: config.max_pending_reset_streams,
            max_connections: config.max_connections,
        }))
    }

    pub fn with_factory(mut self, factory: impl HandlerFactory + 'static) -> Self {
        self.factories.push(Arc::new(factory));
        self
    }

    pub fn with_interceptor(mut self, interceptor: Interceptor) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn with_limits(mut self, limits: ListenerLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Run this listener's accept loop and connections on a dedicated runtime.
    pub fn with_executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    pub fn limits(&self) -> ListenerLimits {
        self.limits
    }

    pub fn factories(&self) -> &[Arc<dyn HandlerFactory>] {
        &self.factories
    }

    pub fn interceptors(&self) -> &[Interceptor] {
        &self.interceptors
    }

    pub fn executor(&self) -> Option<&Handle> {
        self.executor.as_ref()
    }

    /// Apply this definition's interceptors to one handler's router.
    pub(crate) fn intercept(&self, router: Router) -> Router {
        self.interceptors
            .iter()
            .fold(router, |router, interceptor| interceptor(router))
    }
}

impl fmt::Debug for ListenerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerDefinition")
            .field("name", &self.name)
            .field("bind_address", &self.bind_address)
            .field("limits", &self.limits)
            .field("factories", &self.factories.len())
            .field("interceptors", &self.interceptors.len())
            .field("dedicated_executor", &self.executor.is_some())
            .finish()
    }
}

/// Whether `name` can be mounted as a single path segment.
pub(crate) fn is_valid_handler_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_copies_limits() {
        let config = ListenerConfig {
            name: "public".into(),
            bind_address: "127.0.0.1:0".into(),
            max_inbound_message_size: 4096,
            max_pending_reset_streams: 7,
            max_connections: 3,
        };
        let definition = ListenerDefinition::from_config(&config).unwrap();
        assert_eq!(definition.name(), "public");
        assert_eq!(definition.limits().max_inbound_message_size, 4096);
        assert_eq!(definition.limits().max_pending_reset_streams, 7);
        assert_eq!(definition.limits().max_connections, 3);
    }

    #[test]
    fn from_config_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            ..ListenerConfig::default()
        };
        assert!(ListenerDefinition::from_config(&config).is_err());
    }

    #[test]
    fn handler_names_are_path_segments() {
        assert!(is_valid_handler_name("orders.v1"));
        assert!(is_valid_handler_name("order_service-2"));
        assert!(!is_valid_handler_name(""));
        assert!(!is_valid_handler_name("a/b"));
        assert!(!is_valid_handler_name("{id}"));
    }

    #[test]
    fn builder_methods_accumulate() {
        let definition = ListenerDefinition::new("internal", "127.0.0.1:0".parse().unwrap())
            .with_factory(|_: &ContainerEnvironment| Vec::<ServiceHandler>::new())
            .with_factory(|_: &ContainerEnvironment| Vec::<ServiceHandler>::new())
            .with_interceptor(interceptor(|router| router));
        assert_eq!(definition.factories().len(), 2);
        assert_eq!(definition.interceptors().len(), 1);
        assert!(definition.executor().is_none());
    }
}
