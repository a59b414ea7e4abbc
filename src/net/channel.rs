//! Channel registry: resolves a target authority to something callable.
//!
//! # Responsibilities
//! - Resolve the service's own name (and configured aliases) to the
//!   in-process self-listener
//! - Resolve everything else to a pooled HTTP client channel
//! - Apply a per-call deadline
//! - Refuse new calls after shutdown and drain the in-flight ones
//!
//! # Design Decisions
//! - In-process names are declared at construction; the listener itself is
//!   registered later, so channels can be created before the container starts
//! - One registry per container, shared by cloning

use axum::body::Body;
use axum::http::{uri::InvalidUri, Request, Response};
use dashmap::DashMap;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::net::connection::ConnectionTracker;
use crate::net::in_process::{InProcessListener, InProcessState};
use crate::net::listener::Listener;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("`{target}` is not accepting calls")]
    Unavailable { target: String },
    #[error("call to `{target}` exceeded its {deadline:?} deadline")]
    DeadlineExceeded { target: String, deadline: Duration },
    #[error("channel registry has been shut down")]
    RegistryShutdown,
    #[error("invalid request for `{target}`: {reason}")]
    InvalidRequest { target: String, reason: String },
    #[error("transport error calling `{target}`: {source}")]
    Transport {
        target: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },
}

struct RegistryInner {
    in_process_names: HashSet<String>,
    authority_overrides: HashMap<String, String>,
    servers: DashMap<String, Arc<InProcessListener>>,
    client: Client<HttpConnector, Body>,
    calls: ConnectionTracker,
    shut_down: AtomicBool,
}

/// Shared registry of channels for one container.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RegistryInner>,
}

impl ChannelRegistry {
    /// `in_process_names` resolve to a registered in-process listener;
    /// `authority_overrides` rewrite an authority before resolution.
    pub fn new(
        in_process_names: impl IntoIterator<Item = String>,
        authority_overrides: HashMap<String, String>,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            inner: Arc::new(RegistryInner {
                in_process_names: in_process_names.into_iter().collect(),
                authority_overrides,
                servers: DashMap::new(),
                client,
                calls: ConnectionTracker::new(),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn register_in_process(&self, listener: Arc<InProcessListener>) {
        let name = listener.name().to_string();
        tracing::debug!(listener = %name, "Registered in-process listener");
        self.inner.servers.insert(name, listener);
    }

    /// Resolve `authority` to a channel.
    pub fn for_name(&self, authority: &str) -> Result<Channel, ChannelError> {
        if self.is_shut_down() {
            return Err(ChannelError::RegistryShutdown);
        }
        let resolved = self
            .inner
            .authority_overrides
            .get(authority)
            .map(String::as_str)
            .unwrap_or(authority);

        let target = if self.inner.in_process_names.contains(resolved) {
            ChannelTarget::InProcess(resolved.to_string())
        } else {
            ChannelTarget::Remote(resolved.to_string())
        };
        tracing::debug!(authority = %authority, resolved = ?target, "Resolved channel");
        Ok(Channel {
            target,
            registry: Arc::clone(&self.inner),
        })
    }

    /// State of the in-process listener registered under `name`.
    pub fn in_process_state(&self, name: &str) -> Option<InProcessState> {
        self.inner.servers.get(name).map(|entry| entry.value().state())
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Calls currently in flight through any channel.
    pub fn in_flight_calls(&self) -> u64 {
        self.inner.calls.active_count()
    }

    /// Refuse new calls and wait up to `deadline` for in-flight ones.
    /// Returns `true` if the registry drained in time.
    pub async fn shutdown(&self, deadline: Duration) -> bool {
        self.inner.shut_down.store(true, Ordering::Release);
        tracing::info!(
            in_flight = self.in_flight_calls(),
            deadline_ms = deadline.as_millis() as u64,
            "Shutting down channel registry"
        );
        match tokio::time::timeout(deadline, self.inner.calls.wait_idle()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    in_flight = self.in_flight_calls(),
                    "Channel registry did not drain before its deadline"
                );
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
enum ChannelTarget {
    InProcess(String),
    Remote(String),
}

/// A resolved call target.
#[derive(Clone)]
pub struct Channel {
    target: ChannelTarget,
    registry: Arc<RegistryInner>,
}

impl Channel {
    pub fn target(&self) -> &str {
        match &self.target {
            ChannelTarget::InProcess(name) | ChannelTarget::Remote(name) => name,
        }
    }

    pub fn is_in_process(&self) -> bool {
        matches!(self.target, ChannelTarget::InProcess(_))
    }

    /// Send `request` (path and query only; the authority comes from the
    /// channel) and wait at most `deadline` for the response head.
    pub async fn call(
        &self,
        request: Request<Body>,
        deadline: Duration,
    ) -> Result<Response<Body>, ChannelError> {
        if self.registry.shut_down.load(Ordering::Acquire) {
            return Err(ChannelError::RegistryShutdown);
        }
        let _guard = self.registry.calls.track();

        let call = async {
            match &self.target {
                ChannelTarget::InProcess(name) => {
                    let server = self
                        .registry
                        .servers
                        .get(name)
                        .map(|entry| Arc::clone(entry.value()))
                        .ok_or_else(|| ChannelError::Unavailable {
                            target: name.clone(),
                        })?;
                    server.call(request).await
                }
                ChannelTarget::Remote(authority) => self.call_remote(authority, request).await,
            }
        };

        tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| ChannelError::DeadlineExceeded {
                target: self.target().to_string(),
                deadline,
            })?
    }

    async fn call_remote(
        &self,
        authority: &str,
        request: Request<Body>,
    ) -> Result<Response<Body>, ChannelError> {
        let (mut parts, body) = request.into_parts();
        let path = parts
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        parts.uri = format!("http://{authority}{path}")
            .parse()
            .map_err(|e: InvalidUri| ChannelError::InvalidRequest {
                target: authority.to_string(),
                reason: e.to_string(),
            })?;

        let response: Response<hyper::body::Incoming> = self
            .registry
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|source| ChannelError::Transport {
                target: authority.to_string(),
                source,
            })?;
        Ok(response.map(Body::new))
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("target", &self.target).finish()
    }
}
