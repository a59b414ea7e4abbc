//! The in-process self-listener.
//!
//! Serves every handler of every networked listener plus the health
//! capability, reachable only through the [`ChannelRegistry`] under the
//! service's own name. Calls never touch a socket.
//!
//! # States
//! ```text
//! Pending → Serving → Draining → Terminated
//!    └──────────────────────────────↗ (shutdown before start)
//! ```
//!
//! [`ChannelRegistry`]: crate::net::channel::ChannelRegistry

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceExt;

use crate::net::channel::ChannelError;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::{Listener, ListenerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProcessState {
    Pending,
    Serving,
    Draining,
    Terminated,
}

pub struct InProcessListener {
    name: String,
    router: Router,
    state: Arc<watch::Sender<InProcessState>>,
    calls: ConnectionTracker,
}

impl InProcessListener {
    pub fn new(name: impl Into<String>, router: Router) -> Self {
        let (state, _) = watch::channel(InProcessState::Pending);
        Self {
            name: name.into(),
            router,
            state: Arc::new(state),
            calls: ConnectionTracker::new(),
        }
    }

    pub fn state(&self) -> InProcessState {
        *self.state.borrow()
    }

    /// Calls currently executing.
    pub fn in_flight(&self) -> u64 {
        self.calls.active_count()
    }

    /// Dispatch one call to the served router.
    pub async fn call(&self, request: Request<Body>) -> Result<Response<Body>, ChannelError> {
        // Track before checking state so a concurrent drain cannot miss us.
        let _guard = self.calls.track();
        if self.state() != InProcessState::Serving {
            return Err(ChannelError::Unavailable {
                target: self.name.clone(),
            });
        }
        match self.router.clone().oneshot(request).await {
            Ok(response) => Ok(response),
            Err(never) => match never {},
        }
    }

    fn advance(&self, from: InProcessState, to: InProcessState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }
}

#[async_trait]
impl Listener for InProcessListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    async fn start(&self) -> Result<(), ListenerError> {
        if self.advance(InProcessState::Pending, InProcessState::Serving) {
            tracing::info!(listener = %self.name, "In-process listener serving");
            Ok(())
        } else {
            Err(ListenerError::NotStartable {
                listener: self.name.clone(),
            })
        }
    }

    fn shutdown(&self) {
        if self.advance(InProcessState::Pending, InProcessState::Terminated) {
            return;
        }
        if !self.advance(InProcessState::Serving, InProcessState::Draining) {
            return;
        }
        tracing::info!(
            listener = %self.name,
            in_flight = self.calls.active_count(),
            "In-process listener draining"
        );
        let calls = self.calls.clone();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            calls.wait_idle().await;
            state.send_if_modified(|state| {
                if *state == InProcessState::Draining {
                    *state = InProcessState::Terminated;
                    true
                } else {
                    false
                }
            });
        });
    }

    fn shutdown_now(&self) {
        self.state.send_replace(InProcessState::Terminated);
    }

    async fn await_termination(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx
            .wait_for(|state| *state == InProcessState::Terminated)
            .await;
    }
}
