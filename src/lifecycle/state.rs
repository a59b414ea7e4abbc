//! Container lifecycle state machine.
//!
//! # States
//! ```text
//! NotStarted → Initializing → Initialized → Starting → Started → Stopping → Stopped
//! ```
//!
//! # Design Decisions
//! - Strictly monotonic: a transition only ever moves forward
//! - Backed by a watch channel so any number of observers can read or await it
//! - `Stopped` doubles as the one-shot "shutdown complete" signal

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Phase of a container's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    NotStarted,
    Initializing,
    Initialized,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::NotStarted => "NOT_STARTED",
            LifecycleState::Initializing => "INITIALIZING",
            LifecycleState::Initialized => "INITIALIZED",
            LifecycleState::Starting => "STARTING",
            LifecycleState::Started => "STARTED",
            LifecycleState::Stopping => "STOPPING",
            LifecycleState::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owning side of the state cell. Only the container holds one.
#[derive(Debug)]
pub struct Lifecycle {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    /// Create a new cell in `NotStarted`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::NotStarted);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    /// Move from `from` to `to` atomically.
    ///
    /// Fails with the observed state if the cell is not at `from`.
    pub fn transition(&self, from: LifecycleState, to: LifecycleState) -> Result<(), LifecycleState> {
        debug_assert!(to > from, "lifecycle transitions must move forward");
        let mut observed = from;
        let moved = self.tx.send_if_modified(|state| {
            observed = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if moved {
            tracing::debug!(from = %from, to = %to, "Lifecycle transition");
            Ok(())
        } else {
            Err(observed)
        }
    }

    /// Read-only handle for collaborators.
    pub fn handle(&self) -> LifecycleHandle {
        LifecycleHandle {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a container's lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleHandle {
    rx: watch::Receiver<LifecycleState>,
}

impl LifecycleHandle {
    /// Current state.
    pub fn state(&self) -> LifecycleState {
        *self.rx.borrow()
    }

    /// Wait until the state satisfies `predicate`, returning the matching state.
    ///
    /// Never resolves if the owning container is dropped first.
    pub async fn wait_for(&self, predicate: impl Fn(LifecycleState) -> bool) -> LifecycleState {
        let mut rx = self.rx.clone();
        let observed = rx.wait_for(|state| predicate(*state)).await.map(|state| *state);
        match observed {
            Ok(state) => state,
            Err(_) => std::future::pending().await,
        }
    }

    /// Resolves once the container has reached `Stopped`.
    pub async fn shutdown_complete(&self) {
        self.wait_for(|state| state == LifecycleState::Stopped).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn states_are_ordered() {
        assert!(LifecycleState::NotStarted < LifecycleState::Initializing);
        assert!(LifecycleState::Initialized < LifecycleState::Started);
        assert!(LifecycleState::Started < LifecycleState::Stopping);
        assert!(LifecycleState::Stopping < LifecycleState::Stopped);
    }

    #[test]
    fn transition_requires_expected_state() {
        let lifecycle = Lifecycle::new();
        assert_eq!(
            lifecycle.transition(LifecycleState::Initialized, LifecycleState::Starting),
            Err(LifecycleState::NotStarted)
        );
        assert!(lifecycle
            .transition(LifecycleState::NotStarted, LifecycleState::Initializing)
            .is_ok());
        assert_eq!(lifecycle.state(), LifecycleState::Initializing);
    }

    #[tokio::test]
    async fn shutdown_complete_resolves_on_stopped() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();

        let waiter = tokio::spawn(async move { handle.shutdown_complete().await });

        let path = [
            LifecycleState::NotStarted,
            LifecycleState::Initializing,
            LifecycleState::Initialized,
            LifecycleState::Starting,
            LifecycleState::Started,
            LifecycleState::Stopping,
        ];
        for pair in path.windows(2) {
            lifecycle.transition(pair[0], pair[1]).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        lifecycle
            .transition(LifecycleState::Stopping, LifecycleState::Stopped)
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("shutdown_complete should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_for_returns_first_matching_state() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle.handle();
        lifecycle
            .transition(LifecycleState::NotStarted, LifecycleState::Initializing)
            .unwrap();

        let observed = handle
            .wait_for(|state| state >= LifecycleState::Initializing)
            .await;
        assert_eq!(observed, LifecycleState::Initializing);
    }

    #[test]
    fn display_uses_upper_snake_case() {
        assert_eq!(LifecycleState::NotStarted.to_string(), "NOT_STARTED");
        assert_eq!(LifecycleState::Stopped.to_string(), "STOPPED");
    }
}
