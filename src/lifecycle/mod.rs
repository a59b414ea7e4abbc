//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! State machine (state.rs):
//!     initialize() → start() → stop()
//!     NotStarted → … → Started → Stopping → Stopped
//!     Stopped resolves shutdown_complete() for every observer
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → launcher calls Container::stop()
//! ```
//!
//! # Design Decisions
//! - Only the container mutates the state; collaborators get a read-only handle
//! - Misordered lifecycle calls are no-ops, never errors
//! - Shutdown has deadlines: no single step can hang the process

pub mod signals;
pub mod state;

pub use state::{Lifecycle, LifecycleHandle, LifecycleState};
