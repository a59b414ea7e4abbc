//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Handlers / container
//!     → reporter.rs (per-service ServingStatus, terminal on shutdown)
//!     → service.rs (health capability, mounted on the self-listener)
//!     ← probe.rs (loopback check through the in-process channel)
//!     ← Container::health_check, admin /health
//! ```
//!
//! # Design Decisions
//! - The probe exercises the same dispatch path real in-process calls use
//! - Unknown status is treated as healthy; only NotServing fails
//! - Terminal state is one-way so a late report cannot revive a stopping service

pub mod probe;
pub mod reporter;
pub mod service;

pub use probe::HealthProbe;
pub use reporter::{HealthReporter, ServingStatus, OVERALL_SERVICE};
pub use service::{health_handler, HEALTH_CHECK_PATH, HEALTH_HANDLER_NAME};
