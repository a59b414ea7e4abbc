//! Process-level service container.
//!
//! Hosts one service behind any number of networked listeners plus an
//! in-process self-listener, drives them through a single lifecycle, runs
//! managed periodic tasks and answers loopback health checks.

pub mod admin;
pub mod config;
pub mod container;
pub mod health;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ContainerConfig;
pub use container::{
    Container, ContainerEnvironment, ContainerError, ListenerDefinition, PeriodicTaskDefinition,
    ServiceHandler,
};
pub use lifecycle::LifecycleState;
