//! Service container subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerDefinition (definition.rs)
//!     + HandlerFactory(ContainerEnvironment) (environment.rs)
//!     → Container::initialize (orchestrator.rs)
//!     → Container::start / stop
//!
//! PeriodicTaskDefinition (task.rs)
//!     → Container::register_task → queued or scheduled
//! ```
//!
//! # Design Decisions
//! - Listeners start in declaration order and the self-listener is last;
//!   shutdown walks the same order
//! - Every handler of every networked listener is also served in-process
//! - Lifecycle calls in the wrong state are logged no-ops

pub mod definition;
pub mod environment;
pub mod error;
pub mod orchestrator;
pub mod task;

pub use definition::{
    interceptor, HandlerFactory, Interceptor, ListenerDefinition, ListenerLimits, ServiceHandler,
};
pub use environment::ContainerEnvironment;
pub use error::ContainerError;
pub use orchestrator::Container;
pub use task::{PeriodicTaskDefinition, MAX_TASK_WORKERS};
