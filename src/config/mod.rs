//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ContainerConfig (validated, immutable)
//!     → Container::new, ListenerDefinition::from_config
//! ```
//!
//! # Design Decisions
//! - Loaded once before initialize(); never reloaded while running
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ContainerConfig, DeadlineConfig, LauncherConfig, ListenerConfig,
    ObservabilityConfig, ServiceConfig,
};
pub use validation::ValidationError;
