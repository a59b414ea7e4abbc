//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Listener names unique and distinct from the service name
//! - Bind addresses parse, limits and deadlines are non-zero
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: ContainerConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::ContainerConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service name must not be empty")]
    EmptyServiceName,
    #[error("listener #{index} has an empty name")]
    EmptyListenerName { index: usize },
    #[error("listener `{0}` is declared more than once")]
    DuplicateListener(String),
    #[error("listener `{0}` has the same name as the service")]
    ListenerNamedAfterService(String),
    #[error("listener `{listener}` has an invalid bind address `{address}`")]
    InvalidBindAddress { listener: String, address: String },
    #[error("listener `{0}` must allow at least one connection")]
    ZeroConnections(String),
    #[error("deadline `{0}` must be greater than zero")]
    ZeroDeadline(&'static str),
    #[error("admin bind address `{0}` is invalid")]
    InvalidAdminAddress(String),
}

/// Check a parsed config for semantic errors.
pub fn validate_config(config: &ContainerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }

    let mut seen = HashSet::new();
    for (index, listener) in config.listeners.iter().enumerate() {
        if listener.name.trim().is_empty() {
            errors.push(ValidationError::EmptyListenerName { index });
            continue;
        }
        if !seen.insert(listener.name.as_str()) {
            errors.push(ValidationError::DuplicateListener(listener.name.clone()));
        }
        if listener.name == config.service.name {
            errors.push(ValidationError::ListenerNamedAfterService(listener.name.clone()));
        }
        if listener.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::InvalidBindAddress {
                listener: listener.name.clone(),
                address: listener.bind_address.clone(),
            });
        }
        if listener.max_connections == 0 {
            errors.push(ValidationError::ZeroConnections(listener.name.clone()));
        }
    }

    let deadlines = [
        ("listener_shutdown_ms", config.deadlines.listener_shutdown_ms),
        ("registry_shutdown_ms", config.deadlines.registry_shutdown_ms),
        ("health_check_ms", config.deadlines.health_check_ms),
        ("admin_shutdown_ms", config.deadlines.admin_shutdown_ms),
    ];
    for (name, value) in deadlines {
        if value == 0 {
            errors.push(ValidationError::ZeroDeadline(name));
        }
    }

    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAdminAddress(config.admin.bind_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ListenerConfig;

    fn listener(name: &str, address: &str) -> ListenerConfig {
        ListenerConfig {
            name: name.to_string(),
            bind_address: address.to_string(),
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ContainerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ContainerConfig::default();
        config.service.name = "orders".into();
        config.listeners = vec![
            listener("public", "127.0.0.1:9000"),
            listener("public", "nowhere"),
            listener("orders", "127.0.0.1:9002"),
        ];
        config.deadlines.health_check_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateListener("public".into()),
                ValidationError::InvalidBindAddress {
                    listener: "public".into(),
                    address: "nowhere".into(),
                },
                ValidationError::ListenerNamedAfterService("orders".into()),
                ValidationError::ZeroDeadline("health_check_ms"),
            ]
        );
    }

    #[test]
    fn rejects_empty_names() {
        let mut config = ContainerConfig::default();
        config.service.name = " ".into();
        config.listeners = vec![listener("", "127.0.0.1:9000")];

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::EmptyServiceName));
        assert!(errors.contains(&ValidationError::EmptyListenerName { index: 0 }));
    }

    #[test]
    fn admin_address_checked_only_when_enabled() {
        let mut config = ContainerConfig::default();
        config.admin.bind_address = "bogus".into();
        assert!(validate_config(&config).is_ok());

        config.admin.enabled = true;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::InvalidAdminAddress("bogus".into())]
        );
    }
}
