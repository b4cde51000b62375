//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses parse and backend names and addresses are unique
//! - Validate value ranges (grace period > 0)
//! - Refuse to expose the admin API with the placeholder key
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatcherConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{DispatcherConfig, PLACEHOLDER_API_KEY};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("no backends configured")]
    NoBackends,
    #[error("backend #{index} has an empty name")]
    EmptyBackendName { index: usize },
    #[error("duplicate backend name {0:?}")]
    DuplicateBackendName(String),
    #[error("backend {name:?} has invalid address {address:?}")]
    InvalidBackendAddress { name: String, address: String },
    #[error("backend {name:?} reuses address {address}")]
    DuplicateBackendAddress { name: String, address: SocketAddr },
    #[error("{field} is not a valid socket address: {value:?}")]
    InvalidBindAddress { field: &'static str, value: String },
    #[error("shutdown.grace_secs must be greater than zero")]
    ZeroGracePeriod,
    #[error("admin API is enabled without a real api_key")]
    InsecureAdminKey,
}

pub fn validate_config(config: &DispatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut seen = HashSet::new();
    let mut addresses = HashSet::new();
    for (index, backend) in config.backends.iter().enumerate() {
        if backend.name.trim().is_empty() {
            errors.push(ValidationError::EmptyBackendName { index });
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackendName(backend.name.clone()));
        }
        match backend.address.parse::<SocketAddr>() {
            Ok(address) if !addresses.insert(address) => {
                errors.push(ValidationError::DuplicateBackendAddress {
                    name: backend.name.clone(),
                    address,
                });
            }
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::InvalidBackendAddress {
                name: backend.name.clone(),
                address: backend.address.clone(),
            }),
        }
    }

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.shutdown.grace_secs == 0 {
        errors.push(ValidationError::ZeroGracePeriod);
    }

    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        let key = config.admin.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::InsecureAdminKey);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress {
            field,
            value: value.to_string(),
        });
    }
}
