//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing clusters)
//! - Validate value ranges (thresholds and durations > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::routing::Destination;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("invalid bind address `{0}`")]
    InvalidBindAddress(String),

    #[error("duplicate route name `{0}`")]
    DuplicateRoute(String),

    #[error("duplicate cluster name `{0}`")]
    DuplicateCluster(String),

    #[error("route `{route}` references unknown cluster `{cluster}`")]
    UnknownCluster { route: String, cluster: String },

    #[error("cluster `{0}` has no destinations")]
    EmptyCluster(String),

    #[error("cluster `{cluster}` has invalid destination `{address}`")]
    InvalidDestination { cluster: String, address: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let positive: [(&'static str, u64); 8] = [
        ("listener.max_body_bytes", config.listener.max_body_bytes as u64),
        ("cache.ttl_secs", config.cache.ttl_secs),
        ("cache.max_entry_bytes", config.cache.max_entry_bytes as u64),
        ("cache.sweep_interval_secs", config.cache.sweep_interval_secs),
        ("circuit_breaker.failure_threshold", config.circuit_breaker.failure_threshold as u64),
        ("circuit_breaker.break_duration_secs", config.circuit_breaker.break_duration_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.upstream_secs", config.timeouts.upstream_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::ZeroValue { field });
        }
    }

    let mut clusters = HashSet::new();
    for cluster in &config.clusters {
        if !clusters.insert(cluster.name.as_str()) {
            errors.push(ValidationError::DuplicateCluster(cluster.name.clone()));
        }
        if cluster.destinations.is_empty() {
            errors.push(ValidationError::EmptyCluster(cluster.name.clone()));
        }
        for address in &cluster.destinations {
            if Destination::parse(address).is_none() {
                errors.push(ValidationError::InvalidDestination {
                    cluster: cluster.name.clone(),
                    address: address.clone(),
                });
            }
        }
    }

    let mut routes = HashSet::new();
    for route in &config.routes {
        if !routes.insert(route.name.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.name.clone()));
        }
        if !clusters.contains(route.cluster.as_str()) {
            errors.push(ValidationError::UnknownCluster {
                route: route.name.clone(),
                cluster: route.cluster.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
