//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, pools non-empty)
//! - Check that selected backends have what they need
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, SharedBackend, StoreBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Check every semantic constraint and report all violations.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if config.store.worker_threads == 0 {
        errors.push(ValidationError::new("store.worker_threads", "must be at least 1"));
    }
    if config.store.operation_timeout_ms == 0 {
        errors.push(ValidationError::new("store.operation_timeout_ms", "must be positive"));
    }
    if config.store.backend == StoreBackend::File {
        if config.store.routes_path.trim().is_empty() {
            errors.push(ValidationError::new("store.routes_path", "required for file backend"));
        }
        if config.store.clients_path.trim().is_empty() {
            errors.push(ValidationError::new("store.clients_path", "required for file backend"));
        }
    }

    if config.cache.backend == SharedBackend::Redis && config.cache.redis_url.trim().is_empty() {
        errors.push(ValidationError::new("cache.redis_url", "required for redis backend"));
    }
    if config.cache.operation_timeout_ms == 0 {
        errors.push(ValidationError::new("cache.operation_timeout_ms", "must be positive"));
    }

    if config.notifier.backend == SharedBackend::Redis
        && config.notifier.redis_url.trim().is_empty()
    {
        errors.push(ValidationError::new("notifier.redis_url", "required for redis backend"));
    }
    if config.notifier.channel.trim().is_empty() {
        errors.push(ValidationError::new("notifier.channel", "must not be empty"));
    }
    if config.notifier.max_attempts == 0 {
        errors.push(ValidationError::new("notifier.max_attempts", "must be at least 1"));
    }

    let rate = config.rate_limit.requests_per_second;
    if rate.is_nan() || rate <= 0.0 {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_second",
            "must be greater than zero",
        ));
    }
    if config.rate_limit.idle_ttl_secs == 0 {
        errors.push(ValidationError::new("rate_limit.idle_ttl_secs", "must be positive"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be positive"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("'{}' is not a socket address", value)));
    }
}
