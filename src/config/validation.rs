//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that every backend address is usable
//! - Validate value ranges (intervals and timeouts > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::{HeaderName, Method, StatusCode};
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::load_balancer::backend::{Backend, BackendError};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no backend servers configured")]
    NoBackends,

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("listener bind address `{0}` is not a socket address")]
    BindAddress(String),

    #[error("valid_tokens contains an empty token")]
    EmptyToken,

    #[error("auth header `{0}` is not a valid header name")]
    AuthHeader(String),

    #[error("health check method `{0}` is not a valid HTTP method")]
    HealthMethod(String),

    #[error("health check expected status {0} is not a valid status code")]
    HealthStatus(u16),

    #[error("health check path `{0}` must start with '/'")]
    HealthPath(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.backend_servers.is_empty() {
        errors.push(ValidationError::NoBackends);
    }
    for address in &config.backend_servers {
        if let Err(e) = Backend::parse(address) {
            errors.push(e.into());
        }
    }

    if config.valid_tokens.iter().any(|t| t.is_empty()) {
        errors.push(ValidationError::EmptyToken);
    }
    if HeaderName::from_bytes(config.auth.header.as_bytes()).is_err() {
        errors.push(ValidationError::AuthHeader(config.auth.header.clone()));
    }

    if let Some(health) = &config.health_check {
        if Method::from_bytes(health.method.as_bytes()).is_err() {
            errors.push(ValidationError::HealthMethod(health.method.clone()));
        }
        if StatusCode::from_u16(health.expected_status).is_err() {
            errors.push(ValidationError::HealthStatus(health.expected_status));
        }
        if !health.path.starts_with('/') {
            errors.push(ValidationError::HealthPath(health.path.clone()));
        }
        if health.interval_secs == 0 {
            errors.push(ValidationError::Zero("health_check.interval_secs"));
        }
        if health.timeout_secs == 0 {
            errors.push(ValidationError::Zero("health_check.timeout_secs"));
        }
    }

    if config.websocket.dial_timeout_secs == 0 {
        errors.push(ValidationError::Zero("websocket.dial_timeout_secs"));
    }
    if config.shutdown.poll_interval_ms == 0 {
        errors.push(ValidationError::Zero("shutdown.poll_interval_ms"));
    }
    if config.observability.report_interval_secs == 0 {
        errors.push(ValidationError::Zero("observability.report_interval_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
