//! Configuration validation.
//!
//! Serde handles syntax; this module checks values. All errors are
//! collected rather than stopping at the first one.

use std::net::SocketAddr;
use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.inspector.url.is_empty() {
        errors.push(ValidationError::new("inspector.url", "cannot be empty"));
    } else {
        match Url::parse(&config.inspector.url) {
            Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
            Ok(url) => errors.push(ValidationError::new(
                "inspector.url",
                format!("unsupported scheme '{}'", url.scheme()),
            )),
            Err(e) => errors.push(ValidationError::new("inspector.url", e.to_string())),
        }
    }

    if config.inspector.timeout_millis == 0 {
        errors.push(ValidationError::new("inspector.timeout_millis", "must be greater than 0"));
    }
    if config.inspector.max_body_size == 0 {
        errors.push(ValidationError::new("inspector.max_body_size", "must be greater than 0"));
    }

    if config.jail.enabled {
        if config.jail.threshold_count == 0 {
            errors.push(ValidationError::new("jail.threshold_count", "must be greater than 0"));
        }
        if config.jail.threshold_period_secs == 0 {
            errors.push(ValidationError::new("jail.threshold_period_secs", "must be greater than 0"));
        }
        if config.jail.duration_secs == 0 {
            errors.push(ValidationError::new("jail.duration_secs", "must be greater than 0"));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    check_socket_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_socket_addr(&mut errors, "backend.address", &config.backend.address);
    if config.observability.metrics_enabled {
        check_socket_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_socket_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(field, format!("invalid socket address '{}'", value)));
    }
}
