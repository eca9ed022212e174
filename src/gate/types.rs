//! Gate-wide types and error definitions.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// Errors that terminate handling of a single request, or construction of the gate.
#[derive(Debug, Error)]
pub enum GateError {
    /// Gate could not be built from its configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Request body exceeded the configured maximum.
    #[error("Request body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    /// Request body could not be read.
    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    /// Inspector could not be reached or returned a transport error.
    #[error("Inspector unreachable: {0}")]
    InspectorUnreachable(String),

    /// Inspector did not answer within the configured timeout.
    #[error("Inspector timed out after {0:?}")]
    InspectorTimeout(Duration),

    /// Client is currently jailed.
    #[error("Client is jailed")]
    Jailed,
}

impl GateError {
    /// Status code surfaced to the client for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GateError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GateError::BodyRead(_) | GateError::InspectorUnreachable(_) => StatusCode::BAD_GATEWAY,
            GateError::InspectorTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GateError::Jailed => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Label used for the `outcome` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            GateError::BodyTooLarge { .. } => "too_large",
            GateError::Jailed => "jailed",
            _ => "error",
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status();
        let text = status.canonical_reason().unwrap_or("Error");
        (status, text).into_response()
    }
}

/// Result type for gate operations.
pub type GateResult<T> = Result<T, GateError>;
