//! Gateway error taxonomy and its mapping to HTTP responses.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::resilience::{BreakerOpen, CallOutcome};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure of a single outbound dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no route matches `{path}`")]
    NoRoute { path: String },

    #[error("cluster `{0}` has no available destination")]
    UnknownCluster(String),

    #[error("request body exceeds the configured limit")]
    PayloadTooLarge,

    #[error("client request body failed: {0}")]
    ClientBody(#[source] BoxError),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("upstream transport error: {0}")]
    Transport(#[source] BoxError),

    #[error("failed to read upstream body: {0}")]
    Body(#[source] BoxError),
}

impl DispatchError {
    /// How this error counts against the circuit breaker.
    pub fn outcome(&self) -> CallOutcome {
        match self {
            DispatchError::NoRoute { .. }
            | DispatchError::UnknownCluster(_)
            | DispatchError::PayloadTooLarge
            | DispatchError::ClientBody(_) => CallOutcome::Ignored,
            DispatchError::Timeout(_) | DispatchError::Transport(_) | DispatchError::Body(_) => {
                CallOutcome::Failure
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoRoute { .. } => StatusCode::NOT_FOUND,
            DispatchError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            DispatchError::ClientBody(_) => StatusCode::BAD_REQUEST,
            DispatchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::UnknownCluster(_)
            | DispatchError::Transport(_)
            | DispatchError::Body(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            DispatchError::NoRoute { .. } => "no_route",
            DispatchError::UnknownCluster(_) => "no_destination",
            DispatchError::PayloadTooLarge => "payload_too_large",
            DispatchError::ClientBody(_) => "client_body",
            DispatchError::Timeout(_) => "upstream_timeout",
            DispatchError::Transport(_) => "upstream_unreachable",
            DispatchError::Body(_) => "upstream_body",
        }
    }
}

/// Everything the gateway may answer instead of a backend response.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The call was not attempted.
    #[error(transparent)]
    BreakerOpen(#[from] BreakerOpen),

    /// The call was attempted and failed.
    #[error(transparent)]
    Upstream(#[from] DispatchError),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BreakerOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Upstream(e) => e.status(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            GatewayError::BreakerOpen(open) => {
                let body = json!({
                    "error": "service_unavailable",
                    "message": "Service temporarily unavailable",
                });
                let mut response = (status, Json(body)).into_response();
                let retry_after = open.retry_after.as_secs_f64().ceil().max(1.0) as u64;
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
                response
            }
            GatewayError::Upstream(e) => {
                let body = json!({
                    "error": e.code(),
                    "message": e.to_string(),
                });
                (status, Json(body)).into_response()
            }
        }
    }
}
