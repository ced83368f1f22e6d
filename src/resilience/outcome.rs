//! Outcome classification for the circuit breaker.
//!
//! # Design Decisions
//! - Connection errors, timeouts and 5xx count as failures
//! - 408 Request Timeout is transient and counts as a failure too
//! - Other 4xx are NOT failures (the backend answered; the request was bad)

use axum::http::StatusCode;

use crate::resilience::circuit_breaker::CallOutcome;

/// Classify a backend response status.
pub fn classify_status(status: StatusCode) -> CallOutcome {
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        CallOutcome::Failure
    } else {
        CallOutcome::Success
    }
}
