//! Liveness and readiness endpoints.
//!
//! `/health/live` answers as long as the process serves requests.
//! `/health/ready` reports the gateway's own view of its dependencies: the
//! shared circuit breaker is `Degraded` whenever it is not closed. Both
//! return 200; the status field carries the verdict.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::resilience::{BreakerState, CircuitBreaker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: &'static str,
    pub status: HealthStatus,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self { status, checks }
    }
}

pub fn health_router(breaker: Arc<CircuitBreaker>) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .with_state(breaker)
}

async fn live() -> &'static str {
    "Healthy"
}

async fn ready(State(breaker): State<Arc<CircuitBreaker>>) -> Json<HealthReport> {
    Json(readiness(&breaker))
}

pub fn readiness(breaker: &CircuitBreaker) -> HealthReport {
    let state = breaker.state();
    let breaker_check = match state {
        BreakerState::Closed => HealthCheck {
            name: "circuit_breaker",
            status: HealthStatus::Healthy,
            description: "Upstream calls are flowing".to_string(),
        },
        BreakerState::Open | BreakerState::HalfOpen => HealthCheck {
            name: "circuit_breaker",
            status: HealthStatus::Degraded,
            description: format!(
                "Circuit is {} after {} consecutive failures",
                state.as_str(),
                breaker.consecutive_failures()
            ),
        },
    };

    HealthReport::from_checks(vec![
        HealthCheck {
            name: "self",
            status: HealthStatus::Healthy,
            description: "Gateway is running".to_string(),
        },
        breaker_check,
    ])
}
