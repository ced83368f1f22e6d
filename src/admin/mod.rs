//! Authenticated inspection API.
//!
//! Mounted on the gateway listener when `[admin] enabled = true`. Every
//! route requires `Authorization: Bearer <api_key>`.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::get,
    Router,
};

use crate::cache::ResponseCache;
use crate::resilience::CircuitBreaker;
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared handles the admin handlers read from.
#[derive(Clone)]
pub struct AdminState {
    pub cache: ResponseCache,
    pub breaker: Arc<CircuitBreaker>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breaker", get(get_breaker))
        .route("/admin/cache", get(get_cache).delete(purge_cache))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
