use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::observability::metrics;
use crate::resilience::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub breaker_state: &'static str,
    pub cache_entries: usize,
}

#[derive(Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub ttl_secs: u64,
}

#[derive(Serialize)]
pub struct PurgeResult {
    pub removed: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        breaker_state: state.breaker.state().as_str(),
        cache_entries: state.cache.len(),
    })
}

pub async fn get_breaker(State(state): State<AdminState>) -> Json<BreakerSnapshot> {
    Json(state.breaker.snapshot())
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(CacheStats {
        entries: state.cache.len(),
        ttl_secs: state.cache.ttl().as_secs(),
    })
}

pub async fn purge_cache(State(state): State<AdminState>) -> Json<PurgeResult> {
    let removed = state.cache.clear();
    metrics::record_cache_size(0);
    tracing::info!(removed, "Cache purged via admin API");
    Json(PurgeResult { removed })
}
