//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared gateway state (routes, clusters, cache, breaker)
//! - Compose the axum router: health endpoints, optional admin API, and the
//!   gateway pipeline as the fallback for every other request
//! - Wire up middleware (body limit, request ID, tracing)
//! - Serve until the shutdown broadcast fires, then drain
//!
//! # Design Decisions
//! - One `CircuitBreaker` and one `ResponseCache` per process, shared by
//!   every connection
//! - The forward client is the innermost tower service; the pipeline layer
//!   wraps it

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::Layer;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::cache::{CacheSweeper, ResponseCache};
use crate::config::GatewayConfig;
use crate::http::health::health_router;
use crate::http::request::{UuidRequestId, X_REQUEST_ID};
use crate::proxy::{ForwardService, GatewayLayer};
use crate::resilience::CircuitBreaker;
use crate::routing::{ClusterRegistry, ClusterResolver, RouteTable};

/// The edge gateway HTTP server.
pub struct GatewayServer {
    router: Router,
    config: GatewayConfig,
    cache: ResponseCache,
    breaker: Arc<CircuitBreaker>,
}

impl GatewayServer {
    /// Create a server from an already validated configuration.
    pub fn new(config: GatewayConfig) -> Self {
        let routes: Arc<dyn ClusterResolver> =
            Arc::new(RouteTable::from_config(config.routes.clone()));
        let clusters = Arc::new(ClusterRegistry::from_config(config.clusters.clone()));
        let cache = ResponseCache::from_config(&config.cache);
        let breaker = Arc::new(CircuitBreaker::from_config(&config.circuit_breaker));

        let forward = ForwardService::new(routes.clone(), clusters, config.timeouts.connect());
        let gateway = GatewayLayer::new(routes, cache.clone(), breaker.clone(), config.timeouts.upstream())
            .layer(forward);

        let mut router = Router::new().merge(health_router(breaker.clone()));
        if config.admin.enabled {
            router = router.merge(setup_admin_router(AdminState {
                cache: cache.clone(),
                breaker: breaker.clone(),
                api_key: Arc::from(config.admin.api_key.as_str()),
            }));
        }

        let router = router
            .fallback_service(gateway)
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, UuidRequestId))
            .layer(RequestBodyLimitLayer::new(config.listener.max_body_bytes));

        Self {
            router,
            config,
            cache,
            breaker,
        }
    }

    /// Run the server on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.config.routes.len(),
            clusters = self.config.clusters.len(),
            admin = self.config.admin.enabled,
            "Gateway starting"
        );

        let sweeper = CacheSweeper::new(self.cache.clone(), self.config.cache.sweep_interval());
        tokio::spawn(sweeper.run(shutdown.resubscribe()));

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("Gateway stopped");
        Ok(())
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}
