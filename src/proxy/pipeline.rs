//! The gateway pipeline as a tower layer.
//!
//! Fixed ordering per request:
//! 1. non-GET skips the cache entirely
//! 2. GET cache lookup; a hit is answered immediately
//! 3. credential forwarding rewrites `Authorization`
//! 4. route resolution; an unrouted request is answered 404 without
//!    touching the breaker
//! 5. breaker-guarded dispatch, bounded by the upstream deadline
//! 6. a GET answered with 200 is stored when it fits the cache's entry
//!    bound; the backend response is returned with its status preserved

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{response, Request, Response, StatusCode};
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use futures_util::{stream, StreamExt};
use tower::{Layer, Service, ServiceExt};

use crate::cache::{CacheKey, ResponseCache};
use crate::http::request::X_REQUEST_ID;
use crate::observability::metrics;
use crate::proxy::error::{DispatchError, GatewayError};
use crate::proxy::forward::{request_host, ResolvedCluster};
use crate::resilience::{classify_status, with_deadline, CircuitBreaker};
use crate::routing::ClusterResolver;
use crate::security::forward_credential;

/// `x-cache: HIT | MISS` on GET responses.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Applies caching, credential forwarding and circuit breaking around an
/// inner dispatch service.
#[derive(Clone)]
pub struct GatewayLayer {
    routes: Arc<dyn ClusterResolver>,
    cache: ResponseCache,
    breaker: Arc<CircuitBreaker>,
    upstream_timeout: Duration,
}

impl GatewayLayer {
    pub fn new(
        routes: Arc<dyn ClusterResolver>,
        cache: ResponseCache,
        breaker: Arc<CircuitBreaker>,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            routes,
            cache,
            breaker,
            upstream_timeout,
        }
    }
}

impl<S> Layer<S> for GatewayLayer {
    type Service = Gateway<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Gateway {
            inner,
            routes: self.routes.clone(),
            cache: self.cache.clone(),
            breaker: self.breaker.clone(),
            upstream_timeout: self.upstream_timeout,
        }
    }
}

#[derive(Clone)]
pub struct Gateway<S> {
    inner: S,
    routes: Arc<dyn ClusterResolver>,
    cache: ResponseCache,
    breaker: Arc<CircuitBreaker>,
    upstream_timeout: Duration,
}

impl<S> Service<Request<Body>> for Gateway<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = DispatchError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Inner readiness is awaited per call (see `dispatch`).
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let gateway = self.clone();
        Box::pin(async move { Ok(gateway.handle(request).await) })
    }
}

/// A backend answer, either still streaming or fully read for caching.
enum Dispatched {
    Streaming(Response<Body>),
    Buffered(response::Parts, Bytes),
}

impl<S> Gateway<S>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = DispatchError> + Send + 'static,
    S::Future: Send + 'static,
{
    async fn handle(self, request: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let Gateway {
            inner,
            routes,
            cache,
            breaker,
            upstream_timeout,
        } = self;

        let method = request.method().clone();
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let cache_key = CacheKey::for_request(&method, request.uri());

        if let Some(key) = &cache_key {
            if let Some(body) = cache.lookup(key) {
                metrics::record_cache_lookup(true);
                tracing::info!(request_id = %request_id, cache_key = %key, "Served from cache");
                metrics::record_request(method.as_str(), StatusCode::OK.as_u16(), "hit", start);
                return cached_response(body);
            }
            metrics::record_cache_lookup(false);
            tracing::info!(request_id = %request_id, cache_key = %key, "Cache miss");
        }
        let cache_label = if cache_key.is_some() { "miss" } else { "bypass" };

        let (mut parts, body) = request.into_parts();
        let credential = forward_credential(&mut parts.headers);
        tracing::debug!(request_id = %request_id, credential = ?credential, "Forwarding credential");

        let host = request_host(&parts);
        let Some(cluster) = routes.resolve(parts.uri.path(), host.as_deref()) else {
            let path = parts.uri.path().to_string();
            tracing::warn!(request_id = %request_id, path = %path, "No route matched");
            let mut response = GatewayError::from(DispatchError::NoRoute { path }).into_response();
            mark_miss(&mut response, cache_key.is_some());
            metrics::record_request(method.as_str(), response.status().as_u16(), cache_label, start);
            return response;
        };
        parts.extensions.insert(ResolvedCluster(cluster.to_string()));

        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(open) => {
                metrics::record_breaker_rejection();
                tracing::warn!(
                    request_id = %request_id,
                    retry_after = ?open.retry_after,
                    "Circuit open, failing fast"
                );
                let mut response = GatewayError::from(open).into_response();
                mark_miss(&mut response, cache_key.is_some());
                metrics::record_request(method.as_str(), response.status().as_u16(), cache_label, start);
                return response;
            }
        };

        let dispatch_start = Instant::now();
        let request = Request::from_parts(parts, body);
        let buffer_limit = cache_key.as_ref().map(|_| cache.max_entry_bytes());
        let result = with_deadline(upstream_timeout, dispatch(inner, request, buffer_limit)).await;

        let mut response = match result {
            Ok(Dispatched::Streaming(response)) => {
                permit.record(classify_status(response.status()));
                metrics::record_upstream("response", dispatch_start);
                response
            }
            Ok(Dispatched::Buffered(parts, bytes)) => {
                permit.record(classify_status(parts.status));
                metrics::record_upstream("response", dispatch_start);
                if let Some(key) = cache_key.clone() {
                    if cache.store(key, parts.status, bytes.clone()) {
                        tracing::debug!(request_id = %request_id, entries = cache.len(), "Stored response in cache");
                    }
                }
                Response::from_parts(parts, Body::from(bytes))
            }
            Err(e) => {
                permit.record(e.outcome());
                metrics::record_upstream("error", dispatch_start);
                tracing::error!(request_id = %request_id, error = %e, "Upstream dispatch failed");
                GatewayError::from(e).into_response()
            }
        };

        mark_miss(&mut response, cache_key.is_some());
        metrics::record_request(method.as_str(), response.status().as_u16(), cache_label, start);
        response
    }
}

fn mark_miss(response: &mut Response<Body>, cacheable: bool) {
    if cacheable {
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("MISS"));
    }
}

/// Send the request once. A `200` answer to a cacheable request is read
/// so it can be stored, up to `buffer_limit` bytes; anything larger, and
/// every other answer, streams through.
async fn dispatch<S>(
    inner: S,
    request: Request<Body>,
    buffer_limit: Option<usize>,
) -> Result<Dispatched, DispatchError>
where
    S: Service<Request<Body>, Response = Response<Body>, Error = DispatchError>,
{
    let response = inner.oneshot(request).await?;
    let Some(limit) = buffer_limit else {
        return Ok(Dispatched::Streaming(response));
    };
    if response.status() != StatusCode::OK || declared_length(&response).is_some_and(|len| len > limit) {
        return Ok(Dispatched::Streaming(response));
    }

    let (parts, body) = response.into_parts();
    let mut data = body.into_data_stream();
    let mut buffered = Vec::new();
    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|e| DispatchError::Body(Box::new(e)))?;
        buffered.extend_from_slice(&chunk);
        if buffered.len() > limit {
            tracing::debug!(limit, "Response exceeds cache entry bound, streaming uncached");
            let head = stream::once(async move { Ok::<_, axum::Error>(Bytes::from(buffered)) });
            let body = Body::from_stream(head.chain(data));
            return Ok(Dispatched::Streaming(Response::from_parts(parts, body)));
        }
    }
    Ok(Dispatched::Buffered(parts, Bytes::from(buffered)))
}

fn declared_length(response: &Response<Body>) -> Option<usize> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

fn cached_response(body: Bytes) -> Response<Body> {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::AUTHORIZATION, Method};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tower::service_fn;
    use tower::util::BoxCloneService;

    use crate::config::RouteConfig;
    use crate::resilience::{BreakerState, CallOutcome};
    use crate::routing::RouteTable;

    const TTL: Duration = Duration::from_secs(300);
    const BREAK: Duration = Duration::from_secs(30);
    const DEADLINE: Duration = Duration::from_secs(10);

    type FakeBackend = BoxCloneService<Request<Body>, Response<Body>, DispatchError>;

    /// Everything under `/api` goes to the `tasks` cluster.
    fn api_routes() -> Arc<dyn ClusterResolver> {
        Arc::new(RouteTable::from_config(vec![RouteConfig {
            name: "tasks".into(),
            host: None,
            path_prefix: Some("/api".into()),
            cluster: "tasks".into(),
            priority: 0,
        }]))
    }

    /// Fake backend: counts calls, records the Authorization header it saw,
    /// and answers with `status` and a body carrying the call number.
    #[derive(Clone)]
    struct Backend {
        calls: Arc<AtomicU32>,
        auth: Arc<Mutex<Vec<Option<String>>>>,
        status: Arc<Mutex<StatusCode>>,
    }

    impl Backend {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicU32::new(0)),
                auth: Arc::new(Mutex::new(Vec::new())),
                status: Arc::new(Mutex::new(StatusCode::OK)),
            }
        }

        fn answer_with(&self, status: StatusCode) {
            *self.status.lock().unwrap() = status;
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn gateway(&self) -> (Gateway<FakeBackend>, ResponseCache, Arc<CircuitBreaker>) {
            self.gateway_with(ResponseCache::new(TTL))
        }

        fn gateway_with(&self, cache: ResponseCache) -> (Gateway<FakeBackend>, ResponseCache, Arc<CircuitBreaker>) {
            let backend = self.clone();
            let svc = service_fn(move |request: Request<Body>| {
                let backend = backend.clone();
                async move {
                    let n = backend.calls.fetch_add(1, Ordering::SeqCst) + 1;
                    backend.auth.lock().unwrap().push(
                        request
                            .headers()
                            .get(AUTHORIZATION)
                            .map(|v| v.to_str().unwrap().to_string()),
                    );
                    let status = *backend.status.lock().unwrap();
                    Ok::<_, DispatchError>(
                        Response::builder()
                            .status(status)
                            .body(Body::from(format!("{{\"call\":{n}}}")))
                            .unwrap(),
                    )
                }
            });
            let breaker = Arc::new(CircuitBreaker::new(3, BREAK));
            let layer = GatewayLayer::new(api_routes(), cache.clone(), breaker.clone(), DEADLINE);
            (layer.layer(BoxCloneService::new(svc)), cache, breaker)
        }
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder().method(method).uri(uri).body(Body::empty()).unwrap()
    }

    async fn send(gateway: &Gateway<FakeBackend>, request: Request<Body>) -> (StatusCode, Option<String>, Bytes) {
        let response = gateway.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let x_cache = response
            .headers()
            .get(X_CACHE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, x_cache, body)
    }

    #[tokio::test(start_paused = true)]
    async fn test_reordered_query_is_cache_hit() {
        let backend = Backend::new();
        let (gateway, _, _) = backend.gateway();

        let first = send(&gateway, request(Method::GET, "/api/tasks?status=Done&page=1")).await;
        let second = send(&gateway, request(Method::GET, "/api/tasks?page=1&status=Done")).await;

        assert_eq!(first.1.as_deref(), Some("MISS"));
        assert_eq!(second.1.as_deref(), Some("HIT"));
        assert_eq!(first.2, second.2);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_is_json_and_expires() {
        let backend = Backend::new();
        let (gateway, _, _) = backend.gateway();

        send(&gateway, request(Method::GET, "/api/tasks")).await;
        let response = gateway.clone().oneshot(request(Method::GET, "/api/tasks")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");

        tokio::time::advance(TTL).await;
        let (_, x_cache, body) = send(&gateway, request(Method::GET, "/api/tasks")).await;
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(body, Bytes::from_static(b"{\"call\":2}"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_bypass_cache() {
        let backend = Backend::new();
        let (gateway, cache, _) = backend.gateway();

        send(&gateway, request(Method::GET, "/api/tasks")).await;
        for method in [Method::POST, Method::PUT, Method::DELETE] {
            let (status, x_cache, _) = send(&gateway, request(method, "/api/tasks")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(x_cache, None);
        }
        assert_eq!(backend.calls(), 4);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_ok_get_is_not_cached() {
        let backend = Backend::new();
        let (gateway, cache, _) = backend.gateway();
        backend.answer_with(StatusCode::NOT_FOUND);

        let (status, _, _) = send(&gateway, request(Method::GET, "/api/tasks/9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, x_cache, _) = send(&gateway, request(Method::GET, "/api/tasks/9")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(x_cache.as_deref(), Some("MISS"));

        assert_eq!(backend.calls(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_credential_forwarded() {
        let backend = Backend::new();
        let (gateway, _, _) = backend.gateway();

        let mut with_token = request(Method::POST, "/api/tasks");
        with_token
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("bearer  abc.def"));
        send(&gateway, with_token).await;
        send(&gateway, request(Method::POST, "/api/tasks")).await;

        let seen = backend.auth.lock().unwrap().clone();
        assert_eq!(seen, vec![Some("Bearer abc.def".to_string()), None]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_opens_and_recovers() {
        let backend = Backend::new();
        let (gateway, _, breaker) = backend.gateway();
        backend.answer_with(StatusCode::INTERNAL_SERVER_ERROR);

        for _ in 0..3 {
            let (status, _, _) = send(&gateway, request(Method::POST, "/api/tasks")).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(breaker.state(), BreakerState::Open);

        let (status, _, _) = send(&gateway, request(Method::POST, "/api/tasks")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(backend.calls(), 3);

        tokio::time::advance(BREAK).await;
        backend.answer_with(StatusCode::OK);
        let (status, _, _) = send(&gateway, request(Method::POST, "/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(backend.calls(), 4);
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_keep_breaker_closed() {
        let backend = Backend::new();
        let (gateway, _, breaker) = backend.gateway();
        backend.answer_with(StatusCode::BAD_REQUEST);

        for _ in 0..5 {
            send(&gateway, request(Method::POST, "/api/tasks")).await;
        }
        assert_eq!(backend.calls(), 5);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_trip_breaker() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let slow = service_fn(move |_request: Request<Body>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, DispatchError>(Response::new(Body::empty()))
            }
        });
        let breaker = Arc::new(CircuitBreaker::new(3, BREAK));
        let gateway = GatewayLayer::new(api_routes(), ResponseCache::new(TTL), breaker.clone(), DEADLINE)
            .layer(BoxCloneService::new(slow));

        for _ in 0..3 {
            let (status, _, _) = send(&gateway, request(Method::GET, "/api/tasks")).await;
            assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        }
        let (status, _, _) = send(&gateway, request(Method::GET, "/api/tasks")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_served_while_breaker_open() {
        let backend = Backend::new();
        let (gateway, _, breaker) = backend.gateway();

        send(&gateway, request(Method::GET, "/api/tasks")).await;
        for _ in 0..3 {
            breaker.try_acquire().unwrap().record(CallOutcome::Failure);
        }

        let (status, x_cache, _) = send(&gateway, request(Method::GET, "/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("HIT"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrouted_path_is_not_found_even_while_open() {
        let backend = Backend::new();
        let (gateway, _, breaker) = backend.gateway();

        let (status, x_cache, _) = send(&gateway, request(Method::GET, "/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(x_cache.as_deref(), Some("MISS"));

        for _ in 0..3 {
            breaker.try_acquire().unwrap().record(CallOutcome::Failure);
        }
        let (status, _, body) = send(&gateway, request(Method::POST, "/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "no_route");

        assert_eq!(backend.calls(), 0);
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrouted_path_leaves_half_open_trial_available() {
        let backend = Backend::new();
        let (gateway, _, breaker) = backend.gateway();
        for _ in 0..3 {
            breaker.try_acquire().unwrap().record(CallOutcome::Failure);
        }
        tokio::time::advance(BREAK).await;

        let (status, _, _) = send(&gateway, request(Method::POST, "/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&gateway, request(Method::POST, "/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_ok_streams_uncached() {
        let backend = Backend::new();
        let (gateway, cache, _) = backend.gateway_with(ResponseCache::new(TTL).with_max_entry_bytes(4));

        let (status, x_cache, body) = send(&gateway, request(Method::GET, "/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(body, Bytes::from_static(b"{\"call\":1}"));
        assert!(cache.is_empty());

        let (_, x_cache, _) = send(&gateway, request(Method::GET, "/api/tasks")).await;
        assert_eq!(x_cache.as_deref(), Some("MISS"));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declared_oversized_length_is_not_buffered() {
        let chunks = service_fn(|_request: Request<Body>| async {
            let parts = stream::iter(["0123", "4567", "89"].map(|s| Ok::<_, std::io::Error>(Bytes::from_static(s.as_bytes()))));
            Ok::<_, DispatchError>(
                Response::builder()
                    .header(header::CONTENT_LENGTH, "10")
                    .body(Body::from_stream(parts))
                    .unwrap(),
            )
        });
        let cache = ResponseCache::new(TTL).with_max_entry_bytes(8);
        let breaker = Arc::new(CircuitBreaker::new(3, BREAK));
        let gateway = GatewayLayer::new(api_routes(), cache.clone(), breaker, DEADLINE)
            .layer(BoxCloneService::new(chunks));

        let (status, _, body) = send(&gateway, request(Method::GET, "/api/tasks")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"0123456789"));
        assert!(cache.is_empty());
    }
}
