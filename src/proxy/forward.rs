//! Upstream dispatch: resolve the cluster, pick a destination, send the
//! request once and hand back the response.

use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{header, Request, Response, Uri, Version};
use futures_util::future::BoxFuture;
use http_body_util::{BodyExt, LengthLimitError};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tower::Service;

use crate::proxy::error::DispatchError;
use crate::routing::{ClusterRegistry, ClusterResolver};
use crate::security::headers::{add_forwarded_headers, strip_hop_by_hop};

/// Cluster already chosen for a request, carried as a request extension so
/// the route table is consulted once.
#[derive(Debug, Clone)]
pub struct ResolvedCluster(pub String);

/// Routing-aware HTTP client used as the innermost gateway service.
#[derive(Clone)]
pub struct ForwardService {
    routes: Arc<dyn ClusterResolver>,
    clusters: Arc<ClusterRegistry>,
    client: Client<HttpConnector, Body>,
}

impl ForwardService {
    pub fn new(
        routes: Arc<dyn ClusterResolver>,
        clusters: Arc<ClusterRegistry>,
        connect_timeout: Duration,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            routes,
            clusters,
            client,
        }
    }

    async fn forward(self, request: Request<Body>) -> Result<Response<Body>, DispatchError> {
        let (mut parts, body) = request.into_parts();

        let cluster = match parts.extensions.remove::<ResolvedCluster>() {
            Some(ResolvedCluster(cluster)) => cluster,
            None => {
                let path = parts.uri.path().to_string();
                let host = request_host(&parts);
                self.routes
                    .resolve(&path, host.as_deref())
                    .ok_or(DispatchError::NoRoute { path })?
                    .to_string()
            }
        };
        let destination = self
            .clusters
            .get(&cluster)
            .and_then(|c| c.next_destination())
            .ok_or_else(|| DispatchError::UnknownCluster(cluster.clone()))?;

        tracing::debug!(
            cluster = %cluster,
            destination = %destination.authority,
            uri = %parts.uri,
            "Dispatching upstream"
        );

        parts.uri = upstream_uri(&parts.uri, destination.authority.clone())?;
        parts.version = Version::HTTP_11;

        let client_ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        strip_hop_by_hop(&mut parts.headers);
        add_forwarded_headers(&mut parts.headers, client_ip);

        let inbound = InboundBodyWatch::default();
        let body = inbound.wrap(body);

        let response: Response<Incoming> = self
            .client
            .request(Request::from_parts(parts, body))
            .await
            .map_err(|e| inbound.classify(e))?;

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Service<Request<Body>> for ForwardService {
    type Response = Response<Body>;
    type Error = DispatchError;
    type Future = BoxFuture<'static, Result<Response<Body>, DispatchError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        Box::pin(self.clone().forward(request))
    }
}

/// Why the client's own request body failed while streaming upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InboundFault {
    TooLarge,
    Aborted,
}

/// Observes the inbound body so a send failure caused by the client is not
/// blamed on the backend.
#[derive(Clone, Default)]
struct InboundBodyWatch(Arc<OnceLock<InboundFault>>);

impl InboundBodyWatch {
    fn wrap(&self, body: Body) -> Body {
        let fault = self.0.clone();
        Body::new(body.map_err(move |e: axum::Error| {
            let kind = if caused_by_length_limit(&e) {
                InboundFault::TooLarge
            } else {
                InboundFault::Aborted
            };
            let _ = fault.set(kind);
            e
        }))
    }

    fn classify(&self, error: hyper_util::client::legacy::Error) -> DispatchError {
        match self.0.get() {
            Some(InboundFault::TooLarge) => DispatchError::PayloadTooLarge,
            Some(InboundFault::Aborted) => DispatchError::ClientBody(Box::new(error)),
            None if caused_by_length_limit(&error) => DispatchError::PayloadTooLarge,
            None => DispatchError::Transport(Box::new(error)),
        }
    }
}

fn caused_by_length_limit(error: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

/// Host used for routing: the Host header (or URI authority) without port.
pub(crate) fn request_host(parts: &Parts) -> Option<String> {
    let raw = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| parts.uri.authority().map(Authority::as_str))?;
    raw.parse::<Authority>().ok().map(|a| a.host().to_string())
}

fn upstream_uri(original: &Uri, authority: Authority) -> Result<Uri, DispatchError> {
    let mut uri_parts = original.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(authority);
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    Uri::from_parts(uri_parts).map_err(|e| DispatchError::Transport(Box::new(e)))
}
