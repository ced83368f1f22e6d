//! Shared utilities for integration tests: a programmable mock backend and
//! a helper that starts the gateway in front of it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use edge_gateway::config::{ClusterConfig, GatewayConfig, RouteConfig};
use edge_gateway::{GatewayServer, Shutdown};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// What the mock backend saw for one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    pub uri: String,
    pub authorization: Option<String>,
    pub forwarded_host: Option<String>,
}

#[derive(Clone, Default)]
struct BackendState {
    calls: Arc<AtomicU32>,
    status: Arc<AtomicU16>,
    delay_ms: Arc<AtomicU64>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

/// Handle to a running mock backend.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    state: BackendState,
}

impl MockBackend {
    pub fn calls(&self) -> u32 {
        self.state.calls.load(Ordering::SeqCst)
    }

    pub fn respond_with(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn delay(&self, delay: Duration) {
        self.state.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.state.seen.lock().unwrap().clone()
    }
}

/// Start an axum backend on an ephemeral port. It answers every request
/// with the programmed status and a JSON body carrying the call number.
pub async fn start_mock_backend() -> MockBackend {
    let state = BackendState::default();
    state.status.store(200, Ordering::SeqCst);

    let app = Router::new()
        .fallback(mock_handler)
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockBackend { addr, state }
}

async fn mock_handler(State(state): State<BackendState>, request: Request) -> Response {
    let call = state.calls.fetch_add(1, Ordering::SeqCst) + 1;
    let path = request.uri().path().to_string();
    let seen = seen_request(&request);
    drop(request);
    state.seen.lock().unwrap().push(seen);

    let delay = state.delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let status = StatusCode::from_u16(state.status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::OK);
    let body = format!(r#"{{"call":{call},"path":"{path}"}}"#);
    (status, [("content-type", "application/json")], Body::from(body)).into_response()
}

fn seen_request(request: &Request) -> SeenRequest {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    SeenRequest {
        method: request.method().to_string(),
        uri: request.uri().to_string(),
        authorization: header(AUTHORIZATION.as_str()),
        forwarded_host: header("x-forwarded-host"),
    }
}

/// Gateway config routing `/api` to a single `tasks` cluster at `backend`.
pub fn gateway_config(backend: SocketAddr) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.observability.metrics_enabled = false;
    config.clusters.push(ClusterConfig {
        name: "tasks".into(),
        destinations: vec![format!("http://{backend}")],
    });
    config.routes.push(RouteConfig {
        name: "tasks".into(),
        host: None,
        path_prefix: Some("/api".into()),
        cluster: "tasks".into(),
        priority: 0,
    });
    config
}

/// A gateway running on an ephemeral port.
pub struct RunningGateway {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl RunningGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_gateway(config: GatewayConfig) -> RunningGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = GatewayServer::new(config);
    let rx = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    RunningGateway { addr, shutdown }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// POST `len` bytes to `path` as a single chunk with no `Content-Length`,
/// returning the response status line.
pub async fn send_chunked(addr: SocketAddr, path: &str, len: usize) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let head = format!(
        "POST {path} HTTP/1.1\r\nHost: {addr}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n{len:x}\r\n"
    );
    stream.write_all(head.as_bytes()).await.unwrap();
    stream.write_all(&vec![b'a'; len]).await.unwrap();
    stream.write_all(b"\r\n0\r\n\r\n").await.unwrap();

    let mut status_line = String::new();
    BufReader::new(stream).read_line(&mut status_line).await.unwrap();
    status_line.trim_end().to_string()
}
