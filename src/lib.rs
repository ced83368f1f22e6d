//! Edge gateway library.
//!
//! Sits in front of backend services and applies, in order, response
//! caching for GET requests, bearer credential forwarding and a global
//! circuit breaker around every outbound call.

pub mod admin;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use http::GatewayServer;
pub use lifecycle::Shutdown;
