//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum setup, body limit, tracing)
//!     → request.rs (assign or keep x-request-id)
//!     → health.rs / admin API, or
//!     → gateway pipeline (proxy::GatewayLayer → proxy::ForwardService)
//!     → response (x-request-id echoed)
//! ```

pub mod health;
pub mod request;
pub mod server;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::GatewayServer;
