//! Gateway pipeline and upstream dispatch.
//!
//! # Data Flow
//! ```text
//! Request
//!     → pipeline.rs (cache lookup → credential forwarding → breaker)
//!     → forward.rs (route → cluster → destination → hyper client)
//!     → pipeline.rs (record outcome, store GET 200, x-cache)
//!     → error.rs (local failures rendered as JSON responses)
//! ```

pub mod error;
pub mod forward;
pub mod pipeline;

pub use error::{DispatchError, GatewayError};
pub use forward::ForwardService;
pub use pipeline::{Gateway, GatewayLayer, X_CACHE};
