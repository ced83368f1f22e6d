//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (fail fast if open, admit a single trial when cooling down)
//!     → timeouts.rs (bounded deadline on the dispatch)
//!     → outcome.rs (classify response/error as success or failure)
//!     → circuit_breaker.rs (record outcome, maybe transition)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every outbound call has a deadline
//! - No retries at this layer; the caller sees one attempt or a fail-fast
//! - One breaker for the whole upstream client, not per route

pub mod circuit_breaker;
pub mod outcome;
pub mod timeouts;

pub use circuit_breaker::{
    BreakerOpen, BreakerPermit, BreakerSnapshot, BreakerState, CallOutcome, CircuitBreaker,
};
pub use outcome::classify_status;
pub use timeouts::with_deadline;
