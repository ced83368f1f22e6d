//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Request on its way to a backend:
//!     → credentials.rs (normalize Authorization to `Bearer <token>`)
//!     → headers.rs (strip hop-by-hop, add X-Forwarded-*)
//!     → Dispatch
//! ```
//!
//! # Design Decisions
//! - The gateway forwards credentials; it never accepts or rejects them
//! - Tokens are never logged in full
//! - Inbound body size capped at the listener (see `http::server`)

pub mod credentials;
pub mod headers;

pub use credentials::{forward_credential, ForwardedCredential};
