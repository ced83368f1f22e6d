//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (path, host)
//!     → router.rs (route lookup by priority)
//!     → matcher.rs (evaluate match conditions)
//!     → cluster id or NoMatch
//!     → cluster.rs (pick a destination round-robin)
//!
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Sort by priority
//!     → Compile matchers
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - The gateway pipeline sees routing only through [`ClusterResolver`]
//! - Routes compiled at startup, immutable at runtime
//! - First match wins (ordered by priority)

pub mod cluster;
pub mod matcher;
pub mod router;

pub use cluster::{Cluster, ClusterRegistry, Destination};
pub use router::RouteTable;

/// Maps a request's path and host to a backend cluster id.
pub trait ClusterResolver: Send + Sync {
    fn resolve(&self, path: &str, host: Option<&str>) -> Option<&str>;
}
