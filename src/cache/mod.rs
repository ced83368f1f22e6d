//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request
//!     → key.rs (lowercased path + sorted query parameters)
//!     → store.rs lookup
//!         hit  → serve stored body as application/json
//!         miss → request continues downstream
//!     → downstream 200 → store.rs store (last writer wins)
//!
//! Background:
//!     sweeper.rs purges expired entries on an interval
//! ```
//!
//! # Design Decisions
//! - Only GET is looked up or stored; other methods bypass entirely
//! - Only 200 responses are stored
//! - One fixed TTL for every entry
//! - Concurrent misses on one key may both go downstream (accepted stampede)
//! - Entries live in memory only; nothing survives a restart

pub mod key;
pub mod store;
pub mod sweeper;

pub use key::CacheKey;
pub use store::{CacheEntry, ResponseCache};
pub use sweeper::CacheSweeper;
