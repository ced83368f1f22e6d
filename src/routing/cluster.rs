//! Backend clusters and destination selection.
//!
//! # Responsibilities
//! - Hold the destinations of each cluster
//! - Rotate through destinations round-robin
//!
//! # Design Decisions
//! - Destinations are parsed once at startup; invalid ones are skipped
//! - No per-destination health state: failure isolation is the job of the
//!   gateway-wide circuit breaker

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::http::uri::Authority;
use url::Url;

use crate::config::ClusterConfig;

/// One backend instance.
#[derive(Debug, Clone)]
pub struct Destination {
    pub url: Url,
    pub authority: Authority,
}

impl Destination {
    pub fn parse(address: &str) -> Option<Self> {
        let url = Url::parse(address).ok()?;
        if url.scheme() != "http" {
            return None;
        }
        let host = url.host_str()?;
        let authority = match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let authority = Authority::from_str(&authority).ok()?;
        Some(Self { url, authority })
    }
}

/// A logical group of destinations with a round-robin cursor.
#[derive(Debug)]
pub struct Cluster {
    pub name: String,
    destinations: Vec<Destination>,
    counter: AtomicUsize,
}

impl Cluster {
    pub fn new(name: impl Into<String>, destinations: Vec<Destination>) -> Self {
        Self {
            name: name.into(),
            destinations,
            counter: AtomicUsize::new(0),
        }
    }

    /// Next destination in rotation.
    pub fn next_destination(&self) -> Option<&Destination> {
        if self.destinations.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.destinations.len();
        self.destinations.get(index)
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }
}

/// All configured clusters, by name.
#[derive(Debug, Default)]
pub struct ClusterRegistry {
    clusters: HashMap<String, Cluster>,
}

impl ClusterRegistry {
    pub fn from_config(configs: Vec<ClusterConfig>) -> Self {
        let mut clusters = HashMap::new();
        for config in configs {
            let destinations = config
                .destinations
                .iter()
                .filter_map(|address| {
                    let destination = Destination::parse(address);
                    if destination.is_none() {
                        tracing::warn!(cluster = %config.name, address = %address, "Invalid destination address");
                    }
                    destination
                })
                .collect();
            clusters.insert(config.name.clone(), Cluster::new(config.name, destinations));
        }
        Self { clusters }
    }

    pub fn get(&self, name: &str) -> Option<&Cluster> {
        self.clusters.get(name)
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
