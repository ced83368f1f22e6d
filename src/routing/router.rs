//! Route lookup.
//!
//! # Responsibilities
//! - Store compiled routes
//! - Look up the cluster for a request's path and host
//! - Return the matched cluster or an explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan in priority order (acceptable for typical route counts)
//! - Equal priorities keep configuration order

use crate::config::RouteConfig;
use crate::routing::matcher::{AndMatcher, HostMatcher, Matcher, PathPrefixMatcher};
use crate::routing::ClusterResolver;

/// A compiled route.
#[derive(Debug)]
pub struct Route {
    pub name: String,
    pub cluster: String,
    pub priority: u32,
    matcher: AndMatcher,
}

/// Ordered set of compiled routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(configs: Vec<RouteConfig>) -> Self {
        let mut routes: Vec<Route> = configs
            .into_iter()
            .map(|config| {
                let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();
                if let Some(host) = config.host {
                    matchers.push(Box::new(HostMatcher::new(host)));
                }
                if let Some(prefix) = config.path_prefix {
                    matchers.push(Box::new(PathPrefixMatcher::new(prefix)));
                }
                Route {
                    name: config.name,
                    cluster: config.cluster,
                    priority: config.priority,
                    matcher: AndMatcher::new(matchers),
                }
            })
            .collect();

        // Stable sort keeps configuration order among equal priorities.
        routes.sort_by(|a, b| b.priority.cmp(&a.priority));

        Self { routes }
    }

    /// First route matching the path and host.
    pub fn match_route(&self, path: &str, host: Option<&str>) -> Option<&Route> {
        self.routes.iter().find(|r| r.matcher.matches(path, host))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl ClusterResolver for RouteTable {
    fn resolve(&self, path: &str, host: Option<&str>) -> Option<&str> {
        self.match_route(path, host).map(|r| r.cluster.as_str())
    }
}
