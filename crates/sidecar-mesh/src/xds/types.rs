//! xDS Resource Types
//!
//! Native Rust types for the xDS resources the control plane serves,
//! providing a cleaner API than the raw protobuf types. Conversion to the
//! wire format lives in `encode`.

use serde::{Deserialize, Serialize};

pub const HTTP_CONNECTION_MANAGER_FILTER: &str = "envoy.filters.network.http_connection_manager";
pub const TCP_PROXY_FILTER: &str = "envoy.filters.network.tcp_proxy";
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";

// =============================================================================
// Endpoint Discovery Service (EDS) Types
// =============================================================================

/// Locality - identifies where a service is running
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locality {
    /// Region (e.g., "us-west-1")
    pub region: String,
    /// Zone within region (e.g., "us-west-1a")
    pub zone: String,
    /// Sub-zone (e.g., "rack-1")
    pub sub_zone: String,
}

/// Endpoint - a single backend address
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// IP address
    pub address: String,
    /// Port
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// Cluster load assignment - endpoints for a cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    /// Cluster name
    pub cluster_name: String,
    /// Endpoints grouped by locality
    pub endpoints: Vec<LocalityEndpoints>,
}

impl ClusterLoadAssignment {
    /// Create a new cluster load assignment
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            endpoints: Vec::new(),
        }
    }

    /// Add endpoints for a locality
    pub fn add_locality(&mut self, locality: Locality, endpoints: Vec<Endpoint>) {
        self.endpoints.push(LocalityEndpoints { locality, endpoints });
    }

    /// Get all endpoints (flattened)
    pub fn all_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().flat_map(|le| le.endpoints.iter())
    }

    /// Get total endpoint count
    pub fn total_count(&self) -> usize {
        self.all_endpoints().count()
    }
}

/// Endpoints for a specific locality
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityEndpoints {
    /// Locality for these endpoints
    pub locality: Locality,
    /// Endpoints in this locality
    pub endpoints: Vec<Endpoint>,
}

// =============================================================================
// Cluster Discovery Service (CDS) Types
// =============================================================================

/// Cluster configuration
///
/// Every cluster is round-robin over endpoints delivered by EDS on the same
/// ADS stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster name
    pub name: String,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Cluster {
    pub fn new_eds(name: impl Into<String>, connect_timeout_ms: u64) -> Self {
        Self {
            name: name.into(),
            connect_timeout_ms,
        }
    }
}

// =============================================================================
// Listener Discovery Service (LDS) Types
// =============================================================================

/// Listener configuration (LDS)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    /// Listener name
    pub name: String,
    /// Address to bind to
    pub address: ListenerAddress,
    /// Filter chains
    pub filter_chains: Vec<FilterChain>,
}

impl Listener {
    /// Create a new listener
    pub fn new(name: impl Into<String>, address: ListenerAddress) -> Self {
        Self {
            name: name.into(),
            address,
            filter_chains: Vec::new(),
        }
    }

    /// Add a filter chain
    pub fn with_filter_chain(mut self, chain: FilterChain) -> Self {
        self.filter_chains.push(chain);
        self
    }

    /// All network filters across every chain
    pub fn filters(&self) -> impl Iterator<Item = &NetworkFilter> {
        self.filter_chains.iter().flat_map(|fc| fc.filters.iter())
    }
}

/// Listener address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerAddress {
    /// IP address (0.0.0.0 for all interfaces)
    pub address: String,
    /// Port
    pub port: u16,
}

impl Default for ListenerAddress {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 0,
        }
    }
}

impl ListenerAddress {
    /// Create a TCP listener address
    pub fn tcp(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

/// Filter chain for processing connections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterChain {
    /// Filters to apply
    pub filters: Vec<NetworkFilter>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter
    pub fn with_filter(mut self, filter: NetworkFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Network filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkFilter {
    /// Filter name
    pub name: String,
    /// Filter type
    pub filter_type: NetworkFilterType,
}

impl NetworkFilter {
    /// Create an HTTP connection manager filter with an inline route config
    pub fn http_connection_manager(stat_prefix: impl Into<String>, route_config: RouteConfiguration) -> Self {
        Self {
            name: HTTP_CONNECTION_MANAGER_FILTER.to_string(),
            filter_type: NetworkFilterType::HttpConnectionManager {
                stat_prefix: stat_prefix.into(),
                route_config,
                upgrade_types: Vec::new(),
            },
        }
    }

    /// Create a TCP proxy filter
    pub fn tcp_proxy(stat_prefix: impl Into<String>, cluster: impl Into<String>) -> Self {
        Self {
            name: TCP_PROXY_FILTER.to_string(),
            filter_type: NetworkFilterType::TcpProxy {
                stat_prefix: stat_prefix.into(),
                cluster: cluster.into(),
            },
        }
    }

    /// Allow a protocol upgrade (e.g. "websocket") on an HTTP filter
    pub fn with_upgrade(mut self, upgrade_type: impl Into<String>) -> Self {
        if let NetworkFilterType::HttpConnectionManager { upgrade_types, .. } = &mut self.filter_type {
            upgrade_types.push(upgrade_type.into());
        }
        self
    }
}

/// Network filter types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkFilterType {
    /// HTTP connection manager
    HttpConnectionManager {
        /// Stat prefix
        stat_prefix: String,
        /// Inline route configuration
        route_config: RouteConfiguration,
        /// Allowed protocol upgrades
        upgrade_types: Vec<String>,
    },
    /// TCP proxy
    TcpProxy {
        /// Stat prefix
        stat_prefix: String,
        /// Cluster name
        cluster: String,
    },
}

// =============================================================================
// Route Configuration Types
// =============================================================================

/// Route configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    /// Route configuration name
    pub name: String,
    /// Virtual hosts
    pub virtual_hosts: Vec<VirtualHost>,
}

impl RouteConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            virtual_hosts: Vec::new(),
        }
    }

    /// Add a virtual host
    pub fn with_virtual_host(mut self, vhost: VirtualHost) -> Self {
        self.virtual_hosts.push(vhost);
        self
    }
}

/// Virtual host configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHost {
    /// Virtual host name
    pub name: String,
    /// Domains this virtual host matches
    pub domains: Vec<String>,
    /// Routes
    pub routes: Vec<Route>,
}

impl VirtualHost {
    pub fn new(name: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domains,
            routes: Vec::new(),
        }
    }

    /// Add a route
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }
}

/// A path-prefix route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub prefix: String,
    /// Upstream the route forwards to
    pub destination: RouteDestination,
}

impl Route {
    pub fn prefix(prefix: impl Into<String>, destination: RouteDestination) -> Self {
        Self {
            prefix: prefix.into(),
            destination,
        }
    }
}

/// Route destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDestination {
    /// Target cluster
    pub cluster: String,
    /// Route timeout in milliseconds (0 disables the timeout)
    pub timeout_ms: Option<u64>,
}

impl RouteDestination {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            cluster: name.into(),
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}
