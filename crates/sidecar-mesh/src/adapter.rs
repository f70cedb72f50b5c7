//! Catalog to xDS Resource Conversion
//!
//! Pure functions mapping one backend, identified by (service name, service
//! port), to its listener, cluster and endpoint resources.

use sidecar_catalog::{ProxyMode, Service};

use crate::xds::types::{
    Cluster, ClusterLoadAssignment, Endpoint, FilterChain, Listener, ListenerAddress, Locality, NetworkFilter,
    Route, RouteConfiguration, RouteDestination, VirtualHost,
};

pub const CLUSTER_CONNECT_TIMEOUT_MS: u64 = 500;
/// Zero disables the per-route timeout
pub const ROUTE_TIMEOUT_MS: u64 = 0;
pub const HTTP_STAT_PREFIX: &str = "ingress_http";
pub const TCP_STAT_PREFIX: &str = "ingress_tcp";
pub const WEBSOCKET_UPGRADE: &str = "websocket";

/// Resource name for a backend: `<name>-<service_port>`
pub fn svc_name(name: &str, service_port: u16) -> String {
    format!("{name}-{service_port}")
}

/// Build the listener for a backend.
///
/// Returns `None` for proxy modes that are not fronted by a listener.
pub fn build_listener(svc: &Service, service_port: u16, bind_ip: &str) -> Option<Listener> {
    let resource_name = svc_name(&svc.name, service_port);

    let filter = match svc.proxy_mode {
        ProxyMode::Http => http_filter(&svc.name, &resource_name),
        ProxyMode::Ws => http_filter(&svc.name, &resource_name).with_upgrade(WEBSOCKET_UPGRADE),
        ProxyMode::Tcp => NetworkFilter::tcp_proxy(TCP_STAT_PREFIX, &resource_name),
        ProxyMode::None => return None,
    };

    Some(
        Listener::new(&resource_name, ListenerAddress::tcp(bind_ip, service_port))
            .with_filter_chain(FilterChain::new().with_filter(filter)),
    )
}

fn http_filter(service_name: &str, cluster_name: &str) -> NetworkFilter {
    let route_config = RouteConfiguration::new(cluster_name).with_virtual_host(
        VirtualHost::new(service_name, vec!["*".to_string()]).with_route(Route::prefix(
            "/",
            RouteDestination::cluster(cluster_name).with_timeout(ROUTE_TIMEOUT_MS),
        )),
    );
    NetworkFilter::http_connection_manager(HTTP_STAT_PREFIX, route_config)
}

/// Build the EDS cluster for a backend; endpoints are not inlined
pub fn build_cluster(name: &str, service_port: u16) -> Cluster {
    Cluster::new_eds(svc_name(name, service_port), CLUSTER_CONNECT_TIMEOUT_MS)
}

/// Build the endpoint assignment for a backend.
///
/// Endpoints are sorted by (port, ip) and deduplicated so identical input
/// always encodes identically.
pub fn build_cluster_load_assignment(
    name: &str,
    service_port: u16,
    endpoints: impl IntoIterator<Item = Endpoint>,
) -> ClusterLoadAssignment {
    let mut endpoints: Vec<Endpoint> = endpoints.into_iter().collect();
    endpoints.sort_by(|a, b| a.port.cmp(&b.port).then_with(|| a.address.cmp(&b.address)));
    endpoints.dedup();

    let mut assignment = ClusterLoadAssignment::new(svc_name(name, service_port));
    assignment.add_locality(Locality::default(), endpoints);
    assignment
}
