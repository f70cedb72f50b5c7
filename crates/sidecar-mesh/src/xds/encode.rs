//! Conversion of native xDS types into Envoy v3 wire messages

use prost::Message;
use prost_types::{Any, Duration};

use super::proto;
use super::types::{
    Cluster, ClusterLoadAssignment, Endpoint, Listener, ListenerAddress, Locality, NetworkFilter, NetworkFilterType,
    Route, RouteConfiguration, VirtualHost,
};
use super::{CLUSTER_TYPE_URL, ENDPOINT_TYPE_URL, LISTENER_TYPE_URL};
use crate::xds::types::ROUTER_FILTER;

pub const HTTP_CONNECTION_MANAGER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
pub const TCP_PROXY_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
pub const ROUTER_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";

/// Pack a message into `Any` under the given type URL
pub fn to_any<M: Message>(type_url: &str, message: &M) -> Any {
    Any {
        type_url: type_url.to_string(),
        value: message.encode_to_vec(),
    }
}

pub fn duration_from_millis(millis: u64) -> Duration {
    Duration {
        seconds: (millis / 1000) as i64,
        nanos: ((millis % 1000) * 1_000_000) as i32,
    }
}

pub fn listener_to_any(listener: &Listener) -> Any {
    to_any(LISTENER_TYPE_URL, &proto::Listener::from(listener))
}

pub fn cluster_to_any(cluster: &Cluster) -> Any {
    to_any(CLUSTER_TYPE_URL, &proto::Cluster::from(cluster))
}

pub fn cluster_load_assignment_to_any(assignment: &ClusterLoadAssignment) -> Any {
    to_any(ENDPOINT_TYPE_URL, &proto::ClusterLoadAssignment::from(assignment))
}

fn socket_address(address: &str, port: u16) -> proto::Address {
    proto::Address {
        socket_address: Some(proto::SocketAddress {
            protocol: proto::SocketProtocol::Tcp as i32,
            address: address.to_string(),
            port_value: u32::from(port),
        }),
    }
}

impl From<&ListenerAddress> for proto::Address {
    fn from(addr: &ListenerAddress) -> Self {
        socket_address(&addr.address, addr.port)
    }
}

impl From<&Listener> for proto::Listener {
    fn from(listener: &Listener) -> Self {
        proto::Listener {
            name: listener.name.clone(),
            address: Some(proto::Address::from(&listener.address)),
            filter_chains: listener
                .filter_chains
                .iter()
                .map(|chain| proto::FilterChain {
                    filters: chain.filters.iter().map(proto::Filter::from).collect(),
                })
                .collect(),
        }
    }
}

impl From<&NetworkFilter> for proto::Filter {
    fn from(filter: &NetworkFilter) -> Self {
        let typed_config = match &filter.filter_type {
            NetworkFilterType::HttpConnectionManager {
                stat_prefix,
                route_config,
                upgrade_types,
            } => {
                let hcm = proto::HttpConnectionManager {
                    codec_type: proto::CodecType::Auto as i32,
                    stat_prefix: stat_prefix.clone(),
                    route_config: Some(proto::RouteConfiguration::from(route_config)),
                    http_filters: vec![proto::HttpFilter {
                        name: ROUTER_FILTER.to_string(),
                        typed_config: Some(to_any(ROUTER_TYPE_URL, &proto::Router {})),
                    }],
                    upgrade_configs: upgrade_types
                        .iter()
                        .map(|upgrade_type| proto::UpgradeConfig {
                            upgrade_type: upgrade_type.clone(),
                        })
                        .collect(),
                };
                to_any(HTTP_CONNECTION_MANAGER_TYPE_URL, &hcm)
            }
            NetworkFilterType::TcpProxy { stat_prefix, cluster } => {
                let tcp = proto::TcpProxy {
                    stat_prefix: stat_prefix.clone(),
                    cluster: cluster.clone(),
                };
                to_any(TCP_PROXY_TYPE_URL, &tcp)
            }
        };

        proto::Filter {
            name: filter.name.clone(),
            typed_config: Some(typed_config),
        }
    }
}

impl From<&RouteConfiguration> for proto::RouteConfiguration {
    fn from(config: &RouteConfiguration) -> Self {
        proto::RouteConfiguration {
            name: config.name.clone(),
            virtual_hosts: config.virtual_hosts.iter().map(proto::VirtualHost::from).collect(),
        }
    }
}

impl From<&VirtualHost> for proto::VirtualHost {
    fn from(vhost: &VirtualHost) -> Self {
        proto::VirtualHost {
            name: vhost.name.clone(),
            domains: vhost.domains.clone(),
            routes: vhost.routes.iter().map(proto::Route::from).collect(),
        }
    }
}

impl From<&Route> for proto::Route {
    fn from(route: &Route) -> Self {
        proto::Route {
            r#match: Some(proto::RouteMatch {
                prefix: Some(route.prefix.clone()),
                path: None,
            }),
            route: Some(proto::RouteAction {
                cluster: route.destination.cluster.clone(),
                timeout: route.destination.timeout_ms.map(duration_from_millis),
            }),
        }
    }
}

impl From<&Cluster> for proto::Cluster {
    fn from(cluster: &Cluster) -> Self {
        proto::Cluster {
            name: cluster.name.clone(),
            r#type: proto::DiscoveryType::Eds as i32,
            eds_cluster_config: Some(proto::EdsClusterConfig {
                eds_config: Some(proto::ConfigSource {
                    ads: Some(proto::AggregatedConfigSource {}),
                    resource_api_version: proto::ApiVersion::V3 as i32,
                }),
            }),
            connect_timeout: Some(duration_from_millis(cluster.connect_timeout_ms)),
            lb_policy: proto::LbPolicy::RoundRobin as i32,
            load_assignment: None,
        }
    }
}

impl From<&Locality> for proto::Locality {
    fn from(locality: &Locality) -> Self {
        proto::Locality {
            region: locality.region.clone(),
            zone: locality.zone.clone(),
            sub_zone: locality.sub_zone.clone(),
        }
    }
}

impl From<&Endpoint> for proto::LbEndpoint {
    fn from(endpoint: &Endpoint) -> Self {
        proto::LbEndpoint {
            endpoint: Some(proto::Endpoint {
                address: Some(socket_address(&endpoint.address, endpoint.port)),
            }),
        }
    }
}

impl From<&ClusterLoadAssignment> for proto::ClusterLoadAssignment {
    fn from(assignment: &ClusterLoadAssignment) -> Self {
        proto::ClusterLoadAssignment {
            cluster_name: assignment.cluster_name.clone(),
            endpoints: assignment
                .endpoints
                .iter()
                .map(|le| proto::LocalityLbEndpoints {
                    locality: Some(proto::Locality::from(&le.locality)),
                    lb_endpoints: le.endpoints.iter().map(proto::LbEndpoint::from).collect(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xds::types::{FilterChain, RouteDestination};

    #[test]
    fn test_duration_from_millis() {
        assert_eq!(duration_from_millis(500), Duration { seconds: 0, nanos: 500_000_000 });
        assert_eq!(duration_from_millis(2_250), Duration { seconds: 2, nanos: 250_000_000 });
        assert_eq!(duration_from_millis(0), Duration { seconds: 0, nanos: 0 });
    }

    #[test]
    fn test_listener_encodes_tcp_proxy() {
        let listener = Listener::new("db-5432", ListenerAddress::tcp("10.0.0.5", 5432))
            .with_filter_chain(FilterChain::new().with_filter(NetworkFilter::tcp_proxy("ingress_tcp", "db-5432")));

        let any = listener_to_any(&listener);
        assert_eq!(any.type_url, LISTENER_TYPE_URL);

        let decoded = proto::Listener::decode(any.value.as_slice()).unwrap();
        let socket = decoded.address.unwrap().socket_address.unwrap();
        assert_eq!(socket.address, "10.0.0.5");
        assert_eq!(socket.port_value, 5432);

        let filter = &decoded.filter_chains[0].filters[0];
        let typed = filter.typed_config.as_ref().unwrap();
        assert_eq!(typed.type_url, TCP_PROXY_TYPE_URL);
        let tcp = proto::TcpProxy::decode(typed.value.as_slice()).unwrap();
        assert_eq!(tcp.stat_prefix, "ingress_tcp");
        assert_eq!(tcp.cluster, "db-5432");
    }

    #[test]
    fn test_http_filter_carries_router_and_upgrades() {
        let route_config = RouteConfiguration::new("web-80").with_virtual_host(
            VirtualHost::new("web", vec!["*".to_string()]).with_route(Route::prefix(
                "/",
                RouteDestination::cluster("web-80").with_timeout(0),
            )),
        );
        let filter = NetworkFilter::http_connection_manager("ingress_http", route_config).with_upgrade("websocket");

        let encoded = proto::Filter::from(&filter);
        let typed = encoded.typed_config.unwrap();
        let hcm = proto::HttpConnectionManager::decode(typed.value.as_slice()).unwrap();

        assert_eq!(hcm.http_filters.len(), 1);
        assert_eq!(hcm.http_filters[0].name, ROUTER_FILTER);
        assert_eq!(hcm.upgrade_configs.len(), 1);
        assert_eq!(hcm.upgrade_configs[0].upgrade_type, "websocket");

        let route = &hcm.route_config.unwrap().virtual_hosts[0].routes[0];
        assert_eq!(route.r#match.as_ref().unwrap().prefix.as_deref(), Some("/"));
        let action = route.route.as_ref().unwrap();
        assert_eq!(action.cluster, "web-80");
        assert_eq!(action.timeout, Some(Duration::default()));
    }
}
