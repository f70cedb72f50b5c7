//! xDS protocol types
//!
//! - `types` - native resource types
//! - `proto` - Envoy v3 wire messages
//! - `encode` - native to wire conversion

pub mod encode;
pub mod proto;
pub mod types;

pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ENDPOINT_TYPE_URL: &str = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

/// Resource kinds served over ADS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Listener,
    Cluster,
    Endpoint,
}

impl ResourceType {
    pub const ALL: [ResourceType; 3] = [ResourceType::Cluster, ResourceType::Endpoint, ResourceType::Listener];

    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::Endpoint => ENDPOINT_TYPE_URL,
        }
    }

    pub fn from_type_url(type_url: &str) -> Option<Self> {
        match type_url {
            LISTENER_TYPE_URL => Some(ResourceType::Listener),
            CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
            ENDPOINT_TYPE_URL => Some(ResourceType::Endpoint),
            _ => None,
        }
    }

    /// Short discovery service name used in logs
    pub fn short_name(&self) -> &'static str {
        match self {
            ResourceType::Listener => "LDS",
            ResourceType::Cluster => "CDS",
            ResourceType::Endpoint => "EDS",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_url_lookup() {
        for resource_type in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_url(resource_type.type_url()), Some(resource_type));
        }
        assert_eq!(
            ResourceType::from_type_url("type.googleapis.com/envoy.config.route.v3.RouteConfiguration"),
            None
        );
    }
}
