//! xDS Resource Snapshot Management
//!
//! A snapshot is an immutable, versioned bundle of every resource the
//! control plane serves. Resources are kept in ordered maps so repeated
//! builds over the same catalog encode identically.

use std::collections::BTreeMap;

use prost_types::Any;
use serde::Serialize;

use crate::xds::ResourceType;
use crate::xds::encode::{cluster_load_assignment_to_any, cluster_to_any, listener_to_any};
use crate::xds::types::{Cluster, ClusterLoadAssignment, Listener};

/// The unversioned resource set produced by one catalog rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SnapshotResources {
    /// Cluster resources (CDS)
    pub clusters: BTreeMap<String, Cluster>,
    /// Endpoint resources (EDS)
    pub endpoints: BTreeMap<String, ClusterLoadAssignment>,
    /// Listener resources (LDS)
    pub listeners: BTreeMap<String, Listener>,
}

impl SnapshotResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cluster(&mut self, cluster: Cluster) {
        self.clusters.insert(cluster.name.clone(), cluster);
    }

    pub fn add_endpoints(&mut self, assignment: ClusterLoadAssignment) {
        self.endpoints.insert(assignment.cluster_name.clone(), assignment);
    }

    pub fn add_listener(&mut self, listener: Listener) {
        self.listeners.insert(listener.name.clone(), listener);
    }

    /// Check if the set contains a specific resource
    pub fn contains(&self, resource_type: ResourceType, name: &str) -> bool {
        match resource_type {
            ResourceType::Cluster => self.clusters.contains_key(name),
            ResourceType::Endpoint => self.endpoints.contains_key(name),
            ResourceType::Listener => self.listeners.contains_key(name),
        }
    }

    /// Resource names of one kind, in order
    pub fn names(&self, resource_type: ResourceType) -> Vec<&str> {
        match resource_type {
            ResourceType::Cluster => self.clusters.keys().map(String::as_str).collect(),
            ResourceType::Endpoint => self.endpoints.keys().map(String::as_str).collect(),
            ResourceType::Listener => self.listeners.keys().map(String::as_str).collect(),
        }
    }

    pub fn resource_count(&self) -> usize {
        self.clusters.len() + self.endpoints.len() + self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }
}

/// A versioned snapshot of xDS resources
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSnapshot {
    /// Snapshot version
    pub version: String,
    pub resources: SnapshotResources,
    /// Creation timestamp (milliseconds)
    pub created_at: i64,
}

impl ResourceSnapshot {
    pub fn new(version: impl Into<String>, resources: SnapshotResources) -> Self {
        Self {
            version: version.into(),
            resources,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Encode resources of one kind.
    ///
    /// An empty `names` list subscribes to every resource of the kind.
    pub fn encode(&self, resource_type: ResourceType, names: &[String]) -> Vec<Any> {
        let wanted = |name: &String| names.is_empty() || names.contains(name);
        match resource_type {
            ResourceType::Cluster => self
                .resources
                .clusters
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(_, cluster)| cluster_to_any(cluster))
                .collect(),
            ResourceType::Endpoint => self
                .resources
                .endpoints
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(_, assignment)| cluster_load_assignment_to_any(assignment))
                .collect(),
            ResourceType::Listener => self
                .resources
                .listeners
                .iter()
                .filter(|(name, _)| wanted(name))
                .map(|(_, listener)| listener_to_any(listener))
                .collect(),
        }
    }
}
