//! xDS Server Implementation
//!
//! `XdsServer` owns the current snapshot and publishes it to every connected
//! stream through a `watch` channel. `StreamSession` is the per-stream state
//! machine for the state-of-the-world ADS protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::snapshot::{ResourceSnapshot, SnapshotResources};
use crate::xds::ResourceType;
use crate::xds::proto::{ControlPlane, DiscoveryRequest, DiscoveryResponse};

pub type SnapshotReceiver = watch::Receiver<Option<Arc<ResourceSnapshot>>>;

/// xDS server configuration
#[derive(Debug, Clone)]
pub struct XdsServerConfig {
    /// Server identifier, reported as the control plane identifier
    pub server_id: String,
}

impl Default for XdsServerConfig {
    fn default() -> Self {
        Self {
            server_id: "sidecar-xds-server".to_string(),
        }
    }
}

/// A connected ADS stream
#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub stream_id: u64,
    pub node_id: Option<String>,
    pub connected_at: i64,
}

/// Server statistics
#[derive(Debug, Clone, Serialize)]
pub struct XdsServerStats {
    pub snapshot_version: Option<String>,
    pub resources: usize,
    pub active_streams: usize,
    pub connected_nodes: Vec<String>,
    pub responses_sent: u64,
}

/// xDS Server
///
/// Holds the single snapshot shared by every node. Snapshot versions are
/// `{epoch}-{sequence}`, where `epoch` is the server's creation time in
/// nanoseconds, so a proxy reconnecting after a restart never holds a
/// version this process could publish.
pub struct XdsServer {
    config: XdsServerConfig,
    version_epoch: i64,
    version_counter: AtomicU64,
    snapshot_tx: watch::Sender<Option<Arc<ResourceSnapshot>>>,
    active_streams: DashMap<u64, StreamInfo>,
    next_stream_id: AtomicU64,
    responses_sent: AtomicU64,
}

impl XdsServer {
    pub fn new(config: XdsServerConfig) -> Self {
        info!(server_id = %config.server_id, "Creating xDS server");
        let (snapshot_tx, _) = watch::channel(None);
        let now = chrono::Utc::now();
        Self {
            config,
            version_epoch: now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros()),
            version_counter: AtomicU64::new(0),
            snapshot_tx,
            active_streams: DashMap::new(),
            next_stream_id: AtomicU64::new(1),
            responses_sent: AtomicU64::new(0),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    /// Version string of the `sequence`-th snapshot published by this server
    pub fn snapshot_version(&self, sequence: u64) -> String {
        format!("{}-{sequence}", self.version_epoch)
    }

    /// Publish a resource set as a new snapshot.
    ///
    /// Returns the new version, or `None` when the set equals the current
    /// snapshot's and nothing was published.
    pub fn update_snapshot(&self, resources: SnapshotResources) -> Option<String> {
        let count = resources.resource_count();
        let mut published = None;

        self.snapshot_tx.send_if_modified(|current| {
            if current.as_ref().is_some_and(|s| s.resources == resources) {
                return false;
            }
            let version = self.snapshot_version(self.version_counter.fetch_add(1, Ordering::SeqCst) + 1);
            *current = Some(Arc::new(ResourceSnapshot::new(version.clone(), resources)));
            published = Some(version);
            true
        });

        match &published {
            Some(version) => info!(version = %version, resources = count, "Published xDS snapshot"),
            None => debug!("xDS resources unchanged, snapshot not published"),
        }
        published
    }

    pub fn current_snapshot(&self) -> Option<Arc<ResourceSnapshot>> {
        self.snapshot_tx.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> SnapshotReceiver {
        self.snapshot_tx.subscribe()
    }

    pub fn register_stream(&self) -> u64 {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::SeqCst);
        self.active_streams.insert(
            stream_id,
            StreamInfo {
                stream_id,
                node_id: None,
                connected_at: chrono::Utc::now().timestamp_millis(),
            },
        );
        debug!(stream_id, "Registered ADS stream");
        stream_id
    }

    pub fn set_stream_node(&self, stream_id: u64, node_id: &str) {
        if let Some(mut info) = self.active_streams.get_mut(&stream_id) {
            info.node_id = Some(node_id.to_string());
        }
    }

    pub fn unregister_stream(&self, stream_id: u64) {
        if let Some((_, info)) = self.active_streams.remove(&stream_id) {
            info!(stream_id, node_id = ?info.node_id, "ADS stream closed");
        }
    }

    pub fn record_response(&self) {
        self.responses_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> XdsServerStats {
        let snapshot = self.current_snapshot();
        let mut connected_nodes: Vec<String> = self
            .active_streams
            .iter()
            .filter_map(|entry| entry.value().node_id.clone())
            .collect();
        connected_nodes.sort();

        XdsServerStats {
            snapshot_version: snapshot.as_ref().map(|s| s.version.clone()),
            resources: snapshot.as_ref().map_or(0, |s| s.resources.resource_count()),
            active_streams: self.active_streams.len(),
            connected_nodes,
            responses_sent: self.responses_sent.load(Ordering::Relaxed),
        }
    }
}

/// Per-type subscription state of one stream
#[derive(Debug, Default)]
struct TypeState {
    resource_names: Vec<String>,
    /// Version the client currently holds
    known_version: String,
    last_sent_version: Option<String>,
    last_nonce: Option<String>,
    acked_version: Option<String>,
    pending: bool,
}

/// State machine for one ADS stream
pub struct StreamSession {
    stream_id: u64,
    control_plane_id: String,
    node_id: Option<String>,
    types: HashMap<ResourceType, TypeState>,
}

impl StreamSession {
    pub fn new(stream_id: u64, control_plane_id: impl Into<String>) -> Self {
        Self {
            stream_id,
            control_plane_id: control_plane_id.into(),
            node_id: None,
            types: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    pub fn acked_version(&self, resource_type: ResourceType) -> Option<&str> {
        self.types.get(&resource_type).and_then(|s| s.acked_version.as_deref())
    }

    pub fn is_pending(&self, resource_type: ResourceType) -> bool {
        self.types.get(&resource_type).is_some_and(|s| s.pending)
    }

    /// Handle one client request.
    ///
    /// Answers when the snapshot version differs from what the client holds
    /// or the subscribed names changed, otherwise parks the type until the
    /// next snapshot. Unknown types and stale nonces are ignored.
    pub fn handle_request(
        &mut self,
        request: &DiscoveryRequest,
        snapshot: Option<&ResourceSnapshot>,
    ) -> Option<DiscoveryResponse> {
        if self.node_id.is_none()
            && let Some(node) = request.node.as_ref().filter(|n| !n.id.is_empty())
        {
            info!(stream_id = self.stream_id, node_id = %node.id, "ADS stream established");
            self.node_id = Some(node.id.clone());
        }
        let node_id = self.node_id.clone().unwrap_or_default();

        let Some(resource_type) = ResourceType::from_type_url(&request.type_url) else {
            warn!(
                stream_id = self.stream_id,
                node_id = %node_id,
                type_url = %request.type_url,
                "Ignoring request for unsupported resource type"
            );
            return None;
        };

        let state = self.types.entry(resource_type).or_default();

        if let Some(last_nonce) = &state.last_nonce
            && request.response_nonce != *last_nonce
        {
            debug!(
                stream_id = self.stream_id,
                node_id = %node_id,
                resource_type = %resource_type,
                nonce = %request.response_nonce,
                "Ignoring request with stale nonce"
            );
            return None;
        }

        if let Some(detail) = &request.error_detail {
            warn!(
                node_id = %node_id,
                resource_type = %resource_type,
                rejected_version = ?state.last_sent_version,
                error = %detail.message,
                "Client rejected configuration (NACK)"
            );
            state.known_version = state
                .last_sent_version
                .clone()
                .unwrap_or_else(|| request.version_info.clone());
        } else {
            if state.last_nonce.is_some() {
                debug!(
                    node_id = %node_id,
                    resource_type = %resource_type,
                    version = %request.version_info,
                    "Client acknowledged configuration"
                );
                state.acked_version = Some(request.version_info.clone());
            }
            state.known_version = request.version_info.clone();
        }

        let names_changed = !same_names(&state.resource_names, &request.resource_names);
        state.resource_names = request.resource_names.clone();

        let Some(snapshot) = snapshot.filter(|s| s.version != state.known_version || names_changed) else {
            state.pending = true;
            return None;
        };
        Some(self.respond(resource_type, snapshot))
    }

    /// Answer every parked type whose held version differs from `snapshot`
    pub fn handle_snapshot(&mut self, snapshot: &ResourceSnapshot) -> Vec<DiscoveryResponse> {
        let ready: Vec<ResourceType> = ResourceType::ALL
            .into_iter()
            .filter(|rt| {
                self.types
                    .get(rt)
                    .is_some_and(|s| s.pending && s.known_version != snapshot.version)
            })
            .collect();

        ready.into_iter().map(|rt| self.respond(rt, snapshot)).collect()
    }

    fn respond(&mut self, resource_type: ResourceType, snapshot: &ResourceSnapshot) -> DiscoveryResponse {
        let state = self.types.entry(resource_type).or_default();
        let nonce = uuid::Uuid::new_v4().to_string();
        let resources = snapshot.encode(resource_type, &state.resource_names);

        debug!(
            stream_id = self.stream_id,
            node_id = ?self.node_id,
            resource_type = %resource_type,
            version = %snapshot.version,
            resources = resources.len(),
            "Sending discovery response"
        );

        state.last_sent_version = Some(snapshot.version.clone());
        state.last_nonce = Some(nonce.clone());
        state.pending = false;

        DiscoveryResponse {
            version_info: snapshot.version.clone(),
            resources,
            canary: false,
            type_url: resource_type.type_url().to_string(),
            nonce,
            control_plane: Some(ControlPlane {
                identifier: self.control_plane_id.clone(),
            }),
        }
    }
}

fn same_names(a: &[String], b: &[String]) -> bool {
    let mut a: Vec<&String> = a.iter().collect();
    let mut b: Vec<&String> = b.iter().collect();
    a.sort();
    b.sort();
    a.dedup();
    b.dedup();
    a == b
}
