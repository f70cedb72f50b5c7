//! Catalog to xDS Synchronization Bridge
//!
//! `CatalogSyncBridge` subscribes to the catalog like any other listener and
//! turns bursts of change events into a single snapshot rebuild.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use sidecar_catalog::{Catalog, CatalogState, ChangeEvent, Listener, Service, listener::event_channel};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adapter::{build_cluster, build_cluster_load_assignment, build_listener};
use crate::error::MeshError;
use crate::server::XdsServer;
use crate::snapshot::SnapshotResources;
use crate::xds::types::Endpoint;

pub const SYNC_BRIDGE_NAME: &str = "CatalogSyncBridge";

/// Configuration for the sync bridge
#[derive(Debug, Clone)]
pub struct SyncBridgeConfig {
    /// Address every generated listener binds to
    pub bind_ip: String,
}

impl Default for SyncBridgeConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
        }
    }
}

/// One backend: every Alive port sharing a (name, service port) pair
struct BackendGroup<'a> {
    /// Most recently updated member, supplies the proxy mode
    representative: &'a Service,
    endpoints: Vec<Endpoint>,
}

/// Build the full resource set from a consistent view of the catalog.
///
/// Callers hold the catalog read lock for the duration. Ports without a
/// service port are not exposed through the proxy and are skipped.
pub fn build_snapshot_resources(state: &CatalogState, bind_ip: &str) -> SnapshotResources {
    let mut groups: BTreeMap<(&str, u16), BackendGroup<'_>> = BTreeMap::new();

    for svc in state.alive_services() {
        for port in svc.ports.iter().filter(|p| p.service_port > 0) {
            let group = groups
                .entry((svc.name.as_str(), port.service_port))
                .or_insert_with(|| BackendGroup {
                    representative: svc,
                    endpoints: Vec::new(),
                });
            if svc.updated > group.representative.updated {
                group.representative = svc;
            }
            group.endpoints.push(Endpoint::new(&port.ip, port.port));
        }
    }

    let mut resources = SnapshotResources::new();
    for ((name, service_port), group) in groups {
        resources.add_cluster(build_cluster(name, service_port));
        resources.add_endpoints(build_cluster_load_assignment(name, service_port, group.endpoints));
        if let Some(listener) = build_listener(group.representative, service_port, bind_ip) {
            resources.add_listener(listener);
        }
    }
    resources
}

/// Catalog to xDS Synchronization Bridge
///
/// Unmanaged: the owner stops it, not the catalog.
pub struct CatalogSyncBridge {
    name: String,
    config: SyncBridgeConfig,
    xds_server: Arc<XdsServer>,
    tx: mpsc::Sender<ChangeEvent>,
    rx: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
    cancel: CancellationToken,
    rebuilds: AtomicU64,
}

impl CatalogSyncBridge {
    pub fn new(xds_server: Arc<XdsServer>, config: SyncBridgeConfig) -> Self {
        let (tx, rx) = event_channel();
        Self {
            name: SYNC_BRIDGE_NAME.to_string(),
            config,
            xds_server,
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
            rebuilds: AtomicU64::new(0),
        }
    }

    /// Number of rebuilds run so far, the initial one included
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Subscribe to the catalog, publish an initial snapshot and keep it
    /// current until stopped.
    pub fn watch(self: Arc<Self>, catalog: Arc<Catalog>) -> Result<JoinHandle<()>, MeshError> {
        let Some(mut rx) = self.rx.lock().take() else {
            return Err(MeshError::AlreadyStarted(self.name.clone()));
        };

        catalog.subscribe(self.clone());
        info!(bind_ip = %self.config.bind_ip, "Starting catalog-xDS sync bridge");
        self.rebuild(&catalog);

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let mut collapsed = 1usize;
                        while rx.try_recv().is_ok() {
                            collapsed += 1;
                        }
                        debug!(
                            service_id = %event.service_id,
                            hostname = %event.hostname,
                            collapsed,
                            "Catalog changed"
                        );
                        self.rebuild(&catalog);
                    }
                }
            }
            catalog.unsubscribe(&self.name);
            info!("Catalog-xDS sync bridge stopped");
        }))
    }

    /// Rebuild from the catalog and publish if anything changed.
    ///
    /// Returns the new snapshot version when one was published.
    pub fn rebuild(&self, catalog: &Catalog) -> Option<String> {
        let resources = catalog.with_read_lock(|state| build_snapshot_resources(state, &self.config.bind_ip));
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        self.xds_server.update_snapshot(resources)
    }
}

impl Listener for CatalogSyncBridge {
    fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.tx.clone()
    }

    fn is_managed(&self) -> bool {
        false
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use sidecar_catalog::{Port, ProxyMode};

    use super::*;
    use crate::server::XdsServerConfig;
    use crate::xds::ResourceType;
    use crate::xds::types::NetworkFilterType;

    const BIND_IP: &str = "192.168.168.168";

    fn service(id: &str, name: &str, host: &str, port: Port) -> Service {
        Service::new(id, name, host).with_port(port)
    }

    fn catalog_with_pair() -> Catalog {
        let catalog = Catalog::new("node-a");
        catalog.update(service("aaa", "bocaccio", "node-a", Port::tcp("10.0.0.2", 9991, 10100)));
        catalog.update(service("bbb", "bocaccio", "node-b", Port::tcp("10.0.0.1", 9990, 10100)));
        catalog
    }

    #[test]
    fn test_grouping_by_name_and_service_port() {
        let catalog = catalog_with_pair();
        let resources = catalog.with_read_lock(|state| build_snapshot_resources(state, BIND_IP));

        assert_eq!(resources.names(ResourceType::Listener), vec!["bocaccio-10100"]);
        assert_eq!(resources.names(ResourceType::Cluster), vec!["bocaccio-10100"]);
        let assignment = &resources.endpoints["bocaccio-10100"];
        let ports: Vec<u16> = assignment.all_endpoints().map(|e| e.port).collect();
        assert_eq!(ports, vec![9990, 9991]);
    }

    #[test]
    fn test_unexposed_ports_are_skipped() {
        let catalog = Catalog::new("node-a");
        catalog.update(service("aaa", "batch", "node-a", Port::tcp("10.0.0.1", 9990, 0)));

        let resources = catalog.with_read_lock(|state| build_snapshot_resources(state, BIND_IP));
        assert!(resources.is_empty());
    }

    #[test]
    fn test_mode_without_listener_keeps_cluster() {
        let catalog = Catalog::new("node-a");
        catalog.update(
            service("aaa", "internal", "node-a", Port::tcp("10.0.0.1", 9990, 10200)).with_proxy_mode(ProxyMode::None),
        );

        let resources = catalog.with_read_lock(|state| build_snapshot_resources(state, BIND_IP));
        assert!(resources.listeners.is_empty());
        assert!(resources.contains(ResourceType::Cluster, "internal-10200"));
        assert!(resources.contains(ResourceType::Endpoint, "internal-10200"));
    }

    #[test]
    fn test_newest_member_picks_proxy_mode() {
        let now = chrono::Utc::now();
        let catalog = Catalog::new("node-a");
        catalog.update(
            service("aaa", "kafka", "node-a", Port::tcp("10.0.0.1", 9092, 10300))
                .with_updated(now - chrono::Duration::seconds(5)),
        );
        catalog.update(
            service("bbb", "kafka", "node-b", Port::tcp("10.0.0.2", 9092, 10300))
                .with_proxy_mode(ProxyMode::Tcp)
                .with_updated(now),
        );

        let resources = catalog.with_read_lock(|state| build_snapshot_resources(state, BIND_IP));
        let listener = &resources.listeners["kafka-10300"];
        let filter = listener.filters().next().unwrap();
        assert!(matches!(filter.filter_type, NetworkFilterType::TcpProxy { .. }));
    }

    #[test]
    fn test_tombstoned_sole_instance_disappears() {
        let server = Arc::new(XdsServer::new(XdsServerConfig::default()));
        let bridge = CatalogSyncBridge::new(server.clone(), SyncBridgeConfig::default());
        let catalog = Catalog::new("node-a");
        let svc = service("aaa", "tolstoy", "node-a", Port::tcp("10.0.0.1", 9990, 10400));
        catalog.update(svc.clone());

        assert_eq!(bridge.rebuild(&catalog), Some(server.snapshot_version(1)));
        catalog.tombstone(svc);
        assert_eq!(bridge.rebuild(&catalog), Some(server.snapshot_version(2)));

        let snapshot = server.current_snapshot().unwrap();
        for resource_type in ResourceType::ALL {
            assert!(snapshot.encode(resource_type, &["tolstoy-10400".to_string()]).is_empty());
        }
        // Nothing changed, nothing published
        assert_eq!(bridge.rebuild(&catalog), None);
        assert_eq!(bridge.rebuild_count(), 3);
    }

    #[tokio::test]
    async fn test_watch_publishes_on_change() {
        let server = Arc::new(XdsServer::new(XdsServerConfig::default()));
        let bridge = Arc::new(CatalogSyncBridge::new(
            server.clone(),
            SyncBridgeConfig {
                bind_ip: BIND_IP.to_string(),
            },
        ));
        let catalog = Arc::new(Catalog::new("node-a"));
        let mut snapshots = server.subscribe();

        let handle = bridge.clone().watch(catalog.clone()).unwrap();
        assert_eq!(server.current_snapshot().unwrap().version, server.snapshot_version(1));
        assert!(catalog.listener_names().contains(&SYNC_BRIDGE_NAME.to_string()));

        snapshots.borrow_and_update();
        catalog.update(service("aaa", "bocaccio", "node-a", Port::tcp("10.0.0.1", 9990, 10100)));
        tokio::time::timeout(Duration::from_secs(2), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        let snapshot = server.current_snapshot().unwrap();
        assert_eq!(snapshot.version, server.snapshot_version(2));
        assert_eq!(snapshot.resources.listeners["bocaccio-10100"].address.address, BIND_IP);

        assert!(matches!(
            bridge.clone().watch(catalog.clone()),
            Err(MeshError::AlreadyStarted(_))
        ));

        bridge.stop();
        handle.await.unwrap();
        assert!(catalog.listener_names().is_empty());
    }

    #[tokio::test]
    async fn test_burst_collapses_rebuilds() {
        let server = Arc::new(XdsServer::new(XdsServerConfig::default()));
        let bridge = Arc::new(CatalogSyncBridge::new(server.clone(), SyncBridgeConfig::default()));
        let catalog = Arc::new(Catalog::new("node-a"));

        // Queue a burst before the task gets to run
        catalog.subscribe(bridge.clone());
        for i in 0..10u16 {
            catalog.update(service(&format!("id-{i}"), "web", "node-a", Port::tcp("10.0.0.1", 9000 + i, 8080)));
        }
        let handle = bridge.clone().watch(catalog.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        bridge.stop();
        handle.await.unwrap();

        // Initial rebuild plus one for the whole burst
        assert_eq!(bridge.rebuild_count(), 2);
        let snapshot = server.current_snapshot().unwrap();
        assert_eq!(snapshot.resources.endpoints["web-8080"].total_count(), 10);
    }
}
