//! xDS Server Startup Module
//!
//! Wires the catalog to the control plane: the sync bridge keeps the
//! snapshot current and the gRPC server streams it to Envoy.

use std::sync::Arc;

use sidecar_catalog::{Catalog, Listener};
use sidecar_mesh::{CatalogSyncBridge, SyncBridgeConfig, XdsServer, XdsServerConfig, serve_xds_grpc};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::model::config::XdsConfig;

/// xDS service state and handles
pub struct XdsServerHandle {
    xds_server: Arc<XdsServer>,
    sync_bridge: Arc<CatalogSyncBridge>,
    bridge_task: JoinHandle<()>,
    grpc_task: JoinHandle<()>,
    shutdown_tx: oneshot::Sender<()>,
}

impl XdsServerHandle {
    pub fn server(&self) -> Arc<XdsServer> {
        self.xds_server.clone()
    }

    /// Stop the bridge, then drain the gRPC server
    pub async fn shutdown(self) {
        info!("Shutting down xDS service");
        self.sync_bridge.stop();
        if let Err(e) = self.bridge_task.await {
            warn!(error = %e, "xDS sync bridge task failed");
        }
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.grpc_task.await {
            warn!(error = %e, "xDS gRPC server task failed");
        }
    }
}

/// Start the control plane for `catalog`
pub async fn start_xds_service(xds_config: XdsConfig, catalog: Arc<Catalog>) -> anyhow::Result<XdsServerHandle> {
    info!(
        server_id = %xds_config.server_id,
        port = xds_config.port,
        bind_ip = %xds_config.bind_ip,
        "Starting xDS service"
    );

    let xds_server = Arc::new(XdsServer::new(XdsServerConfig {
        server_id: xds_config.server_id.clone(),
    }));

    let sync_bridge = Arc::new(CatalogSyncBridge::new(
        xds_server.clone(),
        SyncBridgeConfig {
            bind_ip: xds_config.bind_ip.clone(),
        },
    ));
    let bridge_task = sync_bridge.clone().watch(catalog)?;

    let listener = TcpListener::bind((xds_config.address.as_str(), xds_config.port)).await?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let grpc_server = xds_server.clone();
    let grpc_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = serve_xds_grpc(grpc_server, listener, shutdown).await {
            error!(error = %e, "xDS gRPC server failed");
        }
    });

    info!("xDS service started successfully");

    Ok(XdsServerHandle {
        xds_server,
        sync_bridge,
        bridge_task,
        grpc_task,
        shutdown_tx,
    })
}

#[cfg(test)]
mod tests {
    use sidecar_catalog::{Port, Service};

    use super::*;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let catalog = Arc::new(Catalog::new("node-a"));
        catalog.update(Service::new("aaa", "bocaccio", "node-a").with_port(Port::tcp("10.0.0.1", 9990, 10100)));

        let handle = start_xds_service(
            XdsConfig {
                enabled: true,
                address: "127.0.0.1".to_string(),
                port: 0,
                server_id: "test-xds".to_string(),
                bind_ip: "192.168.168.168".to_string(),
            },
            catalog.clone(),
        )
        .await
        .unwrap();

        let server = handle.server();
        assert_eq!(server.server_id(), "test-xds");
        assert_eq!(server.stats().snapshot_version, Some(server.snapshot_version(1)));
        assert_eq!(catalog.listener_names(), vec!["CatalogSyncBridge".to_string()]);

        handle.shutdown().await;
        assert!(catalog.listener_names().is_empty());
    }
}
