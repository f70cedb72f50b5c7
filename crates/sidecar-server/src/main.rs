//! Main entry point for the Sidecar agent.
//!
//! Starts the catalog with its webhooks and reaper, the xDS control plane and
//! the HTTP API, then waits for Ctrl+C or SIGTERM.

use std::sync::Arc;

use sidecar_server::{
    AppState, Configuration,
    startup::{self, ShutdownSignal, start_xds_service},
};
use tracing::{error, info};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;
    let _logging_guard = startup::init_logging(&configuration.logging_config())?;

    info!(
        cluster_name = %configuration.cluster_name(),
        hostname = %configuration.hostname(),
        advertise_ip = %configuration.advertise_ip(),
        "Starting sidecar"
    );

    let shutdown = ShutdownSignal::new();
    startup::listen_for_os_signals(shutdown.clone());

    let catalog_handle = startup::start_catalog(&configuration)?;
    let catalog = catalog_handle.catalog();

    let xds_config = configuration.xds_config();
    let xds_handle = if xds_config.enabled {
        Some(start_xds_service(xds_config, catalog.clone()).await?)
    } else {
        info!("xDS service disabled");
        None
    };

    let app_state = Arc::new(AppState::new(
        configuration.clone(),
        catalog,
        xds_handle.as_ref().map(|handle| handle.server()),
    ));

    let address = configuration.http_address();
    let port = configuration.http_port();
    info!("Starting HTTP API on {}:{}", address, port);
    let server = startup::main_server(app_state, address, port)?;
    let server_handle = server.handle();

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("HTTP server error: {}", e);
            }
        }
        _ = shutdown.wait() => {
            info!("HTTP server shutting down gracefully");
            server_handle.stop(true).await;
        }
    }

    if let Some(handle) = xds_handle {
        handle.shutdown().await;
        info!("xDS service stopped");
    }
    catalog_handle.shutdown().await;

    info!("Sidecar shutdown complete");
    Ok(())
}
