//! Catalog startup: the catalog itself, configured webhooks and the reaper

use std::sync::Arc;

use anyhow::Context;
use sidecar_catalog::{Catalog, Listener, UrlListener, UrlListenerConfig, spawn_reaper};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::config::Configuration;

pub struct CatalogHandle {
    catalog: Arc<Catalog>,
    listeners: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
    reaper_cancel: CancellationToken,
}

impl CatalogHandle {
    pub fn catalog(&self) -> Arc<Catalog> {
        self.catalog.clone()
    }

    /// Stop webhooks and the reaper, waiting for in-flight deliveries
    pub async fn shutdown(self) {
        for name in &self.listeners {
            self.catalog.unsubscribe(name);
        }
        self.reaper_cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Catalog background task failed");
            }
        }
        info!("Catalog services stopped");
    }
}

pub fn start_catalog(configuration: &Configuration) -> anyhow::Result<CatalogHandle> {
    let hostname = configuration.hostname();
    let catalog = Arc::new(Catalog::new(&hostname));
    let mut tasks = Vec::new();
    let mut listeners = Vec::new();

    let listener_config = UrlListenerConfig {
        timeout: configuration.listener_timeout(),
        ..UrlListenerConfig::new(&hostname)
    }
    .with_retry(configuration.listener_retry_policy());

    for url in configuration.listener_urls() {
        let listener = Arc::new(
            UrlListener::new(&url, true, listener_config.clone())
                .with_context(|| format!("invalid listener url {url}"))?,
        );
        tasks.push(listener.clone().watch(catalog.clone())?);
        listeners.push(listener.name().to_string());
    }

    let reaper_cancel = CancellationToken::new();
    let reaper_config = configuration.reaper_config();
    info!(
        hostname = %hostname,
        webhooks = listeners.len(),
        alive_lifespan_secs = reaper_config.alive_lifespan.as_secs(),
        tombstone_lifespan_secs = reaper_config.tombstone_lifespan.as_secs(),
        "Catalog started"
    );
    tasks.push(spawn_reaper(catalog.clone(), reaper_config, reaper_cancel.clone()));

    Ok(CatalogHandle {
        catalog,
        listeners,
        tasks,
        reaper_cancel,
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_start_catalog_with_webhook_and_shutdown() {
        let configuration = Configuration::from_args(["sidecar", "--config", "/nonexistent/sidecar.yml"]).unwrap();
        let mut handle = start_catalog(&configuration).unwrap();
        assert!(handle.catalog().listener_names().is_empty());
        assert_eq!(handle.tasks.len(), 1);

        let listener = Arc::new(
            UrlListener::new("http://127.0.0.1:1/update", true, UrlListenerConfig::new("node-a")).unwrap(),
        );
        handle.tasks.push(listener.clone().watch(handle.catalog()).unwrap());
        handle.listeners.push(listener.name().to_string());
        assert_eq!(handle.catalog().listener_names().len(), 1);

        let catalog = handle.catalog();
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .unwrap();
        assert!(catalog.listener_names().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_survives_panicked_task() {
        let catalog = Arc::new(Catalog::new("node-a"));
        let handle = CatalogHandle {
            catalog,
            listeners: Vec::new(),
            tasks: vec![tokio::spawn(async { panic!("webhook task crashed") })],
            reaper_cancel: CancellationToken::new(),
        };

        tokio::time::timeout(Duration::from_secs(1), handle.shutdown())
            .await
            .unwrap();
    }
}
