//! Shared state handed to every HTTP handler

use std::sync::Arc;

use sidecar_catalog::Catalog;
use sidecar_mesh::XdsServer;

use super::config::Configuration;

pub struct AppState {
    pub configuration: Configuration,
    pub catalog: Arc<Catalog>,
    /// Absent when the control plane is disabled
    pub xds_server: Option<Arc<XdsServer>>,
}

impl AppState {
    pub fn new(configuration: Configuration, catalog: Arc<Catalog>, xds_server: Option<Arc<XdsServer>>) -> Self {
        Self {
            configuration,
            catalog,
            xds_server,
        }
    }
}
