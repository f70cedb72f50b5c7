use actix_web::{HttpResponse, get, web};
use serde::{Deserialize, Serialize};

use crate::model::app_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HealthStatus {
    pub status: String,
    pub hostname: String,
    pub cluster_name: String,
    pub servers: usize,
    pub services: usize,
    pub listeners: Vec<String>,
    pub xds_enabled: bool,
}

#[get("/health")]
pub async fn health(data: web::Data<AppState>) -> HttpResponse {
    let (hostname, servers, services) = data
        .catalog
        .with_read_lock(|state| (state.hostname().to_string(), state.servers().len(), state.service_count()));

    HttpResponse::Ok().json(HealthStatus {
        status: "UP".to_string(),
        hostname,
        cluster_name: data.configuration.cluster_name(),
        servers,
        services,
        listeners: data.catalog.listener_names(),
        xds_enabled: data.xds_server.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{App, test};
    use sidecar_catalog::{Catalog, Service};

    use super::*;
    use crate::api::routes;
    use crate::model::config::Configuration;

    #[actix_web::test]
    async fn test_health() {
        let catalog = Arc::new(Catalog::new("node-a"));
        catalog.update(Service::new("aaa", "web", "node-a"));
        catalog.update(Service::new("bbb", "web", "node-b"));
        let state = Arc::new(AppState::new(Configuration::default(), catalog, None));
        let app = test::init_service(App::new().app_data(web::Data::from(state)).service(routes())).await;

        let req = test::TestRequest::get().uri("/api/health").to_request();
        let status: HealthStatus = test::call_and_read_body_json(&app, req).await;

        assert_eq!(status.status, "UP");
        assert_eq!(status.hostname, "node-a");
        assert_eq!(status.servers, 2);
        assert_eq!(status.services, 2);
        assert!(!status.xds_enabled);
    }
}
