//! GET /api/xds.json - control plane statistics and the served snapshot

use actix_web::{HttpResponse, get, web};
use serde::Serialize;
use sidecar_mesh::{ResourceSnapshot, XdsServerStats};

use crate::model::app_state::AppState;
use crate::model::response::ErrorResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct XdsStatus<'a> {
    pub stats: XdsServerStats,
    pub snapshot: Option<&'a ResourceSnapshot>,
}

#[get("/xds.json")]
pub async fn xds_status(data: web::Data<AppState>) -> HttpResponse {
    let Some(xds_server) = &data.xds_server else {
        return ErrorResult::not_found("xDS server is disabled");
    };

    let snapshot = xds_server.current_snapshot();
    HttpResponse::Ok().json(XdsStatus {
        stats: xds_server.stats(),
        snapshot: snapshot.as_deref(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use sidecar_catalog::{Catalog, Port, Service};
    use sidecar_mesh::{CatalogSyncBridge, SyncBridgeConfig, XdsServer, XdsServerConfig};

    use super::*;
    use crate::api::routes;
    use crate::model::config::Configuration;

    #[actix_web::test]
    async fn test_xds_status_reports_snapshot() {
        let catalog = Arc::new(Catalog::new("node-a"));
        catalog.update(Service::new("aaa", "bocaccio", "node-a").with_port(Port::tcp("10.0.0.1", 9990, 10100)));
        let xds_server = Arc::new(XdsServer::new(XdsServerConfig::default()));
        CatalogSyncBridge::new(xds_server.clone(), SyncBridgeConfig::default()).rebuild(&catalog);

        let version = xds_server.snapshot_version(1);
        let state = Arc::new(AppState::new(Configuration::default(), catalog, Some(xds_server)));
        let app = test::init_service(App::new().app_data(web::Data::from(state)).service(routes())).await;

        let req = test::TestRequest::get().uri("/api/xds.json").to_request();
        let json: serde_json::Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(json["Stats"]["snapshot_version"], version.as_str());
        assert_eq!(json["Stats"]["resources"], 3);
        assert!(json["Snapshot"]["resources"]["clusters"]["bocaccio-10100"].is_object());
    }

    #[actix_web::test]
    async fn test_xds_status_when_disabled() {
        let state = Arc::new(AppState::new(
            Configuration::default(),
            Arc::new(Catalog::new("node-a")),
            None,
        ));
        let app = test::init_service(App::new().app_data(web::Data::from(state)).service(routes())).await;

        let req = test::TestRequest::get().uri("/api/xds.json").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
