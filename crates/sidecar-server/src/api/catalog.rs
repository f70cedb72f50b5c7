//! Catalog HTTP API
//!
//! - GET  /api/state.json - full catalog state
//! - GET  /api/services.json - services grouped by name
//! - POST /api/services - merge one service fact
//! - POST /api/services/tombstone - tombstone a known service
//! - POST /api/servers/{hostname}/expire - tombstone everything on a node

use std::collections::BTreeMap;

use actix_web::http::header::ContentType;
use actix_web::{HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use sidecar_catalog::{MergeOutcome, Service};
use tracing::{info, warn};

use crate::model::app_state::AppState;
use crate::model::response::ErrorResult;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServicesResponse {
    pub cluster_name: String,
    pub services: BTreeMap<String, Vec<Service>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MergeResponse {
    pub outcome: String,
    pub stored: bool,
    pub changed: bool,
}

impl From<MergeOutcome> for MergeResponse {
    fn from(outcome: MergeOutcome) -> Self {
        Self {
            outcome: format!("{outcome:?}"),
            stored: outcome.is_stored(),
            changed: outcome.is_observable(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TombstoneRequest {
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "ID")]
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExpireResponse {
    pub hostname: String,
    pub expired: usize,
}

#[get("/state.json")]
pub async fn state_json(data: web::Data<AppState>) -> HttpResponse {
    match data.catalog.encode() {
        Ok(body) => HttpResponse::Ok().content_type(ContentType::json()).body(body),
        Err(e) => {
            warn!(error = %e, "Failed to encode catalog state");
            ErrorResult::internal(e.to_string())
        }
    }
}

#[get("/services.json")]
pub async fn services_json(data: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(ServicesResponse {
        cluster_name: data.configuration.cluster_name(),
        services: data.catalog.services_by_name(),
    })
}

#[post("/services")]
pub async fn update_service(data: web::Data<AppState>, service: web::Json<Service>) -> HttpResponse {
    let service = service.into_inner();
    if service.id.is_empty() || service.name.is_empty() || service.hostname.is_empty() {
        return ErrorResult::bad_request("ID, Name and Hostname are required");
    }

    let outcome = data.catalog.update(service);
    HttpResponse::Ok().json(MergeResponse::from(outcome))
}

#[post("/services/tombstone")]
pub async fn tombstone_service(data: web::Data<AppState>, request: web::Json<TombstoneRequest>) -> HttpResponse {
    let existing = data
        .catalog
        .with_read_lock(|state| state.service(&request.hostname, &request.id).cloned());

    let Some(service) = existing else {
        return ErrorResult::not_found(format!("service {} not found on {}", request.id, request.hostname));
    };

    info!(hostname = %request.hostname, service_id = %request.id, "Tombstoning service via API");
    let outcome = data.catalog.tombstone(service);
    HttpResponse::Ok().json(MergeResponse::from(outcome))
}

#[post("/servers/{hostname}/expire")]
pub async fn expire_server(data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let hostname = path.into_inner();
    let expired = data.catalog.expire_node(&hostname);
    HttpResponse::Ok().json(ExpireResponse { hostname, expired })
}
