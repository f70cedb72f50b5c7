//! HTTP API served under `/api`

pub mod catalog;
pub mod health;
pub mod xds;

use actix_web::{Scope, web};

pub fn routes() -> Scope {
    web::scope("/api")
        .service(catalog::state_json)
        .service(catalog::services_json)
        .service(catalog::tombstone_service)
        .service(catalog::update_service)
        .service(catalog::expire_server)
        .service(health::health)
        .service(xds::xds_status)
}
