//! HTTP server setup

use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware::Logger, web};

use crate::api;
use crate::model::app_state::AppState;

/// Creates and binds the agent's HTTP API server.
pub fn main_server(app_state: Arc<AppState>, address: String, port: u16) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::from(app_state.clone()))
            .service(api::routes())
    })
    .disable_signals()
    .bind((address, port))?
    .run())
}
