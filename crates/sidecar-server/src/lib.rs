//! Sidecar agent: HTTP API, configuration and startup wiring around the
//! catalog and the Envoy control plane.

pub mod api; // HTTP API handlers
pub mod model; // Configuration and shared state
pub mod startup; // Logging, shutdown and server startup

pub use model::app_state::AppState;
pub use model::config::Configuration;
