//! Application startup utilities

mod catalog;
mod http;
mod logging;
mod shutdown;
mod xds;

pub use catalog::{CatalogHandle, start_catalog};
pub use http::main_server;
pub use logging::{LoggingConfig, LoggingGuard, init_logging};
pub use shutdown::{ShutdownSignal, listen_for_os_signals};
pub use xds::{XdsServerHandle, start_xds_service};
