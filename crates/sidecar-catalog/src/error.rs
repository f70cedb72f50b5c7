//! Error types for the catalog crate

/// Errors raised by catalog listeners
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    BadStatus { status: u16, url: String },

    #[error("invalid listener url '{0}'")]
    InvalidUrl(String),

    #[error("listener '{0}' already started")]
    AlreadyStarted(String),
}
