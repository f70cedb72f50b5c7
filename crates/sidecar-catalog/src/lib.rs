//! Sidecar Catalog - cluster-wide service presence
//!
//! This crate provides:
//! - The service model shared by every node
//! - An eventually-consistent catalog with last-writer-wins merge and tombstones
//! - Change notification through bounded listener queues
//! - A webhook listener that posts catalog state to a URL
//! - A reaper that ages out missed refreshes and old tombstones

pub mod catalog;
pub mod error;
pub mod event;
pub mod listener;
pub mod model;
pub mod reaper;
pub mod retry;
pub mod webhook;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogState, MergeOutcome, Server};
pub use error::CatalogError;
pub use event::{ChangeEvent, StateChangedEvent};
pub use listener::{LISTENER_QUEUE_CAPACITY, Listener};
pub use model::{Port, ProxyMode, Service, ServiceStatus};
pub use reaper::{ReaperConfig, spawn_reaper};
pub use retry::{RetryPolicy, with_retries};
pub use webhook::{UrlListener, UrlListenerConfig};
