//! Sidecar Service Mesh Support
//!
//! This crate turns the service catalog into Envoy configuration:
//! - `xds` - native resource types, Envoy v3 wire messages and encoding
//! - `adapter` - per-backend listener, cluster and endpoint builders
//! - `snapshot` - versioned resource snapshots
//! - `server` - snapshot publication and the per-stream ADS state machine
//! - `grpc` - tonic Aggregated Discovery Service
//! - `sync` - catalog to xDS synchronization bridge

pub mod adapter;
pub mod error;
pub mod grpc;
pub mod server;
pub mod snapshot;
pub mod sync;
pub mod xds;

// Re-export commonly used types
pub use error::MeshError;
pub use grpc::{AggregatedDiscoveryServiceImpl, create_ads_service, serve_xds_grpc};
pub use server::{StreamSession, XdsServer, XdsServerConfig, XdsServerStats};
pub use snapshot::{ResourceSnapshot, SnapshotResources};
pub use sync::{CatalogSyncBridge, SyncBridgeConfig, build_snapshot_resources};
