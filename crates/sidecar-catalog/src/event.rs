//! Change notifications emitted by the catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::CatalogState;
use crate::model::{Service, ServiceStatus};

/// An observable change to one service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "ServiceID")]
    pub service_id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Status", default)]
    pub status: ServiceStatus,
    #[serde(rename = "PreviousStatus")]
    pub previous_status: ServiceStatus,
    #[serde(rename = "Time")]
    pub time: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(service: &Service, previous_status: ServiceStatus) -> Self {
        Self {
            service_id: service.id.clone(),
            name: service.name.clone(),
            hostname: service.hostname.clone(),
            status: service.status,
            previous_status,
            time: service.updated,
        }
    }
}

/// Payload posted to webhook listeners
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateChangedEvent {
    #[serde(rename = "State")]
    pub state: CatalogState,
    #[serde(rename = "ChangeEvent")]
    pub change_event: ChangeEvent,
}
