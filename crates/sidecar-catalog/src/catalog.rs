//! Cluster-wide service catalog
//!
//! Facts about services arrive from every node and are merged with
//! last-writer-wins semantics keyed by each service's `updated` timestamp.
//! Removal is expressed as a tombstone fact so it converges the same way.
//! Every observable change is fanned out to subscribed listeners while the
//! write lock is still held, which keeps per-node event order equal to merge
//! order.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::event::ChangeEvent;
use crate::listener::Listener;
use crate::model::{Service, ServiceStatus};

/// Result of merging one fact into the catalog
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First fact for this (host, id)
    Inserted,
    /// Newer fact that changed status, ports or proxy mode
    Changed,
    /// Newer fact with the same observable identity
    Refreshed,
    /// Older or equally old fact, existing record kept
    Ignored,
}

impl MergeOutcome {
    /// Whether the stored record was written
    pub fn is_stored(&self) -> bool {
        !matches!(self, MergeOutcome::Ignored)
    }

    pub fn is_observable(&self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Changed)
    }
}

/// Services known for one node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Server {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Services")]
    pub services: BTreeMap<String, Service>,
    #[serde(rename = "LastUpdated")]
    pub last_updated: DateTime<Utc>,
    #[serde(rename = "LastChanged")]
    pub last_changed: DateTime<Utc>,
}

impl Server {
    fn new(name: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            services: BTreeMap::new(),
            last_updated: now,
            last_changed: now,
        }
    }
}

/// The merged view of every node's services
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogState {
    #[serde(rename = "Hostname")]
    hostname: String,
    #[serde(rename = "Servers")]
    servers: BTreeMap<String, Server>,
    #[serde(rename = "LastChanged")]
    last_changed: DateTime<Utc>,
}

impl CatalogState {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            servers: BTreeMap::new(),
            last_changed: Utc::now(),
        }
    }

    /// Identity of the local node
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn last_changed(&self) -> DateTime<Utc> {
        self.last_changed
    }

    pub fn servers(&self) -> &BTreeMap<String, Server> {
        &self.servers
    }

    pub fn server(&self, hostname: &str) -> Option<&Server> {
        self.servers.get(hostname)
    }

    pub fn service(&self, hostname: &str, id: &str) -> Option<&Service> {
        self.servers.get(hostname).and_then(|s| s.services.get(id))
    }

    /// Every stored service, in (hostname, id) order
    pub fn each_service(&self) -> impl Iterator<Item = &Service> {
        self.servers.values().flat_map(|s| s.services.values())
    }

    pub fn alive_services(&self) -> impl Iterator<Item = &Service> {
        self.each_service().filter(|svc| svc.is_alive())
    }

    pub fn service_count(&self) -> usize {
        self.servers.values().map(|s| s.services.len()).sum()
    }

    /// Services grouped by name, every status included
    pub fn by_service(&self) -> BTreeMap<String, Vec<Service>> {
        let mut grouped: BTreeMap<String, Vec<Service>> = BTreeMap::new();
        for svc in self.each_service() {
            grouped.entry(svc.name.clone()).or_default().push(svc.clone());
        }
        grouped
    }

    fn merge(&mut self, incoming: Service) -> (MergeOutcome, Option<ChangeEvent>) {
        let now = Utc::now();
        let server = self
            .servers
            .entry(incoming.hostname.clone())
            .or_insert_with(|| Server::new(&incoming.hostname));

        let (outcome, event) = match server.services.get(&incoming.id) {
            None => {
                let event = ChangeEvent::new(&incoming, ServiceStatus::Unknown);
                server.services.insert(incoming.id.clone(), incoming);
                (MergeOutcome::Inserted, Some(event))
            }
            Some(existing) if !incoming.invalidates(existing) => (MergeOutcome::Ignored, None),
            Some(existing) => {
                let previous_status = existing.status;
                let observable = existing.differs_observably(&incoming);
                let event = observable.then(|| ChangeEvent::new(&incoming, previous_status));
                server.services.insert(incoming.id.clone(), incoming);
                if observable {
                    (MergeOutcome::Changed, event)
                } else {
                    (MergeOutcome::Refreshed, None)
                }
            }
        };

        if outcome.is_stored() {
            server.last_updated = now;
        }
        if event.is_some() {
            server.last_changed = now;
            self.last_changed = now;
        }
        (outcome, event)
    }

    fn expire_server(&mut self, hostname: &str, now: DateTime<Utc>) -> Vec<ChangeEvent> {
        let Some(server) = self.servers.get_mut(hostname) else {
            return Vec::new();
        };

        // Each tombstone gets its own instant so event times stay ordered
        let mut events = Vec::new();
        let mut stamp = now;
        for svc in server.services.values_mut().filter(|svc| svc.is_alive()) {
            svc.tombstone_at(stamp);
            stamp = svc.updated + Duration::microseconds(1);
            events.push(ChangeEvent::new(svc, ServiceStatus::Alive));
        }

        if let Some(last) = events.last().map(|event| event.time) {
            server.last_updated = last;
            server.last_changed = last;
            self.last_changed = last;
        }
        events
    }

    fn tombstone_stale(&mut self, now: DateTime<Utc>, alive_lifespan: Duration) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for server in self.servers.values_mut() {
            if server.name == self.hostname {
                continue;
            }
            let before = events.len();
            for svc in server.services.values_mut() {
                if svc.is_alive() && now - svc.updated > alive_lifespan {
                    svc.tombstone_at(now);
                    events.push(ChangeEvent::new(svc, ServiceStatus::Alive));
                }
            }
            if events.len() > before {
                server.last_updated = now;
                server.last_changed = now;
            }
        }
        if !events.is_empty() {
            self.last_changed = now;
        }
        events
    }

    fn prune_tombstones(&mut self, now: DateTime<Utc>, tombstone_lifespan: Duration) -> usize {
        let mut removed = 0;
        for server in self.servers.values_mut() {
            let before = server.services.len();
            server
                .services
                .retain(|_, svc| !(svc.is_tombstone() && now - svc.updated > tombstone_lifespan));
            removed += before - server.services.len();
        }
        self.servers.retain(|_, server| !server.services.is_empty());
        removed
    }
}

/// Thread-safe catalog with listener fan-out
pub struct Catalog {
    state: RwLock<CatalogState>,
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
}

impl Catalog {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(CatalogState::new(hostname)),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Merge one service fact.
    ///
    /// Inserts when absent, replaces only when the incoming `updated` is
    /// strictly newer. At most one event is emitted.
    pub fn update(&self, service: Service) -> MergeOutcome {
        let mut state = self.state.write();
        let service_id = service.id.clone();
        let (outcome, event) = state.merge(service);
        debug!(service_id = %service_id, ?outcome, "Merged service fact");
        if let Some(event) = event {
            self.notify(&event);
        }
        outcome
    }

    /// Replace the service with a tombstone that wins against it
    pub fn tombstone(&self, mut service: Service) -> MergeOutcome {
        service.tombstone();
        self.update(service)
    }

    /// Tombstone every Alive service on a node.
    ///
    /// Returns the number of services expired; unknown hosts expire nothing.
    pub fn expire_node(&self, hostname: &str) -> usize {
        let mut state = self.state.write();
        if state.server(hostname).is_none() {
            info!(hostname = %hostname, "Expire requested for unknown node, ignoring");
            return 0;
        }

        let events = state.expire_server(hostname, Utc::now());
        info!(hostname = %hostname, expired = events.len(), "Expired node services");
        for event in &events {
            self.notify(event);
        }
        events.len()
    }

    /// Tombstone remote services that have not been refreshed within `alive_lifespan`
    pub fn tombstone_stale(&self, now: DateTime<Utc>, alive_lifespan: Duration) -> usize {
        let mut state = self.state.write();
        let events = state.tombstone_stale(now, alive_lifespan);
        for event in &events {
            info!(
                hostname = %event.hostname,
                service_id = %event.service_id,
                "Tombstoning service that missed its refresh"
            );
            self.notify(event);
        }
        events.len()
    }

    /// Drop tombstones older than `tombstone_lifespan` and any node left empty
    pub fn prune_tombstones(&self, now: DateTime<Utc>, tombstone_lifespan: Duration) -> usize {
        self.state.write().prune_tombstones(now, tombstone_lifespan)
    }

    /// Register a listener, replacing any listener with the same name
    pub fn subscribe(&self, listener: Arc<dyn Listener>) {
        let mut listeners = self.listeners.write();
        if let Some(pos) = listeners.iter().position(|l| l.name() == listener.name()) {
            warn!(listener = listener.name(), "Replacing listener with the same name");
            listeners.remove(pos);
        }
        info!(listener = listener.name(), managed = listener.is_managed(), "Listener subscribed");
        listeners.push(listener);
    }

    /// Remove a listener by name, stopping it when it is managed
    pub fn unsubscribe(&self, name: &str) -> bool {
        let removed = {
            let mut listeners = self.listeners.write();
            listeners
                .iter()
                .position(|l| l.name() == name)
                .map(|pos| listeners.remove(pos))
        };

        match removed {
            Some(listener) => {
                if listener.is_managed() {
                    listener.stop();
                }
                info!(listener = name, "Listener unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn listener_names(&self) -> Vec<String> {
        self.listeners.read().iter().map(|l| l.name().to_string()).collect()
    }

    /// Run `f` with shared access to the state
    pub fn with_read_lock<R>(&self, f: impl FnOnce(&CatalogState) -> R) -> R {
        let state = self.state.read();
        f(&state)
    }

    /// Run `f` with exclusive access to the state. Listeners are not notified.
    pub fn with_write_lock<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        let mut state = self.state.write();
        f(&mut state)
    }

    pub fn hostname(&self) -> String {
        self.state.read().hostname().to_string()
    }

    pub fn services_by_name(&self) -> BTreeMap<String, Vec<Service>> {
        self.with_read_lock(|state| state.by_service())
    }

    pub fn alive_services(&self) -> Vec<Service> {
        self.with_read_lock(|state| state.alive_services().cloned().collect())
    }

    /// JSON encoding of the current state
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        self.with_read_lock(|state| serde_json::to_vec(state))
    }

    fn notify(&self, event: &ChangeEvent) {
        let listeners = self.listeners.read();
        for listener in listeners.iter() {
            match listener.sender().try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!(
                    listener = listener.name(),
                    service_id = %event.service_id,
                    "Listener queue full, dropping event"
                ),
                Err(TrySendError::Closed(_)) => warn!(
                    listener = listener.name(),
                    service_id = %event.service_id,
                    "Listener queue closed, dropping event"
                ),
            }
        }
    }
}
