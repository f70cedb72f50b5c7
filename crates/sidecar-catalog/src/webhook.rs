//! Webhook listener
//!
//! Posts the full catalog state together with the triggering change to an
//! HTTP endpoint every time the catalog changes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, CatalogState};
use crate::error::CatalogError;
use crate::event::ChangeEvent;
use crate::listener::{Listener, event_channel};
use crate::retry::{RetryPolicy, with_retries};

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(3);
pub const SESSION_COOKIE_NAME: &str = "sidecar-session-host";
const SESSION_COOKIE_LIFETIME_DAYS: i64 = 365;

/// Settings for a webhook listener
#[derive(Debug, Clone)]
pub struct UrlListenerConfig {
    /// Local node identity, used for the session cookie
    pub hostname: String,
    pub retry: RetryPolicy,
    pub timeout: Duration,
}

impl UrlListenerConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            retry: RetryPolicy::default(),
            timeout: CLIENT_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Serialize)]
struct StateChangedPayload<'a> {
    #[serde(rename = "State")]
    state: &'a CatalogState,
    #[serde(rename = "ChangeEvent")]
    change_event: &'a ChangeEvent,
}

/// Listener that POSTs `{State, ChangeEvent}` to a URL
pub struct UrlListener {
    name: String,
    url: Url,
    managed: bool,
    retry: RetryPolicy,
    client: Client,
    tx: mpsc::Sender<ChangeEvent>,
    rx: Mutex<Option<mpsc::Receiver<ChangeEvent>>>,
    cancel: CancellationToken,
}

impl UrlListener {
    pub fn new(url: &str, managed: bool, config: UrlListenerConfig) -> Result<Self, CatalogError> {
        let url = Url::parse(url).map_err(|_| CatalogError::InvalidUrl(url.to_string()))?;

        // Load balancers in front of the endpoint may pin on this cookie
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(&session_cookie(&config.hostname, Utc::now()), &url);

        let client = Client::builder()
            .timeout(config.timeout)
            .cookie_provider(jar)
            .build()?;

        let (tx, rx) = event_channel();
        Ok(Self {
            name: format!("UrlListener({url})"),
            url,
            managed,
            retry: config.retry,
            client,
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Subscribe to the catalog and start delivering events.
    ///
    /// The returned task ends once `stop` is called. A delivery already in
    /// progress, retries included, finishes first.
    pub fn watch(self: Arc<Self>, catalog: Arc<Catalog>) -> Result<JoinHandle<()>, CatalogError> {
        let Some(mut rx) = self.rx.lock().take() else {
            return Err(CatalogError::AlreadyStarted(self.name.clone()));
        };

        catalog.subscribe(self.clone());
        info!(listener = %self.name, "Watching catalog");

        Ok(tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                self.handle_event(&catalog, &event).await;
            }
            info!(listener = %self.name, "Listener stopped");
        }))
    }

    async fn handle_event(&self, catalog: &Catalog, event: &ChangeEvent) {
        let encoded = catalog.with_read_lock(|state| {
            serde_json::to_vec(&StateChangedPayload {
                state,
                change_event: event,
            })
        });

        let payload = match encoded {
            Ok(payload) => payload,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Skipping post because of bad state encoding");
                return;
            }
        };

        debug!(url = %self.url, service_id = %event.service_id, bytes = payload.len(), "Posting state");
        if let Err(e) = with_retries(self.retry, &self.name, |_| self.post(payload.clone())).await {
            warn!(
                url = %self.url,
                retries = self.retry.retries,
                error = %e,
                "Failed posting state"
            );
        }
    }

    async fn post(&self, payload: Vec<u8>) -> Result<(), CatalogError> {
        let resp = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CatalogError::BadStatus {
                status: resp.status().as_u16(),
                url: self.url.to_string(),
            });
        }
        Ok(())
    }
}

impl Listener for UrlListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> mpsc::Sender<ChangeEvent> {
        self.tx.clone()
    }

    fn is_managed(&self) -> bool {
        self.managed
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

/// `Set-Cookie` form of the session affinity cookie
pub fn session_cookie(hostname: &str, issued: DateTime<Utc>) -> String {
    let expires = issued + chrono::Duration::days(SESSION_COOKIE_LIFETIME_DAYS);
    format!(
        "{SESSION_COOKIE_NAME}={hostname}-{}; Path=/; Expires={}",
        issued.to_rfc3339_opts(SecondsFormat::Nanos, true),
        expires.format("%a, %d %b %Y %H:%M:%S GMT"),
    )
}
