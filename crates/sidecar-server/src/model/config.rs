//! Configuration management for the Sidecar agent
//!
//! Values come from, in increasing priority: built-in defaults, the optional
//! YAML file, `SIDECAR_*` environment variables and command line flags.
//! Nested keys use `__` in environment variables, so `xds.port` is set with
//! `SIDECAR_XDS__PORT`.

use std::ffi::OsString;
use std::time::Duration;

use clap::Parser;
use config::{Config, ConfigError, Environment};
use if_addrs::IfAddr;
use sidecar_catalog::RetryPolicy;
use sidecar_catalog::reaper::{ALIVE_LIFESPAN, REAP_INTERVAL, TOMBSTONE_LIFESPAN};
use sidecar_catalog::retry::{DEFAULT_BACKOFF_STEP, DEFAULT_RETRIES};
use sidecar_catalog::webhook::CLIENT_TIMEOUT;
use tracing::warn;

use crate::startup::LoggingConfig;

pub const DEFAULT_CONFIG_FILE: &str = "conf/sidecar.yml";
pub const DEFAULT_CLUSTER_NAME: &str = "default";
pub const DEFAULT_HTTP_PORT: u16 = 7777;
pub const DEFAULT_XDS_PORT: u16 = 7776;
pub const DEFAULT_XDS_SERVER_ID: &str = "sidecar-xds-server";

/// Command line arguments for the agent
#[derive(Debug, Parser)]
#[command(name = "sidecar", about = "Service discovery agent and Envoy control plane")]
struct Cli {
    /// Address announced to the cluster and bound by generated listeners
    #[arg(short = 'a', long = "advertise-ip")]
    advertise_ip: Option<String>,
    #[arg(short = 'n', long = "cluster-name")]
    cluster_name: Option<String>,
    #[arg(short = 'l', long = "logging-level")]
    logging_level: Option<String>,
    #[arg(long = "config", env = "SIDECAR_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,
}

/// Agent configuration loaded from file, environment and flags
#[derive(Clone, Debug, Default)]
pub struct Configuration {
    pub config: Config,
}

impl Configuration {
    /// Load configuration using the process arguments
    pub fn new() -> Result<Self, ConfigError> {
        Self::build(Cli::parse())
    }

    pub fn from_args<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::build(Cli::parse_from(args))
    }

    fn build(args: Cli) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder()
            .add_source(config::File::with_name(&args.config_file).required(false))
            .add_source(
                Environment::with_prefix("SIDECAR")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("listeners.urls"),
            );

        if let Some(v) = args.advertise_ip {
            config_builder = config_builder.set_override("advertise_ip", v)?;
        }
        if let Some(v) = args.cluster_name {
            config_builder = config_builder.set_override("cluster_name", v)?;
        }
        if let Some(v) = args.logging_level {
            config_builder = config_builder.set_override("logging.level", v)?;
        }

        Ok(Configuration {
            config: config_builder.build()?,
        })
    }

    // ========================================================================
    // Node Identity
    // ========================================================================

    pub fn cluster_name(&self) -> String {
        self.config
            .get_string("cluster_name")
            .unwrap_or_else(|_| DEFAULT_CLUSTER_NAME.to_string())
    }

    /// Local node name, defaulting to the OS hostname
    pub fn hostname(&self) -> String {
        self.config.get_string("hostname").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "localhost".to_string())
        })
    }

    /// Advertised address, defaulting to the first non-loopback IPv4 address
    pub fn advertise_ip(&self) -> String {
        self.config.get_string("advertise_ip").unwrap_or_else(|_| local_ip())
    }

    // ========================================================================
    // HTTP API
    // ========================================================================

    pub fn http_address(&self) -> String {
        self.config
            .get_string("http.address")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
    }

    pub fn http_port(&self) -> u16 {
        self.port("http.port", DEFAULT_HTTP_PORT)
    }

    // ========================================================================
    // Catalog Maintenance
    // ========================================================================

    pub fn alive_lifespan(&self) -> Duration {
        self.duration_secs("catalog.alive_lifespan_secs", ALIVE_LIFESPAN)
    }

    pub fn tombstone_lifespan(&self) -> Duration {
        self.duration_secs("catalog.tombstone_lifespan_secs", TOMBSTONE_LIFESPAN)
    }

    pub fn reap_interval(&self) -> Duration {
        self.duration_secs("catalog.reap_interval_secs", REAP_INTERVAL)
    }

    pub fn reaper_config(&self) -> sidecar_catalog::ReaperConfig {
        sidecar_catalog::ReaperConfig {
            interval: self.reap_interval(),
            alive_lifespan: self.alive_lifespan(),
            tombstone_lifespan: self.tombstone_lifespan(),
        }
    }

    // ========================================================================
    // Webhook Listeners
    // ========================================================================

    pub fn listener_urls(&self) -> Vec<String> {
        self.config
            .get_array("listeners.urls")
            .map(|values| values.into_iter().filter_map(|v| v.into_string().ok()).collect())
            .unwrap_or_default()
    }

    pub fn listener_retries(&self) -> u32 {
        self.config
            .get_int("listeners.retries")
            .map(|v| v.max(0) as u32)
            .unwrap_or(DEFAULT_RETRIES)
    }

    pub fn listener_timeout(&self) -> Duration {
        self.config
            .get_int("listeners.timeout_ms")
            .map(|v| Duration::from_millis(v.max(0) as u64))
            .unwrap_or(CLIENT_TIMEOUT)
    }

    pub fn listener_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.listener_retries(), DEFAULT_BACKOFF_STEP)
    }

    // ========================================================================
    // xDS Server Configuration
    // ========================================================================

    pub fn xds_enabled(&self) -> bool {
        self.config.get_bool("xds.enabled").unwrap_or(true)
    }

    pub fn xds_server_port(&self) -> u16 {
        self.port("xds.port", DEFAULT_XDS_PORT)
    }

    pub fn xds_server_id(&self) -> String {
        self.config
            .get_string("xds.server_id")
            .unwrap_or_else(|_| DEFAULT_XDS_SERVER_ID.to_string())
    }

    pub fn xds_config(&self) -> XdsConfig {
        XdsConfig {
            enabled: self.xds_enabled(),
            address: self.http_address(),
            port: self.xds_server_port(),
            server_id: self.xds_server_id(),
            bind_ip: self.advertise_ip(),
        }
    }

    // ========================================================================
    // Logging
    // ========================================================================

    pub fn logging_level(&self) -> String {
        self.config
            .get_string("logging.level")
            .unwrap_or_else(|_| "info".to_string())
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.config.get_string("logging.dir").ok(),
            self.config.get_bool("logging.console").unwrap_or(true),
            self.config.get_bool("logging.file").unwrap_or(false),
            self.logging_level(),
        )
    }

    /// Port at `key`; missing or out-of-range values fall back to `default`
    fn port(&self, key: &str, default: u16) -> u16 {
        match self.config.get_int(key) {
            Ok(value) => u16::try_from(value).unwrap_or_else(|_| {
                warn!(key, value, default, "Port out of range, using default");
                default
            }),
            Err(_) => default,
        }
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.config
            .get_int(key)
            .map(|v| Duration::from_secs(v.max(0) as u64))
            .unwrap_or(default)
    }
}

/// xDS server configuration
#[derive(Debug, Clone)]
pub struct XdsConfig {
    pub enabled: bool,
    /// Address the gRPC server listens on
    pub address: String,
    pub port: u16,
    pub server_id: String,
    /// Address generated Envoy listeners bind to
    pub bind_ip: String,
}

pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .map(|iface| iface.ip().to_string())
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn from_yaml(yaml: &str, extra: &[&str]) -> Configuration {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let mut args = vec!["sidecar", "--config", path.as_str()];
        args.extend_from_slice(extra);
        Configuration::from_args(args).unwrap()
    }

    #[test]
    fn test_defaults_without_file() {
        let config = Configuration::from_args(["sidecar", "--config", "/nonexistent/sidecar.yml"]).unwrap();

        assert_eq!(config.cluster_name(), DEFAULT_CLUSTER_NAME);
        assert_eq!(config.http_port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.xds_server_port(), DEFAULT_XDS_PORT);
        assert!(config.xds_enabled());
        assert_eq!(config.alive_lifespan(), ALIVE_LIFESPAN);
        assert_eq!(config.tombstone_lifespan(), TOMBSTONE_LIFESPAN);
        assert_eq!(config.listener_retries(), DEFAULT_RETRIES);
        assert_eq!(config.listener_timeout(), CLIENT_TIMEOUT);
        assert!(config.listener_urls().is_empty());
        assert!(!config.hostname().is_empty());
    }

    #[test]
    fn test_file_values() {
        let config = from_yaml(
            r#"
hostname: node-a
cluster_name: staging
http:
  port: 8080
xds:
  port: 18000
  server_id: staging-xds
catalog:
  alive_lifespan_secs: 30
listeners:
  urls:
    - http://127.0.0.1:9000/update
  retries: 2
  timeout_ms: 500
"#,
            &[],
        );

        assert_eq!(config.hostname(), "node-a");
        assert_eq!(config.cluster_name(), "staging");
        assert_eq!(config.http_port(), 8080);
        assert_eq!(config.xds_config().port, 18000);
        assert_eq!(config.xds_config().server_id, "staging-xds");
        assert_eq!(config.alive_lifespan(), Duration::from_secs(30));
        assert_eq!(config.listener_urls(), vec!["http://127.0.0.1:9000/update".to_string()]);
        assert_eq!(config.listener_retry_policy().retries, 2);
        assert_eq!(config.listener_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_flags_override_file() {
        let config = from_yaml(
            "advertise_ip: 10.0.0.1\ncluster_name: staging\n",
            &["--advertise-ip", "192.168.168.168", "-n", "prod", "--logging-level", "debug"],
        );

        assert_eq!(config.advertise_ip(), "192.168.168.168");
        assert_eq!(config.xds_config().bind_ip, "192.168.168.168");
        assert_eq!(config.cluster_name(), "prod");
        assert_eq!(config.logging_level(), "debug");
    }

    #[test]
    fn test_out_of_range_ports_fall_back_to_defaults() {
        let config = from_yaml("http:\n  port: 70000\nxds:\n  port: -1\n", &[]);

        assert_eq!(config.http_port(), DEFAULT_HTTP_PORT);
        assert_eq!(config.xds_server_port(), DEFAULT_XDS_PORT);
    }
}
