//! File-based logging with per-component files.
//!
//! | Log File    | Component                 | Target Prefixes  |
//! |-------------|---------------------------|------------------|
//! | sidecar.log | Root logger (everything)  | (all)            |
//! | mesh.log    | Envoy control plane       | sidecar_mesh     |
//! | catalog.log | Catalog and webhooks      | sidecar_catalog  |
//!
//! Files are written under `~/sidecar/logs` unless `logging.dir` is set.

use std::path::PathBuf;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

const ROOT_LOG_FILE: &str = "sidecar.log";

struct ComponentLogDef {
    file_name: &'static str,
    targets: &'static [&'static str],
}

const COMPONENT_LOGS: &[ComponentLogDef] = &[
    ComponentLogDef {
        file_name: "mesh.log",
        targets: &["sidecar_mesh", "sidecar_server::startup::xds"],
    },
    ComponentLogDef {
        file_name: "catalog.log",
        targets: &["sidecar_catalog"],
    },
];

fn default_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(format!("{home}/sidecar/logs"))
}

/// Logging configuration for the agent.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
    pub console_output: bool,
    pub file_logging: bool,
    /// Level used when `RUST_LOG` is unset
    pub level: Level,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            console_output: true,
            file_logging: false,
            level: Level::INFO,
        }
    }
}

impl LoggingConfig {
    pub fn from_config(log_dir: Option<String>, console_output: bool, file_logging: bool, level: String) -> Self {
        Self {
            log_dir: log_dir.map(PathBuf::from).unwrap_or_else(default_log_dir),
            console_output,
            file_logging,
            level: level.parse().unwrap_or(Level::INFO),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuard {
    _file_guards: Vec<WorkerGuard>,
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level for the console and root file.
/// Component files take everything from their targets.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    if config.file_logging {
        std::fs::create_dir_all(&config.log_dir)?;
    }

    let mut guards: Vec<WorkerGuard> = Vec::new();
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(config.env_filter());
        layers.push(Box::new(console_layer));
    }

    if config.file_logging {
        let root_appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, ROOT_LOG_FILE);
        let (root_nb, root_guard) = tracing_appender::non_blocking(root_appender);
        guards.push(root_guard);

        let root_layer = fmt::layer()
            .with_writer(root_nb)
            .with_target(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_filter(config.env_filter());
        layers.push(Box::new(root_layer));

        for component in COMPONENT_LOGS {
            let appender = RollingFileAppender::new(Rotation::DAILY, &config.log_dir, component.file_name);
            let (nb, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            let mut targets = Targets::new();
            for target in component.targets {
                targets = targets.with_target(*target, LevelFilter::TRACE);
            }

            let layer = fmt::layer()
                .with_writer(nb)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(false)
                .with_filter(targets);
            layers.push(Box::new(layer));
        }
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    if config.file_logging {
        tracing::info!(
            log_dir = %config.log_dir.display(),
            component_files = COMPONENT_LOGS.len(),
            "File logging initialized"
        );
    }

    Ok(LoggingGuard { _file_guards: guards })
}
