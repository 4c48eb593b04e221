//! Worker configuration: a TOML file overlaid with `COURIER_*` environment
//! variables.
//!
//! ```toml
//! [callback]
//! ping_api_url = "https://apim.example.net/helloworld/hello"
//! authentication_scope = "api://courier/.default"
//!
//! [archive.document]
//! enabled = true
//! ```
//!
//! Nested keys use `__` in environment variables, e.g.
//! `COURIER_CALLBACK__PING_API_URL`.

use std::path::PathBuf;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use listener::{SpoolOptions, WorkerOptions, DEFAULT_MAX_DELIVERY_COUNT};
use pipeline::{
    ArchiveTargets, BlobTarget, CallbackOptions, CancellationPolicy, DocumentTarget,
    HandlerOptions, PathTemplate, Settings, StartupConfigError, DEFAULT_BLOB_PATH_TEMPLATE,
};
use serde::Deserialize;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "COURIER_CONFIG";

/// Configuration file used when [`CONFIG_PATH_VAR`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "courier.toml";

const ENV_PREFIX: &str = "COURIER";

/// Raw configuration as read from file and environment.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub callback: CallbackConfig,
    pub cancellation: CancellationConfig,
    pub archive: ArchiveConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub identity: IdentityConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallbackConfig {
    /// Endpoint called once per invocation. Required.
    pub ping_api_url: String,
    /// Scope of the bearer token. Required.
    pub authentication_scope: String,
    pub enabled: bool,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            ping_api_url: String::new(),
            authentication_scope: String::new(),
            enabled: true,
            timeout_secs: 10,
            max_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CancellationConfig {
    pub policy: CancellationPolicy,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Directory holding the blob and document stores.
    pub root_dir: PathBuf,
    pub blob: BlobConfig,
    pub document: DocumentConfig,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("archive"),
            blob: BlobConfig::default(),
            document: DocumentConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlobConfig {
    pub enabled: bool,
    pub path_template: String,
    pub name_field: String,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path_template: DEFAULT_BLOB_PATH_TEMPLATE.to_string(),
            name_field: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub enabled: bool,
    pub partition_key_field: String,
    pub id_field: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            partition_key_field: "id".to_string(),
            id_field: "id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub spool_dir: PathBuf,
    pub max_delivery_count: u32,
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            spool_dir: PathBuf::from("spool"),
            max_delivery_count: DEFAULT_MAX_DELIVERY_COUNT,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent_invocations: usize,
    pub invocation_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        let defaults = WorkerOptions::default();
        Self {
            max_concurrent_invocations: defaults.max_concurrent_invocations,
            invocation_timeout_secs: defaults.invocation_timeout.as_secs(),
        }
    }
}

/// Where bearer tokens come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// Platform managed identity (App Service or IMDS endpoint).
    #[default]
    Managed,
    /// A fixed token from `identity.static_token`.
    Static,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
    /// User-assigned identity; `None` selects the system-assigned one.
    pub client_id: Option<String>,
    pub static_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mode: IdentityMode::Managed,
            client_id: None,
            static_token: None,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub log_level: String,
    pub otel_enabled: bool,
    pub otel_endpoint: String,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            otel_enabled: false,
            otel_endpoint: "http://localhost:4317".to_string(),
            service_name: "courier".to_string(),
        }
    }
}

/// Identity settings after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySource {
    Managed {
        client_id: Option<String>,
        request_timeout: Duration,
    },
    Static {
        token: String,
    },
}

impl IdentitySource {
    /// Upper bound on one token request. A static token is never fetched.
    pub fn request_timeout(&self) -> Duration {
        match self {
            Self::Managed { request_timeout, .. } => *request_timeout,
            Self::Static { .. } => Duration::ZERO,
        }
    }
}

/// Everything the composition root needs, validated.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub settings: Settings,
    pub handler: HandlerOptions,
    pub callback: CallbackOptions,
    pub identity: IdentitySource,
    pub archive_root: PathBuf,
    pub spool_dir: PathBuf,
    pub spool: SpoolOptions,
    pub worker: WorkerOptions,
}

impl CourierConfig {
    /// Loads from the file named by `COURIER_CONFIG` (default
    /// `courier.toml`, optional) and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path)
    }

    /// Loads from `path` (optional) and the environment.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::new(path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Checks cross-field rules and converts into domain options.
    ///
    /// # Errors
    ///
    /// Returns the first [`StartupConfigError`] found; nothing is processed
    /// with a partially valid configuration.
    pub fn validate(&self) -> Result<ValidatedConfig, StartupConfigError> {
        let settings = Settings::new(&self.callback.ping_api_url, &self.callback.authentication_scope)?;

        let callback_timeout = Duration::from_secs(self.callback.timeout_secs);
        let invocation_timeout = Duration::from_secs(self.worker.invocation_timeout_secs);
        if callback_timeout.is_zero() {
            return Err(StartupConfigError::Invalid {
                name: "callback.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        let callback = CallbackOptions {
            timeout: callback_timeout,
            max_retries: self.callback.max_retries,
            retry_backoff: Duration::from_millis(self.callback.retry_backoff_ms),
        };
        let identity = self.identity_source()?;
        // Archival runs after the callback, so the whole callback phase has
        // to finish before the invocation timer fires.
        let callback_budget = callback.worst_case() + identity.request_timeout();
        if callback_budget >= invocation_timeout {
            return Err(StartupConfigError::Invalid {
                name: "callback.timeout_secs",
                reason: format!(
                    "worst-case callback time of {:.1}s including retry and token request \
                     must be less than worker.invocation_timeout_secs ({}s)",
                    callback_budget.as_secs_f64(),
                    invocation_timeout.as_secs()
                ),
            });
        }
        if self.worker.max_concurrent_invocations == 0 {
            return Err(StartupConfigError::Invalid {
                name: "worker.max_concurrent_invocations",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue.max_delivery_count == 0 {
            return Err(StartupConfigError::Invalid {
                name: "queue.max_delivery_count",
                reason: "must be at least 1".to_string(),
            });
        }

        let handler = HandlerOptions {
            callback_enabled: self.callback.enabled,
            cancellation_policy: self.cancellation.policy,
            archive: self.archive_targets()?,
        };

        Ok(ValidatedConfig {
            settings,
            handler,
            callback,
            identity,
            archive_root: self.archive.root_dir.clone(),
            spool_dir: self.queue.spool_dir.clone(),
            spool: SpoolOptions {
                max_delivery_count: self.queue.max_delivery_count,
                poll_interval: Duration::from_millis(self.queue.poll_interval_ms),
            },
            worker: WorkerOptions {
                max_concurrent_invocations: self.worker.max_concurrent_invocations,
                invocation_timeout,
            },
        })
    }

    fn archive_targets(&self) -> Result<ArchiveTargets, StartupConfigError> {
        let blob = if self.archive.blob.enabled {
            Some(BlobTarget {
                template: PathTemplate::parse(&self.archive.blob.path_template)?,
                name_field: non_empty("archive.blob.name_field", &self.archive.blob.name_field)?,
                ..BlobTarget::default()
            })
        } else {
            None
        };

        let document = if self.archive.document.enabled {
            Some(DocumentTarget {
                partition_key_field: non_empty(
                    "archive.document.partition_key_field",
                    &self.archive.document.partition_key_field,
                )?,
                id_field: non_empty("archive.document.id_field", &self.archive.document.id_field)?,
                ..DocumentTarget::default()
            })
        } else {
            None
        };

        if blob.is_none() && document.is_none() {
            return Err(StartupConfigError::Invalid {
                name: "archive",
                reason: "at least one of archive.blob and archive.document must be enabled".to_string(),
            });
        }
        Ok(ArchiveTargets { blob, document })
    }

    fn identity_source(&self) -> Result<IdentitySource, StartupConfigError> {
        match self.identity.mode {
            IdentityMode::Managed => Ok(IdentitySource::Managed {
                client_id: self.identity.client_id.clone().filter(|id| !id.trim().is_empty()),
                request_timeout: Duration::from_secs(self.identity.request_timeout_secs.max(1)),
            }),
            IdentityMode::Static => match &self.identity.static_token {
                Some(token) if !token.trim().is_empty() => Ok(IdentitySource::Static {
                    token: token.clone(),
                }),
                _ => Err(StartupConfigError::Missing {
                    name: "identity.static_token",
                }),
            },
        }
    }
}

fn non_empty(name: &'static str, value: &str) -> Result<String, StartupConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(StartupConfigError::Missing { name });
    }
    Ok(value.to_string())
}
