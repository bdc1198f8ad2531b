//! Webhook configuration.
//!
//! Loaded once at startup from a YAML file. Unknown keys are rejected and
//! every value is validated before anything starts serving; a bad file is a
//! fatal startup error.
//!
//! ```yaml
//! cache:
//!   cleanUpIntervalSecond: 5
//!   entryTtlSecond: 600
//! ingressClasses:
//!   - public
//! webhook:
//!   port: 9443
//!   tlsCertFile: /etc/webhook/certs/tls.crt
//!   tlsKeyFile: /etc/webhook/certs/tls.key
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::cache::MAX_ENTRY_TTL;
use crate::webhooks::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT};

/// Default reconcile worker count
pub const DEFAULT_WORKERS: u16 = 4;
/// Default health/metrics server port
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Errors raised while loading the configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// =============================================================================
// File format
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    cache: RawCache,
    ingress_classes: Vec<String>,
    #[serde(default)]
    webhook: RawWebhook,
    #[serde(default)]
    controller: RawController,
    #[serde(default)]
    health: RawHealth,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawCache {
    clean_up_interval_second: u64,
    entry_ttl_second: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawWebhook {
    #[serde(default = "default_webhook_port")]
    port: u16,
    #[serde(default = "default_cert_file")]
    tls_cert_file: PathBuf,
    #[serde(default = "default_key_file")]
    tls_key_file: PathBuf,
}

impl Default for RawWebhook {
    fn default() -> Self {
        Self {
            port: default_webhook_port(),
            tls_cert_file: default_cert_file(),
            tls_key_file: default_key_file(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawController {
    workers: Option<u16>,
    resync_interval_second: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawHealth {
    port: Option<u16>,
}

fn default_webhook_port() -> u16 {
    WEBHOOK_PORT
}

fn default_cert_file() -> PathBuf {
    PathBuf::from(WEBHOOK_CERT_PATH)
}

fn default_key_file() -> PathBuf {
    PathBuf::from(WEBHOOK_KEY_PATH)
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Ingress classes whose virtual hosts are governed by the webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressClasses(BTreeSet<String>);

impl IngressClasses {
    pub fn new<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(classes.into_iter().map(Into::into).collect())
    }

    /// Whether claims in `class` are checked for uniqueness.
    pub fn is_managed(&self, class: &str) -> bool {
        self.0.contains(class)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cache timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Interval between sweeps of expired claims
    pub cleanup_interval: Duration,
    /// Lifetime of a claim after its last refresh
    pub entry_ttl: Duration,
}

/// TLS endpoint settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookConfig {
    pub port: u16,
    pub tls_cert_file: PathBuf,
    pub tls_key_file: PathBuf,
}

/// Reconcile worker settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Maximum number of HTTPProxies reconciled in parallel
    pub workers: u16,
    /// How often a claiming HTTPProxy is re-reconciled to refresh its claims
    pub resync_interval: Duration,
}

/// Complete, validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub cache: CacheConfig,
    pub ingress_classes: IngressClasses,
    pub webhook: WebhookConfig,
    pub controller: ControllerConfig,
    pub health_port: u16,
}

impl Config {
    /// Read and validate the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(contents)?;
        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.cache.clean_up_interval_second == 0 {
            return Err(ConfigError::Invalid(
                "cache.cleanUpIntervalSecond must be greater than 0".to_string(),
            ));
        }
        if raw.cache.entry_ttl_second == 0 {
            return Err(ConfigError::Invalid(
                "cache.entryTtlSecond must be greater than 0".to_string(),
            ));
        }
        let max_secs = MAX_ENTRY_TTL.as_secs();
        if raw.cache.entry_ttl_second > max_secs {
            return Err(ConfigError::Invalid(format!(
                "cache.entryTtlSecond must be at most {} (one year)",
                max_secs
            )));
        }
        if raw.cache.clean_up_interval_second > max_secs {
            return Err(ConfigError::Invalid(format!(
                "cache.cleanUpIntervalSecond must be at most {} (one year)",
                max_secs
            )));
        }

        if raw.ingress_classes.is_empty() {
            return Err(ConfigError::Invalid(
                "ingressClasses must list at least one ingress class".to_string(),
            ));
        }
        if let Some(position) = raw.ingress_classes.iter().position(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "ingressClasses[{}] must not be empty",
                position
            )));
        }

        if raw.webhook.port == 0 {
            return Err(ConfigError::Invalid(
                "webhook.port must be greater than 0".to_string(),
            ));
        }

        let workers = raw.controller.workers.unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(ConfigError::Invalid(
                "controller.workers must be at least 1".to_string(),
            ));
        }

        let ttl = raw.cache.entry_ttl_second;
        let resync = match raw.controller.resync_interval_second {
            Some(0) => {
                return Err(ConfigError::Invalid(
                    "controller.resyncIntervalSecond must be greater than 0".to_string(),
                ));
            }
            Some(secs) if secs >= ttl => {
                return Err(ConfigError::Invalid(format!(
                    "controller.resyncIntervalSecond ({}) must be lower than cache.entryTtlSecond ({})",
                    secs, ttl
                )));
            }
            Some(secs) => Duration::from_secs(secs),
            // Two refreshes per TTL.
            None => Duration::from_secs(ttl) / 2,
        };

        let health_port = raw.health.port.unwrap_or(DEFAULT_HEALTH_PORT);
        if health_port == 0 {
            return Err(ConfigError::Invalid(
                "health.port must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            cache: CacheConfig {
                cleanup_interval: Duration::from_secs(raw.cache.clean_up_interval_second),
                entry_ttl: Duration::from_secs(ttl),
            },
            ingress_classes: IngressClasses::new(
                raw.ingress_classes.into_iter().map(|c| c.trim().to_string()),
            ),
            webhook: WebhookConfig {
                port: raw.webhook.port,
                tls_cert_file: raw.webhook.tls_cert_file,
                tls_key_file: raw.webhook.tls_key_file,
            },
            controller: ControllerConfig {
                workers,
                resync_interval: resync,
            },
            health_port,
        })
    }
}
