//! Configuration loading and validation.
//!
//! Configuration comes either from a YAML file (with environment variable
//! interpolation) or directly from environment variables using the names the
//! bridge has always accepted (`CARELINK_USERNAME`, `API_SECRET`, `NS`, ...).

mod vars;

pub use vars::{EnvValue, InterpolationResult, interpolate, interpolate_with, read_env, read_env_with};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{
    ConfigError, EnvInterpolationSnafu, InvalidValueSnafu, MissingCredentialSnafu,
    MissingSecretSnafu, MissingSourceUrlSnafu, MissingStoreLocationSnafu,
    MissingTrustedDeviceSnafu, ReadFileSnafu, YamlParseSnafu,
};

/// Nominal device reporting cadence: 5.1 minutes.
pub const DEFAULT_DEVICE_CADENCE_MS: u64 = 306_000;

/// Extra samples requested from the store beyond the sample limit.
pub const STORE_FETCH_PADDING: usize = 5;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub store: StoreConfig,
    /// Per-stream record limits applied by the transform.
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Metrics configuration (optional, enabled by default).
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Source (CareLink relay) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Endpoint returning the current device payload as JSON.
    #[serde(default)]
    pub url: String,
    /// Patient to fetch for, when the account follows several.
    #[serde(default)]
    pub patient_id: Option<String>,
    /// Give up on a fetch after retrying for this long (default: 64).
    #[serde(default = "default_max_retry_duration_secs")]
    pub max_retry_duration_secs: u64,
    /// Per-request timeout (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Device tag written on uploaded samples and statuses.
    #[serde(default = "default_device_tag")]
    pub device_tag: String,
}

fn default_max_retry_duration_secs() -> u64 {
    64
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_device_tag() -> String {
    "connect://paradigm".to_string()
}

/// Store (Nightscout) configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Full base URL, e.g. `https://my-ns.example.com`. Takes precedence.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Hostname only; the base URL becomes `https://<hostname>`.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Plain shared secret; hashed before it goes on the wire.
    #[serde(default)]
    pub api_secret: String,
    /// Per-request timeout (default: 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl StoreConfig {
    /// Resolve the store base URL without a trailing slash.
    pub fn base_url(&self) -> Option<String> {
        let non_empty = |s: &Option<String>| s.as_deref().filter(|v| !v.is_empty()).map(str::to_string);

        non_empty(&self.base_url)
            .map(|url| url.trim_end_matches('/').to_string())
            .or_else(|| non_empty(&self.hostname).map(|host| format!("https://{host}")))
    }
}

/// Maximum records per stream taken from each fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_limit")]
    pub samples: usize,
    #[serde(default = "default_limit")]
    pub treatments: usize,
    #[serde(default = "default_limit")]
    pub checks: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            samples: default_limit(),
            treatments: default_limit(),
            checks: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    24
}

/// Drift reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Device tag whose store entries count as drift evidence. Required
    /// unless `min_match_count` is 0.
    #[serde(default)]
    pub trusted_device_tag: Option<String>,
    /// How far after a source sample a store entry may lie and still match.
    #[serde(default = "default_match_window_secs")]
    pub match_window_secs: u64,
    /// Trusted matches required before any sample is uploaded.
    #[serde(default = "default_min_match_count")]
    pub min_match_count: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            trusted_device_tag: None,
            match_window_secs: default_match_window_secs(),
            min_match_count: default_min_match_count(),
        }
    }
}

fn default_match_window_secs() -> u64 {
    270
}

fn default_min_match_count() -> usize {
    5
}

/// Poll scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Device reporting cadence used to align polls (default: 306000).
    #[serde(default = "default_cadence_ms")]
    pub nominal_cadence_ms: u64,
    /// Delay after a faulted cycle (default: 306000).
    #[serde(default = "default_cadence_ms")]
    pub fallback_interval_ms: u64,
    /// Wait a random delay before the first cycle.
    #[serde(default)]
    pub randomize_start: bool,
    /// Upper bound for the startup delay (default: 180).
    #[serde(default = "default_max_start_jitter_secs")]
    pub max_start_jitter_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            nominal_cadence_ms: default_cadence_ms(),
            fallback_interval_ms: default_cadence_ms(),
            randomize_start: false,
            max_start_jitter_secs: default_max_start_jitter_secs(),
        }
    }
}

impl PollConfig {
    pub fn nominal_cadence(&self) -> Duration {
        Duration::from_millis(self.nominal_cadence_ms)
    }

    pub fn fallback_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_interval_ms)
    }

    /// Startup jitter bound, zero when randomization is off.
    pub fn start_jitter_secs(&self) -> u64 {
        if self.randomize_start {
            self.max_start_jitter_secs
        } else {
            0
        }
    }
}

fn default_cadence_ms() -> u64 {
    DEFAULT_DEVICE_CADENCE_MS
}

fn default_max_start_jitter_secs() -> u64 {
    180
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => InvalidValueSnafu {
                key: "log level",
                value: s,
            }
            .fail(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,
}

/// Metrics configuration for Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text after interpolating environment variables.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let result = interpolate(content);
        if !result.is_ok() {
            return EnvInterpolationSnafu {
                message: result.errors.join("\n"),
            }
            .fail();
        }

        let config: Config = serde_yaml::from_str(&result.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str| read_env_with(key, &lookup).and_then(EnvValue::into_text);
        let flag = |key: &str, default: bool| {
            read_env_with(key, &lookup).map_or(default, |value| value.is_truthy())
        };

        let quiet = flag("CARELINK_QUIET", true);

        let config = Config {
            source: SourceConfig {
                username: text("CARELINK_USERNAME").unwrap_or_default(),
                password: text("CARELINK_PASSWORD").unwrap_or_default(),
                url: text("CARELINK_SOURCE_URL").unwrap_or_default(),
                patient_id: text("CARELINK_PATIENT"),
                max_retry_duration_secs: parse_env(
                    &lookup,
                    "CARELINK_MAX_RETRY_DURATION",
                    default_max_retry_duration_secs(),
                )?,
                request_timeout_secs: default_request_timeout_secs(),
                device_tag: text("CARELINK_DEVICE_TAG").unwrap_or_else(default_device_tag),
            },
            store: StoreConfig {
                base_url: text("NS"),
                hostname: text("WEBSITE_HOSTNAME"),
                api_secret: text("API_SECRET").unwrap_or_default(),
                request_timeout_secs: default_request_timeout_secs(),
            },
            limits: LimitsConfig {
                samples: parse_env(&lookup, "CARELINK_SGV_LIMIT", default_limit())?,
                treatments: parse_env(&lookup, "CARELINK_TREATMENT_LIMIT", default_limit())?,
                checks: parse_env(&lookup, "CARELINK_BG_CHECK_LIMIT", default_limit())?,
            },
            reconcile: ReconcileConfig {
                trusted_device_tag: text("CARELINK_TRUSTED_DEVICE"),
                match_window_secs: parse_env(
                    &lookup,
                    "CARELINK_MATCH_WINDOW_SECS",
                    default_match_window_secs(),
                )?,
                min_match_count: parse_env(
                    &lookup,
                    "CARELINK_MIN_MATCH_COUNT",
                    default_min_match_count(),
                )?,
            },
            poll: PollConfig {
                nominal_cadence_ms: default_cadence_ms(),
                fallback_interval_ms: parse_env(
                    &lookup,
                    "CARELINK_REQUEST_INTERVAL",
                    default_cadence_ms(),
                )?,
                randomize_start: flag("RANDOMIZE_INIT", false),
                max_start_jitter_secs: default_max_start_jitter_secs(),
            },
            logging: LoggingConfig {
                level: if quiet { LogLevel::Info } else { LogLevel::Debug },
            },
            metrics: MetricsConfig {
                enabled: flag("METRICS_ENABLED", default_metrics_enabled()),
                address: text("METRICS_ADDRESS").unwrap_or_else(default_metrics_address),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.source.username.is_empty(),
            MissingCredentialSnafu { name: "username" }
        );
        ensure!(
            !self.source.password.is_empty(),
            MissingCredentialSnafu { name: "password" }
        );
        ensure!(!self.source.url.is_empty(), MissingSourceUrlSnafu);
        ensure!(self.store.base_url().is_some(), MissingStoreLocationSnafu);
        ensure!(!self.store.api_secret.is_empty(), MissingSecretSnafu);
        // The bridge's own entries never count as drift evidence, so with a
        // non-zero threshold a trusted co-uploader must be named.
        let trusted = self
            .reconcile
            .trusted_device_tag
            .as_deref()
            .is_some_and(|tag| !tag.is_empty());
        ensure!(
            trusted || self.reconcile.min_match_count == 0,
            MissingTrustedDeviceSnafu
        );
        Ok(())
    }

    /// Device tag whose store entries are trusted as drift evidence. Falls
    /// back to the source tag, which only matters when no evidence is required.
    pub fn trusted_device_tag(&self) -> &str {
        self.reconcile
            .trusted_device_tag
            .as_deref()
            .unwrap_or(&self.source.device_tag)
    }

    /// Number of store samples fetched for reconciliation.
    pub fn store_fetch_count(&self) -> usize {
        self.limits.samples + STORE_FETCH_PADDING
    }
}

/// Parse a numeric environment value, falling back to `default` when unset.
fn parse_env<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match read_env_with(key, lookup).and_then(EnvValue::into_text) {
        Some(raw) => raw
            .trim()
            .parse()
            .ok()
            .context(InvalidValueSnafu { key, value: raw }),
        None => Ok(default),
    }
}
