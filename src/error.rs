//! Error types for carelink-bridge using snafu.
//!
//! Each collaborator gets its own error enum with context selectors. Only
//! configuration errors are fatal; source and store errors are absorbed by
//! the poller and turned into per-cycle or per-stream outcomes.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A mandatory source credential is missing.
    #[snafu(display("Missing CareLink {name}"))]
    MissingCredential { name: &'static str },

    /// The source endpoint URL is missing.
    #[snafu(display("Missing CareLink source URL"))]
    MissingSourceUrl,

    /// Neither a store base URL nor a hostname was configured.
    #[snafu(display("Missing Nightscout location: set store.base_url or store.hostname"))]
    MissingStoreLocation,

    /// The store shared secret is missing.
    #[snafu(display("Missing Nightscout API secret"))]
    MissingSecret,

    /// Drift matching is enabled but no trusted uploader was named.
    #[snafu(display(
        "Missing trusted device tag: set reconcile.trusted_device_tag or CARELINK_TRUSTED_DEVICE, or set min_match_count to 0"
    ))]
    MissingTrustedDevice,

    /// A configuration value could not be interpreted.
    #[snafu(display("Invalid value for {key}: {value:?}"))]
    InvalidValue { key: String, value: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },
}

// ============ Source Errors ============

/// Errors reported by the source fetch collaborator.
///
/// All variants mean the same thing to the poller: the source is unavailable
/// for this cycle.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The source could not be reached within the retry budget.
    #[snafu(display("CareLink unavailable after {attempts} attempt(s): {message}"))]
    SourceUnavailable { attempts: u32, message: String },

    /// Transport-level failure.
    #[snafu(display("CareLink request failed: {source}"))]
    SourceRequest { source: reqwest::Error },

    /// The source answered with a non-success status.
    #[snafu(display("CareLink returned status {status}"))]
    SourceStatus { status: u16 },

    /// The payload could not be decoded.
    #[snafu(display("Failed to decode CareLink payload: {source}"))]
    SourceDecode { source: reqwest::Error },

    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build CareLink HTTP client"))]
    SourceClientBuild { source: reqwest::Error },
}

// ============ Store Errors ============

/// Errors reported by the store collaborator.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Transport-level failure (connection refused, timeout, ...).
    #[snafu(display("Error talking to Nightscout at {endpoint}: can't connect to Nightscout host"))]
    StoreRequest {
        endpoint: String,
        source: reqwest::Error,
    },

    /// The store answered with a status other than 200.
    #[snafu(display("Nightscout returned status {status} for {endpoint}"))]
    StoreStatus { endpoint: String, status: u16 },

    /// The response body was not the expected JSON array.
    #[snafu(display("Failed to decode Nightscout response from {endpoint}"))]
    StoreDecode {
        endpoint: String,
        source: reqwest::Error,
    },

    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build Nightscout HTTP client"))]
    StoreClientBuild { source: reqwest::Error },
}

// ============ Metrics Errors ============

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },
}

// ============ Bridge Error (top-level) ============

/// Top-level errors that stop the process before or outside the poll loop.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BridgeError {
    /// Configuration error.
    #[snafu(display("Configuration error"))]
    Config { source: ConfigError },

    /// Source client could not be constructed.
    #[snafu(display("Source setup error"))]
    SourceSetup { source: SourceError },

    /// Store client could not be constructed.
    #[snafu(display("Store setup error"))]
    StoreSetup { source: StoreError },

    /// Address parsing error.
    #[snafu(display("Failed to parse address"))]
    AddressParse { source: std::net::AddrParseError },

    /// Metrics error.
    #[snafu(display("Metrics error"))]
    Metrics { source: MetricsError },
}

impl BridgeError {
    /// Check if this error is the fatal missing-credential condition.
    pub fn is_configuration_missing(&self) -> bool {
        matches!(
            self,
            BridgeError::Config {
                source: ConfigError::MissingCredential { .. }
                    | ConfigError::MissingSourceUrl
                    | ConfigError::MissingStoreLocation
                    | ConfigError::MissingSecret
                    | ConfigError::MissingTrustedDevice
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_settings_are_configuration_missing() {
        let missing = BridgeError::Config {
            source: ConfigError::MissingTrustedDevice,
        };
        assert!(missing.is_configuration_missing());

        let invalid = BridgeError::Config {
            source: ConfigError::InvalidValue {
                key: "CARELINK_SGV_LIMIT".to_string(),
                value: "lots".to_string(),
            },
        };
        assert!(!invalid.is_configuration_missing());
    }
}
