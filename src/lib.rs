//! carelink-bridge: one-way sync of CareLink pump and sensor data into
//! Nightscout.
//!
//! Each poll fetches the device payload from a CareLink relay, matches the
//! glucose samples against what Nightscout already holds (correcting clock
//! drift against a trusted uploader), drops records already sent, and
//! uploads the rest to the entries, devicestatus and treatments collections.
//!
//! # Example
//!
//! ```ignore
//! use carelink_bridge::{Config, error::BridgeError, run_bridge};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), BridgeError> {
//!     let config = Config::from_env().context(ConfigSnafu)?;
//!     run_bridge(config).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod record;
pub mod signal;
pub mod source;
pub mod store;

// Re-export main types
pub use config::Config;
pub use pipeline::{CycleOutcome, CycleReport, Poller, PollerSettings, PollerState, run_bridge};
pub use source::{SourceClient, SourceClientRef};
pub use store::{StoreClient, StoreClientRef};
