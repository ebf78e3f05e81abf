//! The polling source: where device data comes from.
//!
//! The poller only sees the [`SourceClient`] trait and the [`RawBatch`] it
//! returns. `http` provides the CareLink relay client and `transform` turns
//! a batch into the canonical record streams.

mod http;
mod transform;

pub use http::HttpSource;
pub use transform::{StreamLimits, transform};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::SourceError;
use crate::record::{EpochMillis, PumpState};

/// A reference-counted source client.
pub type SourceClientRef = Arc<dyn SourceClient>;

/// Fetches the current device payload.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch the latest batch. Any error means the source is unavailable
    /// for this cycle.
    async fn fetch(&self) -> Result<RawBatch, SourceError>;
}

/// One raw payload as returned by the source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBatch {
    #[serde(default)]
    pub sgs: Vec<RawSample>,
    #[serde(default)]
    pub device_statuses: Vec<RawEvent>,
    #[serde(default)]
    pub treatments: Vec<RawEvent>,
    #[serde(default)]
    pub bg_checks: Vec<RawEvent>,
    /// Source server clock at the time of the fetch.
    pub current_server_time: EpochMillis,
    /// Source server clock when the device last uploaded.
    pub last_medical_device_data_update_server_time: EpochMillis,
    #[serde(default)]
    pub reservoir_remaining_units: Option<f64>,
    #[serde(default)]
    pub max_auto_basal_rate: Option<f64>,
}

impl RawBatch {
    /// Device state used to annotate the status upload.
    pub fn pump_state(&self) -> PumpState {
        PumpState {
            reservoir_remaining_units: self.reservoir_remaining_units,
            max_auto_basal_rate: self.max_auto_basal_rate,
        }
    }

    /// Milliseconds since the device last reported, on the source's clock.
    pub fn time_since_device_update(&self) -> i64 {
        self.current_server_time
            .saturating_sub(self.last_medical_device_data_update_server_time)
    }
}

/// A raw sensor reading. A value of 0 marks a gap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub sg: i64,
    pub datetime: EpochMillis,
    #[serde(default)]
    pub trend: Option<String>,
}

/// A raw timestamped event (status snapshot, bolus, fingerstick, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub timestamp: EpochMillis,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}
