//! Canonical record types exchanged with the store.
//!
//! Samples are Nightscout `entries` (identified for matching by value and
//! timestamp). Device statuses, treatments and fingerstick checks are all
//! `created_at`-stamped documents whose content the bridge does not
//! interpret, so they share [`TimestampedRecord`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// A glucose sample as stored in the Nightscout `entries` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Sensor glucose value.
    pub sgv: i64,
    /// Sample time in epoch milliseconds.
    pub date: EpochMillis,
    /// Uploader tag; used to decide whether a store entry is drift evidence.
    #[serde(default)]
    pub device: String,
    /// Everything else (`type`, `direction`, `dateString`, ...), passed through untouched.
    #[serde(flatten)]
    pub trend: Map<String, Value>,
}

impl SampleRecord {
    pub fn new(sgv: i64, date: EpochMillis, device: impl Into<String>) -> Self {
        Self {
            sgv,
            date,
            device: device.into(),
            trend: Map::new(),
        }
    }

    /// Parse a store entry, returning `None` for entries that are not samples
    /// (meter readings, calibrations, malformed documents).
    pub fn from_store_value(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

/// A document identified by its creation time only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampedRecord {
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl TimestampedRecord {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            payload: Map::new(),
        }
    }

    /// Add a payload field, builder style.
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    pub fn created_at_millis(&self) -> EpochMillis {
        self.created_at.timestamp_millis()
    }
}

pub type DeviceStatusRecord = TimestampedRecord;
pub type TreatmentRecord = TimestampedRecord;
pub type CheckRecord = TimestampedRecord;

/// The four canonical streams produced from one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordStreams {
    pub samples: Vec<SampleRecord>,
    pub device_statuses: Vec<DeviceStatusRecord>,
    pub treatments: Vec<TreatmentRecord>,
    pub checks: Vec<CheckRecord>,
}

/// Device state reported alongside a fetch, used to annotate status uploads.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PumpState {
    pub reservoir_remaining_units: Option<f64>,
    pub max_auto_basal_rate: Option<f64>,
}
