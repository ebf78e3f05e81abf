//! Sequential upload of the four record streams.

use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use tracing::{debug, error, info};

use crate::emit;
use crate::metrics::events::{RecordsUploaded, UploadFailed};
use crate::record::{DeviceStatusRecord, PumpState, RecordStreams};
use crate::store::{Endpoint, StoreClientRef};

/// The record streams, in upload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Samples,
    DeviceStatus,
    Treatments,
    Checks,
}

impl StreamKind {
    pub const ORDER: [StreamKind; 4] = [
        StreamKind::Samples,
        StreamKind::DeviceStatus,
        StreamKind::Treatments,
        StreamKind::Checks,
    ];

    /// Store endpoint the stream is written to. Checks share `treatments`.
    pub fn endpoint(&self) -> Endpoint {
        match self {
            StreamKind::Samples => Endpoint::Entries,
            StreamKind::DeviceStatus => Endpoint::DeviceStatus,
            StreamKind::Treatments | StreamKind::Checks => Endpoint::Treatments,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Samples => "samples",
            StreamKind::DeviceStatus => "devicestatus",
            StreamKind::Treatments => "treatments",
            StreamKind::Checks => "checks",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one stream's upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Uploaded { count: usize },
    /// Nothing new; no request was made.
    Skipped,
    Failed { error: String },
}

/// Per-stream outcomes of one upload pass, in upload order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub outcomes: Vec<(StreamKind, StreamOutcome)>,
}

impl UploadReport {
    pub fn outcome(&self, kind: StreamKind) -> Option<&StreamOutcome> {
        self.outcomes
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, outcome)| outcome)
    }

    pub fn uploaded(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, outcome)| match outcome {
                StreamOutcome::Uploaded { count } => *count,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| matches!(outcome, StreamOutcome::Failed { .. }))
            .count()
    }
}

/// Attach the pump snapshot to the first status record.
pub fn enrich_device_statuses(statuses: &mut [DeviceStatusRecord], pump: PumpState) {
    let Some(first) = statuses.first_mut() else {
        return;
    };
    let rate = match pump.max_auto_basal_rate {
        Some(rate) => rate.to_string(),
        None => "unknown".to_string(),
    };
    first.payload.insert(
        "pump".into(),
        json!({
            "reservoir": pump.reservoir_remaining_units,
            "status": { "status": format!(" - MaxAutoBasal={rate}") },
        }),
    );
}

/// Uploads the streams one after another, never raising on store failure.
#[derive(Clone)]
pub struct UploadSequencer {
    store: StoreClientRef,
}

impl UploadSequencer {
    pub fn new(store: StoreClientRef) -> Self {
        Self { store }
    }

    /// Upload every stream in [`StreamKind::ORDER`]. Returns once all four
    /// attempts have resolved.
    pub async fn upload(&self, streams: RecordStreams, pump: PumpState) -> UploadReport {
        let RecordStreams {
            samples,
            mut device_statuses,
            treatments,
            checks,
        } = streams;
        enrich_device_statuses(&mut device_statuses, pump);

        let mut report = UploadReport::default();
        for kind in StreamKind::ORDER {
            let values = match kind {
                StreamKind::Samples => to_values(&samples),
                StreamKind::DeviceStatus => to_values(&device_statuses),
                StreamKind::Treatments => to_values(&treatments),
                StreamKind::Checks => to_values(&checks),
            };
            let outcome = match values {
                Ok(values) => self.upload_stream(kind, values).await,
                Err(e) => StreamOutcome::Failed {
                    error: e.to_string(),
                },
            };
            report.outcomes.push((kind, outcome));
        }
        report
    }

    async fn upload_stream(&self, kind: StreamKind, records: Vec<Value>) -> StreamOutcome {
        if records.is_empty() {
            debug!(stream = %kind, "No new items for {}", kind.endpoint());
            return StreamOutcome::Skipped;
        }

        let count = records.len();
        match self.store.upload(kind.endpoint(), records).await {
            Ok(()) => {
                info!(stream = %kind, count, "Uploaded {} record(s)", count);
                emit!(RecordsUploaded {
                    stream: kind.as_str(),
                    count: count as u64,
                });
                StreamOutcome::Uploaded { count }
            }
            Err(e) => {
                error!(stream = %kind, error = %e, "Upload failed");
                emit!(UploadFailed {
                    stream: kind.as_str()
                });
                StreamOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

fn to_values<T: Serialize>(records: &[T]) -> Result<Vec<Value>, serde_json::Error> {
    records.iter().map(serde_json::to_value).collect()
}
