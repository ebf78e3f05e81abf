//! Raw payload to canonical record streams.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use super::{RawBatch, RawEvent, RawSample};
use crate::record::{RecordStreams, SampleRecord, TimestampedRecord};

/// Maximum records kept per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub samples: usize,
    pub treatments: usize,
    pub checks: usize,
}

/// Map one raw batch to the four canonical streams.
///
/// Each stream keeps its most recent `limit` records, oldest first. Samples
/// with value 0 are gaps and are dropped. Device statuses are not limited.
pub fn transform(batch: &RawBatch, limits: StreamLimits, device_tag: &str) -> RecordStreams {
    let mut raw_samples: Vec<&RawSample> = batch.sgs.iter().filter(|s| s.sg > 0).collect();
    raw_samples.sort_by_key(|s| s.datetime);
    let samples = most_recent(raw_samples, limits.samples)
        .into_iter()
        .filter_map(|raw| to_sample(raw, device_tag))
        .collect();

    let device_statuses = events(&batch.device_statuses, usize::MAX)
        .map(|record| record.with_field("device", Value::from(device_tag)))
        .collect();

    RecordStreams {
        samples,
        device_statuses,
        treatments: events(&batch.treatments, limits.treatments).collect(),
        checks: events(&batch.bg_checks, limits.checks).collect(),
    }
}

fn most_recent<T>(mut items: Vec<T>, limit: usize) -> Vec<T> {
    let excess = items.len().saturating_sub(limit);
    items.drain(..excess);
    items
}

fn to_sample(raw: &RawSample, device_tag: &str) -> Option<SampleRecord> {
    let when = timestamp(raw.datetime)?;
    let mut sample = SampleRecord::new(raw.sg, raw.datetime, device_tag);
    sample.trend.insert("type".into(), Value::from("sgv"));
    sample.trend.insert(
        "dateString".into(),
        Value::from(when.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    if let Some(arrow) = raw.trend.as_deref().and_then(direction) {
        sample.trend.insert("direction".into(), Value::from(arrow));
    }
    Some(sample)
}

fn events(raw: &[RawEvent], limit: usize) -> impl Iterator<Item = TimestampedRecord> {
    let mut sorted: Vec<&RawEvent> = raw.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);
    most_recent(sorted, limit).into_iter().filter_map(|event| {
        let created_at = timestamp(event.timestamp)?;
        let mut record = TimestampedRecord::new(created_at);
        record.payload.extend(event.fields.clone());
        Some(record)
    })
}

fn timestamp(millis: i64) -> Option<DateTime<Utc>> {
    let parsed = Utc.timestamp_millis_opt(millis).single();
    if parsed.is_none() {
        warn!(millis, "Dropping record with out-of-range timestamp");
    }
    parsed
}

/// CareLink trend arrows to Nightscout directions.
fn direction(trend: &str) -> Option<&'static str> {
    match trend {
        "NONE" => Some("NONE"),
        "UP" => Some("FortyFiveUp"),
        "DOWN" => Some("FortyFiveDown"),
        "UP_DOUBLE" => Some("DoubleUp"),
        "DOWN_DOUBLE" => Some("DoubleDown"),
        "UP_TRIPLE" => Some("TripleUp"),
        "DOWN_TRIPLE" => Some("TripleDown"),
        "FLAT" => Some("Flat"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    const BASE: i64 = 1_700_000_000_000;

    fn limits(n: usize) -> StreamLimits {
        StreamLimits {
            samples: n,
            treatments: n,
            checks: n,
        }
    }

    fn raw_sample(sg: i64, offset_min: i64) -> RawSample {
        RawSample {
            sg,
            datetime: BASE + offset_min * 60_000,
            trend: None,
        }
    }

    fn raw_event(offset_min: i64, kind: &str) -> RawEvent {
        let mut fields = Map::new();
        fields.insert("eventType".into(), json!(kind));
        RawEvent {
            timestamp: BASE + offset_min * 60_000,
            fields,
        }
    }

    #[test]
    fn test_samples_drop_gaps_and_keep_most_recent() {
        let batch = RawBatch {
            sgs: vec![
                raw_sample(100, 0),
                raw_sample(0, 5),
                raw_sample(110, 10),
                raw_sample(120, 15),
            ],
            ..RawBatch::default()
        };

        let streams = transform(&batch, limits(2), "connect://paradigm");

        let values: Vec<i64> = streams.samples.iter().map(|s| s.sgv).collect();
        assert_eq!(values, vec![110, 120]);
        assert_eq!(streams.samples[0].device, "connect://paradigm");
        assert_eq!(streams.samples[0].trend["type"], json!("sgv"));
        assert_eq!(
            streams.samples[0].trend["dateString"],
            json!("2023-11-14T22:23:20.000Z")
        );
    }

    #[test]
    fn test_trend_maps_to_direction() {
        let mut latest = raw_sample(130, 20);
        latest.trend = Some("DOWN_DOUBLE".into());
        let batch = RawBatch {
            sgs: vec![raw_sample(125, 15), latest],
            ..RawBatch::default()
        };

        let streams = transform(&batch, limits(24), "d");

        assert!(streams.samples[0].trend.get("direction").is_none());
        assert_eq!(streams.samples[1].trend["direction"], json!("DoubleDown"));
    }

    #[test]
    fn test_events_become_timestamped_records() {
        let batch = RawBatch {
            treatments: vec![raw_event(10, "Meal Bolus"), raw_event(0, "Correction Bolus")],
            bg_checks: vec![raw_event(3, "BG Check"), raw_event(4, "BG Check")],
            device_statuses: vec![raw_event(0, "status")],
            ..RawBatch::default()
        };

        let streams = transform(&batch, limits(1), "connect://paradigm");

        assert_eq!(streams.treatments.len(), 1);
        assert_eq!(streams.treatments[0].payload["eventType"], json!("Meal Bolus"));
        assert_eq!(streams.checks.len(), 1);
        assert_eq!(streams.checks[0].created_at_millis(), BASE + 4 * 60_000);
        assert_eq!(streams.device_statuses.len(), 1);
        assert_eq!(
            streams.device_statuses[0].payload["device"],
            json!("connect://paradigm")
        );
    }

    #[test]
    fn test_empty_batch_gives_empty_streams() {
        let streams = transform(&RawBatch::default(), limits(24), "d");
        assert_eq!(streams, RecordStreams::default());
    }
}
