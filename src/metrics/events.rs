//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in a poll cycle.
//! Events implement the `InternalEvent` trait which records the
//! corresponding Prometheus metric.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// How a poll cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleResult {
    Completed,
    Faulted,
}

impl CycleResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleResult::Completed => "completed",
            CycleResult::Faulted => "faulted",
        }
    }
}

/// Event emitted when a poll cycle ends.
pub struct CycleFinished {
    pub result: CycleResult,
    pub duration: Duration,
}

impl InternalEvent for CycleFinished {
    fn emit(self) {
        trace!(
            result = self.result.as_str(),
            duration_ms = self.duration.as_millis(),
            "Cycle finished"
        );
        counter!("carelink_bridge_cycles_total", "result" => self.result.as_str()).increment(1);
        histogram!("carelink_bridge_cycle_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Event emitted when the next poll is scheduled.
pub struct NextPollScheduled {
    pub delay: Duration,
}

impl InternalEvent for NextPollScheduled {
    fn emit(self) {
        trace!(delay_ms = self.delay.as_millis(), "Next poll scheduled");
        gauge!("carelink_bridge_next_poll_delay_seconds").set(self.delay.as_secs_f64());
    }
}

/// Event emitted when a stream upload succeeds.
pub struct RecordsUploaded {
    pub stream: &'static str,
    pub count: u64,
}

impl InternalEvent for RecordsUploaded {
    fn emit(self) {
        trace!(stream = self.stream, count = self.count, "Records uploaded");
        counter!("carelink_bridge_records_uploaded_total", "stream" => self.stream)
            .increment(self.count);
    }
}

/// Event emitted when a stream upload fails.
pub struct UploadFailed {
    pub stream: &'static str,
}

impl InternalEvent for UploadFailed {
    fn emit(self) {
        trace!(stream = self.stream, "Upload failed");
        counter!("carelink_bridge_upload_failures_total", "stream" => self.stream).increment(1);
    }
}

/// Event emitted after a successful drift estimate.
pub struct DriftEstimated {
    pub offset_millis: i64,
    pub trusted_matches: u64,
}

impl InternalEvent for DriftEstimated {
    fn emit(self) {
        trace!(
            offset_ms = self.offset_millis,
            trusted_matches = self.trusted_matches,
            "Drift estimated"
        );
        gauge!("carelink_bridge_drift_offset_milliseconds").set(self.offset_millis as f64);
        gauge!("carelink_bridge_drift_trusted_matches").set(self.trusted_matches as f64);
    }
}

/// Event emitted when samples are withheld for lack of drift evidence.
pub struct SamplesSuppressed {
    pub count: u64,
}

impl InternalEvent for SamplesSuppressed {
    fn emit(self) {
        trace!(count = self.count, "Samples suppressed");
        counter!("carelink_bridge_samples_suppressed_total").increment(self.count);
    }
}

/// Event emitted for each sample with more than one store match.
pub struct AmbiguousMatches {
    pub count: u64,
}

impl InternalEvent for AmbiguousMatches {
    fn emit(self) {
        trace!(count = self.count, "Ambiguous matches");
        counter!("carelink_bridge_ambiguous_matches_total").increment(self.count);
    }
}
