//! Deciding which fetched records the store still needs.
//!
//! - `drift`: matches samples against the store and corrects clock offset
//! - `recency`: per-stream high-water-mark deduplication

pub mod drift;
pub mod recency;

pub use drift::{
    AmbiguousMatch, DriftEstimate, DriftOutcome, DriftReconciler, DriftSettings, Reconciliation,
};
pub use recency::RecencyFilter;

use crate::record::{RecordStreams, SampleRecord, TimestampedRecord};

/// One independent [`RecencyFilter`] per record stream.
///
/// Lives as long as the poller; the marks are never shared between streams.
#[derive(Debug)]
pub struct StreamFilters {
    samples: RecencyFilter<SampleRecord>,
    device_statuses: RecencyFilter<TimestampedRecord>,
    treatments: RecencyFilter<TimestampedRecord>,
    checks: RecencyFilter<TimestampedRecord>,
}

impl Default for StreamFilters {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFilters {
    pub fn new() -> Self {
        Self {
            samples: RecencyFilter::new(|s: &SampleRecord| s.date),
            device_statuses: RecencyFilter::new(TimestampedRecord::created_at_millis),
            treatments: RecencyFilter::new(TimestampedRecord::created_at_millis),
            checks: RecencyFilter::new(TimestampedRecord::created_at_millis),
        }
    }

    /// Run every stream through its own filter.
    pub fn apply(&mut self, streams: &RecordStreams) -> RecordStreams {
        RecordStreams {
            samples: self.samples.filter(&streams.samples),
            device_statuses: self.device_statuses.filter(&streams.device_statuses),
            treatments: self.treatments.filter(&streams.treatments),
            checks: self.checks.filter(&streams.checks),
        }
    }
}
