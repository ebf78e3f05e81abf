//! High-water-mark deduplication per record stream.
//!
//! Nightscout upserts entries by `date`, so re-sending a sample would
//! overwrite the stored copy and drop trend data CareLink only provides for
//! the latest reading. `devicestatus` does not upsert at all. Each stream
//! therefore keeps the newest timestamp it has passed on and drops anything
//! at or below it.

use crate::record::EpochMillis;

/// Filters out records at or below the newest timestamp seen so far.
///
/// The mark only moves forward: a batch of older records leaves it where it
/// is, and an empty batch leaves it untouched.
pub struct RecencyFilter<T> {
    high_water_mark: Option<EpochMillis>,
    timestamp: fn(&T) -> EpochMillis,
}

impl<T: Clone> RecencyFilter<T> {
    /// Create a filter with no mark, using `timestamp` to read each record's time.
    pub fn new(timestamp: fn(&T) -> EpochMillis) -> Self {
        Self {
            high_water_mark: None,
            timestamp,
        }
    }

    /// The newest timestamp observed, if any call has seen a record.
    pub fn high_water_mark(&self) -> Option<EpochMillis> {
        self.high_water_mark
    }

    /// Return the records newer than the mark, in input order, and advance the mark.
    ///
    /// On the first call every record passes.
    pub fn filter(&mut self, records: &[T]) -> Vec<T> {
        let timestamp = self.timestamp;
        let fresh: Vec<T> = match self.high_water_mark {
            None => records.to_vec(),
            Some(mark) => records
                .iter()
                .filter(|record| timestamp(record) > mark)
                .cloned()
                .collect(),
        };

        let batch_max = records.iter().map(timestamp).max();
        self.high_water_mark = match (self.high_water_mark, batch_max) {
            (Some(mark), Some(max)) => Some(mark.max(max)),
            (mark, max) => mark.or(max),
        };

        fresh
    }
}

impl<T> std::fmt::Debug for RecencyFilter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyFilter")
            .field("high_water_mark", &self.high_water_mark)
            .finish_non_exhaustive()
    }
}
