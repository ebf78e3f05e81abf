//! Clock drift reconciliation between CareLink and Nightscout.
//!
//! Another uploader may already have written the same readings to
//! Nightscout, stamped by a clock that runs ahead of CareLink's. A CareLink
//! sample is "already present" when the store holds an entry with the same
//! value up to `match_window` later. Matches against the trusted uploader
//! give an estimate of the offset, which is then applied to the samples the
//! store does not have so that both sources line up.

use std::time::Duration;
use tracing::{debug, error, info};

use crate::record::{EpochMillis, SampleRecord};

/// Drift reconciliation parameters.
#[derive(Debug, Clone)]
pub struct DriftSettings {
    /// Maximum lag of a store entry behind the matching source sample.
    pub match_window: Duration,
    /// Device tag of the uploader whose entries count as offset evidence.
    pub trusted_device_tag: String,
    /// Trusted matches needed before anything is uploaded.
    pub min_match_count: usize,
}

/// Offset estimate for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriftEstimate {
    pub offset_millis: i64,
    pub sample_match_count: usize,
}

/// A source sample that matched several store entries.
#[derive(Debug, Clone, PartialEq)]
pub struct AmbiguousMatch {
    pub sample: SampleRecord,
    pub candidates: Vec<SampleRecord>,
}

/// Why samples were or were not released this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftOutcome {
    /// Enough evidence; unmatched samples were shifted by the estimate.
    Corrected(DriftEstimate),
    /// Too few trusted matches; no samples are released.
    InsufficientEvidence { trusted_matches: usize },
}

/// Result of reconciling one fetch against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Samples the store lacks, timestamps corrected. Empty when suppressed.
    pub samples: Vec<SampleRecord>,
    pub outcome: DriftOutcome,
    /// Source samples with exactly one store match.
    pub already_present: usize,
    /// Unmatched samples withheld because evidence was insufficient.
    pub suppressed: usize,
    pub ambiguous: Vec<AmbiguousMatch>,
}

impl Reconciliation {
    pub fn estimate(&self) -> Option<DriftEstimate> {
        match self.outcome {
            DriftOutcome::Corrected(estimate) => Some(estimate),
            DriftOutcome::InsufficientEvidence { .. } => None,
        }
    }
}

/// Matches fresh source samples against the store's recent entries.
#[derive(Debug, Clone)]
pub struct DriftReconciler {
    settings: DriftSettings,
}

impl DriftReconciler {
    pub fn new(settings: DriftSettings) -> Self {
        Self { settings }
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.settings.match_window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Whether `stored` is a plausible copy of `sample`: same value, stamped
    /// no earlier than the sample and at most one window later.
    pub fn is_match(&self, sample: &SampleRecord, stored: &SampleRecord) -> bool {
        stored.sgv == sample.sgv
            && stored
                .date
                .checked_sub(sample.date)
                .is_some_and(|lag| (0..=self.window_millis()).contains(&lag))
    }

    /// All store entries matching `sample`.
    pub fn matches<'a>(
        &self,
        sample: &SampleRecord,
        store: &'a [SampleRecord],
    ) -> Vec<&'a SampleRecord> {
        store.iter().filter(|stored| self.is_match(sample, stored)).collect()
    }

    /// Split `source` into already-present, ambiguous and missing samples,
    /// estimate the drift and return the corrected missing ones.
    pub fn reconcile(&self, source: &[SampleRecord], store: &[SampleRecord]) -> Reconciliation {
        let mut missing: Vec<SampleRecord> = Vec::new();
        let mut ambiguous: Vec<AmbiguousMatch> = Vec::new();
        let mut already_present = 0usize;
        let mut evidence: Vec<i64> = Vec::new();

        for sample in source {
            match self.matches(sample, store).as_slice() {
                [] => missing.push(sample.clone()),
                [stored] => {
                    already_present += 1;
                    if stored.device == self.settings.trusted_device_tag {
                        evidence.push(stored.date.saturating_sub(sample.date));
                    }
                }
                candidates => {
                    error!(
                        sgv = sample.sgv,
                        date = sample.date,
                        candidates = candidates.len(),
                        "More than one matching Nightscout entry for sample"
                    );
                    for candidate in candidates {
                        error!(sgv = candidate.sgv, date = candidate.date, "\tNightscout match");
                    }
                    ambiguous.push(AmbiguousMatch {
                        sample: sample.clone(),
                        candidates: candidates.iter().map(|c| (*c).clone()).collect(),
                    });
                }
            }
        }

        if evidence.len() < self.settings.min_match_count {
            info!(
                trusted_matches = evidence.len(),
                required = self.settings.min_match_count,
                "Not enough Nightscout entries found, not uploading any samples"
            );
            return Reconciliation {
                samples: Vec::new(),
                outcome: DriftOutcome::InsufficientEvidence {
                    trusted_matches: evidence.len(),
                },
                already_present,
                suppressed: missing.len(),
                ambiguous,
            };
        }

        let estimate = DriftEstimate {
            offset_millis: mean_offset(&evidence),
            sample_match_count: evidence.len(),
        };
        info!(
            offset_ms = estimate.offset_millis,
            trusted_matches = estimate.sample_match_count,
            "Estimated clock drift"
        );

        for sample in &mut missing {
            let before: EpochMillis = sample.date;
            sample.date = sample.date.saturating_add(estimate.offset_millis);
            debug!(sgv = sample.sgv, from = before, to = sample.date, "Shifted sample");
        }

        Reconciliation {
            samples: missing,
            outcome: DriftOutcome::Corrected(estimate),
            already_present,
            suppressed: 0,
            ambiguous,
        }
    }
}

/// Mean of `diffs` rounded to the nearest millisecond, halves rounding up.
/// Zero when there is no evidence.
fn mean_offset(diffs: &[i64]) -> i64 {
    if diffs.is_empty() {
        return 0;
    }
    let total: i128 = diffs.iter().map(|d| i128::from(*d)).sum();
    let count = diffs.len() as i128;
    // floor((2 * total + count) / (2 * count)) == floor(mean + 0.5)
    let doubled = 2 * total + count;
    let divisor = 2 * count;
    doubled.div_euclid(divisor) as i64
}
