//! The poll loop.
//!
//! The [`Poller`] drives one cycle at a time: fetch from the source,
//! reconcile against the store, upload what is new, then sleep until the
//! device is expected to report again. A failed or panicking cycle is
//! contained and retried after the fallback interval.

mod schedule;
mod upload;

pub use schedule::{next_interval, random_jitter};
pub use upload::{StreamKind, StreamOutcome, UploadReport, UploadSequencer, enrich_device_statuses};

use futures::FutureExt;
use snafu::prelude::*;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::emit;
use crate::error::{BridgeError, SourceError, SourceSetupSnafu, StoreSetupSnafu};
use crate::metrics::events::{
    AmbiguousMatches, CycleFinished, CycleResult, DriftEstimated, NextPollScheduled,
    SamplesSuppressed,
};
use crate::reconcile::{DriftOutcome, DriftReconciler, DriftSettings, StreamFilters};
use crate::record::{RecordStreams, SampleRecord};
use crate::signal::spawn_shutdown_handler;
use crate::source::{HttpSource, SourceClientRef, StreamLimits, transform};
use crate::store::{Endpoint, NightscoutStore, StoreClientRef};

/// Where the poller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Fetching,
    Reconciling,
    Uploading,
    /// Sleeping until the next fetch.
    Scheduled(Duration),
    Faulted,
}

/// Static poller parameters.
#[derive(Debug, Clone)]
pub struct PollerSettings {
    /// Name used in log fields.
    pub name: String,
    pub limits: StreamLimits,
    /// Device tag stamped on transformed records.
    pub device_tag: String,
    /// How many recent store entries to compare samples against.
    pub store_fetch_count: usize,
    pub nominal_cadence: Duration,
    pub fallback_interval: Duration,
    pub start_jitter_secs: u64,
}

impl PollerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: "carelink".to_string(),
            limits: StreamLimits {
                samples: config.limits.samples,
                treatments: config.limits.treatments,
                checks: config.limits.checks,
            },
            device_tag: config.source.device_tag.clone(),
            store_fetch_count: config.store_fetch_count(),
            nominal_cadence: config.poll.nominal_cadence(),
            fallback_interval: config.poll.fallback_interval(),
            start_jitter_secs: config.poll.start_jitter_secs(),
        }
    }
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed {
        drift: DriftOutcome,
        ambiguous: usize,
        uploads: UploadReport,
    },
    Faulted {
        error: String,
    },
}

/// Outcome of one cycle and the delay before the next.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub next_delay: Duration,
}

impl CycleReport {
    pub fn is_faulted(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Faulted { .. })
    }
}

/// Drives fetch, reconcile, upload and schedule cycles.
pub struct Poller {
    source: SourceClientRef,
    store: StoreClientRef,
    reconciler: DriftReconciler,
    filters: StreamFilters,
    sequencer: UploadSequencer,
    settings: PollerSettings,
    state: PollerState,
}

impl Poller {
    pub fn new(
        source: SourceClientRef,
        store: StoreClientRef,
        reconciler: DriftReconciler,
        settings: PollerSettings,
    ) -> Self {
        Self {
            sequencer: UploadSequencer::new(store.clone()),
            source,
            store,
            reconciler,
            filters: StreamFilters::new(),
            settings,
            state: PollerState::Idle,
        }
    }

    /// Build a poller with settings and drift parameters from `config`.
    pub fn from_config(config: &Config, source: SourceClientRef, store: StoreClientRef) -> Self {
        let reconciler = DriftReconciler::new(DriftSettings {
            match_window: Duration::from_secs(config.reconcile.match_window_secs),
            trusted_device_tag: config.trusted_device_tag().to_string(),
            min_match_count: config.reconcile.min_match_count,
        });
        Self::new(source, store, reconciler, PollerSettings::from_config(config))
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    /// Poll until `shutdown` is cancelled.
    ///
    /// Cancellation interrupts the startup wait and the sleep between
    /// cycles; a cycle already running is allowed to finish.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let wait = random_jitter(self.settings.start_jitter_secs);
        info!(
            poller = %self.settings.name,
            "Wait {} seconds before start",
            wait.as_secs_f64().round() as u64
        );
        if shutdown
            .run_until_cancelled(tokio::time::sleep(wait))
            .await
            .is_none()
        {
            info!(poller = %self.settings.name, "Shutdown requested during startup wait");
            return;
        }

        while !shutdown.is_cancelled() {
            let report = self.run_cycle().await;
            if shutdown
                .run_until_cancelled(tokio::time::sleep(report.next_delay))
                .await
                .is_none()
            {
                break;
            }
        }

        self.state = PollerState::Idle;
        info!(poller = %self.settings.name, "Poller stopped");
    }

    /// Run one cycle, containing any error or panic.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started = Instant::now();

        let outcome = AssertUnwindSafe(self.cycle()).catch_unwind().await;
        let report = match outcome {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                warn!(poller = %self.settings.name, error = %e, "Fetch failed");
                self.faulted(e.to_string())
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(poller = %self.settings.name, "Cycle panicked: {}", message);
                self.faulted(message)
            }
        };

        let result = if report.is_faulted() {
            CycleResult::Faulted
        } else {
            CycleResult::Completed
        };
        emit!(CycleFinished {
            result,
            duration: started.elapsed(),
        });
        emit!(NextPollScheduled {
            delay: report.next_delay,
        });
        info!(
            poller = %self.settings.name,
            next_poll_secs = report.next_delay.as_secs(),
            "Next poll in {} seconds",
            report.next_delay.as_secs()
        );

        self.state = PollerState::Scheduled(report.next_delay);
        report
    }

    fn faulted(&mut self, error: String) -> CycleReport {
        self.state = PollerState::Faulted;
        CycleReport {
            outcome: CycleOutcome::Faulted { error },
            next_delay: self.settings.fallback_interval,
        }
    }

    async fn cycle(&mut self) -> Result<CycleReport, SourceError> {
        self.state = PollerState::Fetching;
        let batch = self.source.fetch().await?;

        self.state = PollerState::Reconciling;
        let streams = transform(&batch, self.settings.limits, &self.settings.device_tag);
        let store_samples = self.store_samples().await;
        let reconciliation = self.reconciler.reconcile(&streams.samples, &store_samples);

        match reconciliation.outcome {
            DriftOutcome::Corrected(estimate) => emit!(DriftEstimated {
                offset_millis: estimate.offset_millis,
                trusted_matches: estimate.sample_match_count as u64,
            }),
            DriftOutcome::InsufficientEvidence { .. } => emit!(SamplesSuppressed {
                count: reconciliation.suppressed as u64,
            }),
        }
        if !reconciliation.ambiguous.is_empty() {
            emit!(AmbiguousMatches {
                count: reconciliation.ambiguous.len() as u64,
            });
        }

        let fresh = self.filters.apply(&RecordStreams {
            samples: reconciliation.samples,
            ..streams
        });
        debug!(
            poller = %self.settings.name,
            samples = fresh.samples.len(),
            device_statuses = fresh.device_statuses.len(),
            treatments = fresh.treatments.len(),
            checks = fresh.checks.len(),
            "New records after filtering"
        );

        self.state = PollerState::Uploading;
        let uploads = self.sequencer.upload(fresh, batch.pump_state()).await;

        Ok(CycleReport {
            outcome: CycleOutcome::Completed {
                drift: reconciliation.outcome,
                ambiguous: reconciliation.ambiguous.len(),
                uploads,
            },
            next_delay: next_interval(
                self.settings.nominal_cadence,
                batch.time_since_device_update(),
            ),
        })
    }

    /// Recent store samples. A failed fetch is treated as an empty store.
    async fn store_samples(&self) -> Vec<SampleRecord> {
        match self
            .store
            .fetch(Endpoint::Entries, self.settings.store_fetch_count)
            .await
        {
            Ok(values) => values
                .into_iter()
                .filter_map(SampleRecord::from_store_value)
                .collect(),
            Err(e) => {
                warn!(poller = %self.settings.name, error = %e, "Could not read Nightscout entries");
                Vec::new()
            }
        }
    }
}

/// Run the bridge against the configured CareLink relay and Nightscout
/// site until a shutdown signal arrives.
pub async fn run_bridge(config: Config) -> Result<(), BridgeError> {
    let source = HttpSource::new(&config.source).context(SourceSetupSnafu)?;
    let store = NightscoutStore::from_config(&config.store).context(StoreSetupSnafu)?;

    let shutdown = CancellationToken::new();
    spawn_shutdown_handler(shutdown.clone());

    let mut poller = Poller::from_config(&config, Arc::new(source), Arc::new(store));
    poller.run(shutdown).await;
    Ok(())
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
