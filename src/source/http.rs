//! HTTP client for the CareLink relay.

use async_trait::async_trait;
use snafu::prelude::*;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{RawBatch, SourceClient};
use crate::config::SourceConfig;
use crate::error::{
    SourceClientBuildSnafu, SourceDecodeSnafu, SourceError, SourceRequestSnafu,
    SourceStatusSnafu, SourceUnavailableSnafu,
};

/// First retry delay; doubles after every failed attempt.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Fetches the device payload with HTTP basic auth, retrying until the retry
/// budget is spent.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
    patient_id: Option<String>,
    max_retry_duration: Duration,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context(SourceClientBuildSnafu)?;

        Ok(Self {
            client,
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            patient_id: config.patient_id.clone(),
            max_retry_duration: Duration::from_secs(config.max_retry_duration_secs),
        })
    }

    async fn fetch_once(&self) -> Result<RawBatch, SourceError> {
        debug!("GET {}", self.url);
        let mut request = self
            .client
            .get(&self.url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(patient_id) = &self.patient_id {
            request = request.query(&[("patientId", patient_id)]);
        }

        let response = request.send().await.context(SourceRequestSnafu)?;
        let status = response.status();
        ensure!(
            status.is_success(),
            SourceStatusSnafu {
                status: status.as_u16()
            }
        );
        response.json().await.context(SourceDecodeSnafu)
    }
}

/// Whether another attempt fits in the budget after waiting `delay`.
fn within_budget(elapsed: Duration, delay: Duration, budget: Duration) -> bool {
    elapsed + delay <= budget
}

#[async_trait]
impl SourceClient for HttpSource {
    async fn fetch(&self) -> Result<RawBatch, SourceError> {
        let started = Instant::now();
        let mut delay = INITIAL_BACKOFF;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match self.fetch_once().await {
                Ok(batch) => return Ok(batch),
                Err(e) => e,
            };

            if !within_budget(started.elapsed(), delay, self.max_retry_duration) {
                return SourceUnavailableSnafu {
                    attempts,
                    message: error.to_string(),
                }
                .fail();
            }

            warn!(
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                "CareLink fetch failed: {}",
                error
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
    }
}
