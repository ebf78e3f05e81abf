//! HTTP client for the Nightscout REST API.

use async_trait::async_trait;
use serde_json::Value;
use sha1::{Digest, Sha1};
use snafu::prelude::*;
use std::time::Duration;
use tracing::debug;

use super::{Endpoint, StoreClient};
use crate::config::StoreConfig;
use crate::error::{
    StoreClientBuildSnafu, StoreDecodeSnafu, StoreError, StoreRequestSnafu, StoreStatusSnafu,
};

/// Header Nightscout reads the hashed secret from.
const API_SECRET_HEADER: &str = "api-secret";

/// Lowercase hex SHA-1 of the shared secret, as Nightscout expects it.
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha1::digest(secret.as_bytes()))
}

/// Nightscout client authenticating with the hashed API secret.
#[derive(Debug, Clone)]
pub struct NightscoutStore {
    client: reqwest::Client,
    base_url: String,
    hashed_secret: String,
}

impl NightscoutStore {
    /// Build a client for `base_url` (no trailing slash).
    pub fn new(
        base_url: impl Into<String>,
        secret: &str,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context(StoreClientBuildSnafu)?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            hashed_secret: hash_secret(secret),
        })
    }

    /// Build a client from configuration. Validation guarantees a base URL.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::new(
            config.base_url().unwrap_or_default(),
            &config.api_secret,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Absolute URL of `endpoint`.
    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

#[async_trait]
impl StoreClient for NightscoutStore {
    async fn upload(&self, endpoint: Endpoint, records: Vec<Value>) -> Result<(), StoreError> {
        let url = self.url(endpoint);
        debug!(count = records.len(), "POST {}", url);

        let response = self
            .client
            .post(&url)
            .header(API_SECRET_HEADER, &self.hashed_secret)
            .json(&records)
            .send()
            .await
            .context(StoreRequestSnafu { endpoint: &url })?;

        let status = response.status().as_u16();
        ensure!(status == 200, StoreStatusSnafu { endpoint: url, status });
        Ok(())
    }

    async fn fetch(&self, endpoint: Endpoint, count: usize) -> Result<Vec<Value>, StoreError> {
        let url = self.url(endpoint);
        debug!(count, "GET {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("count", count)])
            .header(API_SECRET_HEADER, &self.hashed_secret)
            .send()
            .await
            .context(StoreRequestSnafu { endpoint: &url })?;

        let status = response.status().as_u16();
        ensure!(
            status == 200,
            StoreStatusSnafu {
                endpoint: &url,
                status
            }
        );
        response
            .json()
            .await
            .context(StoreDecodeSnafu { endpoint: url })
    }
}
