//! The store: a Nightscout-compatible time-series API.
//!
//! The poller talks to the store through [`StoreClient`], which exposes the
//! two primitives the bridge needs: upload a JSON array to an endpoint and
//! fetch the most recent records from one.

mod nightscout;

pub use nightscout::{NightscoutStore, hash_secret};

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::StoreError;

/// A reference-counted store client.
pub type StoreClientRef = Arc<dyn StoreClient>;

/// Store collections the bridge writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Entries,
    DeviceStatus,
    Treatments,
}

impl Endpoint {
    /// Path below the store base URL.
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Entries => "/api/v1/entries.json",
            Endpoint::DeviceStatus => "/api/v1/devicestatus.json",
            Endpoint::Treatments => "/api/v1/treatments.json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Entries => "entries",
            Endpoint::DeviceStatus => "devicestatus",
            Endpoint::Treatments => "treatments",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upload and fetch primitives of the store.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// POST `records` as a JSON array. Succeeds only on HTTP 200.
    async fn upload(&self, endpoint: Endpoint, records: Vec<Value>) -> Result<(), StoreError>;

    /// GET the most recent `count` records of `endpoint`.
    async fn fetch(&self, endpoint: Endpoint, count: usize) -> Result<Vec<Value>, StoreError>;
}
