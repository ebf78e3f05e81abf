//! Integration tests for carelink-bridge

use async_trait::async_trait;
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

use carelink_bridge::config::Config;
use carelink_bridge::error::{SourceError, StoreError};
use carelink_bridge::pipeline::{StreamKind, StreamOutcome};
use carelink_bridge::reconcile::DriftOutcome;
use carelink_bridge::source::{HttpSource, RawBatch, SourceClient};
use carelink_bridge::store::{Endpoint, NightscoutStore, StoreClient, hash_secret};
use carelink_bridge::{CycleOutcome, Poller};

const BASE: i64 = 1_700_000_000_000;
const FIVE_MIN: i64 = 300_000;
const SECRET: &str = "integration-secret";

fn config(source_url: &str, store_url: &str, extra: &str) -> Config {
    let yaml = format!(
        r#"
source:
  username: alice
  password: hunter2
  url: "{source_url}/connect/data"
  max_retry_duration_secs: 0
store:
  base_url: "{store_url}/"
  api_secret: "{SECRET}"
reconcile:
  trusted_device_tag: xDrip-G6
metrics:
  enabled: false
{extra}
"#
    );
    Config::from_yaml(&yaml).unwrap()
}

fn http_poller(config: &Config) -> Poller {
    let source = HttpSource::new(&config.source).unwrap();
    let store = NightscoutStore::from_config(&config.store).unwrap();
    Poller::from_config(config, Arc::new(source), Arc::new(store))
}

async fn serve_source(server: &mut ServerGuard, body: Value) -> mockito::Mock {
    server
        .mock("GET", "/connect/data")
        .match_header("authorization", Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn serve_entries(server: &mut ServerGuard, entries: Value) -> mockito::Mock {
    server
        .mock("GET", "/api/v1/entries.json")
        .match_query(Matcher::UrlEncoded("count".into(), "29".into()))
        .match_header("api-secret", hash_secret(SECRET).as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(entries.to_string())
        .create_async()
        .await
}

mod http_cycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_samples_skip_entries_but_upload_other_streams() {
        let mut source = Server::new_async().await;
        let mut store = Server::new_async().await;

        let _source_mock = serve_source(
            &mut source,
            json!({
                "sgs": [{"sg": 0, "datetime": BASE}],
                "deviceStatuses": [{"timestamp": BASE, "battery": 80}],
                "treatments": [{"timestamp": BASE, "eventType": "Meal Bolus", "insulin": 3.5}],
                "bgChecks": [{"timestamp": BASE + 1_000, "eventType": "BG Check", "glucose": 104}],
                "currentServerTime": BASE + 100_000,
                "lastMedicalDeviceDataUpdateServerTime": BASE,
                "reservoirRemainingUnits": 120.0,
                "maxAutoBasalRate": 1.5
            }),
        )
        .await;
        let _entries_mock = serve_entries(&mut store, json!([])).await;
        let entries_post = store
            .mock("POST", "/api/v1/entries.json")
            .expect(0)
            .create_async()
            .await;
        let status_post = store
            .mock("POST", "/api/v1/devicestatus.json")
            .match_header("api-secret", hash_secret(SECRET).as_str())
            .match_body(Matcher::Regex(r"MaxAutoBasal=1\.5".into()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let treatments_post = store
            .mock("POST", "/api/v1/treatments.json")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;

        let config = config(&source.url(), &store.url(), "");
        let mut poller = http_poller(&config);
        let report = poller.run_cycle().await;

        entries_post.assert_async().await;
        status_post.assert_async().await;
        treatments_post.assert_async().await;

        let CycleOutcome::Completed { uploads, .. } = &report.outcome else {
            panic!("cycle faulted: {:?}", report.outcome);
        };
        assert_eq!(uploads.outcome(StreamKind::Samples), Some(&StreamOutcome::Skipped));
        assert_eq!(
            uploads.outcome(StreamKind::Checks),
            Some(&StreamOutcome::Uploaded { count: 1 })
        );
        assert_eq!(report.next_delay.as_millis(), 206_000);
    }

    #[tokio::test]
    async fn test_store_rejection_does_not_fault_cycle() {
        let mut source = Server::new_async().await;
        let mut store = Server::new_async().await;

        let _source_mock = serve_source(
            &mut source,
            json!({
                "deviceStatuses": [{"timestamp": BASE}],
                "treatments": [{"timestamp": BASE, "eventType": "Correction Bolus"}],
                "currentServerTime": BASE,
                "lastMedicalDeviceDataUpdateServerTime": BASE
            }),
        )
        .await;
        let _entries_mock = serve_entries(&mut store, json!([])).await;
        let _status_post = store
            .mock("POST", "/api/v1/devicestatus.json")
            .with_status(401)
            .create_async()
            .await;
        let treatments_post = store
            .mock("POST", "/api/v1/treatments.json")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let config = config(&source.url(), &store.url(), "");
        let mut poller = http_poller(&config);
        let report = poller.run_cycle().await;

        treatments_post.assert_async().await;
        let CycleOutcome::Completed { uploads, .. } = &report.outcome else {
            panic!("cycle faulted: {:?}", report.outcome);
        };
        assert!(matches!(
            uploads.outcome(StreamKind::DeviceStatus),
            Some(StreamOutcome::Failed { .. })
        ));
        assert_eq!(
            uploads.outcome(StreamKind::Treatments),
            Some(&StreamOutcome::Uploaded { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_failed_entries_fetch_suppresses_samples_only() {
        let mut source = Server::new_async().await;
        let mut store = Server::new_async().await;

        let _source_mock = serve_source(
            &mut source,
            json!({
                "sgs": [
                    {"sg": 110, "datetime": BASE, "trend": "FLAT"},
                    {"sg": 115, "datetime": BASE + FIVE_MIN, "trend": "UP"}
                ],
                "deviceStatuses": [{"timestamp": BASE, "battery": 80}],
                "treatments": [{"timestamp": BASE, "eventType": "Meal Bolus", "insulin": 2.0}],
                "currentServerTime": BASE + FIVE_MIN + 60_000,
                "lastMedicalDeviceDataUpdateServerTime": BASE + FIVE_MIN
            }),
        )
        .await;
        let entries_get = store
            .mock("GET", "/api/v1/entries.json")
            .match_query(Matcher::Any)
            .with_status(500)
            .expect_at_least(1)
            .create_async()
            .await;
        let entries_post = store
            .mock("POST", "/api/v1/entries.json")
            .expect(0)
            .create_async()
            .await;
        let status_post = store
            .mock("POST", "/api/v1/devicestatus.json")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;
        let treatments_post = store
            .mock("POST", "/api/v1/treatments.json")
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let config = config(&source.url(), &store.url(), "");
        let mut poller = http_poller(&config);
        let report = poller.run_cycle().await;

        entries_get.assert_async().await;
        entries_post.assert_async().await;
        status_post.assert_async().await;
        treatments_post.assert_async().await;

        let CycleOutcome::Completed { drift, uploads, .. } = &report.outcome else {
            panic!("cycle faulted: {:?}", report.outcome);
        };
        assert_eq!(*drift, DriftOutcome::InsufficientEvidence { trusted_matches: 0 });
        assert_eq!(uploads.outcome(StreamKind::Samples), Some(&StreamOutcome::Skipped));
        assert_eq!(
            uploads.outcome(StreamKind::Treatments),
            Some(&StreamOutcome::Uploaded { count: 1 })
        );
    }

    #[tokio::test]
    async fn test_unreachable_source_faults_cycle_without_store_calls() {
        let mut source = Server::new_async().await;
        let mut store = Server::new_async().await;

        let _source_mock = source
            .mock("GET", "/connect/data")
            .with_status(500)
            .create_async()
            .await;
        let store_get = store
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let store_post = store
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let config = config(
            &source.url(),
            &store.url(),
            "poll:\n  fallback_interval_ms: 60000",
        );
        let mut poller = http_poller(&config);
        let report = poller.run_cycle().await;

        assert!(report.is_faulted());
        assert_eq!(report.next_delay.as_millis(), 60_000);
        store_get.assert_async().await;
        store_post.assert_async().await;
    }
}

mod drift_tests {
    use super::*;

    struct StaticSource(RawBatch);

    #[async_trait]
    impl SourceClient for StaticSource {
        async fn fetch(&self) -> Result<RawBatch, SourceError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        entries: Vec<Value>,
        uploads: Mutex<Vec<(Endpoint, Vec<Value>)>>,
    }

    #[async_trait]
    impl StoreClient for MemoryStore {
        async fn upload(&self, endpoint: Endpoint, records: Vec<Value>) -> Result<(), StoreError> {
            self.uploads.lock().unwrap().push((endpoint, records));
            Ok(())
        }

        async fn fetch(&self, _: Endpoint, count: usize) -> Result<Vec<Value>, StoreError> {
            Ok(self.entries.iter().take(count).cloned().collect())
        }
    }

    fn source_batch(count: i64) -> RawBatch {
        let sgs: Vec<Value> = (0..count)
            .map(|i| json!({"sg": 100 + i, "datetime": BASE + i * FIVE_MIN, "trend": "FLAT"}))
            .collect();
        serde_json::from_value(json!({
            "sgs": sgs,
            "currentServerTime": BASE + count * FIVE_MIN,
            "lastMedicalDeviceDataUpdateServerTime": BASE + (count - 1) * FIVE_MIN
        }))
        .unwrap()
    }

    fn trusted_entries(count: i64, offset: i64) -> Vec<Value> {
        (0..count)
            .map(|i| {
                json!({
                    "sgv": 100 + i,
                    "date": BASE + i * FIVE_MIN + offset,
                    "device": "xDrip-G6",
                    "type": "sgv"
                })
            })
            .collect()
    }

    fn config_with_trusted_device() -> Config {
        config("http://source.invalid", "https://ns.invalid", "")
    }

    #[tokio::test]
    async fn test_missing_samples_are_shifted_by_estimated_drift() {
        let store = Arc::new(MemoryStore {
            entries: trusted_entries(5, 2_000),
            ..Default::default()
        });
        let source = Arc::new(StaticSource(source_batch(7)));
        let mut poller = Poller::from_config(&config_with_trusted_device(), source, store.clone());

        let report = poller.run_cycle().await;

        let CycleOutcome::Completed { drift, .. } = &report.outcome else {
            panic!("cycle faulted: {:?}", report.outcome);
        };
        assert!(matches!(drift, DriftOutcome::Corrected(e) if e.offset_millis == 2_000));

        let uploads = store.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        let (endpoint, samples) = &uploads[0];
        assert_eq!(*endpoint, Endpoint::Entries);
        let dates: Vec<i64> = samples.iter().map(|s| s["date"].as_i64().unwrap()).collect();
        assert_eq!(
            dates,
            vec![BASE + 5 * FIVE_MIN + 2_000, BASE + 6 * FIVE_MIN + 2_000]
        );
        assert_eq!(samples[1]["direction"], json!("Flat"));
        assert_eq!(samples[1]["device"], json!("connect://paradigm"));
    }

    #[tokio::test]
    async fn test_too_few_trusted_matches_uploads_no_samples() {
        let store = Arc::new(MemoryStore {
            entries: trusted_entries(3, 2_000),
            ..Default::default()
        });
        let source = Arc::new(StaticSource(source_batch(7)));
        let mut poller = Poller::from_config(&config_with_trusted_device(), source, store.clone());

        let report = poller.run_cycle().await;

        let CycleOutcome::Completed { drift, .. } = &report.outcome else {
            panic!("cycle faulted: {:?}", report.outcome);
        };
        assert_eq!(*drift, DriftOutcome::InsufficientEvidence { trusted_matches: 3 });
        assert!(store.uploads.lock().unwrap().is_empty());
    }
}
