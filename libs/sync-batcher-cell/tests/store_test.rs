use std::sync::Arc;
use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use network_monitor_cell::{NetworkMonitorService, ScriptedNetworkProbe};
use shared_utils::test_utils::TestConfig;
use sync_batcher_cell::*;

fn results_for(request: &Request) -> serde_json::Value {
    let encoding = match request.headers.get("content-encoding") {
        Some(_) => PayloadEncoding::Bzip2,
        None => PayloadEncoding::Identity,
    };
    let envelope = decode_batch(&request.body, encoding).unwrap();
    let results: Vec<_> = envelope
        .operations
        .iter()
        .map(|op| json!({ "operation_id": op.operation_id, "status_code": 200 }))
        .collect();
    json!({ "results": results })
}

#[tokio::test]
async fn test_http_store_posts_batch_and_parses_results() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .and(header("apikey", "test-api-key"))
        .and(header("content-type", "application/json"))
        .respond_with(|request: &Request| ResponseTemplate::new(200).set_body_json(results_for(request)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = HttpRecordStore::new(&TestConfig::default().to_app_config(&mock_server.uri())).unwrap();
    let batch = encode_batch(
        vec![BatchOperation::update("Patient", "patient-1", json!({"name": "Ada"})).with_operation_id("op-1")],
        4096,
    )
    .unwrap();

    let results = store.submit_batch(&batch).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].operation_id, "op-1");
    assert!(results[0].is_success());
}

#[tokio::test]
async fn test_http_store_marks_compressed_body() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .and(header("content-encoding", "bzip2"))
        .respond_with(|request: &Request| ResponseTemplate::new(200).set_body_json(results_for(request)))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = HttpRecordStore::new(&TestConfig::default().to_app_config(&mock_server.uri())).unwrap();
    let operations: Vec<_> = (0..50)
        .map(|i| BatchOperation::create("Observation", json!({ "id": format!("obs-{}", i), "value": i })))
        .collect();
    let batch = encode_batch(operations, 256).unwrap();
    assert_eq!(batch.encoding, PayloadEncoding::Bzip2);

    let results = store.submit_batch(&batch).await.unwrap();
    assert_eq!(results.len(), 50);
}

#[tokio::test]
async fn test_http_store_outage_is_store_unavailable() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&mock_server)
        .await;

    let store = HttpRecordStore::new(&TestConfig::default().to_app_config(&mock_server.uri())).unwrap();
    let batch = encode_batch(vec![BatchOperation::delete("Observation", "obs-1")], 4096).unwrap();

    assert_matches!(store.submit_batch(&batch).await, Err(SyncError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_http_store_requires_configuration() {
    let mut app_config = TestConfig::default().to_app_config("http://localhost:1");
    app_config.record_store_url = String::new();

    assert_matches!(HttpRecordStore::new(&app_config), Err(SyncError::NotConfigured));

    let mut app_config = TestConfig::default().to_app_config("http://localhost:1");
    app_config.record_store_api_key = String::new();
    assert_matches!(HttpRecordStore::new(&app_config), Err(SyncError::NotConfigured));
}

#[tokio::test]
async fn test_http_store_ignores_link_endpoint() {
    let mut app_config = TestConfig::default().to_app_config("http://localhost:1");
    app_config.network_probe_url = String::new();

    assert!(HttpRecordStore::new(&app_config).is_ok());
}

#[tokio::test]
async fn test_batcher_retries_missing_results_from_http_store() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "operation_id": "op-a", "status_code": 201 },
                { "operation_id": "op-b", "status_code": 429, "message": "slow down" }
            ]
        })))
        .mount(&mock_server)
        .await;

    let test_config = TestConfig::default();
    let config = test_config.to_telehealth_config();
    let store = Arc::new(HttpRecordStore::new(&test_config.to_app_config(&mock_server.uri())).unwrap());
    let monitor = Arc::new(NetworkMonitorService::new(
        &config,
        Arc::new(ScriptedNetworkProbe::from_bandwidths(&[1500.0])),
    ));
    let batcher = ResourceSyncBatcher::new(&config, store, monitor);

    for op in ["op-a", "op-b", "op-c"] {
        batcher
            .enqueue(BatchOperation::create("Observation", json!({"value": 1})).with_operation_id(op))
            .await;
    }

    let report = batcher.execute_batch().await.unwrap();

    assert_eq!(report.succeeded, vec!["op-a"]);
    assert_eq!(report.requeued, vec!["op-b", "op-c"]);
    assert_eq!(batcher.pending_operation_ids().await, vec!["op-b", "op-c"]);
}
