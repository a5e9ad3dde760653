use std::sync::Arc;
use assert_matches::assert_matches;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use network_monitor_cell::*;
use shared_models::QualityTier;
use shared_utils::test_utils::TestConfig;

#[tokio::test]
async fn test_http_probe_measures_rtt_and_bandwidth() {
    let mock_server = MockServer::start().await;
    let mut settings = TestConfig::default().to_telehealth_config().monitor;
    settings.probe_timeout_ms = 2_000;

    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/payload"))
        .and(query_param("bytes", settings.probe_payload_bytes.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; settings.probe_payload_bytes]))
        .mount(&mock_server)
        .await;

    let app_config = TestConfig::default().to_app_config(&mock_server.uri());
    let probe = HttpNetworkProbe::new(&app_config, &settings).unwrap();

    let sample = probe.sample().await.unwrap();
    assert!(sample.bandwidth_kbps > 0.0);
    assert!(sample.rtt_ms >= 0.0);
    assert_eq!(sample.packet_loss_pct, None);
}

#[tokio::test]
async fn test_http_probe_requires_endpoint() {
    let settings = TestConfig::default().to_telehealth_config().monitor;
    let mut app_config = TestConfig::default().to_app_config("http://localhost:1");
    app_config.network_probe_url = String::new();

    assert_matches!(
        HttpNetworkProbe::new(&app_config, &settings),
        Err(MonitorError::NotConfigured)
    );
}

#[tokio::test]
async fn test_http_link_sampler_ignores_record_store_settings() {
    let settings = TestConfig::default().to_telehealth_config().monitor;
    let mut app_config = TestConfig::default().to_app_config("http://localhost:1");
    app_config.record_store_url = String::new();
    app_config.record_store_api_key = String::new();

    assert!(HttpNetworkProbe::new(&app_config, &settings).is_ok());
}

#[tokio::test]
async fn test_unreachable_probe_endpoint_yields_disconnected_tier() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let mut config = TestConfig::default().to_telehealth_config();
    config.monitor.probe_timeout_ms = 2_000;
    let app_config = TestConfig::default().to_app_config(&mock_server.uri());
    let probe = HttpNetworkProbe::new(&app_config, &config.monitor).unwrap();
    let monitor = NetworkMonitorService::new(&config, Arc::new(probe));

    monitor.sample_now().await;

    assert_eq!(monitor.current_tier().await, QualityTier::Disconnected);
}
