use std::sync::Arc;
use std::time::Duration;
use assert_matches::assert_matches;

use network_monitor_cell::*;
use shared_models::QualityTier;
use shared_utils::test_utils::TestConfig;

fn monitor_with(probe: ScriptedNetworkProbe) -> Arc<NetworkMonitorService> {
    let config = TestConfig::default().to_telehealth_config();
    Arc::new(NetworkMonitorService::new(&config, Arc::new(probe)))
}

#[tokio::test]
async fn test_pessimistic_default_before_first_sample() {
    let monitor = monitor_with(ScriptedNetworkProbe::from_bandwidths(&[1500.0]));

    assert_eq!(monitor.current_tier().await, QualityTier::Poor);
    assert!(!monitor.supports_video(QualityTier::Fair).await);

    let status = monitor.status().await;
    assert!(!status.sampled);
    assert_eq!(status.tier, QualityTier::Poor);
}

#[tokio::test]
async fn test_first_sample_emits_tier_and_bandwidth_change() {
    let monitor = monitor_with(ScriptedNetworkProbe::from_bandwidths(&[1500.0]));
    let mut events = monitor.subscribe();

    let conditions = monitor.sample_now().await;
    assert_eq!(conditions.bandwidth_kbps, 1500.0);
    assert_eq!(monitor.current_tier().await, QualityTier::Good);
    assert!(monitor.supports_video(QualityTier::Fair).await);
    assert!(monitor.supports_audio().await);

    assert_matches!(
        events.try_recv(),
        Ok(NetworkEvent::TierChanged { previous: QualityTier::Poor, current: QualityTier::Good, .. })
    );
    assert_matches!(
        events.try_recv(),
        Ok(NetworkEvent::BandwidthChanged { previous_kbps: None, .. })
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_degrading_bandwidth_script() {
    let monitor = monitor_with(ScriptedNetworkProbe::from_bandwidths(&[1500.0, 1500.0, 300.0]));
    let mut events = monitor.subscribe();

    monitor.sample_now().await;
    while events.try_recv().is_ok() {}

    // unchanged sample: nothing to report
    monitor.sample_now().await;
    assert!(events.try_recv().is_err());

    monitor.sample_now().await;
    assert_matches!(
        events.try_recv(),
        Ok(NetworkEvent::TierChanged { previous: QualityTier::Good, current: QualityTier::Poor, .. })
    );
    assert_matches!(
        events.try_recv(),
        Ok(NetworkEvent::BandwidthChanged { previous_kbps: Some(p), .. }) if p == 1500.0
    );
    assert!(!monitor.supports_video(QualityTier::Fair).await);
}

#[tokio::test]
async fn test_small_bandwidth_wobble_is_not_reported() {
    let monitor = monitor_with(ScriptedNetworkProbe::from_bandwidths(&[1500.0, 1560.0]));
    let mut events = monitor.subscribe();

    monitor.sample_now().await;
    while events.try_recv().is_ok() {}

    monitor.sample_now().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_failed_probe_is_a_disconnected_sample() {
    let probe = ScriptedNetworkProbe::new(vec![
        ScriptStep::Sample(ProbeSample::new(1500.0, 40.0).with_loss(0.0)),
        ScriptStep::Fail,
    ]);
    let monitor = monitor_with(probe);

    monitor.sample_now().await;
    let conditions = monitor.sample_now().await;

    assert!(conditions.is_disconnected());
    assert_eq!(monitor.current_tier().await, QualityTier::Disconnected);
    assert!(!monitor.supports_audio().await);
    assert_eq!(monitor.sample_counts().await, (2, 1));
}

#[tokio::test]
async fn test_slow_probe_times_out_as_disconnected() {
    let probe = ScriptedNetworkProbe::new(vec![ScriptStep::Stall(
        Duration::from_secs(5),
        ProbeSample::new(1500.0, 40.0),
    )]);
    let monitor = monitor_with(probe);

    let conditions = monitor.sample_now().await;

    assert!(conditions.is_disconnected());
    assert_eq!(monitor.current_tier().await, QualityTier::Disconnected);
}

#[tokio::test]
async fn test_transport_loss_feeds_classification() {
    let probe = ScriptedNetworkProbe::new(vec![ScriptStep::Sample(ProbeSample::new(5000.0, 40.0))]);
    let monitor = monitor_with(probe);

    monitor.record_transport_loss(Some(12.0)).await;
    let conditions = monitor.sample_now().await;

    assert_eq!(conditions.packet_loss_pct, 12.0);
    assert_eq!(monitor.current_tier().await, QualityTier::Poor);
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_is_repeatable() {
    let monitor = monitor_with(ScriptedNetworkProbe::from_bandwidths(&[1500.0]));
    let mut events = monitor.subscribe();

    monitor.start().await;
    monitor.start().await;
    assert!(monitor.is_running().await);

    let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("sampling loop should emit")
        .expect("channel open");
    assert_matches!(event, NetworkEvent::TierChanged { current: QualityTier::Good, .. });

    monitor.stop().await;
    monitor.stop().await;
    assert!(!monitor.is_running().await);
}
