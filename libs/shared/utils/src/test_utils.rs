use shared_config::{AppConfig, TelehealthConfig};
use shared_models::{NetworkConditions, QualityTier};

/// Builder for configs used across cell tests: fast intervals, short timeouts
pub struct TestConfig {
    pub sampling_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub poor_max_kbps: f64,
    pub min_video_tier: QualityTier,
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub compression_threshold_bytes: usize,
    pub offline_queue_capacity: usize,
    pub max_retries: u32,
    pub enable_fallback: bool,
    pub transport_timeout_ms: u64,
    pub final_flush_timeout_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 20,
            probe_timeout_ms: 100,
            poor_max_kbps: 400.0,
            min_video_tier: QualityTier::Fair,
            max_batch_size: 20,
            min_batch_size: 5,
            compression_threshold_bytes: 4 * 1024,
            offline_queue_capacity: 100,
            max_retries: 3,
            enable_fallback: true,
            transport_timeout_ms: 200,
            final_flush_timeout_ms: 500,
        }
    }
}

impl TestConfig {
    pub fn to_telehealth_config(&self) -> TelehealthConfig {
        let mut config = TelehealthConfig::default();

        config.monitor.sampling_interval_ms = self.sampling_interval_ms;
        config.monitor.probe_timeout_ms = self.probe_timeout_ms;
        config.thresholds.poor_max_kbps = self.poor_max_kbps;
        config.floors.min_video_kbps = self.poor_max_kbps;
        config.floors.min_video_tier = self.min_video_tier;
        config.batch.max_batch_size = self.max_batch_size;
        config.batch.min_batch_size = self.min_batch_size;
        config.batch.compression_threshold_bytes = self.compression_threshold_bytes;
        config.batch.offline_queue_capacity = self.offline_queue_capacity;
        config.batch.max_retries = self.max_retries;
        config.session.enable_fallback = self.enable_fallback;
        config.session.transport_timeout_ms = self.transport_timeout_ms;
        config.session.final_flush_timeout_ms = self.final_flush_timeout_ms;
        config.session.priming_resource_types =
            vec!["Condition".to_string(), "MedicationStatement".to_string()];

        config
    }

    pub fn to_app_config(&self, base_url: &str) -> AppConfig {
        AppConfig {
            record_store_url: base_url.to_string(),
            record_store_api_key: "test-api-key".to_string(),
            record_store_auth_token: Some("test-token".to_string()),
            network_probe_url: base_url.to_string(),
        }
    }
}

/// Clean link at the given bandwidth: 40 ms RTT, no loss
pub fn conditions(bandwidth_kbps: f64) -> NetworkConditions {
    NetworkConditions::new(bandwidth_kbps, 40.0, 0.0)
}

pub fn conditions_with(bandwidth_kbps: f64, rtt_ms: f64, packet_loss_pct: f64) -> NetworkConditions {
    NetworkConditions::new(bandwidth_kbps, rtt_ms, packet_loss_pct)
}
