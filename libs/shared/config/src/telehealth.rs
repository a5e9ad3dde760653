// libs/shared/config/src/telehealth.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use shared_models::QualityTier;

use crate::error::ConfigError;

/// Tunables for the monitor, the orchestrator and the batcher.
///
/// Defaults are usable as-is; `from_env` layers `TELEHEALTH_*` overrides on top
/// and `validate` must pass before any component is constructed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelehealthConfig {
    pub monitor: MonitorSettings,
    pub thresholds: TierThresholds,
    pub floors: ModeFloors,
    pub batch: BatchSettings,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    pub sampling_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Number of recent samples used to derive stability and fallback loss
    pub variance_window: usize,
    /// Minimum relative move (percent) before `bandwidth-changed` fires again
    pub bandwidth_change_pct: f64,
    pub probe_payload_bytes: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            sampling_interval_ms: 5_000,
            probe_timeout_ms: 2_000,
            variance_window: 10,
            bandwidth_change_pct: 10.0,
            probe_payload_bytes: 64 * 1024,
        }
    }
}

impl MonitorSettings {
    pub fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Band edges for classification. A value sitting exactly on an edge
/// belongs to the worse tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierThresholds {
    pub poor_max_kbps: f64,
    pub fair_max_kbps: f64,
    pub good_max_kbps: f64,

    pub good_min_loss_pct: f64,
    pub fair_min_loss_pct: f64,
    pub poor_min_loss_pct: f64,

    pub excellent_max_rtt_ms: f64,
    pub good_max_rtt_ms: f64,
    pub fair_max_rtt_ms: f64,

    pub excellent_min_stability: f64,
    pub good_min_stability: f64,
    pub fair_min_stability: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            poor_max_kbps: 400.0,
            fair_max_kbps: 1_000.0,
            good_max_kbps: 2_500.0,
            good_min_loss_pct: 2.0,
            fair_min_loss_pct: 5.0,
            poor_min_loss_pct: 10.0,
            excellent_max_rtt_ms: 100.0,
            good_max_rtt_ms: 250.0,
            fair_max_rtt_ms: 500.0,
            excellent_min_stability: 80.0,
            good_min_stability: 60.0,
            fair_min_stability: 40.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeFloors {
    pub min_video_kbps: f64,
    pub min_audio_kbps: f64,
    pub min_text_kbps: f64,
    pub min_video_tier: QualityTier,
}

impl Default for ModeFloors {
    fn default() -> Self {
        Self {
            min_video_kbps: 400.0,
            min_audio_kbps: 64.0,
            min_text_kbps: 8.0,
            min_video_tier: QualityTier::Fair,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub min_batch_size: usize,
    pub low_bandwidth_kbps: f64,
    pub medium_bandwidth_kbps: f64,
    pub compression_threshold_bytes: usize,
    pub offline_queue_capacity: usize,
    pub max_retries: u32,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            min_batch_size: 5,
            low_bandwidth_kbps: 256.0,
            medium_bandwidth_kbps: 1_000.0,
            compression_threshold_bytes: 4 * 1024,
            offline_queue_capacity: 1_000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    pub enable_fallback: bool,
    pub transport_timeout_ms: u64,
    pub final_flush_timeout_ms: u64,
    pub priming_resource_types: Vec<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            transport_timeout_ms: 10_000,
            final_flush_timeout_ms: 5_000,
            priming_resource_types: vec![
                "Patient".to_string(),
                "Condition".to_string(),
                "MedicationStatement".to_string(),
                "AllergyIntolerance".to_string(),
            ],
        }
    }
}

impl SessionSettings {
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    pub fn final_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.final_flush_timeout_ms)
    }
}

impl TelehealthConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        env_override("TELEHEALTH_MONITOR_INTERVAL_MS", &mut config.monitor.sampling_interval_ms);
        env_override("TELEHEALTH_PROBE_TIMEOUT_MS", &mut config.monitor.probe_timeout_ms);
        env_override("TELEHEALTH_POOR_MAX_KBPS", &mut config.thresholds.poor_max_kbps);
        env_override("TELEHEALTH_FAIR_MAX_KBPS", &mut config.thresholds.fair_max_kbps);
        env_override("TELEHEALTH_GOOD_MAX_KBPS", &mut config.thresholds.good_max_kbps);
        env_override("TELEHEALTH_MIN_VIDEO_KBPS", &mut config.floors.min_video_kbps);
        env_override("TELEHEALTH_MIN_VIDEO_TIER", &mut config.floors.min_video_tier);
        env_override("TELEHEALTH_MAX_BATCH_SIZE", &mut config.batch.max_batch_size);
        env_override("TELEHEALTH_MIN_BATCH_SIZE", &mut config.batch.min_batch_size);
        env_override(
            "TELEHEALTH_COMPRESSION_THRESHOLD_BYTES",
            &mut config.batch.compression_threshold_bytes,
        );
        env_override("TELEHEALTH_OFFLINE_QUEUE_CAPACITY", &mut config.batch.offline_queue_capacity);
        env_override("TELEHEALTH_ENABLE_FALLBACK", &mut config.session.enable_fallback);

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.monitor.sampling_interval_ms == 0 {
            return Err(invalid("monitor.sampling_interval_ms", "must be greater than zero"));
        }
        if self.monitor.probe_timeout_ms == 0 {
            return Err(invalid("monitor.probe_timeout_ms", "must be greater than zero"));
        }
        if self.monitor.variance_window == 0 {
            return Err(invalid("monitor.variance_window", "must hold at least one sample"));
        }

        let t = &self.thresholds;
        if !(t.poor_max_kbps > 0.0 && t.poor_max_kbps < t.fair_max_kbps && t.fair_max_kbps < t.good_max_kbps) {
            return Err(invalid("thresholds.*_max_kbps", "bandwidth bands must be positive and strictly increasing"));
        }
        if !(t.good_min_loss_pct < t.fair_min_loss_pct && t.fair_min_loss_pct < t.poor_min_loss_pct) {
            return Err(invalid("thresholds.*_min_loss_pct", "loss bands must be strictly increasing"));
        }
        if !(t.excellent_max_rtt_ms <= t.good_max_rtt_ms && t.good_max_rtt_ms <= t.fair_max_rtt_ms) {
            return Err(invalid("thresholds.*_max_rtt_ms", "rtt ceilings must not decrease toward worse tiers"));
        }
        if !(t.excellent_min_stability >= t.good_min_stability && t.good_min_stability >= t.fair_min_stability) {
            return Err(invalid("thresholds.*_min_stability", "stability floors must not increase toward worse tiers"));
        }

        if self.floors.min_video_tier == QualityTier::Disconnected {
            return Err(invalid("floors.min_video_tier", "video cannot run while disconnected"));
        }

        let b = &self.batch;
        if b.min_batch_size == 0 {
            return Err(invalid("batch.min_batch_size", "must be greater than zero"));
        }
        if b.min_batch_size > b.max_batch_size {
            return Err(invalid("batch.min_batch_size", "must not exceed batch.max_batch_size"));
        }
        if b.offline_queue_capacity == 0 {
            return Err(invalid("batch.offline_queue_capacity", "must be greater than zero"));
        }
        if b.low_bandwidth_kbps >= b.medium_bandwidth_kbps {
            return Err(invalid("batch.low_bandwidth_kbps", "must be below batch.medium_bandwidth_kbps"));
        }

        Ok(())
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn env_override<T: FromStr>(key: &str, target: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => warn!("Ignoring unparsable value for {}: {}", key, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        assert!(TelehealthConfig::default().validate().is_ok());
    }

    #[test]
    fn unordered_bandwidth_bands_are_rejected() {
        let mut config = TelehealthConfig::default();
        config.thresholds.fair_max_kbps = 300.0;

        assert_matches!(config.validate(), Err(ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn batch_floor_above_ceiling_is_rejected() {
        let mut config = TelehealthConfig::default();
        config.batch.min_batch_size = 80;

        assert_matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "batch.min_batch_size"
        );
    }

    #[test]
    fn env_override_keeps_default_on_garbage() {
        let mut value: u64 = 5_000;
        std::env::set_var("TELEHEALTH_TEST_GARBAGE", "not-a-number");
        env_override("TELEHEALTH_TEST_GARBAGE", &mut value);
        assert_eq!(value, 5_000);

        std::env::set_var("TELEHEALTH_TEST_GARBAGE", "250");
        env_override("TELEHEALTH_TEST_GARBAGE", &mut value);
        assert_eq!(value, 250);
    }
}
