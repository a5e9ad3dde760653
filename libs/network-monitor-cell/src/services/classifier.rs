// libs/network-monitor-cell/src/services/classifier.rs
use shared_config::TierThresholds;
use shared_models::{NetworkConditions, QualityTier};

/// Maps a conditions snapshot onto a quality tier.
///
/// Bandwidth and packet loss are classified independently and the worse of the
/// two wins. When both agree, RTT and stability break the tie: failing either
/// ceiling for that tier drops the result one step (never below `Poor`).
/// Values on a band edge fall into the worse tier.
#[derive(Debug, Clone)]
pub struct QualityClassifier {
    thresholds: TierThresholds,
}

impl QualityClassifier {
    pub fn new(thresholds: TierThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }

    pub fn classify(&self, conditions: &NetworkConditions) -> QualityTier {
        if conditions.is_disconnected() {
            return QualityTier::Disconnected;
        }

        let bandwidth_tier = self.bandwidth_tier(conditions.bandwidth_kbps);
        let loss_tier = self.loss_tier(conditions.packet_loss_pct);
        let tier = bandwidth_tier.min(loss_tier);

        if bandwidth_tier == loss_tier && self.fails_tie_breakers(tier, conditions) {
            tier.downgraded()
        } else {
            tier
        }
    }

    fn bandwidth_tier(&self, kbps: f64) -> QualityTier {
        let t = &self.thresholds;
        if kbps <= t.poor_max_kbps {
            QualityTier::Poor
        } else if kbps <= t.fair_max_kbps {
            QualityTier::Fair
        } else if kbps <= t.good_max_kbps {
            QualityTier::Good
        } else {
            QualityTier::Excellent
        }
    }

    fn loss_tier(&self, loss_pct: f64) -> QualityTier {
        let t = &self.thresholds;
        if loss_pct >= t.poor_min_loss_pct {
            QualityTier::Poor
        } else if loss_pct >= t.fair_min_loss_pct {
            QualityTier::Fair
        } else if loss_pct >= t.good_min_loss_pct {
            QualityTier::Good
        } else {
            QualityTier::Excellent
        }
    }

    fn fails_tie_breakers(&self, tier: QualityTier, conditions: &NetworkConditions) -> bool {
        let t = &self.thresholds;
        let (max_rtt, min_stability) = match tier {
            QualityTier::Excellent => (t.excellent_max_rtt_ms, t.excellent_min_stability),
            QualityTier::Good => (t.good_max_rtt_ms, t.good_min_stability),
            QualityTier::Fair => (t.fair_max_rtt_ms, t.fair_min_stability),
            QualityTier::Poor | QualityTier::Disconnected => return false,
        };

        conditions.rtt_ms > max_rtt || conditions.stability < min_stability
    }
}
