// libs/network-monitor-cell/src/models.rs
use serde::{Deserialize, Serialize};

use shared_models::{ConnectionType, NetworkConditions, QualityTier};

/// Raw measurement produced by one probe cycle, before derivation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeSample {
    pub bandwidth_kbps: f64,
    pub rtt_ms: f64,
    /// Present only when the probe itself can observe loss
    pub packet_loss_pct: Option<f64>,
    pub connection_type: ConnectionType,
    pub signal_strength: Option<i32>,
}

impl ProbeSample {
    pub fn new(bandwidth_kbps: f64, rtt_ms: f64) -> Self {
        Self {
            bandwidth_kbps,
            rtt_ms,
            packet_loss_pct: None,
            connection_type: ConnectionType::Unknown,
            signal_strength: None,
        }
    }

    pub fn with_loss(mut self, packet_loss_pct: f64) -> Self {
        self.packet_loss_pct = Some(packet_loss_pct);
        self
    }
}

/// Notifications broadcast by the monitor
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum NetworkEvent {
    TierChanged {
        previous: QualityTier,
        current: QualityTier,
        conditions: NetworkConditions,
    },
    BandwidthChanged {
        previous_kbps: Option<f64>,
        conditions: NetworkConditions,
    },
}

impl NetworkEvent {
    pub fn conditions(&self) -> &NetworkConditions {
        match self {
            NetworkEvent::TierChanged { conditions, .. } => conditions,
            NetworkEvent::BandwidthChanged { conditions, .. } => conditions,
        }
    }
}

/// Read-only view handed to callers asking "what is the network doing"
#[derive(Debug, Clone, Serialize)]
pub struct NetworkStatus {
    pub conditions: NetworkConditions,
    pub tier: QualityTier,
    pub supports_video: bool,
    pub supports_audio: bool,
    /// False until the first sampling cycle has completed
    pub sampled: bool,
}
