// libs/shared/models/src/network.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==============================================================================
// NETWORK CONDITION MODELS
// ==============================================================================

/// Physical link the device is currently using
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    #[serde(rename = "wifi")]
    Wifi,
    #[serde(rename = "cellular")]
    Cellular,
    #[serde(rename = "ethernet")]
    Ethernet,
    #[serde(rename = "unknown")]
    #[default]
    Unknown,
}

/// Snapshot of the link as of the last sampling cycle.
/// Always represents "now"; there is no identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConditions {
    pub bandwidth_kbps: f64,
    pub rtt_ms: f64,
    pub packet_loss_pct: f64,
    /// 0-100, higher is steadier
    pub stability: f64,
    pub connection_type: ConnectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
    pub sampled_at: DateTime<Utc>,
}

impl NetworkConditions {
    pub fn new(bandwidth_kbps: f64, rtt_ms: f64, packet_loss_pct: f64) -> Self {
        Self {
            bandwidth_kbps,
            rtt_ms,
            packet_loss_pct,
            stability: 100.0,
            connection_type: ConnectionType::Unknown,
            signal_strength: None,
            sampled_at: Utc::now(),
        }
    }

    /// Sample recorded when the probe could not reach the network at all
    pub fn disconnected() -> Self {
        Self {
            bandwidth_kbps: 0.0,
            rtt_ms: 0.0,
            packet_loss_pct: 100.0,
            stability: 0.0,
            connection_type: ConnectionType::Unknown,
            signal_strength: None,
            sampled_at: Utc::now(),
        }
    }

    pub fn with_stability(mut self, stability: f64) -> Self {
        self.stability = stability.clamp(0.0, 100.0);
        self
    }

    pub fn with_connection_type(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn is_disconnected(&self) -> bool {
        self.bandwidth_kbps <= 0.0 || self.packet_loss_pct >= 100.0
    }
}

/// Discrete classification of link quality.
///
/// Variants are declared worst-first so the derived ordering reads naturally:
/// `QualityTier::Poor < QualityTier::Good`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityTier {
    #[serde(rename = "disconnected")]
    Disconnected,
    #[serde(rename = "poor")]
    Poor,
    #[serde(rename = "fair")]
    Fair,
    #[serde(rename = "good")]
    Good,
    #[serde(rename = "excellent")]
    Excellent,
}

impl QualityTier {
    /// One tier worse, never dropping below `Poor`
    pub fn downgraded(self) -> Self {
        match self {
            QualityTier::Excellent => QualityTier::Good,
            QualityTier::Good => QualityTier::Fair,
            QualityTier::Fair | QualityTier::Poor => QualityTier::Poor,
            QualityTier::Disconnected => QualityTier::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self != QualityTier::Disconnected
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QualityTier::Disconnected => "disconnected",
            QualityTier::Poor => "poor",
            QualityTier::Fair => "fair",
            QualityTier::Good => "good",
            QualityTier::Excellent => "excellent",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnected" => Ok(QualityTier::Disconnected),
            "poor" => Ok(QualityTier::Poor),
            "fair" => Ok(QualityTier::Fair),
            "good" => Ok(QualityTier::Good),
            "excellent" => Ok(QualityTier::Excellent),
            other => Err(format!("unknown quality tier '{}'", other)),
        }
    }
}
