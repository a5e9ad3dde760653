use thiserror::Error;
use uuid::Uuid;

use shared_config::ConfigError;
use shared_models::QualityTier;

use crate::models::{ConsultationMode, SessionStatus};

#[derive(Error, Debug)]
pub enum ConsultationError {
    #[error("Configuration invalid: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Network insufficient for video: tier {tier}, {bandwidth_kbps:.0} kbps")]
    NetworkInsufficientForVideo { tier: QualityTier, bandwidth_kbps: f64 },

    #[error("Network insufficient for {mode} mode: tier {tier}")]
    NetworkInsufficientForMode { mode: ConsultationMode, tier: QualityTier },

    #[error("Mode switch from {from} to {to} failed: {reason}")]
    ModeSwitchFailed {
        from: ConsultationMode,
        to: ConsultationMode,
        reason: String,
    },

    #[error("Video join failed: {0}")]
    VideoJoinFailed(String),

    #[error("Text consultation failed: {0}")]
    TextConsultationFailed(String),

    #[error("Structured consultation failed: {0}")]
    StructuredConsultationFailed(String),

    #[error("Session {0} is already active")]
    SessionAlreadyActive(Uuid),

    #[error("No active session")]
    NoActiveSession,

    #[error("Cannot {operation} while session is {status}")]
    InvalidSessionState {
        status: SessionStatus,
        operation: &'static str,
    },

    #[error("Invalid response for step {step_id}: {reason}")]
    InvalidStepResponse { step_id: String, reason: String },
}

impl ConsultationError {
    /// Stable machine-readable code for callers and UI layers
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_INVALID",
            Self::NetworkInsufficientForVideo { .. } => "NETWORK_INSUFFICIENT_FOR_VIDEO",
            Self::NetworkInsufficientForMode { .. } => "NETWORK_INSUFFICIENT_FOR_MODE",
            Self::ModeSwitchFailed { .. } => "MODE_SWITCH_FAILED",
            Self::VideoJoinFailed(_) => "VIDEO_JOIN_FAILED",
            Self::TextConsultationFailed(_) => "TEXT_CONSULTATION_FAILED",
            Self::StructuredConsultationFailed(_) => "STRUCTURED_CONSULTATION_FAILED",
            Self::SessionAlreadyActive(_) => "SESSION_ALREADY_ACTIVE",
            Self::NoActiveSession => "NO_ACTIVE_SESSION",
            Self::InvalidSessionState { .. } => "INVALID_SESSION_STATE",
            Self::InvalidStepResponse { .. } => "INVALID_STEP_RESPONSE",
        }
    }
}

/// Failures reported by the video or chat transport
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Transport {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: &'static str, timeout_ms: u64 },

    #[error("Transport rejected request: {0}")]
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = ConsultationError::NetworkInsufficientForVideo {
            tier: QualityTier::Poor,
            bandwidth_kbps: 200.0,
        };
        assert_eq!(err.code(), "NETWORK_INSUFFICIENT_FOR_VIDEO");
        assert!(err.to_string().contains("200 kbps"));

        let err: ConsultationError = ConfigError::MissingValue {
            key: "RECORD_STORE_URL".to_string(),
        }
        .into();
        assert_eq!(err.code(), "CONFIGURATION_INVALID");
    }
}
