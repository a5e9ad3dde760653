// libs/consultation-cell/src/services/transport.rs
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use shared_models::NetworkConditions;

use crate::error::TransportError;
use crate::models::{ChatMessage, ConsultationSession, TransportMetrics};

/// Media transport for video and audio calls. Every call may block on the
/// network; the orchestrator bounds them with its transport timeout.
#[async_trait]
pub trait VideoTransport: Send + Sync {
    async fn join(&self, session: &ConsultationSession) -> Result<(), TransportError>;

    async fn leave(&self) -> Result<(), TransportError>;

    /// Retarget resolution/bitrate for the given link
    async fn adjust_quality(&self, conditions: &NetworkConditions) -> Result<(), TransportError>;

    /// `None` when no call is up
    async fn current_metrics(&self) -> Option<TransportMetrics>;
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn start_consultation(&self, session: &ConsultationSession) -> Result<(), TransportError>;

    async fn end_consultation(&self) -> Result<(), TransportError>;

    async fn deliver(&self, message: ChatMessage) -> Result<(), TransportError>;
}

// ==============================================================================
// SIMULATED VIDEO TRANSPORT
// ==============================================================================

#[derive(Default)]
struct VideoState {
    joined: bool,
    failing_joins: u32,
    join_delay: Option<Duration>,
    leave_delay: Option<Duration>,
    metrics: TransportMetrics,
    calls: Vec<String>,
    quality_targets: Vec<f64>,
}

/// In-process stand-in for a WebRTC stack: records every call and derives
/// metrics from the last quality target.
#[derive(Default)]
pub struct SimulatedVideoTransport {
    state: Mutex<VideoState>,
}

impl SimulatedVideoTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` joins fail
    pub async fn fail_next_joins(&self, count: u32) {
        self.state.lock().await.failing_joins = count;
    }

    pub async fn set_join_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.join_delay = delay;
    }

    pub async fn set_leave_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.leave_delay = delay;
    }

    pub async fn set_packet_loss(&self, packet_loss_pct: Option<f64>) {
        self.state.lock().await.metrics.packet_loss_pct = packet_loss_pct;
    }

    pub async fn is_joined(&self) -> bool {
        self.state.lock().await.joined
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Bandwidths passed to `adjust_quality`, in order
    pub async fn quality_targets(&self) -> Vec<f64> {
        self.state.lock().await.quality_targets.clone()
    }
}

#[async_trait]
impl VideoTransport for SimulatedVideoTransport {
    async fn join(&self, session: &ConsultationSession) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.push("join".to_string());
            state.join_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_joins > 0 {
            state.failing_joins -= 1;
            return Err(TransportError::Unavailable("simulated join failure".to_string()));
        }

        state.joined = true;
        state.metrics.frame_rate = 30.0;
        debug!("Simulated video joined for session {}", session.id);
        Ok(())
    }

    async fn leave(&self) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.push("leave".to_string());
            state.leave_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.joined = false;
        state.metrics.frame_rate = 0.0;
        state.metrics.bitrate_kbps = 0.0;
        Ok(())
    }

    async fn adjust_quality(&self, conditions: &NetworkConditions) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.joined {
            return Err(TransportError::Rejected("no call in progress".to_string()));
        }

        state.calls.push("adjust_quality".to_string());
        state.quality_targets.push(conditions.bandwidth_kbps);
        // leave headroom for audio and signalling
        state.metrics.bitrate_kbps = conditions.bandwidth_kbps * 0.8;
        state.metrics.rtt_ms = Some(conditions.rtt_ms);
        state.metrics.frame_rate = if conditions.bandwidth_kbps < 1_000.0 { 15.0 } else { 30.0 };
        Ok(())
    }

    async fn current_metrics(&self) -> Option<TransportMetrics> {
        let state = self.state.lock().await;
        state.joined.then(|| state.metrics.clone())
    }
}

// ==============================================================================
// SIMULATED CHAT TRANSPORT
// ==============================================================================

#[derive(Default)]
struct ChatState {
    active: bool,
    failing_starts: u32,
    start_delay: Option<Duration>,
    calls: Vec<String>,
    delivered: Vec<ChatMessage>,
}

#[derive(Default)]
pub struct SimulatedChatTransport {
    state: Mutex<ChatState>,
}

impl SimulatedChatTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_next_starts(&self, count: u32) {
        self.state.lock().await.failing_starts = count;
    }

    pub async fn set_start_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.start_delay = delay;
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    pub async fn delivered(&self) -> Vec<ChatMessage> {
        self.state.lock().await.delivered.clone()
    }
}

#[async_trait]
impl ChatTransport for SimulatedChatTransport {
    async fn start_consultation(&self, session: &ConsultationSession) -> Result<(), TransportError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.calls.push("start_consultation".to_string());
            state.start_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if state.failing_starts > 0 {
            state.failing_starts -= 1;
            return Err(TransportError::Unavailable("simulated chat outage".to_string()));
        }

        state.active = true;
        debug!("Simulated chat opened for session {}", session.id);
        Ok(())
    }

    async fn end_consultation(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        state.calls.push("end_consultation".to_string());
        state.active = false;
        Ok(())
    }

    async fn deliver(&self, message: ChatMessage) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if !state.active {
            return Err(TransportError::Rejected("chat not started".to_string()));
        }
        state.delivered.push(message);
        Ok(())
    }
}
