// libs/consultation-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use network_monitor_cell::NetworkStatus;
use shared_models::{NetworkConditions, QualityTier};
use sync_batcher_cell::SyncStatistics;

// ==============================================================================
// SESSION DOMAIN MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConsultationMode {
    #[serde(rename = "video")]
    Video,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "hybrid")]
    Hybrid, // Video with a chat side channel
}

impl ConsultationMode {
    /// Modes carried by the video transport (audio-only calls included)
    pub fn uses_media(&self) -> bool {
        matches!(self, Self::Video | Self::Audio | Self::Hybrid)
    }

    pub fn uses_chat(&self) -> bool {
        matches!(self, Self::Text | Self::Hybrid)
    }

    /// Modes that drop to text automatically when the link degrades
    pub fn falls_back_to_text(&self) -> bool {
        matches!(self, Self::Video | Self::Hybrid)
    }
}

impl fmt::Display for ConsultationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Text => "text",
            Self::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionStatus {
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "active")]
    Active,
    /// Active, with an automatic fallback underway. Nothing else may
    /// transition the session until it returns to `active`.
    #[serde(rename = "active-degrading")]
    Degrading,
    #[serde(rename = "paused")]
    Paused,
    #[serde(rename = "ended")]
    Ended,
    #[serde(rename = "failed")]
    Failed,
}

impl SessionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Active | Self::Degrading | Self::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scheduled => "scheduled",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Degrading => "active-degrading",
            Self::Paused => "paused",
            Self::Ended => "ended",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConsultationType {
    #[serde(rename = "general")]
    #[default]
    General,
    #[serde(rename = "follow_up")]
    FollowUp,
    #[serde(rename = "urgent")]
    Urgent,
    #[serde(rename = "mental_health")]
    MentalHealth,
    #[serde(rename = "specialist")]
    Specialist,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FallbackReason {
    #[serde(rename = "network-poor")]
    NetworkPoor,
    #[serde(rename = "network-failed")]
    NetworkFailed,
    #[serde(rename = "device-issue")]
    DeviceIssue,
    #[serde(rename = "user-preference")]
    UserPreference,
}

/// A one-way move to a lower-bandwidth mode. `from_mode != to_mode` always.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FallbackEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: FallbackReason,
    pub from_mode: ConsultationMode,
    pub to_mode: ConsultationMode,
    pub conditions: NetworkConditions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub average_bandwidth_kbps: f64,
    pub bandwidth_samples: u64,
    /// Drops to `disconnected` while live
    pub interruption_count: u32,
    /// Tier decreases while live
    pub degradation_count: u32,
}

impl QualityMetrics {
    pub fn record_bandwidth(&mut self, bandwidth_kbps: f64) {
        self.bandwidth_samples += 1;
        let n = self.bandwidth_samples as f64;
        self.average_bandwidth_kbps += (bandwidth_kbps - self.average_bandwidth_kbps) / n;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsultationSession {
    pub id: Uuid,
    pub patient_id: String,
    pub provider_id: String,
    pub consultation_type: ConsultationType,
    pub mode: ConsultationMode,
    pub status: SessionStatus,
    pub enable_fallback: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub metrics: QualityMetrics,
    pub fallback_events: Vec<FallbackEvent>,
}

impl ConsultationSession {
    pub fn new(options: &SessionOptions, mode: ConsultationMode, enable_fallback: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            patient_id: options.patient_id.clone(),
            provider_id: options.provider_id.clone(),
            consultation_type: options.consultation_type,
            mode,
            status: SessionStatus::Scheduled,
            enable_fallback,
            template_id: None,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            metrics: QualityMetrics::default(),
            fallback_events: Vec::new(),
        }
    }

    pub fn duration_secs(&self) -> Option<i64> {
        Some((self.end_time? - self.start_time?).num_seconds())
    }

    /// Append a fallback, keeping timestamps strictly increasing
    pub fn push_fallback(
        &mut self,
        reason: FallbackReason,
        to_mode: ConsultationMode,
        conditions: NetworkConditions,
    ) -> FallbackEvent {
        let mut timestamp = Utc::now();
        if let Some(last) = self.fallback_events.last() {
            if timestamp <= last.timestamp {
                timestamp = last.timestamp + chrono::Duration::microseconds(1);
            }
        }

        let event = FallbackEvent {
            timestamp,
            reason,
            from_mode: self.mode,
            to_mode,
            conditions,
        };
        self.fallback_events.push(event.clone());
        self.mode = to_mode;
        event
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOptions {
    pub patient_id: String,
    pub provider_id: String,
    #[serde(default)]
    pub consultation_type: ConsultationType,
    /// Falls back to the configured default when unset
    #[serde(default)]
    pub enable_fallback: Option<bool>,
}

impl SessionOptions {
    pub fn new(patient_id: &str, provider_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            consultation_type: ConsultationType::General,
            enable_fallback: None,
        }
    }

    pub fn with_fallback(mut self, enable_fallback: bool) -> Self {
        self.enable_fallback = Some(enable_fallback);
        self
    }

    pub fn with_type(mut self, consultation_type: ConsultationType) -> Self {
        self.consultation_type = consultation_type;
        self
    }
}

// ==============================================================================
// STRUCTURED CONSULTATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseKind {
    FreeText,
    YesNo,
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    SingleChoice {
        options: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateStep {
    pub id: String,
    pub prompt: String,
    pub required: bool,
    pub kind: ResponseKind,
}

impl TemplateStep {
    pub fn required(id: &str, prompt: &str, kind: ResponseKind) -> Self {
        Self {
            id: id.to_string(),
            prompt: prompt.to_string(),
            required: true,
            kind,
        }
    }

    pub fn optional(id: &str, prompt: &str, kind: ResponseKind) -> Self {
        Self {
            required: false,
            ..Self::required(id, prompt, kind)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsultationTemplate {
    pub id: String,
    pub name: String,
    pub steps: Vec<TemplateStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepResponse {
    Text(String),
    YesNo(bool),
    Number(f64),
    Choice(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordedResponse {
    pub step_id: String,
    /// `None` for a skipped optional step
    pub response: Option<StepResponse>,
    pub recorded_at: DateTime<Utc>,
}

/// A text session bound to a template, advanced one step at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredConsultation {
    pub session_id: Uuid,
    pub template: ConsultationTemplate,
    pub current_step: usize,
    pub responses: Vec<RecordedResponse>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StructuredConsultation {
    pub fn new(session_id: Uuid, template: ConsultationTemplate) -> Self {
        Self {
            session_id,
            template,
            current_step: 0,
            responses: Vec::new(),
            completed_at: None,
        }
    }

    pub fn current(&self) -> Option<&TemplateStep> {
        self.template.steps.get(self.current_step)
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn response_for(&self, step_id: &str) -> Option<&StepResponse> {
        self.responses
            .iter()
            .find(|r| r.step_id == step_id)
            .and_then(|r| r.response.as_ref())
    }

    pub(crate) fn advance(&mut self, step_id: String, response: Option<StepResponse>) {
        let now = Utc::now();
        self.responses.push(RecordedResponse {
            step_id,
            response,
            recorded_at: now,
        });
        self.current_step += 1;

        let answered_all_required = self
            .template
            .steps
            .iter()
            .filter(|s| s.required)
            .all(|s| self.response_for(&s.id).is_some());

        if self.current_step >= self.template.steps.len() && answered_all_required {
            self.completed_at = Some(now);
        }
    }
}

// ==============================================================================
// EVENTS & STATISTICS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SwitchReason {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "fallback")]
    Fallback,
}

/// Notifications broadcast by the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: Uuid,
        mode: ConsultationMode,
    },
    SessionEnded {
        session_id: Uuid,
        status: SessionStatus,
    },
    ModeSwitched {
        session_id: Uuid,
        from: ConsultationMode,
        to: ConsultationMode,
        reason: SwitchReason,
    },
    FallbackTriggered {
        session_id: Uuid,
        fallback: FallbackEvent,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionCounters {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub sessions_failed: u64,
    pub fallbacks_triggered: u64,
    pub manual_switches: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatistics {
    pub counters: SessionCounters,
    pub current_tier: QualityTier,
    pub network: NetworkStatus,
    pub sync: SyncStatistics,
}

/// Per-call figures reported by the video transport
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransportMetrics {
    pub frame_rate: f64,
    pub bitrate_kbps: f64,
    pub packet_loss_pct: Option<f64>,
    pub rtt_ms: Option<f64>,
}

/// Message pushed over the chat transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn notice(session_id: Uuid, body: &str) -> Self {
        Self {
            session_id,
            step_id: None,
            body: body.to_string(),
            sent_at: Utc::now(),
        }
    }

    pub fn prompt(session_id: Uuid, step: &TemplateStep) -> Self {
        Self {
            session_id,
            step_id: Some(step.id.clone()),
            body: step.prompt.clone(),
            sent_at: Utc::now(),
        }
    }
}
