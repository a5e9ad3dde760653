// libs/consultation-cell/src/services/orchestrator.rs
use chrono::Utc;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use network_monitor_cell::{NetworkEvent, NetworkMonitorService, NetworkStatus};
use shared_config::TelehealthConfig;
use shared_models::{NetworkConditions, QualityTier};
use sync_batcher_cell::{BatchOperation, ResourceSyncBatcher, SyncPriority};

use crate::error::{ConsultationError, TransportError};
use crate::models::{
    ChatMessage, ConsultationMode, ConsultationSession, ConsultationTemplate, FallbackReason,
    OrchestratorStatistics, SessionCounters, SessionEvent, SessionOptions, SessionStatus,
    StepResponse, StructuredConsultation, SwitchReason, TemplateStep,
};
use crate::services::templates::{validate_response, TemplateRegistry};
use crate::services::transport::{ChatTransport, VideoTransport};

const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Owns one consultation at a time: picks the mode, reacts to the monitor
/// and hands encounter data to the batcher.
///
/// Every lifecycle transition (start, switch, fallback, pause/resume) runs
/// under `transitions`, so a manual switch and an automatic fallback never
/// interleave. `end_session` does not take it.
pub struct ConsultationOrchestrator {
    config: TelehealthConfig,
    monitor: Arc<NetworkMonitorService>,
    batcher: Arc<ResourceSyncBatcher>,
    video: Arc<dyn VideoTransport>,
    chat: Arc<dyn ChatTransport>,
    templates: RwLock<TemplateRegistry>,
    state: RwLock<SessionSlot>,
    transitions: Mutex<()>,
    counters: RwLock<SessionCounters>,
    events: broadcast::Sender<SessionEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// Most recent session (possibly finished) and its structured progress
#[derive(Default)]
struct SessionSlot {
    session: Option<ConsultationSession>,
    structured: Option<StructuredConsultation>,
}

impl SessionSlot {
    fn live_mut(&mut self) -> Option<&mut ConsultationSession> {
        self.session.as_mut().filter(|s| s.status.is_live())
    }
}

impl ConsultationOrchestrator {
    pub fn new(
        config: TelehealthConfig,
        monitor: Arc<NetworkMonitorService>,
        batcher: Arc<ResourceSyncBatcher>,
        video: Arc<dyn VideoTransport>,
        chat: Arc<dyn ChatTransport>,
    ) -> Result<Self, ConsultationError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            monitor,
            batcher,
            video,
            chat,
            templates: RwLock::new(TemplateRegistry::with_builtins()),
            state: RwLock::new(SessionSlot::default()),
            transitions: Mutex::new(()),
            counters: RwLock::new(SessionCounters::default()),
            events,
            listener: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Start the monitor and forward its notifications into
    /// [`handle_network_event`](Self::handle_network_event). Idempotent.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut listener = self.listener.lock().await;
            if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
                debug!("Orchestrator already listening to the monitor");
                return;
            }

            let mut receiver = self.monitor.subscribe();
            let orchestrator: Weak<Self> = Arc::downgrade(self);

            *listener = Some(tokio::spawn(async move {
                loop {
                    match receiver.recv().await {
                        Ok(event) => {
                            let Some(orchestrator) = orchestrator.upgrade() else {
                                break;
                            };
                            orchestrator.handle_network_event(event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Orchestrator lagged behind the monitor, skipped {} events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        self.monitor.start().await;
        info!("Consultation orchestrator started");
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        self.monitor.stop().await;
    }

    // ==========================================================================
    // SESSION START
    // ==========================================================================

    /// Start a video consultation. On a link that cannot carry video this
    /// starts a text session instead when fallback is enabled, or fails
    /// without creating anything when it is not.
    #[instrument(skip(self, options), fields(patient = %options.patient_id))]
    pub async fn start_video(&self, options: SessionOptions) -> Result<ConsultationSession, ConsultationError> {
        let enable_fallback = self.fallback_enabled(&options);
        let _transition = self.transitions.lock().await;
        self.ensure_no_live_session().await?;

        if !self.monitor.supports_video(self.config.floors.min_video_tier).await {
            let status = self.monitor.status().await;
            if !enable_fallback {
                warn!(
                    "Refusing video at {} / {:.0} kbps with fallback disabled",
                    status.tier, status.conditions.bandwidth_kbps
                );
                return Err(ConsultationError::NetworkInsufficientForVideo {
                    tier: status.tier,
                    bandwidth_kbps: status.conditions.bandwidth_kbps,
                });
            }

            info!("Link cannot carry video ({}), starting text consultation instead", status.tier);
            return self.open_text_session(options, enable_fallback, None).await;
        }

        let session = self.stage_session(&options, ConsultationMode::Video, enable_fallback, None).await;

        match self.bounded("join", self.video.join(&session)).await {
            Ok(()) => {
                let activated = self.activate(session.id).await;
                if activated.is_err() {
                    self.release_media().await;
                }
                activated
            }
            Err(e) if enable_fallback => {
                warn!("Video join failed ({}), falling back to text", e);
                self.rescue_failed_join(session).await
            }
            Err(e) => {
                error!("Video join failed with fallback disabled: {}", e);
                self.fail_session(session.id).await;
                Err(ConsultationError::VideoJoinFailed(e.to_string()))
            }
        }
    }

    #[instrument(skip(self, options), fields(patient = %options.patient_id))]
    pub async fn start_text(&self, options: SessionOptions) -> Result<ConsultationSession, ConsultationError> {
        let enable_fallback = self.fallback_enabled(&options);
        let _transition = self.transitions.lock().await;
        self.ensure_no_live_session().await?;

        self.open_text_session(options, enable_fallback, None).await
    }

    /// Start a text consultation driven by a template; the first prompt is
    /// delivered over chat straight away
    #[instrument(skip(self, options), fields(patient = %options.patient_id))]
    pub async fn start_structured(
        &self,
        options: SessionOptions,
        template_id: &str,
    ) -> Result<StructuredConsultation, ConsultationError> {
        let template = self.templates.read().await.get(template_id).cloned().ok_or_else(|| {
            ConsultationError::StructuredConsultationFailed(format!("unknown template {}", template_id))
        })?;

        let enable_fallback = self.fallback_enabled(&options);
        let _transition = self.transitions.lock().await;
        self.ensure_no_live_session().await?;

        let session = self
            .open_text_session(options, enable_fallback, Some(template.id.clone()))
            .await
            .map_err(|e| match e {
                ConsultationError::TextConsultationFailed(reason) => {
                    ConsultationError::StructuredConsultationFailed(reason)
                }
                other => other,
            })?;

        let structured = StructuredConsultation::new(session.id, template);
        if let Some(step) = structured.current() {
            self.deliver(ChatMessage::prompt(session.id, step)).await;
        }

        self.state.write().await.structured = Some(structured.clone());
        info!("Structured consultation {} started with template {}", session.id, template_id);
        Ok(structured)
    }

    pub async fn register_template(&self, template: ConsultationTemplate) -> Result<(), ConsultationError> {
        self.templates.write().await.register(template)
    }

    fn fallback_enabled(&self, options: &SessionOptions) -> bool {
        options.enable_fallback.unwrap_or(self.config.session.enable_fallback)
    }

    async fn ensure_no_live_session(&self) -> Result<(), ConsultationError> {
        match self.state.read().await.session.as_ref() {
            Some(existing) if existing.status.is_live() => {
                Err(ConsultationError::SessionAlreadyActive(existing.id))
            }
            _ => Ok(()),
        }
    }

    /// Put a fresh `starting` session in the slot so concurrent callers see it
    async fn stage_session(
        &self,
        options: &SessionOptions,
        mode: ConsultationMode,
        enable_fallback: bool,
        template_id: Option<String>,
    ) -> ConsultationSession {
        let mut session = ConsultationSession::new(options, mode, enable_fallback);
        session.status = SessionStatus::Starting;
        session.template_id = template_id;

        let mut state = self.state.write().await;
        state.session = Some(session.clone());
        state.structured = None;
        session
    }

    async fn open_text_session(
        &self,
        options: SessionOptions,
        enable_fallback: bool,
        template_id: Option<String>,
    ) -> Result<ConsultationSession, ConsultationError> {
        let session = self
            .stage_session(&options, ConsultationMode::Text, enable_fallback, template_id)
            .await;

        if let Err(e) = self.bounded("start_consultation", self.chat.start_consultation(&session)).await {
            error!("Chat transport could not start session {}: {}", session.id, e);
            self.fail_session(session.id).await;
            return Err(ConsultationError::TextConsultationFailed(e.to_string()));
        }

        let activated = self.activate(session.id).await;
        if activated.is_err() {
            self.release_chat().await;
        }
        activated
    }

    /// The call never came up: move straight to text and record why
    async fn rescue_failed_join(&self, session: ConsultationSession) -> Result<ConsultationSession, ConsultationError> {
        if let Err(e) = self.bounded("start_consultation", self.chat.start_consultation(&session)).await {
            error!("Text fallback also failed for session {}: {}", session.id, e);
            self.fail_session(session.id).await;
            return Err(ConsultationError::TextConsultationFailed(e.to_string()));
        }

        let conditions = self.monitor.current_conditions().await;
        let fallback = {
            let mut state = self.state.write().await;
            state.live_mut().map(|live| {
                live.push_fallback(FallbackReason::NetworkFailed, ConsultationMode::Text, conditions)
            })
        };

        let activated = match self.activate(session.id).await {
            Ok(activated) => activated,
            Err(e) => {
                self.release_chat().await;
                return Err(e);
            }
        };
        if let Some(fallback) = fallback {
            self.counters.write().await.fallbacks_triggered += 1;
            self.emit(SessionEvent::FallbackTriggered {
                session_id: session.id,
                fallback,
            });
        }
        Ok(activated)
    }

    /// `starting -> active`, then announce and prime the record cache. Fails
    /// if the session was ended while its transports were coming up; the
    /// caller then owns releasing whatever transport it opened.
    async fn activate(&self, session_id: Uuid) -> Result<ConsultationSession, ConsultationError> {
        let session = {
            let mut state = self.state.write().await;
            match state.session.as_mut() {
                Some(session) if session.id == session_id && session.status == SessionStatus::Starting => {
                    session.status = SessionStatus::Active;
                    session.start_time = Some(Utc::now());
                    session.clone()
                }
                _ => {
                    warn!("Session {} ended before it became active", session_id);
                    return Err(ConsultationError::NoActiveSession);
                }
            }
        };

        self.counters.write().await.sessions_started += 1;
        info!("Session {} active in {} mode", session.id, session.mode);
        self.emit(SessionEvent::SessionStarted {
            session_id: session.id,
            mode: session.mode,
        });

        let batcher = Arc::clone(&self.batcher);
        let resource_types = self.config.session.priming_resource_types.clone();
        let patient_id = session.patient_id.clone();
        tokio::spawn(async move {
            batcher
                .sync_resources(&resource_types, &patient_id, SyncPriority::High)
                .await;
        });

        Ok(session)
    }

    async fn fail_session(&self, session_id: Uuid) {
        {
            let mut state = self.state.write().await;
            if let Some(session) = state.live_mut().filter(|s| s.id == session_id) {
                session.status = SessionStatus::Failed;
                session.end_time = Some(Utc::now());
            }
        }
        self.counters.write().await.sessions_failed += 1;
        self.emit(SessionEvent::SessionEnded {
            session_id,
            status: SessionStatus::Failed,
        });
    }

    // ==========================================================================
    // MODE CHANGES
    // ==========================================================================

    /// Manually change mode. New transports are brought up first so a failure
    /// leaves the session untouched; old ones are released (bounded) before the
    /// new mode becomes current.
    #[instrument(skip(self))]
    pub async fn switch_mode(&self, new_mode: ConsultationMode) -> Result<ConsultationSession, ConsultationError> {
        let _transition = self.transitions.lock().await;

        let session = {
            let state = self.state.read().await;
            let session = state.session.as_ref().filter(|s| s.status.is_live()).ok_or(ConsultationError::NoActiveSession)?;
            if !matches!(session.status, SessionStatus::Active | SessionStatus::Paused) {
                return Err(ConsultationError::InvalidSessionState {
                    status: session.status,
                    operation: "switch mode",
                });
            }
            session.clone()
        };

        let old_mode = session.mode;
        if old_mode == new_mode {
            debug!("Already in {} mode", new_mode);
            return Ok(session);
        }

        self.check_mode_supported(new_mode).await?;

        let switch_failed = |reason: String| ConsultationError::ModeSwitchFailed {
            from: old_mode,
            to: new_mode,
            reason,
        };

        if new_mode.uses_media() && !old_mode.uses_media() {
            self.bounded("join", self.video.join(&session))
                .await
                .map_err(|e| switch_failed(e.to_string()))?;
        }
        if new_mode.uses_chat() && !old_mode.uses_chat() {
            if let Err(e) = self.bounded("start_consultation", self.chat.start_consultation(&session)).await {
                if new_mode.uses_media() && !old_mode.uses_media() {
                    self.release_media().await;
                }
                return Err(switch_failed(e.to_string()));
            }
        }

        if old_mode.uses_media() && !new_mode.uses_media() {
            self.release_media().await;
        }
        if old_mode.uses_chat() && !new_mode.uses_chat() {
            self.release_chat().await;
        }

        let switched = {
            let mut state = self.state.write().await;
            let live = state.live_mut().ok_or(ConsultationError::NoActiveSession)?;
            live.mode = new_mode;
            live.clone()
        };

        self.counters.write().await.manual_switches += 1;
        info!("Session {} switched {} -> {}", switched.id, old_mode, new_mode);
        self.emit(SessionEvent::ModeSwitched {
            session_id: switched.id,
            from: old_mode,
            to: new_mode,
            reason: SwitchReason::Manual,
        });

        Ok(switched)
    }

    async fn check_mode_supported(&self, mode: ConsultationMode) -> Result<(), ConsultationError> {
        let status = self.monitor.status().await;
        match mode {
            ConsultationMode::Video | ConsultationMode::Hybrid => {
                if !self.monitor.supports_video(self.config.floors.min_video_tier).await {
                    return Err(ConsultationError::NetworkInsufficientForVideo {
                        tier: status.tier,
                        bandwidth_kbps: status.conditions.bandwidth_kbps,
                    });
                }
            }
            ConsultationMode::Audio => {
                if !self.monitor.supports_audio().await {
                    return Err(ConsultationError::NetworkInsufficientForMode {
                        mode,
                        tier: status.tier,
                    });
                }
            }
            ConsultationMode::Text => {}
        }
        Ok(())
    }

    /// Drop an active video/hybrid session to text. The session sits in
    /// `active-degrading` while transports are swapped; if it ends meanwhile
    /// the fallback is abandoned and nothing is recorded.
    #[instrument(skip(self, conditions))]
    async fn run_fallback(&self, reason: FallbackReason, conditions: NetworkConditions) {
        let _transition = self.transitions.lock().await;

        let session = {
            let mut state = self.state.write().await;
            let Some(live) = state.live_mut() else {
                return;
            };
            if live.status != SessionStatus::Active || !live.mode.falls_back_to_text() {
                return;
            }
            if !live.enable_fallback {
                warn!("Session {} is on a degraded link but fallback is disabled", live.id);
                return;
            }
            live.status = SessionStatus::Degrading;
            live.clone()
        };

        warn!(
            "Falling back to text for session {} ({:?}, {:.0} kbps)",
            session.id, reason, conditions.bandwidth_kbps
        );

        if !session.mode.uses_chat() {
            if let Err(e) = self.bounded("start_consultation", self.chat.start_consultation(&session)).await {
                error!("Text fallback failed for session {}, staying on {}: {}", session.id, session.mode, e);
                let mut state = self.state.write().await;
                if let Some(live) = state.live_mut().filter(|s| s.status == SessionStatus::Degrading) {
                    live.status = SessionStatus::Active;
                }
                return;
            }
        }

        self.release_media().await;

        let fallback = {
            let mut state = self.state.write().await;
            match state.live_mut() {
                Some(live) if live.status == SessionStatus::Degrading => {
                    live.status = SessionStatus::Active;
                    Some(live.push_fallback(reason, ConsultationMode::Text, conditions))
                }
                _ => None,
            }
        };

        let Some(fallback) = fallback else {
            debug!("Session {} ended during fallback", session.id);
            return;
        };

        self.counters.write().await.fallbacks_triggered += 1;
        self.deliver(ChatMessage::notice(
            session.id,
            "Connection quality dropped; the consultation continues over text.",
        ))
        .await;

        self.emit(SessionEvent::ModeSwitched {
            session_id: session.id,
            from: fallback.from_mode,
            to: fallback.to_mode,
            reason: SwitchReason::Fallback,
        });
        self.emit(SessionEvent::FallbackTriggered {
            session_id: session.id,
            fallback,
        });
    }

    // ==========================================================================
    // PAUSE / RESUME / END
    // ==========================================================================

    pub async fn pause_session(&self) -> Result<ConsultationSession, ConsultationError> {
        let _transition = self.transitions.lock().await;
        let mut state = self.state.write().await;
        let live = state.live_mut().ok_or(ConsultationError::NoActiveSession)?;

        if live.status != SessionStatus::Active {
            return Err(ConsultationError::InvalidSessionState {
                status: live.status,
                operation: "pause",
            });
        }

        live.status = SessionStatus::Paused;
        info!("Session {} paused", live.id);
        Ok(live.clone())
    }

    /// Resume a paused session. A video session resumed onto a link that can
    /// no longer carry video falls back straight away.
    pub async fn resume_session(&self) -> Result<ConsultationSession, ConsultationError> {
        let resumed = {
            let _transition = self.transitions.lock().await;
            let mut state = self.state.write().await;
            let live = state.live_mut().ok_or(ConsultationError::NoActiveSession)?;

            if live.status != SessionStatus::Paused {
                return Err(ConsultationError::InvalidSessionState {
                    status: live.status,
                    operation: "resume",
                });
            }

            live.status = SessionStatus::Active;
            info!("Session {} resumed", live.id);
            live.clone()
        };

        if resumed.mode.falls_back_to_text()
            && !self.monitor.supports_video(self.config.floors.min_video_tier).await
        {
            let tier = self.monitor.current_tier().await;
            let reason = if tier.is_connected() {
                FallbackReason::NetworkPoor
            } else {
                FallbackReason::NetworkFailed
            };
            self.run_fallback(reason, self.monitor.current_conditions().await).await;
        }

        self.get_current_session().await.ok_or(ConsultationError::NoActiveSession)
    }

    /// End the live session. Safe to call repeatedly or while a fallback or
    /// flush is in flight: returns the finished session the first time and
    /// `None` afterwards.
    #[instrument(skip(self))]
    pub async fn end_session(&self) -> Option<ConsultationSession> {
        let (ended, structured) = {
            let mut state = self.state.write().await;
            let live = state.live_mut()?;
            live.status = SessionStatus::Ended;
            live.end_time = Some(Utc::now());
            let ended = live.clone();
            (ended, state.structured.clone())
        };

        info!("Session {} ended after {}s", ended.id, ended.duration_secs().unwrap_or_default());
        self.counters.write().await.sessions_ended += 1;
        self.emit(SessionEvent::SessionEnded {
            session_id: ended.id,
            status: SessionStatus::Ended,
        });

        let media = async {
            if ended.mode.uses_media() {
                self.release_media().await;
            }
        };
        let chat = async {
            if ended.mode.uses_chat() {
                self.release_chat().await;
            }
        };
        futures::future::join(media, chat).await;

        let summary = encounter_summary(&ended, structured.as_ref());
        self.batcher
            .enqueue(
                BatchOperation::create("Encounter", summary)
                    .with_operation_id(format!("encounter-summary-{}", ended.id)),
            )
            .await;

        let flush_timeout = self.config.session.final_flush_timeout();
        match timeout(flush_timeout, self.batcher.flush_pending()).await {
            Ok(report) => debug!(
                "Final flush for {}: {} sent, {} still queued",
                ended.id, report.succeeded, report.remaining
            ),
            Err(_) => warn!(
                "Final flush for session {} timed out after {}ms; operations stay queued",
                ended.id,
                flush_timeout.as_millis()
            ),
        }

        Some(ended)
    }

    // ==========================================================================
    // STRUCTURED STEPS
    // ==========================================================================

    /// Record the answer to the current step and advance
    pub async fn record_step_response(
        &self,
        step_id: &str,
        response: StepResponse,
    ) -> Result<StructuredConsultation, ConsultationError> {
        let (progress, next_prompt) = {
            let mut state = self.state.write().await;
            let step = Self::current_step(&mut state, step_id)?;
            validate_response(&step, &response)?;

            let structured = state.structured.as_mut().ok_or(ConsultationError::NoActiveSession)?;
            structured.advance(step.id, Some(response));
            (structured.clone(), structured.current().cloned())
        };

        self.after_step(&progress, next_prompt).await;
        Ok(progress)
    }

    /// Skip the current step; only optional steps may be skipped
    pub async fn skip_step(&self) -> Result<StructuredConsultation, ConsultationError> {
        let (progress, next_prompt) = {
            let mut state = self.state.write().await;
            let current_id = state
                .structured
                .as_ref()
                .and_then(|s| s.current())
                .map(|step| step.id.clone())
                .unwrap_or_default();
            let step = Self::current_step(&mut state, &current_id)?;

            if step.required {
                return Err(ConsultationError::InvalidStepResponse {
                    step_id: step.id,
                    reason: "required steps cannot be skipped".to_string(),
                });
            }

            let structured = state.structured.as_mut().ok_or(ConsultationError::NoActiveSession)?;
            structured.advance(step.id, None);
            (structured.clone(), structured.current().cloned())
        };

        self.after_step(&progress, next_prompt).await;
        Ok(progress)
    }

    pub async fn get_structured(&self) -> Option<StructuredConsultation> {
        self.state.read().await.structured.clone()
    }

    fn current_step(state: &mut SessionSlot, step_id: &str) -> Result<TemplateStep, ConsultationError> {
        let live = state.live_mut().ok_or(ConsultationError::NoActiveSession)?;
        if !matches!(live.status, SessionStatus::Active | SessionStatus::Degrading) {
            return Err(ConsultationError::InvalidSessionState {
                status: live.status,
                operation: "record a step",
            });
        }

        let structured = state
            .structured
            .as_ref()
            .ok_or_else(|| ConsultationError::StructuredConsultationFailed("session has no template".to_string()))?;
        let step = structured.current().ok_or_else(|| ConsultationError::InvalidStepResponse {
            step_id: step_id.to_string(),
            reason: "template already finished".to_string(),
        })?;

        if step.id != step_id {
            return Err(ConsultationError::InvalidStepResponse {
                step_id: step_id.to_string(),
                reason: format!("expected a response for step {}", step.id),
            });
        }
        Ok(step.clone())
    }

    async fn after_step(&self, progress: &StructuredConsultation, next: Option<TemplateStep>) {
        match next {
            Some(step) => self.deliver(ChatMessage::prompt(progress.session_id, &step)).await,
            None if progress.is_complete() => {
                info!("Structured consultation {} complete", progress.session_id);
            }
            None => {}
        }
    }

    // ==========================================================================
    // NETWORK REACTIONS
    // ==========================================================================

    /// React to one monitor notification. Tier drops to `poor` (or
    /// `disconnected`) trigger fallback; bandwidth moves retune the call and
    /// the batcher.
    pub async fn handle_network_event(&self, event: NetworkEvent) {
        match event {
            NetworkEvent::TierChanged {
                previous,
                current,
                conditions,
            } => {
                // reconnect replay runs on its own task
                let _ = self.batcher.on_tier_changed(previous, current);
                self.record_tier_change(previous, current).await;

                let reason = match current {
                    QualityTier::Poor => Some(FallbackReason::NetworkPoor),
                    QualityTier::Disconnected => Some(FallbackReason::NetworkFailed),
                    _ => None,
                };
                if let Some(reason) = reason {
                    self.run_fallback(reason, conditions).await;
                }
            }
            NetworkEvent::BandwidthChanged { conditions, .. } => {
                self.batcher.tune_for_bandwidth(conditions.bandwidth_kbps);
                self.adapt_media(&conditions).await;
            }
        }
    }

    async fn record_tier_change(&self, previous: QualityTier, current: QualityTier) {
        let mut state = self.state.write().await;
        let Some(live) = state.live_mut() else {
            return;
        };

        if current < previous {
            live.metrics.degradation_count += 1;
        }
        if current == QualityTier::Disconnected {
            live.metrics.interruption_count += 1;
        }
    }

    async fn adapt_media(&self, conditions: &NetworkConditions) {
        let in_call = {
            let mut state = self.state.write().await;
            match state.live_mut() {
                Some(live) => {
                    live.metrics.record_bandwidth(conditions.bandwidth_kbps);
                    live.mode.uses_media() && live.status != SessionStatus::Degrading
                }
                None => false,
            }
        };

        if !in_call {
            return;
        }

        if let Err(e) = self.bounded("adjust_quality", self.video.adjust_quality(conditions)).await {
            warn!("Video transport could not adjust quality: {}", e);
        }

        let loss = self.video.current_metrics().await.and_then(|m| m.packet_loss_pct);
        self.monitor.record_transport_loss(loss).await;
    }

    // ==========================================================================
    // ACCESSORS
    // ==========================================================================

    pub async fn get_network_status(&self) -> NetworkStatus {
        self.monitor.status().await
    }

    pub async fn get_current_session(&self) -> Option<ConsultationSession> {
        self.state.read().await.session.clone()
    }

    pub async fn get_statistics(&self) -> OrchestratorStatistics {
        OrchestratorStatistics {
            counters: self.counters.read().await.clone(),
            current_tier: self.monitor.current_tier().await,
            network: self.monitor.status().await,
            sync: self.batcher.get_statistics().await,
        }
    }

    // ==========================================================================
    // TRANSPORT HELPERS
    // ==========================================================================

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        let limit = self.config.session.transport_timeout();
        timeout(limit, call).await.map_err(|_| TransportError::Timeout {
            operation,
            timeout_ms: limit.as_millis() as u64,
        })?
    }

    /// Leave the call; a slow or failing leave is abandoned, not retried
    async fn release_media(&self) {
        if let Err(e) = self.bounded("leave", self.video.leave()).await {
            warn!("Abandoning video leave: {}", e);
        }
    }

    async fn release_chat(&self) {
        if let Err(e) = self.bounded("end_consultation", self.chat.end_consultation()).await {
            warn!("Abandoning chat shutdown: {}", e);
        }
    }

    async fn deliver(&self, message: ChatMessage) {
        if let Err(e) = self.bounded("deliver", self.chat.deliver(message)).await {
            warn!("Chat message not delivered: {}", e);
        }
    }
}

/// Clinical-record payload written once when a session ends
fn encounter_summary(session: &ConsultationSession, structured: Option<&StructuredConsultation>) -> Value {
    let mut summary = json!({
        "id": format!("encounter-{}", session.id),
        "session_id": session.id,
        "status": "finished",
        "subject": session.patient_id,
        "participant": session.provider_id,
        "consultation_type": session.consultation_type,
        "final_mode": session.mode,
        "period": {
            "start": session.start_time,
            "end": session.end_time,
        },
        "quality": session.metrics,
        "fallback_events": session.fallback_events,
    });

    if let Some(structured) = structured.filter(|s| s.session_id == session.id) {
        summary["structured"] = json!({
            "template_id": structured.template.id,
            "completed": structured.is_complete(),
            "responses": structured.responses,
        });
    }

    summary
}
