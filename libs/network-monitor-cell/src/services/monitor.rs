// libs/network-monitor-cell/src/services/monitor.rs
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use shared_config::{ModeFloors, MonitorSettings, TelehealthConfig, TierThresholds};
use shared_models::{NetworkConditions, QualityTier};

use crate::models::{NetworkEvent, NetworkStatus, ProbeSample};
use crate::services::classifier::QualityClassifier;
use crate::services::probe::NetworkProbe;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Periodically samples the link and broadcasts tier/bandwidth changes.
///
/// All state lives on the instance; two monitors never share anything.
pub struct NetworkMonitorService {
    settings: MonitorSettings,
    floors: ModeFloors,
    classifier: QualityClassifier,
    probe: Arc<dyn NetworkProbe>,
    state: RwLock<MonitorState>,
    events: broadcast::Sender<NetworkEvent>,
    sampler: Mutex<Option<JoinHandle<()>>>,
}

struct MonitorState {
    current: Option<NetworkConditions>,
    tier: QualityTier,
    last_notified_kbps: Option<f64>,
    rtt_window: VecDeque<f64>,
    outcome_window: VecDeque<bool>,
    transport_loss_pct: Option<f64>,
    samples_taken: u64,
    failed_samples: u64,
}

impl NetworkMonitorService {
    pub fn new(config: &TelehealthConfig, probe: Arc<dyn NetworkProbe>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            settings: config.monitor.clone(),
            floors: config.floors.clone(),
            classifier: QualityClassifier::new(config.thresholds.clone()),
            probe,
            state: RwLock::new(MonitorState {
                current: None,
                tier: QualityTier::Poor,
                last_notified_kbps: None,
                rtt_window: VecDeque::new(),
                outcome_window: VecDeque::new(),
                transport_loss_pct: None,
                samples_taken: 0,
                failed_samples: 0,
            }),
            events,
            sampler: Mutex::new(None),
        }
    }

    /// Begin periodic sampling. A second call while running does nothing.
    pub async fn start(self: &Arc<Self>) {
        let mut sampler = self.sampler.lock().await;
        if sampler.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Network monitor already running");
            return;
        }

        let period = self.settings.sampling_interval();
        let monitor: Weak<Self> = Arc::downgrade(self);

        *sampler = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.sample_now().await;
            }
        }));

        info!("Network monitor started ({}ms interval)", period.as_millis());
    }

    /// Halt sampling; safe to call repeatedly
    pub async fn stop(&self) {
        if let Some(handle) = self.sampler.lock().await.take() {
            handle.abort();
            info!("Network monitor stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.sampler
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.events.subscribe()
    }

    /// Run one sampling cycle immediately and return the resulting snapshot
    #[instrument(skip(self))]
    pub async fn sample_now(&self) -> NetworkConditions {
        let probe_timeout = self.settings.probe_timeout();

        let sample = match timeout(probe_timeout, self.probe.sample()).await {
            Ok(Ok(sample)) => Some(sample),
            Ok(Err(e)) => {
                warn!("Network probe failed, recording disconnected sample: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Network probe timed out after {}ms, recording disconnected sample",
                    probe_timeout.as_millis()
                );
                None
            }
        };

        let (conditions, events) = {
            let mut state = self.state.write().await;
            self.record_sample(&mut state, sample)
        };

        for event in events {
            // no subscribers is fine
            let _ = self.events.send(event);
        }

        conditions
    }

    fn record_sample(
        &self,
        state: &mut MonitorState,
        sample: Option<ProbeSample>,
    ) -> (NetworkConditions, Vec<NetworkEvent>) {
        state.samples_taken += 1;
        push_bounded(&mut state.outcome_window, sample.is_some(), self.settings.variance_window);

        let conditions = match sample {
            Some(sample) => {
                push_bounded(&mut state.rtt_window, sample.rtt_ms, self.settings.variance_window);

                let loss = sample
                    .packet_loss_pct
                    .or(state.transport_loss_pct)
                    .unwrap_or_else(|| failure_ratio(&state.outcome_window) * 100.0);

                NetworkConditions {
                    bandwidth_kbps: sample.bandwidth_kbps,
                    rtt_ms: sample.rtt_ms,
                    packet_loss_pct: loss.clamp(0.0, 100.0),
                    stability: stability_from_rtt(&state.rtt_window),
                    connection_type: sample.connection_type,
                    signal_strength: sample.signal_strength,
                    sampled_at: chrono::Utc::now(),
                }
            }
            None => {
                state.failed_samples += 1;
                NetworkConditions::disconnected()
            }
        };

        let tier = self.classifier.classify(&conditions);
        debug!(
            "Sampled {:.0} kbps / {:.0} ms / {:.1}% loss / stability {:.0} -> {}",
            conditions.bandwidth_kbps,
            conditions.rtt_ms,
            conditions.packet_loss_pct,
            conditions.stability,
            tier
        );

        let mut events = Vec::new();

        if tier != state.tier {
            info!("Network quality tier changed: {} -> {}", state.tier, tier);
            events.push(NetworkEvent::TierChanged {
                previous: state.tier,
                current: tier,
                conditions: conditions.clone(),
            });
            state.tier = tier;
        }

        if self.bandwidth_moved(state.last_notified_kbps, conditions.bandwidth_kbps) {
            events.push(NetworkEvent::BandwidthChanged {
                previous_kbps: state.last_notified_kbps,
                conditions: conditions.clone(),
            });
            state.last_notified_kbps = Some(conditions.bandwidth_kbps);
        }

        state.current = Some(conditions.clone());
        (conditions, events)
    }

    fn bandwidth_moved(&self, last: Option<f64>, now: f64) -> bool {
        match last {
            None => true,
            Some(last) => {
                let base = last.abs().max(1.0);
                ((now - last).abs() / base) * 100.0 > self.settings.bandwidth_change_pct
            }
        }
    }

    /// Loss observed by the media transport; preferred over the window estimate
    /// for samples whose probe cannot see loss itself.
    pub async fn record_transport_loss(&self, packet_loss_pct: Option<f64>) {
        self.state.write().await.transport_loss_pct = packet_loss_pct;
    }

    /// Last sampled snapshot, or the pessimistic default before the first cycle
    pub async fn current_conditions(&self) -> NetworkConditions {
        self.state
            .read()
            .await
            .current
            .clone()
            .unwrap_or_else(|| pessimistic_conditions(self.classifier.thresholds()))
    }

    pub async fn current_tier(&self) -> QualityTier {
        self.state.read().await.tier
    }

    pub async fn supports_video(&self, minimum_tier: QualityTier) -> bool {
        let (tier, conditions) = self.snapshot().await;
        tier >= minimum_tier.max(QualityTier::Poor)
            && conditions.bandwidth_kbps >= self.floors.min_video_kbps
    }

    pub async fn supports_audio(&self) -> bool {
        let (tier, conditions) = self.snapshot().await;
        tier.is_connected() && conditions.bandwidth_kbps >= self.floors.min_audio_kbps
    }

    pub async fn status(&self) -> NetworkStatus {
        let sampled = self.state.read().await.current.is_some();
        let (tier, conditions) = self.snapshot().await;

        NetworkStatus {
            supports_video: self.supports_video(self.floors.min_video_tier).await,
            supports_audio: self.supports_audio().await,
            conditions,
            tier,
            sampled,
        }
    }

    pub async fn sample_counts(&self) -> (u64, u64) {
        let state = self.state.read().await;
        (state.samples_taken, state.failed_samples)
    }

    pub fn floors(&self) -> &ModeFloors {
        &self.floors
    }

    async fn snapshot(&self) -> (QualityTier, NetworkConditions) {
        let state = self.state.read().await;
        let conditions = state
            .current
            .clone()
            .unwrap_or_else(|| pessimistic_conditions(self.classifier.thresholds()));
        (state.tier, conditions)
    }
}

/// Stand-in used before any sample exists; classifies as `poor`
fn pessimistic_conditions(thresholds: &TierThresholds) -> NetworkConditions {
    NetworkConditions::new(
        thresholds.poor_max_kbps,
        thresholds.fair_max_rtt_ms,
        thresholds.fair_min_loss_pct,
    )
    .with_stability(thresholds.fair_min_stability)
}

fn push_bounded<T>(window: &mut VecDeque<T>, value: T, capacity: usize) {
    window.push_back(value);
    while window.len() > capacity {
        window.pop_front();
    }
}

fn failure_ratio(outcomes: &VecDeque<bool>) -> f64 {
    if outcomes.is_empty() {
        return 0.0;
    }
    let failures = outcomes.iter().filter(|ok| !**ok).count();
    failures as f64 / outcomes.len() as f64
}

/// 100 minus the coefficient of variation of recent RTTs, as a percentage
fn stability_from_rtt(rtts: &VecDeque<f64>) -> f64 {
    if rtts.len() < 2 {
        return 100.0;
    }

    let n = rtts.len() as f64;
    let mean = rtts.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 100.0;
    }

    let variance = rtts.iter().map(|rtt| (rtt - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    (100.0 * (1.0 - cv)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_rtt_is_fully_stable() {
        let window: VecDeque<f64> = vec![50.0, 50.0, 50.0].into();
        assert_eq!(stability_from_rtt(&window), 100.0);
    }

    #[test]
    fn jittery_rtt_lowers_stability() {
        let window: VecDeque<f64> = vec![20.0, 180.0, 30.0, 170.0].into();
        assert!(stability_from_rtt(&window) < 40.0);
    }

    #[test]
    fn failure_ratio_counts_failed_samples() {
        let outcomes: VecDeque<bool> = vec![true, false, true, true].into();
        assert_eq!(failure_ratio(&outcomes), 0.25);
    }

    #[test]
    fn pessimistic_default_classifies_as_poor() {
        let thresholds = TierThresholds::default();
        let classifier = QualityClassifier::new(thresholds.clone());
        assert_eq!(classifier.classify(&pessimistic_conditions(&thresholds)), QualityTier::Poor);
    }
}
