#![allow(dead_code)]

use std::sync::Arc;
use tokio::sync::broadcast;

use consultation_cell::*;
use network_monitor_cell::{NetworkEvent, NetworkMonitorService, ProbeSample, ScriptStep, ScriptedNetworkProbe};
use shared_utils::test_utils::TestConfig;
use sync_batcher_cell::{InMemoryRecordStore, ResourceSyncBatcher};

pub struct Harness {
    pub orchestrator: Arc<ConsultationOrchestrator>,
    pub monitor: Arc<NetworkMonitorService>,
    pub batcher: Arc<ResourceSyncBatcher>,
    pub store: Arc<InMemoryRecordStore>,
    pub video: Arc<SimulatedVideoTransport>,
    pub chat: Arc<SimulatedChatTransport>,
    network_events: broadcast::Receiver<NetworkEvent>,
}

impl Harness {
    /// One monitor cycle, with every notification it produced handled
    pub async fn tick(&mut self) {
        self.monitor.sample_now().await;
        while let Ok(event) = self.network_events.try_recv() {
            self.orchestrator.handle_network_event(event).await;
        }
    }

    pub async fn session(&self) -> ConsultationSession {
        self.orchestrator
            .get_current_session()
            .await
            .expect("a session should exist")
    }
}

pub fn options() -> SessionOptions {
    SessionOptions::new("patient-1", "provider-1")
}

/// Clean link at each bandwidth; the probe reports no loss of its own
pub fn clean(kbps: f64) -> ScriptStep {
    ScriptStep::Sample(ProbeSample::new(kbps, 40.0).with_loss(0.0))
}

/// Sample without probe-side loss, so transport-reported loss applies
pub fn lossless_unknown(kbps: f64) -> ScriptStep {
    ScriptStep::Sample(ProbeSample::new(kbps, 40.0))
}

pub fn harness(bandwidths: &[f64]) -> Harness {
    harness_with(TestConfig::default(), bandwidths.iter().map(|&kbps| clean(kbps)).collect())
}

pub fn harness_with(test_config: TestConfig, steps: Vec<ScriptStep>) -> Harness {
    let config = test_config.to_telehealth_config();

    let monitor = Arc::new(NetworkMonitorService::new(
        &config,
        Arc::new(ScriptedNetworkProbe::new(steps)),
    ));
    let store = Arc::new(InMemoryRecordStore::new());
    let batcher = Arc::new(ResourceSyncBatcher::new(&config, store.clone(), monitor.clone()));
    let video = Arc::new(SimulatedVideoTransport::new());
    let chat = Arc::new(SimulatedChatTransport::new());
    let network_events = monitor.subscribe();

    let orchestrator = Arc::new(
        ConsultationOrchestrator::new(
            config,
            monitor.clone(),
            batcher.clone(),
            video.clone(),
            chat.clone(),
        )
        .expect("test config is valid"),
    );

    Harness {
        orchestrator,
        monitor,
        batcher,
        store,
        video,
        chat,
        network_events,
    }
}
