// libs/network-monitor-cell/src/services/probe.rs
use async_trait::async_trait;
use reqwest::Client;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use shared_config::{AppConfig, MonitorSettings};

use crate::error::MonitorError;
use crate::models::ProbeSample;

/// One measurement of the link. Implementations may block on I/O; the monitor
/// bounds every call with its probe timeout.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn sample(&self) -> Result<ProbeSample, MonitorError>;
}

// ==============================================================================
// HTTP PROBE
// ==============================================================================

/// Probes a known endpoint: RTT from a timed `GET /ping`, bandwidth from a
/// timed download of `GET /payload?bytes=N`.
#[derive(Debug)]
pub struct HttpNetworkProbe {
    client: Client,
    base_url: String,
    payload_bytes: usize,
}

impl HttpNetworkProbe {
    pub fn new(config: &AppConfig, settings: &MonitorSettings) -> Result<Self, MonitorError> {
        config.validate_probe().map_err(|err| {
            warn!("Link endpoint unusable: {}", err);
            MonitorError::NotConfigured
        })?;

        let client = Client::builder()
            .timeout(settings.probe_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url: config.network_probe_url.trim_end_matches('/').to_string(),
            payload_bytes: settings.probe_payload_bytes,
        })
    }

    async fn measure_rtt(&self) -> Result<f64, MonitorError> {
        let url = format!("{}/ping", self.base_url);
        let started = Instant::now();

        let response = self.client.get(&url).send().await?;
        let elapsed = started.elapsed();

        if !response.status().is_success() {
            return Err(MonitorError::ProbeFailed(format!(
                "ping returned HTTP {}",
                response.status()
            )));
        }

        Ok(elapsed.as_secs_f64() * 1000.0)
    }

    async fn measure_bandwidth(&self) -> Result<f64, MonitorError> {
        let url = format!("{}/payload?bytes={}", self.base_url, self.payload_bytes);
        let started = Instant::now();

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MonitorError::ProbeFailed(format!(
                "payload returned HTTP {}",
                response.status()
            )));
        }
        let body = response.bytes().await?;
        let elapsed_ms = (started.elapsed().as_secs_f64() * 1000.0).max(0.001);

        // bits per millisecond == kilobits per second
        Ok((body.len() as f64 * 8.0) / elapsed_ms)
    }
}

#[async_trait]
impl NetworkProbe for HttpNetworkProbe {
    async fn sample(&self) -> Result<ProbeSample, MonitorError> {
        let rtt_ms = self.measure_rtt().await?;
        let bandwidth_kbps = self.measure_bandwidth().await?;

        debug!("HTTP probe: {:.0} kbps, {:.1} ms", bandwidth_kbps, rtt_ms);
        Ok(ProbeSample::new(bandwidth_kbps, rtt_ms))
    }
}

// ==============================================================================
// SCRIPTED PROBE
// ==============================================================================

/// A single step of a [`ScriptedNetworkProbe`] replay
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Sample(ProbeSample),
    /// The probe cannot reach anything
    Fail,
    /// Sleep before answering, to exercise the monitor's timeout
    Stall(Duration, ProbeSample),
}

/// Replays a fixed sequence of samples, repeating the last step once the
/// script runs out. Used by the simulator binary and by tests.
pub struct ScriptedNetworkProbe {
    steps: Mutex<VecDeque<ScriptStep>>,
    last: Mutex<Option<ScriptStep>>,
}

impl ScriptedNetworkProbe {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(None),
        }
    }

    /// Clean link at each bandwidth: 40 ms RTT, no loss
    pub fn from_bandwidths(bandwidths: &[f64]) -> Self {
        Self::new(
            bandwidths
                .iter()
                .map(|&kbps| ScriptStep::Sample(ProbeSample::new(kbps, 40.0).with_loss(0.0)))
                .collect(),
        )
    }

    pub fn push(&self, step: ScriptStep) -> Result<(), MonitorError> {
        self.steps
            .lock()
            .map_err(|_| MonitorError::ProbeFailed("script lock poisoned".to_string()))?
            .push_back(step);
        Ok(())
    }

    fn next_step(&self) -> Result<Option<ScriptStep>, MonitorError> {
        let poisoned = || MonitorError::ProbeFailed("script lock poisoned".to_string());

        let next = self.steps.lock().map_err(|_| poisoned())?.pop_front();
        let mut last = self.last.lock().map_err(|_| poisoned())?;
        match next {
            Some(step) => {
                *last = Some(step.clone());
                Ok(Some(step))
            }
            None => Ok(last.clone()),
        }
    }
}

#[async_trait]
impl NetworkProbe for ScriptedNetworkProbe {
    async fn sample(&self) -> Result<ProbeSample, MonitorError> {
        match self.next_step()? {
            Some(ScriptStep::Sample(sample)) => Ok(sample),
            Some(ScriptStep::Stall(delay, sample)) => {
                tokio::time::sleep(delay).await;
                Ok(sample)
            }
            Some(ScriptStep::Fail) => Err(MonitorError::ProbeFailed("scripted outage".to_string())),
            None => Err(MonitorError::ProbeFailed("empty probe script".to_string())),
        }
    }
}
