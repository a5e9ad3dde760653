use std::env;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, Context};
use dotenv::dotenv;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use consultation_cell::{
    ConsultationOrchestrator, SessionOptions, SimulatedChatTransport, SimulatedVideoTransport,
};
use network_monitor_cell::{
    HttpNetworkProbe, NetworkMonitorService, NetworkProbe, ProbeSample, ScriptStep, ScriptedNetworkProbe,
};
use shared_config::{AppConfig, TelehealthConfig};
use sync_batcher_cell::{ClinicalRecordStore, HttpRecordStore, InMemoryRecordStore, ResourceSyncBatcher};

const DEFAULT_SCRIPT: &str = "1500,1500,300";

/// `"1500, fail, 300"` -> one probe step per entry
fn parse_script(raw: &str) -> anyhow::Result<Vec<ScriptStep>> {
    let steps = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry.eq_ignore_ascii_case("fail") {
                return Ok(ScriptStep::Fail);
            }
            let kbps: f64 = entry
                .parse()
                .with_context(|| format!("bad bandwidth entry '{}' in SIM_BANDWIDTH_SCRIPT", entry))?;
            Ok(ScriptStep::Sample(ProbeSample::new(kbps, 40.0).with_loss(0.0)))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    if steps.is_empty() {
        return Err(anyhow!("SIM_BANDWIDTH_SCRIPT has no entries"));
    }
    Ok(steps)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting telehealth session simulator");

    let app_config = AppConfig::from_env();
    let config = TelehealthConfig::from_env();
    config.validate()?;

    let script = parse_script(&env::var("SIM_BANDWIDTH_SCRIPT").unwrap_or_else(|_| DEFAULT_SCRIPT.into()))?;
    let cycles = script.len() as u32;

    let probe: Arc<dyn NetworkProbe> = if app_config.is_probe_configured() {
        info!("Probing {}", app_config.network_probe_url);
        Arc::new(HttpNetworkProbe::new(&app_config, &config.monitor)?)
    } else {
        info!("Replaying a {} step bandwidth script", cycles);
        Arc::new(ScriptedNetworkProbe::new(script))
    };

    let store: Arc<dyn ClinicalRecordStore> = if app_config.is_record_store_configured() {
        Arc::new(HttpRecordStore::new(&app_config)?)
    } else {
        warn!("No record store configured, syncing to memory");
        Arc::new(InMemoryRecordStore::new())
    };

    let monitor = Arc::new(NetworkMonitorService::new(&config, probe));
    let batcher = Arc::new(ResourceSyncBatcher::new(&config, store, monitor.clone()));
    let sampling_interval = config.monitor.sampling_interval();
    let orchestrator = Arc::new(ConsultationOrchestrator::new(
        config,
        monitor.clone(),
        batcher,
        Arc::new(SimulatedVideoTransport::new()),
        Arc::new(SimulatedChatTransport::new()),
    )?);

    orchestrator.start().await;

    tokio::time::timeout(sampling_interval * 4 + Duration::from_secs(5), async {
        while !monitor.status().await.sampled {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .context("network monitor never produced a sample")?;

    let session = orchestrator
        .start_video(SessionOptions::new("sim-patient", "sim-provider"))
        .await?;
    info!("Session {} started in {} mode", session.id, session.mode);

    // let the rest of the script play out
    tokio::time::sleep(sampling_interval * (cycles + 1)).await;

    let ended = orchestrator.end_session().await;
    let statistics = orchestrator.get_statistics().await;
    orchestrator.stop().await;

    let report = json!({
        "session": ended,
        "statistics": statistics,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
