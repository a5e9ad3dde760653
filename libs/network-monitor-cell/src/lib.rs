// libs/network-monitor-cell/src/lib.rs
//! # Network Monitor Cell
//!
//! Samples link conditions on a fixed interval, classifies them into a
//! [`QualityTier`](shared_models::QualityTier) and broadcasts a typed
//! [`NetworkEvent`] whenever the tier or the bandwidth moves.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Network Monitor Cell                |
//! +-----------------------------------------------------+
//! |  models.rs        |  Probe samples, events, status  |
//! |  error.rs         |  MonitorError                   |
//! |  services/        |                                 |
//! |    probe.rs       |  NetworkProbe + HTTP/scripted   |
//! |    classifier.rs  |  Conditions -> QualityTier      |
//! |    monitor.rs     |  Sampling loop + broadcasting   |
//! +-----------------------------------------------------+
//! ```
//!
//! A failed or timed-out probe is recorded as a `disconnected` sample so
//! downstream fallback logic reacts to real outages; it never stops the loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use network_monitor_cell::{NetworkMonitorService, ScriptedNetworkProbe};
//! use shared_config::TelehealthConfig;
//!
//! # async fn example() {
//! let config = TelehealthConfig::default();
//! let probe = Arc::new(ScriptedNetworkProbe::from_bandwidths(&[1500.0, 300.0]));
//! let monitor = Arc::new(NetworkMonitorService::new(&config, probe));
//!
//! let mut events = monitor.subscribe();
//! monitor.start().await;
//! let first = events.recv().await;
//! # }
//! ```

pub mod error;
pub mod models;
pub mod services;

pub use error::MonitorError;
pub use models::{NetworkEvent, NetworkStatus, ProbeSample};
pub use services::{
    HttpNetworkProbe, NetworkMonitorService, NetworkProbe, QualityClassifier, ScriptStep,
    ScriptedNetworkProbe,
};
