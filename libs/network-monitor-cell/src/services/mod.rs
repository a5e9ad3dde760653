// libs/network-monitor-cell/src/services/mod.rs

pub mod classifier;
pub mod monitor;
pub mod probe;

pub use classifier::QualityClassifier;
pub use monitor::NetworkMonitorService;
pub use probe::{HttpNetworkProbe, NetworkProbe, ScriptStep, ScriptedNetworkProbe};
