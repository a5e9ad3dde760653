use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Network probe not configured")]
    NotConfigured,

    #[error("Network probe timed out after {timeout_ms}ms")]
    ProbeTimeout { timeout_ms: u64 },

    #[error("Network probe failed: {0}")]
    ProbeFailed(String),

    #[error("Probe HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
