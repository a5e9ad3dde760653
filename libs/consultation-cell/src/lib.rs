// libs/consultation-cell/src/lib.rs
//! # Consultation Cell
//!
//! Owns one telehealth consultation end-to-end: picks the communication mode,
//! drops a video call to text when the link degrades, and hands the encounter
//! to the sync batcher when it ends.
//!
//! ## Features
//!
//! - **Mode selection**: video, audio, text and hybrid sessions, with manual
//!   switching that re-validates the link
//! - **Automatic fallback**: a `poor` or `disconnected` tier during a video or
//!   hybrid session moves it to text exactly once, recorded as a
//!   [`FallbackEvent`](models::FallbackEvent)
//! - **Continuous adaptation**: bandwidth moves retune the video transport and
//!   the batcher's batch size
//! - **Structured consultations**: template-driven intake over chat with typed,
//!   validated step responses
//! - **Encounter summaries**: one summary record per session, flushed with a
//!   bounded final sync
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                  Consultation Cell                  |
//! +-----------------------------------------------------+
//! |  models.rs         |  Sessions, templates, events   |
//! |  error.rs          |  ConsultationError + codes     |
//! |  services/         |                                |
//! |    transport.rs    |  Video/chat traits + simulated |
//! |    templates.rs    |  Template registry, validation |
//! |    orchestrator.rs |  State machine and fallback    |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Session States
//!
//! `scheduled -> starting -> active <-> paused -> ended`, with `failed`
//! reachable from `starting` and `active`. While an automatic fallback swaps
//! transports the session reports `active-degrading`; only `end_session` can
//! interrupt it, and the fallback is then dropped.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use consultation_cell::{
//!     ConsultationOrchestrator, SessionOptions, SimulatedChatTransport, SimulatedVideoTransport,
//! };
//! use network_monitor_cell::{NetworkMonitorService, ScriptedNetworkProbe};
//! use shared_config::TelehealthConfig;
//! use sync_batcher_cell::{InMemoryRecordStore, ResourceSyncBatcher};
//!
//! # async fn example() -> Result<(), consultation_cell::ConsultationError> {
//! let config = TelehealthConfig::default();
//! let probe = Arc::new(ScriptedNetworkProbe::from_bandwidths(&[1500.0, 300.0]));
//! let monitor = Arc::new(NetworkMonitorService::new(&config, probe));
//! let batcher = Arc::new(ResourceSyncBatcher::new(
//!     &config,
//!     Arc::new(InMemoryRecordStore::new()),
//!     monitor.clone(),
//! ));
//!
//! let orchestrator = Arc::new(ConsultationOrchestrator::new(
//!     config,
//!     monitor,
//!     batcher,
//!     Arc::new(SimulatedVideoTransport::new()),
//!     Arc::new(SimulatedChatTransport::new()),
//! )?);
//! orchestrator.start().await;
//!
//! let session = orchestrator
//!     .start_video(SessionOptions::new("patient-1", "provider-1").with_fallback(true))
//!     .await?;
//! # let _ = session;
//! orchestrator.end_session().await;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod models;
pub mod services;

pub use error::{ConsultationError, TransportError};
pub use models::*;
pub use services::*;
