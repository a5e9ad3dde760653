// libs/sync-batcher-cell/src/lib.rs
//! # Sync Batcher Cell
//!
//! Network-aware batching of clinical-record operations with an offline queue.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------+
//! |                  Sync Batcher Cell                  |
//! +-----------------------------------------------------+
//! |  models.rs         |  Operations, reports, metadata |
//! |  error.rs          |  SyncError                     |
//! |  services/         |                                |
//! |    queue.rs        |  Bounded latest-wins queue     |
//! |    compression.rs  |  JSON envelope + bzip2         |
//! |    store.rs        |  Record store (HTTP/in-memory) |
//! |    batcher.rs      |  Sizing, retries, replay       |
//! +-----------------------------------------------------+
//! ```
//!
//! Operations are keyed by (resource type, resource id, operation id); a newer
//! operation with the same key replaces the pending one. While the monitor
//! reports `disconnected` nothing is sent, and the queue is replayed in enqueue
//! order once the link returns.

pub mod models;
pub mod services;
pub mod error;

pub use models::*;
pub use error::*;
pub use services::*;
