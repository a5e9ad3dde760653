use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BatchMethod {
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "patch")]
    Patch,
    #[serde(rename = "delete")]
    Delete,
    /// Pull current state for a resource type and subject
    #[serde(rename = "search")]
    Search,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ResourceRef {
    pub fn new(resource_type: &str, id: Option<&str>) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            id: id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchOperation {
    pub operation_id: String,
    pub method: BatchMethod,
    pub resource: ResourceRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Concurrency-control precondition (expected version)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub if_match: Option<String>,
}

impl BatchOperation {
    pub fn create(resource_type: &str, payload: Value) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            method: BatchMethod::Create,
            resource: ResourceRef::new(resource_type, None),
            payload: Some(payload),
            if_match: None,
        }
    }

    pub fn update(resource_type: &str, id: &str, payload: Value) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            method: BatchMethod::Update,
            resource: ResourceRef::new(resource_type, Some(id)),
            payload: Some(payload),
            if_match: None,
        }
    }

    pub fn patch(resource_type: &str, id: &str, payload: Value) -> Self {
        Self {
            method: BatchMethod::Patch,
            ..Self::update(resource_type, id, payload)
        }
    }

    pub fn delete(resource_type: &str, id: &str) -> Self {
        Self {
            operation_id: Uuid::new_v4().to_string(),
            method: BatchMethod::Delete,
            resource: ResourceRef::new(resource_type, Some(id)),
            payload: None,
            if_match: None,
        }
    }

    /// Keyed per type and subject so repeated priming replaces the pending pull
    pub fn search(resource_type: &str, subject_id: &str) -> Self {
        Self {
            operation_id: format!("search:{}:{}", resource_type, subject_id),
            method: BatchMethod::Search,
            resource: ResourceRef::new(resource_type, None),
            payload: Some(serde_json::json!({ "subject": subject_id })),
            if_match: None,
        }
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = operation_id.into();
        self
    }

    pub fn with_if_match(mut self, version: impl Into<String>) -> Self {
        self.if_match = Some(version.into());
        self
    }

    pub fn key(&self) -> OperationKey {
        OperationKey {
            resource_type: self.resource.resource_type.clone(),
            resource_id: self.resource.id.clone().unwrap_or_default(),
            operation_id: self.operation_id.clone(),
        }
    }
}

/// Idempotency identity of an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationKey {
    pub resource_type: String,
    pub resource_id: String,
    pub operation_id: String,
}

#[derive(Debug, Clone)]
pub struct QueuedOperation {
    pub operation: BatchOperation,
    pub sequence: u64,
    pub enqueued_at: DateTime<Utc>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOutcome {
    pub replaced: bool,
    /// Operation id pushed out because the queue was at capacity
    pub evicted: Option<String>,
}

// ==============================================================================
// WIRE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PayloadEncoding {
    #[serde(rename = "identity")]
    Identity,
    #[serde(rename = "bzip2")]
    Bzip2,
}

impl PayloadEncoding {
    pub fn content_encoding(&self) -> Option<&'static str> {
        match self {
            PayloadEncoding::Identity => None,
            PayloadEncoding::Bzip2 => Some("bzip2"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub batch_id: Uuid,
    pub operations: Vec<BatchOperation>,
}

/// One network call's worth of operations, already encoded for the wire
#[derive(Debug, Clone)]
pub struct SyncBatch {
    pub batch_id: Uuid,
    pub operations: Vec<BatchOperation>,
    pub body: Vec<u8>,
    pub encoding: PayloadEncoding,
    pub raw_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationResult {
    pub operation_id: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OperationResult {
    pub fn ok(operation_id: &str, status_code: u16, body: Option<Value>) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            status_code,
            body,
            message: None,
        }
    }

    pub fn error(operation_id: &str, status_code: u16, message: &str) -> Self {
        Self {
            operation_id: operation_id.to_string(),
            status_code,
            body: None,
            message: Some(message.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.status_code, 408 | 429) || self.status_code >= 500
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<OperationResult>,
}

// ==============================================================================
// REPORTING MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum BatchStatus {
    /// Nothing pending
    Empty,
    /// Link is down; queue untouched
    Offline,
    Completed,
    /// Some operations failed or were re-queued
    Partial,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OperationFailure {
    pub operation_id: String,
    pub resource: ResourceRef,
    pub status_code: Option<u16>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub batch_id: Option<Uuid>,
    pub status: BatchStatus,
    pub succeeded: Vec<String>,
    pub requeued: Vec<String>,
    pub failed: Vec<OperationFailure>,
    pub compressed: bool,
    pub payload_bytes: usize,
}

impl BatchReport {
    pub fn empty() -> Self {
        Self::with_status(BatchStatus::Empty)
    }

    pub fn offline() -> Self {
        Self::with_status(BatchStatus::Offline)
    }

    fn with_status(status: BatchStatus) -> Self {
        Self {
            batch_id: None,
            status,
            succeeded: Vec::new(),
            requeued: Vec::new(),
            failed: Vec::new(),
            compressed: false,
            payload_bytes: 0,
        }
    }

    pub fn made_progress(&self) -> bool {
        !self.succeeded.is_empty() || !self.failed.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FlushReport {
    pub batches: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub failed: Vec<OperationFailure>,
    pub stopped_offline: bool,
    pub remaining: usize,
}

impl FlushReport {
    pub fn absorb(&mut self, batch: &BatchReport) {
        self.batches += 1;
        self.succeeded += batch.succeeded.len();
        self.requeued += batch.requeued.len();
        self.failed.extend(batch.failed.iter().cloned());
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SyncPriority {
    #[serde(rename = "high")]
    High,
    #[serde(rename = "normal")]
    #[default]
    Normal,
    #[serde(rename = "low")]
    Low,
}

/// What changed for one resource type since the previous pull
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncMetadata {
    pub resource_type: String,
    pub subject_id: String,
    pub last_synced: Option<DateTime<Utc>>,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub priority: SyncPriority,
}

impl SyncMetadata {
    pub fn pending(resource_type: &str, subject_id: &str, priority: SyncPriority) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            subject_id: subject_id.to_string(),
            last_synced: None,
            added: Vec::new(),
            modified: Vec::new(),
            deleted: Vec::new(),
            priority,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStatistics {
    pub queue_depth: usize,
    pub in_flight: usize,
    pub batch_size: usize,
    pub last_successful_flush: Option<DateTime<Utc>>,
    pub batches_sent: u64,
    pub compressed_batches: u64,
    pub operations_succeeded: u64,
    pub retry_count: u64,
    pub failed_operations: u64,
    pub replaced_operations: u64,
    pub evicted_operations: u64,
}
