use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::RecordStoreClient;

use crate::error::SyncError;
use crate::models::{BatchMethod, BatchOperation, BatchResponse, OperationResult, PayloadEncoding, SyncBatch};
use crate::services::compression::decode_batch;

/// The clinical-record store as seen by the batcher: one call per batch,
/// one result per operation. A repeated operation id must be a no-op.
#[async_trait]
pub trait ClinicalRecordStore: Send + Sync {
    async fn submit_batch(&self, batch: &SyncBatch) -> Result<Vec<OperationResult>, SyncError>;
}

// ==============================================================================
// HTTP STORE
// ==============================================================================

#[derive(Debug)]
pub struct HttpRecordStore {
    client: RecordStoreClient,
}

impl HttpRecordStore {
    pub fn new(config: &AppConfig) -> Result<Self, SyncError> {
        config.validate_record_store().map_err(|err| {
            warn!("Record store unusable: {}", err);
            SyncError::NotConfigured
        })?;

        Ok(Self {
            client: RecordStoreClient::new(config)?,
        })
    }
}

#[async_trait]
impl ClinicalRecordStore for HttpRecordStore {
    async fn submit_batch(&self, batch: &SyncBatch) -> Result<Vec<OperationResult>, SyncError> {
        debug!(
            "Submitting batch {} ({} operations, {} bytes)",
            batch.batch_id,
            batch.operations.len(),
            batch.body.len()
        );

        let response: BatchResponse = self
            .client
            .post_encoded("/batch", batch.body.clone(), batch.encoding.content_encoding())
            .await?;

        Ok(response.results)
    }
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

/// What the in-memory store saw on the wire, for assertions
#[derive(Debug, Clone)]
pub struct ReceivedBatch {
    pub batch_id: Uuid,
    pub operation_ids: Vec<String>,
    pub encoding: PayloadEncoding,
    pub body_bytes: usize,
}

#[derive(Default)]
struct StoreState {
    /// resource type -> id -> resource
    resources: HashMap<String, HashMap<String, Value>>,
    versions: HashMap<(String, String), u64>,
    applied: HashMap<String, OperationResult>,
    failures: HashMap<String, (u16, u32)>,
    withheld: HashSet<String>,
    received: Vec<ReceivedBatch>,
    unavailable: bool,
    latency: Option<Duration>,
}

/// Store backed by maps, decoding real wire bodies. Used by the simulator and
/// by tests; supports injected per-operation failures and outages.
#[derive(Default)]
pub struct InMemoryRecordStore {
    state: Mutex<StoreState>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, resource_type: &str, id: &str, resource: Value) {
        let mut state = self.state.lock().await;
        state
            .resources
            .entry(resource_type.to_string())
            .or_default()
            .insert(id.to_string(), resource);
        *state
            .versions
            .entry((resource_type.to_string(), id.to_string()))
            .or_insert(0) += 1;
    }

    pub async fn remove(&self, resource_type: &str, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(resources) = state.resources.get_mut(resource_type) {
            resources.remove(id);
        }
    }

    pub async fn resource(&self, resource_type: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().await;
        state.resources.get(resource_type)?.get(id).cloned()
    }

    pub async fn resources_of(&self, resource_type: &str) -> Vec<Value> {
        let state = self.state.lock().await;
        state
            .resources
            .get(resource_type)
            .map(|resources| resources.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Answer the next `times` submissions of `operation_id` with `status_code`
    pub async fn fail_operation(&self, operation_id: &str, status_code: u16, times: u32) {
        self.state
            .lock()
            .await
            .failures
            .insert(operation_id.to_string(), (status_code, times));
    }

    /// Apply the operation but leave it out of the response, as if the
    /// acknowledgment were lost
    pub async fn withhold_result(&self, operation_id: &str) {
        self.state.lock().await.withheld.insert(operation_id.to_string());
    }

    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().await.latency = latency;
    }

    pub async fn received_batches(&self) -> Vec<ReceivedBatch> {
        self.state.lock().await.received.clone()
    }

    /// Number of distinct write operations that took effect
    pub async fn applied_count(&self) -> usize {
        self.state.lock().await.applied.len()
    }
}

impl StoreState {
    fn apply(&mut self, operation: &BatchOperation) -> OperationResult {
        let op_id = operation.operation_id.as_str();

        if let Some((status, remaining)) = self.failures.get_mut(op_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return OperationResult::error(op_id, *status, "injected failure");
            }
        }

        if operation.method == BatchMethod::Search {
            return self.search(operation);
        }

        if let Some(previous) = self.applied.get(op_id) {
            debug!("Operation {} already applied, acknowledging again", op_id);
            return previous.clone();
        }

        let result = self.write(operation);
        if result.is_success() {
            self.applied.insert(op_id.to_string(), result.clone());
        }
        result
    }

    fn write(&mut self, operation: &BatchOperation) -> OperationResult {
        let op_id = operation.operation_id.as_str();
        let resource_type = operation.resource.resource_type.clone();

        let id = match (&operation.method, &operation.resource.id) {
            (BatchMethod::Create, None) => operation
                .payload
                .as_ref()
                .and_then(|p| p.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            (_, Some(id)) => id.clone(),
            (_, None) => return OperationResult::error(op_id, 400, "resource id required"),
        };

        let version_key = (resource_type.clone(), id.clone());
        let current_version = self.versions.get(&version_key).copied().unwrap_or(0);

        if let Some(expected) = &operation.if_match {
            if expected != &current_version.to_string() {
                return OperationResult::error(op_id, 412, "version precondition failed");
            }
        }

        let resources = self.resources.entry(resource_type).or_default();

        match operation.method {
            BatchMethod::Delete => {
                resources.remove(&id);
                OperationResult::ok(op_id, 204, None)
            }
            BatchMethod::Patch => {
                let Some(existing) = resources.get_mut(&id) else {
                    return OperationResult::error(op_id, 404, "resource not found");
                };
                if let (Some(target), Some(Value::Object(changes))) =
                    (existing.as_object_mut(), operation.payload.as_ref())
                {
                    for (field, value) in changes {
                        target.insert(field.clone(), value.clone());
                    }
                }
                let body = existing.clone();
                self.versions.insert(version_key, current_version + 1);
                OperationResult::ok(op_id, 200, Some(body))
            }
            _ => {
                let mut resource = operation.payload.clone().unwrap_or_else(|| json!({}));
                if let Some(object) = resource.as_object_mut() {
                    object.insert("id".to_string(), json!(id));
                }
                let status = if resources.contains_key(&id) { 200 } else { 201 };
                resources.insert(id, resource.clone());
                self.versions.insert(version_key, current_version + 1);
                OperationResult::ok(op_id, status, Some(resource))
            }
        }
    }

    fn search(&self, operation: &BatchOperation) -> OperationResult {
        let subject = operation
            .payload
            .as_ref()
            .and_then(|p| p.get("subject"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        let matches: Vec<Value> = self
            .resources
            .get(&operation.resource.resource_type)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(id, resource)| {
                        id.as_str() == subject
                            || resource.get("subject").and_then(Value::as_str) == Some(subject)
                    })
                    .map(|(_, resource)| resource.clone())
                    .collect()
            })
            .unwrap_or_default();

        OperationResult::ok(&operation.operation_id, 200, Some(json!({ "resources": matches })))
    }
}

#[async_trait]
impl ClinicalRecordStore for InMemoryRecordStore {
    async fn submit_batch(&self, batch: &SyncBatch) -> Result<Vec<OperationResult>, SyncError> {
        let latency = self.state.lock().await.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(SyncError::StoreUnavailable("in-memory store offline".to_string()));
        }

        let envelope = decode_batch(&batch.body, batch.encoding)?;
        state.received.push(ReceivedBatch {
            batch_id: envelope.batch_id,
            operation_ids: envelope.operations.iter().map(|op| op.operation_id.clone()).collect(),
            encoding: batch.encoding,
            body_bytes: batch.body.len(),
        });

        let mut results = Vec::with_capacity(envelope.operations.len());
        for operation in &envelope.operations {
            let result = state.apply(operation);
            if state.withheld.remove(&operation.operation_id) {
                continue;
            }
            results.push(result);
        }

        info!("In-memory store applied batch {} ({} results)", envelope.batch_id, results.len());
        Ok(results)
    }
}
