// libs/sync-batcher-cell/src/services/batcher.rs
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use network_monitor_cell::NetworkMonitorService;
use shared_config::{BatchSettings, TelehealthConfig};
use shared_models::QualityTier;

use crate::error::SyncError;
use crate::models::{
    BatchMethod, BatchOperation, BatchReport, BatchStatus, EnqueueOutcome, FlushReport,
    OperationFailure, OperationResult, QueuedOperation, SyncMetadata, SyncPriority, SyncStatistics,
};
use crate::services::compression::encode_batch;
use crate::services::queue::OfflineQueue;
use crate::services::store::ClinicalRecordStore;

pub struct ResourceSyncBatcher {
    settings: BatchSettings,
    store: Arc<dyn ClinicalRecordStore>,
    monitor: Arc<NetworkMonitorService>,
    queue: Mutex<OfflineQueue>,
    batch_size: AtomicUsize,
    in_flight: AtomicUsize,
    stats: RwLock<SyncStatistics>,
    metadata: RwLock<HashMap<String, SyncMetadata>>,
    /// resource type -> id -> last pulled state
    snapshots: RwLock<HashMap<String, HashMap<String, Value>>>,
    /// Serializes drains so batches leave in enqueue order
    flush_lock: Mutex<()>,
}

impl ResourceSyncBatcher {
    pub fn new(
        config: &TelehealthConfig,
        store: Arc<dyn ClinicalRecordStore>,
        monitor: Arc<NetworkMonitorService>,
    ) -> Self {
        let settings = config.batch.clone();

        Self {
            queue: Mutex::new(OfflineQueue::new(settings.offline_queue_capacity)),
            batch_size: AtomicUsize::new(settings.max_batch_size),
            in_flight: AtomicUsize::new(0),
            stats: RwLock::new(SyncStatistics::default()),
            metadata: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            flush_lock: Mutex::new(()),
            settings,
            store,
            monitor,
        }
    }

    /// Queue an operation; a pending operation with the same key is replaced
    pub async fn enqueue(&self, operation: BatchOperation) -> EnqueueOutcome {
        debug!(
            "Enqueue {:?} {} ({})",
            operation.method, operation.resource.resource_type, operation.operation_id
        );

        let outcome = self.queue.lock().await.push(operation);

        if outcome.replaced || outcome.evicted.is_some() {
            let mut stats = self.stats.write().await;
            if outcome.replaced {
                stats.replaced_operations += 1;
            }
            if outcome.evicted.is_some() {
                stats.evicted_operations += 1;
            }
        }

        outcome
    }

    /// Send up to `batch_size` of the oldest pending operations in one call.
    ///
    /// While the link is disconnected this does nothing and leaves the queue
    /// untouched. A store-wide failure puts the whole batch back and is
    /// returned as an error; per-operation failures are reported in the
    /// [`BatchReport`] and retryable ones are re-queued. Dropping the future
    /// before the store answers puts the batch back at the front.
    #[instrument(skip(self))]
    pub async fn execute_batch(&self) -> Result<BatchReport, SyncError> {
        if self.monitor.current_tier().await == QualityTier::Disconnected {
            let held = self.queue_depth().await;
            debug!("Link disconnected, holding {} queued operations", held);
            return Ok(BatchReport::offline());
        }

        let _drain = self.flush_lock.lock().await;

        let limit = self.batch_size.load(Ordering::SeqCst);
        let (drained, restored_evictions) = {
            let mut queue = self.queue.lock().await;
            let (_, evicted) = queue.restore_in_flight();
            if queue.is_empty() {
                return Ok(BatchReport::empty());
            }
            (queue.take_front(limit), evicted)
        };
        self.record_evictions(&restored_evictions).await;

        let mut guard = DrainGuard { batcher: self, settled: false };
        self.in_flight.store(drained.len(), Ordering::SeqCst);
        let outcome = self.send(drained).await;
        guard.settled = true;

        outcome
    }

    /// Every return path settles the queue's in-flight record
    async fn send(&self, drained: Vec<QueuedOperation>) -> Result<BatchReport, SyncError> {
        let operations: Vec<BatchOperation> = drained.iter().map(|q| q.operation.clone()).collect();

        let batch = match encode_batch(operations, self.settings.compression_threshold_bytes) {
            Ok(batch) => batch,
            Err(e) => {
                let (_, evicted) = self.queue.lock().await.settle(drained);
                self.record_evictions(&evicted).await;
                return Err(e);
            }
        };

        let results = match self.store.submit_batch(&batch).await {
            Ok(results) => results,
            Err(e) => {
                warn!("Batch {} not delivered, re-queueing {} operations: {}", batch.batch_id, drained.len(), e);
                let (_, evicted) = self.queue.lock().await.settle(drained);
                self.record_evictions(&evicted).await;
                return Err(e);
            }
        };

        let mut by_id: HashMap<String, OperationResult> = results
            .into_iter()
            .map(|result| (result.operation_id.clone(), result))
            .collect();

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut retry = Vec::new();

        for mut queued in drained {
            let op_id = queued.operation.operation_id.clone();

            match by_id.remove(&op_id) {
                Some(result) if result.is_success() => {
                    if queued.operation.method == BatchMethod::Search {
                        self.apply_search_result(&queued.operation, result.body.as_ref()).await;
                    }
                    succeeded.push(op_id);
                }
                Some(result) if !result.is_retryable() => {
                    error!(
                        "Operation {} on {} rejected by store ({}): {}",
                        op_id,
                        queued.operation.resource.resource_type,
                        result.status_code,
                        result.message.as_deref().unwrap_or("no detail")
                    );
                    failed.push(OperationFailure {
                        operation_id: op_id,
                        resource: queued.operation.resource.clone(),
                        status_code: Some(result.status_code),
                        message: result.message.unwrap_or_else(|| "rejected".to_string()),
                    });
                }
                other => {
                    queued.attempts += 1;
                    let (status_code, message) = match other {
                        Some(result) => (
                            Some(result.status_code),
                            result.message.unwrap_or_else(|| "retryable failure".to_string()),
                        ),
                        None => (None, "no result returned for operation".to_string()),
                    };

                    if queued.attempts > self.settings.max_retries {
                        error!("Operation {} gave up after {} attempts: {}", op_id, queued.attempts, message);
                        failed.push(OperationFailure {
                            operation_id: op_id,
                            resource: queued.operation.resource.clone(),
                            status_code,
                            message,
                        });
                    } else {
                        debug!("Operation {} will be retried (attempt {}): {}", op_id, queued.attempts, message);
                        retry.push(queued);
                    }
                }
            }
        }

        let (requeued, evicted) = self.queue.lock().await.settle(retry);

        let status = if failed.is_empty() && requeued.is_empty() {
            BatchStatus::Completed
        } else {
            BatchStatus::Partial
        };

        {
            let mut stats = self.stats.write().await;
            stats.batches_sent += 1;
            if batch.encoding.content_encoding().is_some() {
                stats.compressed_batches += 1;
            }
            stats.operations_succeeded += succeeded.len() as u64;
            stats.retry_count += requeued.len() as u64;
            stats.failed_operations += failed.len() as u64;
            stats.evicted_operations += evicted.len() as u64;
            stats.last_successful_flush = Some(Utc::now());
        }

        info!(
            "Batch {} delivered: {} succeeded, {} re-queued, {} failed",
            batch.batch_id,
            succeeded.len(),
            requeued.len(),
            failed.len()
        );

        Ok(BatchReport {
            batch_id: Some(batch.batch_id),
            status,
            succeeded,
            requeued,
            failed,
            compressed: batch.encoding.content_encoding().is_some(),
            payload_bytes: batch.body.len(),
        })
    }

    async fn record_evictions(&self, evicted: &[String]) {
        if !evicted.is_empty() {
            self.stats.write().await.evicted_operations += evicted.len() as u64;
        }
    }

    /// Drain by repeated batches until the queue is empty, the link drops,
    /// the store is unreachable, or a round makes no progress
    #[instrument(skip(self))]
    pub async fn flush_pending(&self) -> FlushReport {
        let mut report = FlushReport::default();

        loop {
            match self.execute_batch().await {
                Ok(batch) => match batch.status {
                    BatchStatus::Empty => break,
                    BatchStatus::Offline => {
                        report.stopped_offline = true;
                        break;
                    }
                    _ => {
                        report.absorb(&batch);
                        if !batch.made_progress() {
                            break;
                        }
                    }
                },
                Err(e) => {
                    warn!("Flush interrupted, operations stay queued: {}", e);
                    break;
                }
            }
        }

        report.remaining = self.queue_depth().await;
        report
    }

    /// Scale the batch size to the link: a quarter of the maximum below the
    /// low threshold, half below the medium one, never under the floor.
    pub fn tune_for_bandwidth(&self, bandwidth_kbps: f64) -> usize {
        let size = batch_size_for(&self.settings, bandwidth_kbps);
        let previous = self.batch_size.swap(size, Ordering::SeqCst);
        if previous != size {
            info!("Batch size {} -> {} at {:.0} kbps", previous, size, bandwidth_kbps);
        }
        size
    }

    /// Start a background flush when the link comes back from `disconnected`
    pub fn on_tier_changed(
        self: &Arc<Self>,
        previous: QualityTier,
        current: QualityTier,
    ) -> Option<JoinHandle<FlushReport>> {
        if previous != QualityTier::Disconnected || !current.is_connected() {
            return None;
        }

        info!("Link restored ({} -> {}), replaying offline queue", previous, current);
        let batcher = Arc::clone(self);
        Some(tokio::spawn(async move { batcher.flush_pending().await }))
    }

    /// Queue a pull of the subject's current state for each resource type and
    /// flush right away if the link is up
    #[instrument(skip(self, resource_types))]
    pub async fn sync_resources(
        &self,
        resource_types: &[String],
        subject_id: &str,
        priority: SyncPriority,
    ) -> Option<FlushReport> {
        {
            let mut metadata = self.metadata.write().await;
            for resource_type in resource_types {
                metadata
                    .entry(resource_type.clone())
                    .and_modify(|m| {
                        m.subject_id = subject_id.to_string();
                        m.priority = priority;
                    })
                    .or_insert_with(|| SyncMetadata::pending(resource_type, subject_id, priority));
            }
        }

        for resource_type in resource_types {
            self.enqueue(BatchOperation::search(resource_type, subject_id)).await;
        }

        if self.monitor.current_tier().await.is_connected() {
            Some(self.flush_pending().await)
        } else {
            debug!("Priming for {} deferred until the link returns", subject_id);
            None
        }
    }

    async fn apply_search_result(&self, operation: &BatchOperation, body: Option<&Value>) {
        let resource_type = operation.resource.resource_type.clone();
        let subject_id = operation
            .payload
            .as_ref()
            .and_then(|p| p.get("subject"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let pulled: HashMap<String, Value> = body
            .and_then(|b| b.get("resources"))
            .and_then(Value::as_array)
            .map(|resources| {
                resources
                    .iter()
                    .filter_map(|r| Some((r.get("id")?.as_str()?.to_string(), r.clone())))
                    .collect()
            })
            .unwrap_or_default();

        let (added, modified, deleted) = {
            let mut snapshots = self.snapshots.write().await;
            let previous = snapshots.remove(&resource_type).unwrap_or_default();
            let delta = diff_snapshot(&previous, &pulled);
            snapshots.insert(resource_type.clone(), pulled);
            delta
        };

        let mut metadata = self.metadata.write().await;
        let entry = metadata
            .entry(resource_type.clone())
            .or_insert_with(|| SyncMetadata::pending(&resource_type, &subject_id, SyncPriority::Normal));
        entry.last_synced = Some(Utc::now());
        entry.added = added;
        entry.modified = modified;
        entry.deleted = deleted;

        debug!(
            "Synced {} for {}: +{} ~{} -{}",
            resource_type,
            subject_id,
            entry.added.len(),
            entry.modified.len(),
            entry.deleted.len()
        );
    }

    pub async fn get_statistics(&self) -> SyncStatistics {
        let mut stats = self.stats.read().await.clone();
        stats.queue_depth = self.queue_depth().await;
        stats.in_flight = self.in_flight.load(Ordering::SeqCst);
        stats.batch_size = self.batch_size.load(Ordering::SeqCst);
        stats
    }

    pub async fn sync_metadata(&self, resource_type: &str) -> Option<SyncMetadata> {
        self.metadata.read().await.get(resource_type).cloned()
    }

    pub async fn cached_resources(&self, resource_type: &str) -> Vec<Value> {
        self.snapshots
            .read()
            .await
            .get(resource_type)
            .map(|resources| resources.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn queue_depth(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn pending_operation_ids(&self) -> Vec<String> {
        self.queue.lock().await.pending_ids()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.load(Ordering::SeqCst)
    }
}

/// Puts a batch back in the queue when its future is dropped before the
/// store answered
struct DrainGuard<'a> {
    batcher: &'a ResourceSyncBatcher,
    settled: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.batcher.in_flight.store(0, Ordering::SeqCst);
        if self.settled {
            return;
        }

        match self.batcher.queue.try_lock() {
            Ok(mut queue) => {
                let (restored, evicted) = queue.restore_in_flight();
                warn!("Batch abandoned in flight, {} operations back in the queue", restored.len());
                if !evicted.is_empty() {
                    if let Ok(mut stats) = self.batcher.stats.try_write() {
                        stats.evicted_operations += evicted.len() as u64;
                    }
                }
            }
            Err(_) => warn!("Batch abandoned in flight, the next batch restores it"),
        }
    }
}

fn batch_size_for(settings: &BatchSettings, bandwidth_kbps: f64) -> usize {
    let max = settings.max_batch_size;
    let scaled = if bandwidth_kbps < settings.low_bandwidth_kbps {
        max / 4
    } else if bandwidth_kbps < settings.medium_bandwidth_kbps {
        max / 2
    } else {
        max
    };
    scaled.clamp(settings.min_batch_size, max)
}

fn diff_snapshot(
    previous: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut added = Vec::new();
    let mut modified = Vec::new();

    for (id, resource) in current {
        match previous.get(id) {
            None => added.push(id.clone()),
            Some(old) if old != resource => modified.push(id.clone()),
            Some(_) => {}
        }
    }

    let mut deleted: Vec<String> = previous
        .keys()
        .filter(|id| !current.contains_key(*id))
        .cloned()
        .collect();

    added.sort();
    modified.sort();
    deleted.sort();
    (added, modified, deleted)
}
