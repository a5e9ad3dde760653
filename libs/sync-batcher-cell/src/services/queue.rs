use chrono::Utc;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::{BatchOperation, EnqueueOutcome, QueuedOperation};

/// Bounded, order-preserving holding area for operations not yet delivered.
///
/// Never holds two entries with the same operation key among its pending
/// entries. A drain keeps a copy of what it took until it settles.
#[derive(Debug)]
pub struct OfflineQueue {
    entries: VecDeque<QueuedOperation>,
    in_flight: Vec<QueuedOperation>,
    capacity: usize,
    next_sequence: u64,
}

impl OfflineQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            in_flight: Vec::new(),
            capacity: capacity.max(1),
            next_sequence: 0,
        }
    }

    /// Append an operation. A pending entry with the same key is dropped and
    /// the new one goes to the back; at capacity the oldest entry is evicted.
    pub fn push(&mut self, operation: BatchOperation) -> EnqueueOutcome {
        let key = operation.key();
        let mut outcome = EnqueueOutcome::default();

        if let Some(position) = self.entries.iter().position(|e| e.operation.key() == key) {
            self.entries.remove(position);
            outcome.replaced = true;
            debug!("Replaced pending operation {}", key.operation_id);
        }

        if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                warn!(
                    "Offline queue full ({}), evicting oldest operation {} on {}",
                    self.capacity, evicted.operation.operation_id, evicted.operation.resource.resource_type
                );
                outcome.evicted = Some(evicted.operation.operation_id);
            }
        }

        self.entries.push_back(QueuedOperation {
            operation,
            sequence: self.next_sequence,
            enqueued_at: Utc::now(),
            attempts: 0,
        });
        self.next_sequence += 1;

        outcome
    }

    /// Remove and return up to `count` of the oldest entries. They stay on
    /// record as in flight until [`settle`](Self::settle) or
    /// [`restore_in_flight`](Self::restore_in_flight).
    pub fn take_front(&mut self, count: usize) -> Vec<QueuedOperation> {
        let count = count.min(self.entries.len());
        let drained: Vec<QueuedOperation> = self.entries.drain(..count).collect();
        self.in_flight = drained.clone();
        drained
    }

    /// Close out the current drain, putting `retry` back at the front
    pub fn settle(&mut self, retry: Vec<QueuedOperation>) -> (Vec<String>, Vec<String>) {
        self.in_flight.clear();
        self.requeue_front(retry)
    }

    /// Put back everything a drain took and never settled
    pub fn restore_in_flight(&mut self) -> (Vec<String>, Vec<String>) {
        let abandoned = std::mem::take(&mut self.in_flight);
        if abandoned.is_empty() {
            return (Vec::new(), Vec::new());
        }
        warn!("Restoring {} operations from an abandoned batch", abandoned.len());
        self.requeue_front(abandoned)
    }

    /// Put operations back at the front in their original order. An entry whose
    /// key was enqueued again meanwhile is superseded and dropped. Returns the
    /// ids actually re-queued and any ids evicted to stay within capacity.
    pub fn requeue_front(&mut self, operations: Vec<QueuedOperation>) -> (Vec<String>, Vec<String>) {
        let mut requeued = Vec::new();

        for queued in operations.into_iter().rev() {
            let key = queued.operation.key();
            if self.entries.iter().any(|e| e.operation.key() == key) {
                debug!("Dropping re-queued operation {}: superseded", key.operation_id);
                continue;
            }
            requeued.push(queued.operation.operation_id.clone());
            self.entries.push_front(queued);
        }
        requeued.reverse();

        let mut evicted = Vec::new();
        while self.entries.len() > self.capacity {
            if let Some(oldest) = self.entries.pop_front() {
                warn!("Offline queue over capacity after retry, evicting {}", oldest.operation.operation_id);
                evicted.push(oldest.operation.operation_id);
            }
        }

        (requeued, evicted)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.operation.operation_id.clone()).collect()
    }
}
