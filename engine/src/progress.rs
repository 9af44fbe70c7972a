//! Batch progress reporting trait.
//!
//! This module defines the BatchCallback trait, which keeps the orchestrator
//! independent of how progress is shown (CLI lines, a GUI panel, logs).
//! Fine-grained queue changes are also available through
//! [`TransferQueue::subscribe`](crate::queue::TransferQueue::subscribe).

use std::time::Duration;
use uuid::Uuid;

use crate::breaker::BreakerStatus;
use crate::model::TransferItem;
use crate::orchestrator::BatchSummary;

/// Trait for receiving progress updates from a running batch.
///
/// All methods are called synchronously from the orchestrator loop and
/// receive snapshots, so implementations never hold a queue lock.
pub trait BatchCallback: Send + Sync {
    /// Called once every entry has been queued.
    fn on_batch_started(&self, batch_id: Uuid, total_items: usize);

    /// Called when an item starts transferring (again, after a retry).
    fn on_item_started(&self, item: &TransferItem);

    /// Called before sleeping ahead of retry number `attempt`.
    fn on_item_retry(&self, _item_name: &str, _attempt: u32, _delay: Duration) {}

    /// Called when an item reached a terminal state (completed, skipped, failed or cancelled).
    fn on_item_finished(&self, item: &TransferItem);

    /// Called when the circuit breaker halts the batch.
    fn on_breaker_tripped(&self, _status: &BreakerStatus) {}

    /// Called when the batch loop exits.
    fn on_batch_completed(&self, summary: &BatchSummary);
}
