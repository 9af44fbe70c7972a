//! Transfer queue controller.
//!
//! `TransferQueue` owns every queued item and is the only place their state is
//! changed. Readers (CLI, UI) either borrow the current items through the read
//! API or subscribe to [`QueueEvent`] notifications; they never write item
//! fields directly.
//!
//! The queue also owns the panel visibility policy: it becomes visible when
//! work is added or running, and hides itself `auto_hide_delay` after the last
//! item reached a terminal state. Timers are modelled as a deadline that
//! [`TransferQueue::tick`] applies, so the owner decides how often to poll.

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::model::{Direction, ItemId, TransferItem, TransferStatus};

/// Message on items stopped by [`TransferQueue::stop_all`].
pub const STOPPED_BY_USER: &str = "Stopped by user";

/// Message on items aborted by a batch cancel.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

const DEFAULT_AUTO_HIDE: Duration = Duration::from_secs(5);

/// Change notification sent to subscribers after each mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Added(ItemId),
    Started(ItemId),
    Progress { id: ItemId, progress: u8 },
    FolderProgress { id: ItemId, completed_files: u32, total_files: u32 },
    Completed(ItemId),
    Failed { id: ItemId, error: String },
    Retried(ItemId),
    Removed(ItemId),
    Cleared,
    VisibilityChanged(bool),
}

/// Number of items per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub transferring: usize,
    pub completed: usize,
    pub error: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.transferring + self.completed + self.error
    }
}

#[derive(Debug)]
pub struct TransferQueue {
    items: Vec<TransferItem>,
    next_id: u64,
    visible: bool,
    auto_hide_delay: Duration,
    hide_deadline: Option<Instant>,
    subscribers: Vec<Sender<QueueEvent>>,
}

impl Default for TransferQueue {
    fn default() -> Self {
        Self::new(DEFAULT_AUTO_HIDE)
    }
}

impl TransferQueue {
    pub fn new(auto_hide_delay: Duration) -> Self {
        Self {
            items: Vec::new(),
            next_id: 1,
            visible: false,
            auto_hide_delay,
            hide_deadline: None,
            subscribers: Vec::new(),
        }
    }

    /// Receive a [`QueueEvent`] for every subsequent mutation.
    pub fn subscribe(&mut self) -> Receiver<QueueEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: QueueEvent) {
        // Drop subscribers whose receiver is gone
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ---- read API ----

    pub fn items(&self) -> &[TransferItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&TransferItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for item in &self.items {
            match item.status {
                TransferStatus::Pending => counts.pending += 1,
                TransferStatus::Transferring => counts.transferring += 1,
                TransferStatus::Completed => counts.completed += 1,
                TransferStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn has_active(&self) -> bool {
        self.items.iter().any(|item| item.status.is_active())
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// When the panel will hide itself, if an auto-hide is pending.
    pub fn auto_hide_deadline(&self) -> Option<Instant> {
        self.hide_deadline
    }

    // ---- mutators ----

    /// Append a pending item and show the queue.
    pub fn add_item(
        &mut self,
        filename: impl Into<String>,
        path: impl Into<String>,
        size: u64,
        direction: Direction,
    ) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;

        self.items.push(TransferItem {
            id,
            filename: filename.into(),
            path: path.into(),
            size,
            direction,
            status: TransferStatus::Pending,
            progress: None,
            error: None,
            start_time: Some(Utc::now()),
            end_time: None,
            is_folder: false,
            total_files: None,
            completed_files: None,
        });

        tracing::debug!("Queued {} ({})", id, direction);
        self.emit(QueueEvent::Added(id));
        self.refresh_visibility();
        id
    }

    fn item_mut(&mut self, id: ItemId) -> Result<&mut TransferItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(EngineError::UnknownItem(id))
    }

    pub fn start_transfer(&mut self, id: ItemId) -> Result<()> {
        let item = self.item_mut(id)?;
        if item.status != TransferStatus::Pending {
            return Err(EngineError::invalid_state("start transfer", item.status));
        }
        item.status = TransferStatus::Transferring;
        item.progress = Some(0);

        self.emit(QueueEvent::Started(id));
        self.refresh_visibility();
        Ok(())
    }

    pub fn set_progress(&mut self, id: ItemId, percent: u8) -> Result<()> {
        let item = self.item_mut(id)?;
        if item.status != TransferStatus::Transferring {
            return Err(EngineError::invalid_state("set progress", item.status));
        }
        let progress = percent.min(100);
        item.progress = Some(progress);

        self.emit(QueueEvent::Progress { id, progress });
        Ok(())
    }

    /// Mark an item completed. Accepted from `Pending` too, which is how a
    /// file skipped by conflict resolution is recorded.
    pub fn complete_transfer(&mut self, id: ItemId) -> Result<()> {
        let item = self.item_mut(id)?;
        if item.status.is_terminal() {
            return Err(EngineError::invalid_state("complete transfer", item.status));
        }
        item.status = TransferStatus::Completed;
        item.progress = Some(100);
        item.error = None;
        item.end_time = Some(Utc::now());

        self.emit(QueueEvent::Completed(id));
        self.refresh_visibility();
        Ok(())
    }

    pub fn fail_transfer(&mut self, id: ItemId, error: impl Into<String>) -> Result<()> {
        let item = self.item_mut(id)?;
        if item.status.is_terminal() {
            return Err(EngineError::invalid_state("fail transfer", item.status));
        }
        let error = error.into();
        item.status = TransferStatus::Error;
        item.progress = None;
        item.error = Some(error.clone());
        item.end_time = Some(Utc::now());

        self.emit(QueueEvent::Failed { id, error });
        self.refresh_visibility();
        Ok(())
    }

    pub fn mark_as_folder(&mut self, id: ItemId, total_files: Option<u32>) -> Result<()> {
        let item = self.item_mut(id)?;
        item.is_folder = true;
        item.total_files = Some(total_files.unwrap_or(0));
        item.completed_files = Some(0);
        Ok(())
    }

    /// Update folder sub-counts; progress is recomputed while transferring.
    pub fn update_folder_progress(
        &mut self,
        id: ItemId,
        total_files: u32,
        completed_files: u32,
    ) -> Result<()> {
        let item = self.item_mut(id)?;
        item.total_files = Some(total_files);
        item.completed_files = Some(completed_files);
        if item.status == TransferStatus::Transferring {
            let progress = if total_files == 0 {
                0
            } else {
                ((completed_files as f64 / total_files as f64) * 100.0).round().min(100.0) as u8
            };
            item.progress = Some(progress);
        }

        self.emit(QueueEvent::FolderProgress { id, completed_files, total_files });
        Ok(())
    }

    /// Put a failed item back to pending with a fresh start time.
    pub fn retry_item(&mut self, id: ItemId) -> Result<()> {
        let item = self.item_mut(id)?;
        if item.status != TransferStatus::Error {
            return Err(EngineError::invalid_state("retry", item.status));
        }
        item.status = TransferStatus::Pending;
        item.error = None;
        item.progress = None;
        item.start_time = Some(Utc::now());
        item.end_time = None;

        self.emit(QueueEvent::Retried(id));
        self.refresh_visibility();
        Ok(())
    }

    /// Remove an item. Refused while it is transferring.
    pub fn remove_item(&mut self, id: ItemId) -> Result<()> {
        let index = self
            .items
            .iter()
            .position(|item| item.id == id)
            .ok_or(EngineError::UnknownItem(id))?;
        let status = self.items[index].status;
        if status == TransferStatus::Transferring {
            return Err(EngineError::invalid_state("remove item", status));
        }
        self.items.remove(index);

        self.emit(QueueEvent::Removed(id));
        self.refresh_visibility();
        Ok(())
    }

    /// Empty the queue and hide the panel.
    pub fn clear(&mut self) {
        self.items.clear();
        self.hide_deadline = None;
        self.emit(QueueEvent::Cleared);
        self.apply_visible(false);
    }

    pub fn clear_completed(&mut self) {
        let removed: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.status == TransferStatus::Completed)
            .map(|item| item.id)
            .collect();
        self.items.retain(|item| item.status != TransferStatus::Completed);
        for id in removed {
            self.emit(QueueEvent::Removed(id));
        }
        self.refresh_visibility();
    }

    /// Fail every pending item with "Stopped by user". Items already
    /// transferring are left alone. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let pending: Vec<ItemId> = self
            .items
            .iter()
            .filter(|item| item.status == TransferStatus::Pending)
            .map(|item| item.id)
            .collect();
        self.cancel_pending(&pending, STOPPED_BY_USER).len()
    }

    /// Fail those of `ids` that are still pending. Returns the affected ids.
    pub fn cancel_pending(&mut self, ids: &[ItemId], message: &str) -> Vec<ItemId> {
        let mut cancelled = Vec::new();
        for &id in ids {
            let still_pending = self
                .get(id)
                .map(|item| item.status == TransferStatus::Pending)
                .unwrap_or(false);
            if still_pending && self.fail_transfer(id, message).is_ok() {
                cancelled.push(id);
            }
        }
        cancelled
    }

    // ---- visibility ----

    /// Manual show/hide. Cancels a pending auto-hide.
    pub fn toggle_visibility(&mut self) {
        self.hide_deadline = None;
        let visible = !self.visible;
        self.apply_visible(visible);
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.hide_deadline = None;
        self.apply_visible(visible);
    }

    /// Apply a pending auto-hide whose deadline has passed.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&mut self, now: Instant) {
        if let Some(deadline) = self.hide_deadline {
            if now >= deadline && !self.has_active() {
                self.hide_deadline = None;
                self.apply_visible(false);
            }
        }
    }

    fn apply_visible(&mut self, visible: bool) {
        if self.visible != visible {
            self.visible = visible;
            self.emit(QueueEvent::VisibilityChanged(visible));
        }
    }

    fn refresh_visibility(&mut self) {
        if self.has_active() {
            self.hide_deadline = None;
            self.apply_visible(true);
        } else if self.visible && self.hide_deadline.is_none() {
            self.hide_deadline = Some(Instant::now() + self.auto_hide_delay);
        }
    }
}
