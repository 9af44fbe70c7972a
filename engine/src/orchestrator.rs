//! Batch orchestration.
//!
//! `BatchOrchestrator::run_batch` processes one batch of selected entries:
//! - queues every entry up front
//! - walks them strictly one at a time, resolving name conflicts before each file
//! - hands the actual transfer to the [`TransferExecutor`]
//! - feeds every failure to the circuit breaker, retrying with backoff when
//!   the breaker allows it and halting the batch when it trips
//!
//! Individual file errors are recorded on their queue item and do NOT stop the
//! batch. Only a breaker trip or a cancel does. A halted batch is remembered:
//! [`BatchOrchestrator::resume`] continues it once the user has dealt with the
//! cause, [`BatchOrchestrator::abandon_halted`] settles its leftover items.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::breaker::{BreakerStatus, CircuitBreaker, PauseReason};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::executor::{ExecResult, TransferExecutor};
use crate::fs_ops;
use crate::model::{
    BatchEntry, DirEntry, Direction, FileDescriptor, FileExistsPolicy, ItemId, OverwriteAction,
    TransferItem, TransferStatus,
};
use crate::progress::BatchCallback;
use crate::queue::{TransferQueue, CANCELLED_BY_USER, STOPPED_BY_USER};
use crate::resolver::{should_skip_existing, ConflictPrompt, OverwriteResolver};

/// Final counts of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    /// Items transferred
    pub succeeded: usize,
    /// Items skipped by conflict resolution
    pub skipped: usize,
    /// Items that ended in error (cancelled items excluded)
    pub failed: usize,
    /// Files inside folders left alone by the file-exists policy
    pub folder_files_skipped: usize,
    /// Items the user cancelled: never started, or a folder interrupted partway
    pub cancelled: Vec<ItemId>,
    /// Items that reached `Completed` (transferred or skipped)
    pub completed: Vec<ItemId>,
    /// Breaker status if the batch was halted by the circuit breaker
    pub halted: Option<BreakerStatus>,
}

impl BatchSummary {
    fn new(batch_id: Uuid) -> Self {
        Self {
            batch_id,
            succeeded: 0,
            skipped: 0,
            failed: 0,
            folder_files_skipped: 0,
            cancelled: Vec::new(),
            completed: Vec::new(),
            halted: None,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        !self.cancelled.is_empty()
    }

    /// Nothing failed, nothing was cancelled and the breaker never tripped.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled.is_empty() && self.halted.is_none()
    }
}

/// Outcome of one queued item.
enum ItemOutcome {
    Completed,
    Skipped,
    Failed,
    /// User chose cancel in the conflict prompt
    Cancelled,
    /// Folder stopped partway by a batch cancel
    Interrupted,
    /// Stopped or removed from the UI while the batch was busy with it
    Withdrawn,
    /// Breaker tripped; stop the batch
    Halted,
}

/// What to do after a recorded failure.
enum FailureAction {
    Retry,
    GiveUp,
    Halt,
}

enum Attempt {
    Done,
    Failed(String),
    Halted(String),
}

/// One remote operation that goes through the retry loop.
#[derive(Clone, Copy)]
enum Step<'p> {
    Transfer {
        direction: Direction,
        source: &'p Path,
        destination: &'p Path,
    },
    MakeDir {
        direction: Direction,
        dir: &'p Path,
    },
}

impl Step<'_> {
    fn label(&self) -> String {
        let path = match self {
            Step::Transfer { source, .. } => source,
            Step::MakeDir { dir, .. } => dir,
        };
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

/// One file inside a folder transfer.
struct FolderFile {
    source: PathBuf,
    destination: PathBuf,
    descriptor: FileDescriptor,
}

#[derive(Default)]
struct FolderPlan {
    /// Destination directories to create, parents first
    dirs: Vec<PathBuf>,
    files: Vec<FolderFile>,
    /// Listing entries refused because their name is not a plain file name
    rejected: Vec<String>,
}

/// Per-batch mutable state threaded through the loop.
struct BatchRun<'a> {
    cancel: &'a CancellationToken,
    prompt: &'a dyn ConflictPrompt,
    callback: Option<&'a dyn BatchCallback>,
    resolver: OverwriteResolver,
    folder_files_skipped: usize,
}

/// What a breaker halt left behind, kept until resumed or abandoned.
struct HaltedBatch {
    batch_id: Uuid,
    /// Item whose failure tripped the breaker; it is tried again on resume
    halted_item: ItemId,
    /// The halted item and everything after it
    remaining: Vec<(ItemId, BatchEntry)>,
    resolver: OverwriteResolver,
}

/// Resets the running flag when a batch ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct BatchOrchestrator {
    executor: Arc<dyn TransferExecutor>,
    config: RwLock<EngineConfig>,
    queue: Arc<Mutex<TransferQueue>>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    halted: Mutex<Option<HaltedBatch>>,
    running: AtomicBool,
}

impl BatchOrchestrator {
    /// # Errors
    /// Returns EngineError if the configuration is invalid.
    pub fn new(executor: Arc<dyn TransferExecutor>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let queue = TransferQueue::new(config.auto_hide_delay());
        let breaker = CircuitBreaker::new(config.retry.clone());
        Ok(Self {
            executor,
            config: RwLock::new(config),
            queue: Arc::new(Mutex::new(queue)),
            breaker: Arc::new(Mutex::new(breaker)),
            halted: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Shared handle to the queue, for readers and UI mutators.
    pub fn queue(&self) -> Arc<Mutex<TransferQueue>> {
        Arc::clone(&self.queue)
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        self.breaker.lock().status()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True while a halted batch waits for [`resume`](Self::resume) or
    /// [`abandon_halted`](Self::abandon_halted).
    pub fn has_halted_batch(&self) -> bool {
        self.halted.lock().is_some()
    }

    /// Change the default file-exists policy; picked up at the next decision.
    pub fn set_file_exists_policy(&self, policy: FileExistsPolicy) {
        self.config.write().file_exists = policy;
    }

    pub fn file_exists_policy(&self) -> FileExistsPolicy {
        self.config.read().file_exists
    }

    fn claim(&self) -> Result<RunningGuard<'_>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::BatchInProgress);
        }
        Ok(RunningGuard(&self.running))
    }

    fn snapshot(&self, id: ItemId) -> Option<TransferItem> {
        self.queue.lock().get(id).cloned()
    }

    fn is_pending(&self, id: ItemId) -> bool {
        self.queue
            .lock()
            .get(id)
            .map(|item| item.status == TransferStatus::Pending)
            .unwrap_or(false)
    }

    fn notify_started(&self, run: &BatchRun<'_>, id: ItemId) {
        if let (Some(callback), Some(item)) = (run.callback, self.snapshot(id)) {
            callback.on_item_started(&item);
        }
    }

    fn notify_finished(&self, run: &BatchRun<'_>, id: ItemId) {
        if let (Some(callback), Some(item)) = (run.callback, self.snapshot(id)) {
            callback.on_item_finished(&item);
        }
    }

    /// Run one batch to completion, cancellation or a breaker halt.
    ///
    /// Items left unprocessed by a halt stay `Pending` until [`resume`](Self::resume)
    /// or [`abandon_halted`](Self::abandon_halted). Starting a new batch
    /// abandons them.
    ///
    /// # Errors
    /// Returns EngineError if another batch is already running on this
    /// orchestrator. Transfer failures are recorded on the items instead.
    pub async fn run_batch(
        &self,
        entries: Vec<BatchEntry>,
        prompt: &dyn ConflictPrompt,
        callback: Option<&dyn BatchCallback>,
        cancel: CancellationToken,
    ) -> Result<BatchSummary> {
        let _guard = self.claim()?;
        self.abandon_halted();

        let batch_id = Uuid::new_v4();
        let work: Vec<(ItemId, BatchEntry)> = {
            let mut queue = self.queue.lock();
            entries
                .into_iter()
                .map(|entry| {
                    let id = queue.add_item(
                        entry.name.clone(),
                        entry.source.display().to_string(),
                        entry.size,
                        entry.direction,
                    );
                    (id, entry)
                })
                .collect()
        };

        tracing::info!("Batch {} started with {} items", batch_id, work.len());
        if let Some(callback) = callback {
            callback.on_batch_started(batch_id, work.len());
        }

        let resolver = OverwriteResolver::new(self.file_exists_policy());
        self.drive(batch_id, work, resolver, prompt, callback, &cancel).await
    }

    /// Close the breaker after the user dealt with whatever tripped it, and
    /// continue the halted batch if there is one.
    ///
    /// The item that tripped the breaker is tried again, then the items that
    /// never started. "Apply to all" decisions of the halted batch still hold.
    /// Returns `None` when no batch was halted.
    ///
    /// # Errors
    /// Returns EngineError if a batch is already running.
    pub async fn resume(
        &self,
        prompt: &dyn ConflictPrompt,
        callback: Option<&dyn BatchCallback>,
        cancel: CancellationToken,
    ) -> Result<Option<BatchSummary>> {
        let _guard = self.claim()?;
        self.breaker.lock().reset();

        let Some(halted) = self.halted.lock().take() else {
            return Ok(None);
        };

        // Removed or already retried from the UI: the loop skips it
        if let Err(e) = self.queue.lock().retry_item(halted.halted_item) {
            tracing::debug!("Halted item {} not requeued: {}", halted.halted_item, e);
        }

        tracing::info!(
            "Batch {} resumed with {} items",
            halted.batch_id,
            halted.remaining.len()
        );
        if let Some(callback) = callback {
            callback.on_batch_started(halted.batch_id, halted.remaining.len());
        }

        let summary = self
            .drive(
                halted.batch_id,
                halted.remaining,
                halted.resolver,
                prompt,
                callback,
                &cancel,
            )
            .await?;
        Ok(Some(summary))
    }

    /// Settle the items a halted batch left behind.
    ///
    /// Its still pending items fail with "Stopped by user", so the queue has
    /// nothing active left. Returns how many were stopped.
    pub fn abandon_halted(&self) -> usize {
        let Some(halted) = self.halted.lock().take() else {
            return 0;
        };
        let ids: Vec<ItemId> = halted.remaining.iter().map(|(id, _)| *id).collect();
        let stopped = self.queue.lock().cancel_pending(&ids, STOPPED_BY_USER);
        tracing::info!(
            "Abandoned halted batch {}: {} items stopped",
            halted.batch_id,
            stopped.len()
        );
        stopped.len()
    }

    /// The sequential loop shared by a fresh batch and a resumed one.
    async fn drive(
        &self,
        batch_id: Uuid,
        mut work: Vec<(ItemId, BatchEntry)>,
        resolver: OverwriteResolver,
        prompt: &dyn ConflictPrompt,
        callback: Option<&dyn BatchCallback>,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary> {
        self.breaker.lock().reset();

        let ids: Vec<ItemId> = work.iter().map(|(id, _)| *id).collect();
        let mut run = BatchRun {
            cancel,
            prompt,
            callback,
            resolver,
            folder_files_skipped: 0,
        };
        let mut summary = BatchSummary::new(batch_id);
        let mut halted_at = None;

        for (index, (id, entry)) in work.iter().enumerate() {
            let id = *id;

            // Stopped or removed from the UI while waiting
            if !self.is_pending(id) {
                tracing::debug!("Item {} no longer pending; skipping", id);
                continue;
            }

            if cancel.is_cancelled() {
                self.cancel_remaining(&run, &ids[index..], &mut summary);
                break;
            }

            if self.breaker.lock().is_open() {
                summary.halted = Some(self.breaker_status());
                halted_at = Some(index);
                break;
            }

            let outcome = if entry.is_dir {
                self.process_folder(&mut run, entry, id).await?
            } else {
                let queue_count = self.pending_count(&ids[index + 1..]);
                self.process_file(&mut run, entry, id, queue_count).await?
            };

            match outcome {
                ItemOutcome::Completed => {
                    summary.succeeded += 1;
                    summary.completed.push(id);
                }
                ItemOutcome::Skipped => {
                    summary.skipped += 1;
                    summary.completed.push(id);
                }
                ItemOutcome::Failed => summary.failed += 1,
                ItemOutcome::Interrupted => summary.cancelled.push(id),
                ItemOutcome::Withdrawn => {
                    tracing::debug!("Item {} withdrawn while in progress; skipping", id);
                    continue;
                }
                ItemOutcome::Cancelled => {
                    self.cancel_remaining(&run, &ids[index..], &mut summary);
                    break;
                }
                ItemOutcome::Halted => {
                    summary.failed += 1;
                    self.notify_finished(&run, id);
                    let status = self.breaker_status();
                    tracing::warn!(
                        "Batch {} halted: {:?} ({:?})",
                        batch_id,
                        status.pause_reason,
                        status.tripped_kind
                    );
                    if let Some(callback) = callback {
                        callback.on_breaker_tripped(&status);
                    }
                    summary.halted = Some(status);
                    halted_at = Some(index);
                    break;
                }
            }

            self.notify_finished(&run, id);
        }

        summary.folder_files_skipped = run.folder_files_skipped;
        if let Some(index) = halted_at {
            let remaining = work.split_off(index);
            *self.halted.lock() = Some(HaltedBatch {
                batch_id,
                halted_item: ids[index],
                remaining,
                resolver: run.resolver,
            });
        }

        tracing::info!(
            "Batch {} finished: {} succeeded, {} skipped, {} failed, {} cancelled",
            batch_id,
            summary.succeeded,
            summary.skipped,
            summary.failed,
            summary.cancelled.len()
        );
        if let Some(callback) = callback {
            callback.on_batch_completed(&summary);
        }
        Ok(summary)
    }

    fn pending_count(&self, ids: &[ItemId]) -> usize {
        let queue = self.queue.lock();
        ids.iter()
            .filter(|id| {
                queue
                    .get(**id)
                    .map(|item| item.status == TransferStatus::Pending)
                    .unwrap_or(false)
            })
            .count()
    }

    fn cancel_remaining(&self, run: &BatchRun<'_>, ids: &[ItemId], summary: &mut BatchSummary) {
        let cancelled = self.queue.lock().cancel_pending(ids, CANCELLED_BY_USER);
        tracing::info!("Cancelled {} queued items", cancelled.len());
        for id in &cancelled {
            self.notify_finished(run, *id);
        }
        summary.cancelled.extend(cancelled);
    }

    async fn process_file(
        &self,
        run: &mut BatchRun<'_>,
        entry: &BatchEntry,
        id: ItemId,
        queue_count: usize,
    ) -> Result<ItemOutcome> {
        let existing = self.list_destination(entry.direction, &entry.destination_dir).await;

        run.resolver.set_policy(self.file_exists_policy());
        let decision = run
            .resolver
            .resolve(&entry.source_descriptor(), &existing, queue_count, run.prompt, run.cancel)
            .await;

        // The prompt may have been open long enough for the UI to stop or
        // remove the item
        if decision.action != OverwriteAction::Cancel && !self.is_pending(id) {
            return Ok(ItemOutcome::Withdrawn);
        }

        let target_name = match decision.action {
            OverwriteAction::Cancel => return Ok(ItemOutcome::Cancelled),
            OverwriteAction::Skip => {
                tracing::debug!("Skipping {} (already exists)", entry.name);
                if self.queue.lock().complete_transfer(id).is_err() {
                    return Ok(ItemOutcome::Withdrawn);
                }
                return Ok(ItemOutcome::Skipped);
            }
            OverwriteAction::Rename => decision.new_name.unwrap_or_else(|| entry.name.clone()),
            OverwriteAction::Overwrite => entry.name.clone(),
        };

        if !fs_ops::is_plain_name(&target_name) {
            let message = format!("Permission denied: invalid destination name {:?}", target_name);
            tracing::warn!("Refusing to transfer {}: {}", entry.name, message);
            if self.queue.lock().fail_transfer(id, message).is_err() {
                return Ok(ItemOutcome::Withdrawn);
            }
            return Ok(ItemOutcome::Failed);
        }
        let destination = entry.destination_path(&target_name);

        if self.queue.lock().start_transfer(id).is_err() {
            return Ok(ItemOutcome::Withdrawn);
        }
        self.notify_started(run, id);

        let step = Step::Transfer {
            direction: entry.direction,
            source: &entry.source,
            destination: &destination,
        };
        match self.run_with_retry(run, Some(id), step).await? {
            Attempt::Done => {
                self.queue.lock().complete_transfer(id)?;
                Ok(ItemOutcome::Completed)
            }
            Attempt::Failed(_) => Ok(ItemOutcome::Failed),
            Attempt::Halted(_) => Ok(ItemOutcome::Halted),
        }
    }

    async fn process_folder(
        &self,
        run: &mut BatchRun<'_>,
        entry: &BatchEntry,
        id: ItemId,
    ) -> Result<ItemOutcome> {
        let destination_root = entry.destination_path(&entry.name);
        {
            let mut queue = self.queue.lock();
            if queue.start_transfer(id).is_err() {
                return Ok(ItemOutcome::Withdrawn);
            }
            queue.mark_as_folder(id, None)?;
        }
        self.notify_started(run, id);

        let mut attempt = 1;
        let plan = loop {
            match self.plan_folder(entry, &destination_root).await {
                Ok(plan) => break plan,
                Err(message) => match self.after_failure(run, &entry.name, &message, attempt).await {
                    FailureAction::Retry => attempt += 1,
                    FailureAction::GiveUp => {
                        self.queue.lock().fail_transfer(id, message)?;
                        return Ok(ItemOutcome::Failed);
                    }
                    FailureAction::Halt => {
                        self.queue.lock().fail_transfer(id, message)?;
                        return Ok(ItemOutcome::Halted);
                    }
                },
            }
        };

        let total = (plan.files.len() + plan.rejected.len()) as u32;
        let mut done = plan.rejected.len() as u32;
        let mut failures = plan.rejected;
        self.queue.lock().update_folder_progress(id, total, done)?;

        for dir in &plan.dirs {
            let step = Step::MakeDir { direction: entry.direction, dir };
            match self.run_with_retry(run, None, step).await? {
                Attempt::Done => {}
                Attempt::Failed(message) => {
                    self.queue.lock().fail_transfer(id, message)?;
                    return Ok(ItemOutcome::Failed);
                }
                Attempt::Halted(message) => {
                    self.queue.lock().fail_transfer(id, message)?;
                    return Ok(ItemOutcome::Halted);
                }
            }
        }

        let mut listings: HashMap<PathBuf, Vec<DirEntry>> = HashMap::new();

        for file in &plan.files {
            if run.cancel.is_cancelled() {
                tracing::info!("Folder {} cancelled after {} of {} files", entry.name, done, total);
                self.queue.lock().fail_transfer(id, CANCELLED_BY_USER)?;
                return Ok(ItemOutcome::Interrupted);
            }

            if self.skip_folder_file(entry.direction, file, &mut listings).await {
                run.folder_files_skipped += 1;
            } else {
                let step = Step::Transfer {
                    direction: entry.direction,
                    source: &file.source,
                    destination: &file.destination,
                };
                match self.run_with_retry(run, None, step).await? {
                    Attempt::Done => {}
                    Attempt::Failed(message) => {
                        failures.push(format!("{}: {}", file.descriptor.name, message));
                    }
                    Attempt::Halted(message) => {
                        self.queue.lock().fail_transfer(id, message)?;
                        return Ok(ItemOutcome::Halted);
                    }
                }
            }

            done += 1;
            self.queue.lock().update_folder_progress(id, total, done)?;
        }

        if failures.is_empty() {
            self.queue.lock().complete_transfer(id)?;
            Ok(ItemOutcome::Completed)
        } else {
            let message = format!(
                "{} of {} files failed; first: {}",
                failures.len(),
                total,
                failures[0]
            );
            self.queue.lock().fail_transfer(id, message)?;
            Ok(ItemOutcome::Failed)
        }
    }

    /// Run one step, retrying while the breaker allows it.
    ///
    /// With `item` set, every failure is recorded on the queue item and a retry
    /// goes through `retry_item` + `start_transfer`.
    async fn run_with_retry(
        &self,
        run: &BatchRun<'_>,
        item: Option<ItemId>,
        step: Step<'_>,
    ) -> Result<Attempt> {
        let label = step.label();
        let mut attempt = 1u32;

        loop {
            let message = match self.run_step(step).await {
                Ok(()) => {
                    self.breaker.lock().record_success();
                    return Ok(Attempt::Done);
                }
                Err(message) => message,
            };

            if let Some(id) = item {
                self.queue.lock().fail_transfer(id, message.clone())?;
            }

            match self.after_failure(run, &label, &message, attempt).await {
                FailureAction::Retry => {
                    attempt += 1;
                    if let Some(id) = item {
                        let mut queue = self.queue.lock();
                        // The UI may have removed the failed item meanwhile
                        if queue.retry_item(id).is_err() {
                            return Ok(Attempt::Failed(message));
                        }
                        queue.start_transfer(id)?;
                    }
                    if let Some(id) = item {
                        self.notify_started(run, id);
                    }
                }
                FailureAction::GiveUp => return Ok(Attempt::Failed(message)),
                FailureAction::Halt => return Ok(Attempt::Halted(message)),
            }
        }
    }

    /// Feed a failure to the breaker and decide what happens next.
    async fn after_failure(
        &self,
        run: &BatchRun<'_>,
        label: &str,
        message: &str,
        attempt: u32,
    ) -> FailureAction {
        let outcome = self.breaker.lock().record_failure(message);
        tracing::warn!(
            "{} failed (attempt {}, {}): {}",
            label,
            attempt,
            outcome.kind,
            message
        );

        if outcome.should_pause {
            if outcome.is_fatal {
                return FailureAction::Halt;
            }
            let reason = self.breaker.lock().pause_reason();
            if reason != PauseReason::Reconnecting {
                return FailureAction::Halt;
            }

            self.breaker.lock().mark_reconnecting();
            let reconnected = self.executor.reconnect().await;
            match reconnected {
                Ok(()) => {
                    self.breaker.lock().mark_reconnected();
                    let may_retry = self.breaker.lock().should_retry_file(attempt, outcome.kind);
                    return if may_retry {
                        FailureAction::Retry
                    } else {
                        FailureAction::GiveUp
                    };
                }
                Err(e) => {
                    tracing::warn!("Reconnection failed: {}", e);
                    self.breaker.lock().mark_reconnect_failed();
                    return FailureAction::Halt;
                }
            }
        }

        let (may_retry, delay) = {
            let breaker = self.breaker.lock();
            (
                breaker.should_retry_file(attempt, outcome.kind),
                breaker.retry_delay(attempt),
            )
        };
        if !may_retry {
            return FailureAction::GiveUp;
        }

        if let Some(callback) = run.callback {
            callback.on_item_retry(label, attempt + 1, delay);
        }
        tracing::debug!("Retrying {} in {:?}", label, delay);

        tokio::select! {
            biased;
            _ = run.cancel.cancelled() => FailureAction::GiveUp,
            _ = tokio::time::sleep(delay) => FailureAction::Retry,
        }
    }

    async fn run_step(&self, step: Step<'_>) -> ExecResult<()> {
        match step {
            Step::Transfer { direction: Direction::Upload, source, destination } => {
                self.executor.upload(source, destination).await?;
                tracing::debug!("Uploaded {} -> {}", source.display(), destination.display());
                Ok(())
            }
            Step::Transfer { direction: Direction::Download, source, destination } => {
                self.executor.download(source, destination).await?;
                tracing::debug!("Downloaded {} -> {}", source.display(), destination.display());
                Ok(())
            }
            Step::MakeDir { direction: Direction::Upload, dir } => {
                self.executor.create_directory(dir).await
            }
            Step::MakeDir { direction: Direction::Download, dir } => tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| format!("{}: {}", dir.display(), e)),
        }
    }

    /// Destination listing used for collision checks. A listing failure means
    /// nothing is known to collide.
    async fn list_destination(&self, direction: Direction, dir: &Path) -> Vec<DirEntry> {
        let listing = match direction {
            Direction::Upload => self.executor.list_directory(dir).await,
            Direction::Download => {
                let dir = dir.to_path_buf();
                tokio::task::spawn_blocking(move || fs_ops::list_local_dir(&dir))
                    .await
                    .map_err(|e| e.to_string())
                    .and_then(|res| res.map_err(|e| e.to_string()))
            }
        };
        listing.unwrap_or_else(|e| {
            tracing::debug!("Could not list {}: {}", dir.display(), e);
            Vec::new()
        })
    }

    async fn plan_folder(&self, entry: &BatchEntry, destination_root: &Path) -> ExecResult<FolderPlan> {
        let mut plan = FolderPlan::default();
        plan.dirs.push(destination_root.to_path_buf());

        match entry.direction {
            Direction::Upload => {
                let root = entry.source.clone();
                let tree = tokio::task::spawn_blocking(move || fs_ops::enumerate_tree(&root))
                    .await
                    .map_err(|e| e.to_string())?
                    .map_err(|e| e.to_string())?;
                for node in tree {
                    let destination = destination_root.join(&node.relative);
                    if node.is_dir {
                        plan.dirs.push(destination);
                    } else {
                        let name = node
                            .path
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        plan.files.push(FolderFile {
                            source: node.path,
                            destination,
                            descriptor: FileDescriptor {
                                name,
                                size: node.size,
                                modified: node.modified,
                                is_remote: false,
                            },
                        });
                    }
                }
            }
            Direction::Download => {
                let mut stack = vec![(entry.source.clone(), destination_root.to_path_buf())];
                while let Some((remote, local)) = stack.pop() {
                    for child in self.executor.list_directory(&remote).await? {
                        // Names are joined onto the local tree; keep them inside it
                        if !fs_ops::is_plain_name(&child.name) {
                            tracing::warn!(
                                "Ignoring {:?} listed in {}: not a plain file name",
                                child.name,
                                remote.display()
                            );
                            plan.rejected.push(format!(
                                "{}: Permission denied: unsafe name in remote listing",
                                child.name
                            ));
                            continue;
                        }

                        let remote_child = remote.join(&child.name);
                        let local_child = local.join(&child.name);
                        if child.is_dir {
                            plan.dirs.push(local_child.clone());
                            stack.push((remote_child, local_child));
                        } else {
                            plan.files.push(FolderFile {
                                source: remote_child,
                                destination: local_child,
                                descriptor: child.to_descriptor(true),
                            });
                        }
                    }
                }
            }
        }

        Ok(plan)
    }

    /// Apply the non-interactive policies to a file found inside a folder.
    async fn skip_folder_file(
        &self,
        direction: Direction,
        file: &FolderFile,
        listings: &mut HashMap<PathBuf, Vec<DirEntry>>,
    ) -> bool {
        let policy = self.file_exists_policy();
        if !matches!(
            policy,
            FileExistsPolicy::Skip
                | FileExistsPolicy::OverwriteIfNewer
                | FileExistsPolicy::OverwriteIfDifferent
        ) {
            return false;
        }

        let Some(parent) = file.destination.parent() else {
            return false;
        };
        if !listings.contains_key(parent) {
            let listing = self.list_destination(direction, parent).await;
            listings.insert(parent.to_path_buf(), listing);
        }

        listings
            .get(parent)
            .and_then(|entries| entries.iter().find(|e| !e.is_dir && e.name == file.descriptor.name))
            .map(|existing| should_skip_existing(policy, &file.descriptor, existing))
            .unwrap_or(false)
    }
}
