//! Destination-name conflict resolution.
//!
//! Before a file is transferred the orchestrator asks the resolver what to do
//! if its name already exists at the destination. The answer comes, in order,
//! from a batch-wide "apply to all" decision, from the absence of a collision,
//! from the configured [`FileExistsPolicy`], or from an interactive
//! [`ConflictPrompt`].
//!
//! The interactive prompt is the one place a batch waits on a human. It is
//! modelled as a request sent over a channel with a oneshot reply, so the UI
//! can answer from its own event loop; a batch cancel resolves a pending
//! request with `Cancel`.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::model::{DirEntry, FileDescriptor, FileExistsPolicy, OverwriteAction, OverwriteDecision};

/// Modification times closer than this are considered equal.
const MTIME_TOLERANCE_SECS: i64 = 2;

/// Interactive question about one collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRequest {
    pub source: FileDescriptor,
    pub destination: FileDescriptor,
    /// Items still queued behind this one
    pub queue_count: usize,
}

/// Something that can answer a [`ConflictRequest`], usually a user.
#[async_trait]
pub trait ConflictPrompt: Send + Sync {
    async fn ask(&self, request: ConflictRequest) -> OverwriteDecision;
}

/// A prompt that always gives the same answer.
#[derive(Debug, Clone)]
pub struct StaticPrompt(pub OverwriteDecision);

#[async_trait]
impl ConflictPrompt for StaticPrompt {
    async fn ask(&self, _request: ConflictRequest) -> OverwriteDecision {
        self.0.clone()
    }
}

/// A request waiting for the UI's answer.
#[derive(Debug)]
pub struct PendingConflict {
    pub request: ConflictRequest,
    responder: oneshot::Sender<OverwriteDecision>,
}

impl PendingConflict {
    pub fn resolve(self, decision: OverwriteDecision) {
        // The batch may have been cancelled meanwhile; nobody is listening then.
        let _ = self.responder.send(decision);
    }
}

/// Receiving end handed to the UI.
pub type ConflictRequests = mpsc::UnboundedReceiver<PendingConflict>;

/// [`ConflictPrompt`] that forwards requests to a [`ConflictRequests`] receiver.
#[derive(Debug, Clone)]
pub struct ChannelPrompt {
    tx: mpsc::UnboundedSender<PendingConflict>,
}

/// Create a channel-backed prompt and the receiver the UI reads requests from.
pub fn conflict_channel() -> (ChannelPrompt, ConflictRequests) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelPrompt { tx }, rx)
}

#[async_trait]
impl ConflictPrompt for ChannelPrompt {
    async fn ask(&self, request: ConflictRequest) -> OverwriteDecision {
        let (responder, answer) = oneshot::channel();
        if self.tx.send(PendingConflict { request, responder }).is_err() {
            tracing::warn!("Conflict prompt receiver is gone; cancelling batch");
            return OverwriteDecision::cancel();
        }
        // A dropped responder means the UI went away without answering.
        answer.await.unwrap_or_else(|_| OverwriteDecision::cancel())
    }
}

/// Split `name` into base and extension (extension keeps its dot).
/// Directories and dot-files never get an extension.
fn split_name(name: &str, is_dir: bool) -> (&str, &str) {
    if is_dir {
        return (name, "");
    }
    match name.rfind('.') {
        Some(pos) if pos > 0 => name.split_at(pos),
        _ => (name, ""),
    }
}

/// First `"{base} ({n}){ext}"` (n = 1, 2, ...) not present in `existing`.
pub fn unique_name<I, S>(name: &str, is_dir: bool, existing: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let taken: HashSet<String> = existing.into_iter().map(|s| s.as_ref().to_string()).collect();
    let (base, ext) = split_name(name, is_dir);
    let mut counter = 1u32;
    loop {
        let candidate = format!("{} ({}){}", base, counter, ext);
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Whether a comparison policy keeps the existing destination file.
///
/// Only `Skip`, `OverwriteIfNewer` and `OverwriteIfDifferent` ever skip; the
/// other policies return false.
pub fn should_skip_existing(
    policy: FileExistsPolicy,
    source: &FileDescriptor,
    destination: &DirEntry,
) -> bool {
    match policy {
        FileExistsPolicy::Skip => true,
        FileExistsPolicy::OverwriteIfNewer => match (source.modified, destination.modified) {
            (Some(src), Some(dst)) => src.timestamp() <= dst.timestamp() + MTIME_TOLERANCE_SECS,
            // unknown dates: overwrite
            _ => false,
        },
        FileExistsPolicy::OverwriteIfDifferent => {
            let same_size = source.size == destination.size;
            let same_date = match (source.modified, destination.modified) {
                (Some(src), Some(dst)) => {
                    (src.timestamp() - dst.timestamp()).abs() <= MTIME_TOLERANCE_SECS
                }
                _ => false,
            };
            same_size && same_date
        }
        _ => false,
    }
}

/// Batch-scoped conflict resolver.
#[derive(Debug, Clone, Default)]
pub struct OverwriteResolver {
    policy: FileExistsPolicy,
    remembered: Option<OverwriteDecision>,
}

impl OverwriteResolver {
    pub fn new(policy: FileExistsPolicy) -> Self {
        Self { policy, remembered: None }
    }

    pub fn policy(&self) -> FileExistsPolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: FileExistsPolicy) {
        self.policy = policy;
    }

    /// Forget any "apply to all" decision from a previous batch.
    pub fn begin_batch(&mut self) {
        self.remembered = None;
    }

    pub fn remembered(&self) -> Option<&OverwriteDecision> {
        self.remembered.as_ref()
    }

    /// Decide what to do with `source` given the destination listing.
    ///
    /// Suspends on `prompt` when the policy is `Ask` and a collision exists.
    /// Cancelling `cancel` while waiting yields `Cancel`.
    pub async fn resolve(
        &mut self,
        source: &FileDescriptor,
        existing: &[DirEntry],
        queue_count: usize,
        prompt: &dyn ConflictPrompt,
        cancel: &CancellationToken,
    ) -> OverwriteDecision {
        let collision = existing.iter().find(|entry| entry.name == source.name);

        if let Some(remembered) = &self.remembered {
            let mut decision = remembered.clone();
            if decision.action == OverwriteAction::Rename {
                // each file needs its own fresh name
                let name = match collision {
                    Some(_) => unique_name(&source.name, false, existing.iter().map(|e| &e.name)),
                    None => source.name.clone(),
                };
                decision.new_name = Some(name);
            }
            return decision;
        }

        let Some(destination) = collision else {
            return OverwriteDecision::overwrite();
        };

        match self.policy {
            FileExistsPolicy::Overwrite | FileExistsPolicy::Resume => OverwriteDecision::overwrite(),
            FileExistsPolicy::Skip => OverwriteDecision::skip(),
            FileExistsPolicy::Rename => OverwriteDecision::rename(unique_name(
                &source.name,
                false,
                existing.iter().map(|e| &e.name),
            )),
            FileExistsPolicy::OverwriteIfNewer | FileExistsPolicy::OverwriteIfDifferent => {
                if should_skip_existing(self.policy, source, destination) {
                    OverwriteDecision::skip()
                } else {
                    OverwriteDecision::overwrite()
                }
            }
            FileExistsPolicy::Ask => {
                let request = ConflictRequest {
                    source: source.clone(),
                    destination: destination.to_descriptor(!source.is_remote),
                    queue_count,
                };
                let mut decision = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => OverwriteDecision::cancel(),
                    decision = prompt.ask(request) => decision,
                };

                if decision.action == OverwriteAction::Rename && decision.new_name.is_none() {
                    decision.new_name = Some(unique_name(
                        &source.name,
                        false,
                        existing.iter().map(|e| &e.name),
                    ));
                }
                if decision.apply_to_all && decision.action != OverwriteAction::Cancel {
                    tracing::debug!("Remembering {:?} for the rest of the batch", decision.action);
                    self.remembered = Some(decision.clone());
                }
                decision
            }
        }
    }
}
