//! # Xfer Engine - Batch Transfer Resilience Library
//!
//! A headless engine that runs batches of file uploads and downloads against
//! an unreliable remote, one file at a time, and keeps going when things fail.
//! Designed as the foundation for multiple UIs (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine decides, for every file of a batch:
//! - whether a name collision at the destination is overwritten, skipped,
//!   renamed or ends the batch (policy, "apply to all" memory or a prompt)
//! - what kind of failure an error message describes (quota, auth, network...)
//! - whether to retry with backoff, reconnect, or halt the whole batch
//!   (circuit breaker)
//! - how the item moves through the transfer queue shown to the user
//!
//! Moving bytes is delegated to a [`TransferExecutor`]. [`LocalExecutor`]
//! treats a local directory as the remote side.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use xfer_engine::{
//!     BatchEntry, BatchOrchestrator, Direction, EngineConfig, LocalExecutor, OverwriteDecision,
//!     StaticPrompt,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(LocalExecutor::new("/srv/storage"));
//! let orchestrator = BatchOrchestrator::new(executor, EngineConfig::default())?;
//!
//! let entries = vec![BatchEntry {
//!     name: "report.pdf".to_string(),
//!     source: "/home/me/report.pdf".into(),
//!     destination_dir: "/inbox".into(),
//!     size: 1024,
//!     modified: None,
//!     direction: Direction::Upload,
//!     is_dir: false,
//! }];
//!
//! let prompt = StaticPrompt(OverwriteDecision::skip());
//! let summary = orchestrator
//!     .run_batch(entries, &prompt, None, CancellationToken::new())
//!     .await?;
//! println!("{} transferred, {} failed", summary.succeeded, summary.failed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **classifier**: Error message classification
//! - **breaker**: Circuit breaker and retry backoff
//! - **queue**: Transfer queue item lifecycle and visibility
//! - **resolver**: Overwrite-conflict resolution
//! - **orchestrator**: Batch loop tying the above together
//! - **executor**: Backend trait; **local**: directory-backed executor
//! - **model**, **config**, **error**, **progress**, **fs_ops**

pub mod breaker;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod fs_ops;
pub mod local;
pub mod model;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod resolver;

// Re-export main types and functions
pub use breaker::{BreakerState, BreakerStatus, CircuitBreaker, FailureOutcome, PauseReason};
pub use classifier::{classify, ErrorClassification, ErrorKind};
pub use config::{EngineConfig, RetryPolicy};
pub use error::{EngineError, Result};
pub use executor::{ExecResult, TransferExecutor};
pub use local::LocalExecutor;
pub use model::{
    BatchEntry, DirEntry, Direction, FileDescriptor, FileExistsPolicy, ItemId, OverwriteAction,
    OverwriteDecision, TransferItem, TransferStatus,
};
pub use orchestrator::{BatchOrchestrator, BatchSummary};
pub use progress::BatchCallback;
pub use queue::{QueueCounts, QueueEvent, TransferQueue};
pub use resolver::{
    conflict_channel, ChannelPrompt, ConflictPrompt, ConflictRequest, ConflictRequests,
    OverwriteResolver, PendingConflict, StaticPrompt,
};
