//! Core data model for batched transfers.
//!
//! This module defines the main data structures shared by the engine:
//! - TransferItem: one queued unit of work and its lifecycle state
//! - FileDescriptor, DirEntry: what the engine knows about files on either side
//! - OverwriteDecision, FileExistsPolicy: conflict resolution inputs and outputs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Identifier of a queued item, unique and monotonic within one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Transfer direction relative to the remote backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local file to remote storage
    Upload,
    /// Remote storage to local file
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Waiting to be processed
    Pending,
    /// Currently transferring
    Transferring,
    /// Transferred, or skipped by conflict resolution
    Completed,
    /// Failed, stopped or cancelled
    Error,
}

impl TransferStatus {
    /// Returns true if this state is terminal (no further changes expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Error)
    }

    /// Returns true while the item still needs the orchestrator's attention.
    pub fn is_active(&self) -> bool {
        matches!(self, TransferStatus::Pending | TransferStatus::Transferring)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::Transferring => write!(f, "transferring"),
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Error => write!(f, "error"),
        }
    }
}

/// A single queued transfer.
///
/// Fields are public for reading; every state change goes through the
/// [`TransferQueue`](crate::queue::TransferQueue) mutators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    pub id: ItemId,

    /// Display name of the file or folder
    pub filename: String,

    /// Source path of the transfer
    pub path: String,

    /// Size in bytes (0 for folders)
    pub size: u64,

    pub direction: Direction,

    pub status: TransferStatus,

    /// 0-100; only meaningful while transferring (100 once completed)
    pub progress: Option<u8>,

    /// Terminal error message, present only in `Error` state
    pub error: Option<String>,

    pub start_time: Option<DateTime<Utc>>,

    /// Set exactly when the item reaches `Completed` or `Error`
    pub end_time: Option<DateTime<Utc>>,

    pub is_folder: bool,
    pub total_files: Option<u32>,
    pub completed_files: Option<u32>,
}

/// Metadata describing one side of a name collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    /// True if the file lives on the remote backend
    pub is_remote: bool,
}

/// One entry of a directory listing, local or remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

impl DirEntry {
    pub fn to_descriptor(&self, is_remote: bool) -> FileDescriptor {
        FileDescriptor {
            name: self.name.clone(),
            size: self.size,
            modified: self.modified,
            is_remote,
        }
    }
}

/// One selected item handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Name of the file or folder; also the destination name unless renamed
    pub name: String,
    /// Full source path (local path for uploads, remote path for downloads)
    pub source: PathBuf,
    /// Destination directory (remote for uploads, local for downloads)
    pub destination_dir: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub is_dir: bool,
}

impl BatchEntry {
    pub fn destination_path(&self, name: &str) -> PathBuf {
        self.destination_dir.join(name)
    }

    pub fn source_descriptor(&self) -> FileDescriptor {
        FileDescriptor {
            name: self.name.clone(),
            size: self.size,
            modified: self.modified,
            is_remote: self.direction == Direction::Download,
        }
    }
}

/// What to do with a file whose name already exists at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwriteAction {
    Overwrite,
    Skip,
    /// Transfer under `OverwriteDecision::new_name`
    Rename,
    /// Abort the rest of the batch
    Cancel,
}

/// Outcome of conflict resolution for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverwriteDecision {
    pub action: OverwriteAction,
    pub new_name: Option<String>,
    /// Reuse this decision for the remainder of the batch
    pub apply_to_all: bool,
}

impl OverwriteDecision {
    pub fn overwrite() -> Self {
        Self { action: OverwriteAction::Overwrite, new_name: None, apply_to_all: false }
    }

    pub fn skip() -> Self {
        Self { action: OverwriteAction::Skip, new_name: None, apply_to_all: false }
    }

    pub fn rename(new_name: impl Into<String>) -> Self {
        Self {
            action: OverwriteAction::Rename,
            new_name: Some(new_name.into()),
            apply_to_all: false,
        }
    }

    pub fn cancel() -> Self {
        Self { action: OverwriteAction::Cancel, new_name: None, apply_to_all: false }
    }

    pub fn for_all(mut self) -> Self {
        self.apply_to_all = true;
        self
    }
}

/// Configured default for handling existing files at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileExistsPolicy {
    /// Prompt the user for each collision
    #[default]
    Ask,
    /// Always overwrite
    Overwrite,
    /// Same effect as `Overwrite`: partial files are never resumed
    Resume,
    /// Keep the existing file
    Skip,
    /// Transfer under a fresh "name (n).ext"
    Rename,
    /// Overwrite only when the source is newer than the destination
    OverwriteIfNewer,
    /// Skip when size and modification time match, overwrite otherwise
    #[serde(alias = "skip_if_identical")]
    OverwriteIfDifferent,
}

impl fmt::Display for FileExistsPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ask => "ask",
            Self::Overwrite => "overwrite",
            Self::Resume => "resume",
            Self::Skip => "skip",
            Self::Rename => "rename",
            Self::OverwriteIfNewer => "overwrite_if_newer",
            Self::OverwriteIfDifferent => "overwrite_if_different",
        };
        f.write_str(s)
    }
}

impl FromStr for FileExistsPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "" | "ask" => Ok(Self::Ask),
            "overwrite" => Ok(Self::Overwrite),
            "resume" => Ok(Self::Resume),
            "skip" => Ok(Self::Skip),
            "rename" => Ok(Self::Rename),
            "overwrite_if_newer" => Ok(Self::OverwriteIfNewer),
            "overwrite_if_different" | "skip_if_identical" => Ok(Self::OverwriteIfDifferent),
            _ => Err(format!("Invalid file exists policy: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal() {
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Transferring.is_terminal());
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Error.is_terminal());
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("ask".parse::<FileExistsPolicy>(), Ok(FileExistsPolicy::Ask));
        assert_eq!("".parse::<FileExistsPolicy>(), Ok(FileExistsPolicy::Ask));
        assert_eq!("Resume".parse::<FileExistsPolicy>(), Ok(FileExistsPolicy::Resume));
        assert_eq!(
            "skip-if-identical".parse::<FileExistsPolicy>(),
            Ok(FileExistsPolicy::OverwriteIfDifferent)
        );
        assert!("sometimes".parse::<FileExistsPolicy>().is_err());
    }

    #[test]
    fn test_policy_display_round_trips() {
        for p in [
            FileExistsPolicy::Ask,
            FileExistsPolicy::Rename,
            FileExistsPolicy::OverwriteIfNewer,
        ] {
            assert_eq!(p.to_string().parse::<FileExistsPolicy>(), Ok(p));
        }
    }

    #[test]
    fn test_source_descriptor_side() {
        let entry = BatchEntry {
            name: "a.txt".into(),
            source: PathBuf::from("/remote/a.txt"),
            destination_dir: PathBuf::from("/local"),
            size: 3,
            modified: None,
            direction: Direction::Download,
            is_dir: false,
        };
        assert!(entry.source_descriptor().is_remote);
        assert_eq!(entry.destination_path("b.txt"), PathBuf::from("/local/b.txt"));
    }
}
