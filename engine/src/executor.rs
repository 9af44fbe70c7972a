//! Boundary to the backend that actually moves bytes.
//!
//! The engine never talks to a protocol directly. Everything it needs from a
//! backend is expressed by [`TransferExecutor`], and every failure comes back
//! as a plain message which the engine classifies.

use async_trait::async_trait;
use std::path::Path;

use crate::model::DirEntry;

/// Failure message reported by an executor.
pub type ExecResult<T> = std::result::Result<T, String>;

#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Copy a remote file to a local path.
    async fn download(&self, remote_path: &Path, local_path: &Path) -> ExecResult<()>;

    /// Copy a local file to a remote path.
    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ExecResult<()>;

    /// List a remote directory (non-recursive).
    async fn list_directory(&self, path: &Path) -> ExecResult<Vec<DirEntry>>;

    /// Create a remote directory. Creating an existing directory succeeds.
    async fn create_directory(&self, path: &Path) -> ExecResult<()>;

    /// Re-establish the backend session after repeated connection failures.
    ///
    /// Backends without a notion of reconnection keep the default, which makes
    /// the breaker give up.
    async fn reconnect(&self) -> ExecResult<()> {
        Err("Reconnect not supported".to_string())
    }
}
