//! Executor backed by a local directory.
//!
//! `LocalExecutor` treats a directory on disk as the "remote" storage: remote
//! paths are resolved under its root. It is what the CLI uses for
//! directory-to-directory transfers, and it is handy in tests.

use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::executor::{ExecResult, TransferExecutor};
use crate::fs_ops;
use crate::model::DirEntry;

#[derive(Debug, Clone)]
pub struct LocalExecutor {
    root: PathBuf,
}

impl LocalExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a remote path onto the root; `..` is refused.
    fn resolve(&self, remote: &Path) -> ExecResult<PathBuf> {
        let mut resolved = self.root.clone();
        for component in remote.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    return Err(format!("Permission denied: path escapes root: {}", remote.display()))
                }
            }
        }
        Ok(resolved)
    }
}

/// Failure message naming only the file, so the root's own path never leaks
/// into classification.
fn describe(path: &Path, err: io::Error) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    format!("{}: {}", name, err)
}

async fn blocking<T, F>(f: F) -> ExecResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> ExecResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| format!("Transfer task failed: {}", e))?
}

#[async_trait]
impl TransferExecutor for LocalExecutor {
    async fn download(&self, remote_path: &Path, local_path: &Path) -> ExecResult<()> {
        let src = self.resolve(remote_path)?;
        let dst = local_path.to_path_buf();
        blocking(move || {
            fs_ops::copy_file_with_metadata(&src, &dst)
                .map(|_| ())
                .map_err(|e| describe(&src, e))
        })
        .await
    }

    async fn upload(&self, local_path: &Path, remote_path: &Path) -> ExecResult<()> {
        let src = local_path.to_path_buf();
        let dst = self.resolve(remote_path)?;
        blocking(move || {
            fs_ops::copy_file_with_metadata(&src, &dst)
                .map(|_| ())
                .map_err(|e| describe(&src, e))
        })
        .await
    }

    async fn list_directory(&self, path: &Path) -> ExecResult<Vec<DirEntry>> {
        let dir = self.resolve(path)?;
        let shown = path.display().to_string();
        blocking(move || {
            if !dir.is_dir() {
                return Err(format!("{}: No such file or directory", shown));
            }
            fs_ops::list_local_dir(&dir).map_err(|e| e.to_string())
        })
        .await
    }

    async fn create_directory(&self, path: &Path) -> ExecResult<()> {
        let dir = self.resolve(path)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| describe(&dir, e))
    }

    async fn reconnect(&self) -> ExecResult<()> {
        if tokio::fs::metadata(&self.root).await.is_ok() {
            Ok(())
        } else {
            Err("Storage root unavailable: not connected".to_string())
        }
    }
}
