//! Local filesystem operations.
//!
//! This module provides the local-side helpers the orchestrator and the
//! [`LocalExecutor`](crate::local::LocalExecutor) need:
//! - Listing a local directory (destination listing for downloads)
//! - Enumerating a local tree (source of folder uploads)
//! - Copying files with modification-time preservation
//! - Creating parent directories recursively
//!
//! Functions here are synchronous; async callers wrap them in
//! `tokio::task::spawn_blocking`.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};
use crate::model::DirEntry;

/// One file or directory found by [`enumerate_tree`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Full path on disk
    pub path: PathBuf,
    /// Path relative to the enumerated root
    pub relative: PathBuf,
    /// File size in bytes (0 for directories)
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub is_dir: bool,
}

pub fn modified_time(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
    metadata.modified().ok().map(DateTime::<Utc>::from)
}

/// True if `name` is a single plain path component.
///
/// Names coming from a remote listing or a rename prompt are joined onto a
/// local destination; separators, `..` and absolute names would leave it.
pub fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// List the entries of a local directory.
///
/// A directory that does not exist yet has no entries, so nothing in it can
/// collide; that case returns an empty list rather than an error.
pub fn list_local_dir(path: &Path) -> Result<Vec<DirEntry>> {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(EngineError::io(path, e)),
    };

    let mut listing = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::io(path, e))?;
        let metadata = entry.metadata().map_err(|e| EngineError::io(entry.path(), e))?;
        listing.push(DirEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: modified_time(&metadata),
            is_dir: metadata.is_dir(),
        });
    }
    Ok(listing)
}

/// Enumerate the tree under `root`.
///
/// Directories are listed before their contents, so creating destination
/// directories in order is always valid.
///
/// # Errors
/// Returns EngineError if any directory in the tree cannot be read.
pub fn enumerate_tree(root: &Path) -> Result<Vec<TreeEntry>> {
    fn recurse(path: &Path, relative: &Path, items: &mut Vec<TreeEntry>) -> Result<()> {
        let entries = fs::read_dir(path).map_err(|e| EngineError::io(path, e))?;

        for entry in entries {
            let entry = entry.map_err(|e| EngineError::io(path, e))?;
            let metadata = entry.metadata().map_err(|e| EngineError::io(entry.path(), e))?;

            let entry_path = entry.path();
            let rel_full_path = relative.join(entry.file_name());

            if metadata.is_dir() {
                items.push(TreeEntry {
                    path: entry_path.clone(),
                    relative: rel_full_path.clone(),
                    size: 0,
                    modified: modified_time(&metadata),
                    is_dir: true,
                });
                recurse(&entry_path, &rel_full_path, items)?;
            } else {
                items.push(TreeEntry {
                    path: entry_path,
                    relative: rel_full_path,
                    size: metadata.len(),
                    modified: modified_time(&metadata),
                    is_dir: false,
                });
            }
        }
        Ok(())
    }

    let mut items = Vec::new();
    recurse(root, Path::new(""), &mut items)?;
    Ok(items)
}

/// Copy a file from source to destination, preserving its modification time.
///
/// Returns the number of bytes copied. Errors are the raw `io::Error`s so the
/// caller can report the OS message unchanged.
pub fn copy_file_with_metadata(src: &Path, dst: &Path) -> io::Result<u64> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src)?;
    let src_mtime = src_file.metadata()?.modified().ok();

    let mut dst_file = fs::File::create(dst)?;
    let bytes_copied = io::copy(&mut src_file, &mut dst_file)?;
    drop(dst_file);

    if let Some(mtime) = src_mtime {
        // Best effort: a failed mtime update does not fail the copy
        let _ = filetime::set_file_mtime(dst, filetime::FileTime::from_system_time(mtime));
    }

    Ok(bytes_copied)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Parent path exists but is not a directory: {}", parent.display()),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(parent),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_enumerate_nested_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).expect("Failed to create src dir");

        let subdir = src.join("subdir");
        fs::create_dir(&subdir).expect("Failed to create subdir");

        let mut file1 = fs::File::create(src.join("file1.txt")).expect("Failed to create file1");
        file1.write_all(b"data1").expect("Failed to write file1");

        let mut file2 = fs::File::create(subdir.join("file2.txt")).expect("Failed to create file2");
        file2.write_all(b"data2").expect("Failed to write file2");

        let items = enumerate_tree(&src).expect("Failed to enumerate");

        let dirs: Vec<_> = items.iter().filter(|f| f.is_dir).collect();
        let files: Vec<_> = items.iter().filter(|f| !f.is_dir).collect();
        assert_eq!(dirs.len(), 1);
        assert_eq!(files.len(), 2);

        // directory comes before the file inside it
        let dir_pos = items.iter().position(|f| f.is_dir).unwrap();
        let nested_pos = items
            .iter()
            .position(|f| f.relative == Path::new("subdir").join("file2.txt"))
            .expect("nested file enumerated");
        assert!(dir_pos < nested_pos);
    }

    #[test]
    fn test_enumerate_nonexistent_source() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = enumerate_tree(&temp_dir.path().join("nonexistent"));
        assert!(result.is_err());
    }

    #[test]
    fn test_list_local_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("a.txt"), "abc").expect("Failed to write file");
        fs::create_dir(temp_dir.path().join("sub")).expect("Failed to create subdir");

        let mut listing = list_local_dir(temp_dir.path()).expect("Failed to list");
        listing.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].name, "a.txt");
        assert_eq!(listing[0].size, 3);
        assert!(!listing[0].is_dir);
        assert!(listing[0].modified.is_some());
        assert!(listing[1].is_dir);
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let listing = list_local_dir(&temp_dir.path().join("later")).expect("Failed to list");
        assert!(listing.is_empty());
    }

    #[test]
    fn test_plain_names() {
        assert!(is_plain_name("report.pdf"));
        assert!(is_plain_name("a (1).txt"));
        assert!(is_plain_name("..hidden"));

        assert!(!is_plain_name(""));
        assert!(!is_plain_name("."));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("/tmp/escape.txt"));
        assert!(!is_plain_name("../up.txt"));
        assert!(!is_plain_name("sub/file.txt"));
        assert!(!is_plain_name("sub/"));
        assert!(!is_plain_name("dir\\file.txt"));
    }

    #[test]
    fn test_copy_file_with_metadata() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("nested").join("dest.txt");

        fs::write(&src_file, b"test content").expect("Failed to write source");
        let old = filetime::FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&src_file, old).expect("Failed to set mtime");

        let bytes = copy_file_with_metadata(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);
        assert_eq!(fs::read_to_string(&dst_file).unwrap(), "test content");

        let copied = fs::metadata(&dst_file).unwrap();
        assert_eq!(filetime::FileTime::from_last_modification_time(&copied), old);
    }

    #[test]
    fn test_copy_missing_source_reports_os_message() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let err = copy_file_with_metadata(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("out.txt"),
        )
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
