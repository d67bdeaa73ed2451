//! Staging-area management
//!
//! A staging area is a directory of in-flight transfers. It is the only
//! resource shared across jobs, so allocation must be collision-free: names
//! carry a random suffix and files are opened with `create_new`, which fails
//! closed if two jobs ever pick the same name.

use crate::error::TransferError;
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::path::{Path, PathBuf};

/// Attempts before giving up on finding an unused staging name.
const MAX_ALLOCATE_ATTEMPTS: u32 = 16;

/// Staging-file name prefix.
const STAGING_PREFIX: &str = "url_";

/// A directory holding in-flight and stashed transfers
#[derive(Clone, Debug)]
pub struct StagingArea {
    dir: PathBuf,
}

impl StagingArea {
    /// Create a handle to a staging directory (created lazily on allocation)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The staging directory path
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Allocate a fresh, exclusively-owned staging file
    ///
    /// The file is created with `create_new` so a name collision fails rather
    /// than silently reusing another job's file. Creation failure is fatal for
    /// the job instance.
    pub(crate) async fn allocate(&self) -> Result<(PathBuf, tokio::fs::File), TransferError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| TransferError::CreateFailed {
                dir: self.dir.clone(),
                source: e,
            })?;

        for _ in 0..MAX_ALLOCATE_ATTEMPTS {
            let name = format!("{}{}.tmp", STAGING_PREFIX, random_suffix());
            let path = self.dir.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "Allocated staging file");
                    return Ok((path, file));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(TransferError::CreateFailed {
                        dir: self.dir.clone(),
                        source: e,
                    });
                }
            }
        }

        Err(TransferError::CreateFailed {
            dir: self.dir.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "exhausted staging name attempts",
            ),
        })
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// A complete staged file, exclusively owned until handoff or cleanup
///
/// The file is deleted when this value is dropped unless ownership was handed
/// off to the persistence collaborator or the stash. This makes the cleanup
/// invariant structural: a staged file that never reaches persistence cannot
/// outlive its job.
#[derive(Debug)]
pub struct StagedFile {
    local_path: PathBuf,
    byte_count: u64,
    sha256: String,
    remove_on_drop: bool,
}

impl StagedFile {
    pub(crate) fn new(local_path: PathBuf, byte_count: u64, sha256: String) -> Self {
        Self {
            local_path,
            byte_count,
            sha256,
            remove_on_drop: true,
        }
    }

    /// Path of the staged file
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    /// Number of bytes actually written to the staged file
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    /// Hex-encoded SHA-256 digest of the staged content
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    /// Hand ownership of the on-disk file to another party
    ///
    /// Disarms the drop guard and returns the path. The receiver is now
    /// responsible for the file's lifetime.
    pub(crate) fn hand_off(mut self) -> PathBuf {
        self.remove_on_drop = false;
        self.local_path.clone()
    }

    /// Delete the staged file now
    pub(crate) async fn discard(mut self) {
        self.remove_on_drop = false;
        let path = self.local_path.clone();
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged file");
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.remove_on_drop
            && let Err(e) = std::fs::remove_file(&self.local_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %self.local_path.display(),
                error = %e,
                "Failed to remove abandoned staged file"
            );
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_allocate_creates_distinct_files() {
        let temp_dir = tempdir().unwrap();
        let staging = StagingArea::new(temp_dir.path());

        let (path_a, _file_a) = staging.allocate().await.unwrap();
        let (path_b, _file_b) = staging.allocate().await.unwrap();

        assert_ne!(path_a, path_b);
        assert!(path_a.exists());
        assert!(path_b.exists());
        assert!(
            path_a
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(STAGING_PREFIX)
        );
    }

    #[tokio::test]
    async fn test_allocate_creates_missing_directory() {
        let temp_dir = tempdir().unwrap();
        let staging = StagingArea::new(temp_dir.path().join("nested").join("staging"));

        let (path, _file) = staging.allocate().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_drop_removes_abandoned_file() {
        let temp_dir = tempdir().unwrap();
        let staging = StagingArea::new(temp_dir.path());
        let (path, _file) = staging.allocate().await.unwrap();

        let staged = StagedFile::new(path.clone(), 0, String::new());
        drop(staged);

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_hand_off_keeps_file() {
        let temp_dir = tempdir().unwrap();
        let staging = StagingArea::new(temp_dir.path());
        let (path, _file) = staging.allocate().await.unwrap();

        let staged = StagedFile::new(path.clone(), 0, String::new());
        let handed = staged.hand_off();

        assert_eq!(handed, path);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_discard_removes_file() {
        let temp_dir = tempdir().unwrap();
        let staging = StagingArea::new(temp_dir.path());
        let (path, _file) = staging.allocate().await.unwrap();

        let staged = StagedFile::new(path.clone(), 0, String::new());
        staged.discard().await;

        assert!(!path.exists());
    }
}
