//! Persistence/verification collaborator seam
//!
//! The pipeline hands a complete [`StagedFile`] to a [`Persister`], which
//! verifies the content and either takes ownership of the bytes (accept) or
//! rejects with a tagged reason. [`FsPersister`] is a filesystem-backed
//! implementation suitable for local stores and tests.

use crate::error::UploadError;
use crate::staging::StagedFile;
use crate::types::{UploadResult, ValidatedRequest};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Downstream persistence and verification service
///
/// On `Ok`, the implementation has taken ownership of the staged bytes
/// (typically by moving the file into its store); the pipeline disarms the
/// staging cleanup guard. On `Err`, the pipeline deletes the staged file.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Verify the staged file and persist it under the request's destination
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Rejected`] when verification refuses the
    /// content, or [`UploadError::Io`] on storage failure.
    async fn verify_and_persist(
        &self,
        staged: &StagedFile,
        request: &ValidatedRequest,
    ) -> Result<UploadResult, UploadError>;
}

/// Filesystem-backed persister
///
/// Verifies that the staged file exists, is non-empty, and matches its
/// recorded byte count, then moves it into the store directory under the
/// destination name. Refuses to overwrite an existing destination.
#[derive(Clone, Debug)]
pub struct FsPersister {
    store_dir: PathBuf,
}

impl FsPersister {
    /// Create a persister storing files under `store_dir`
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
        }
    }

    /// The store directory
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }
}

#[async_trait]
impl Persister for FsPersister {
    async fn verify_and_persist(
        &self,
        staged: &StagedFile,
        request: &ValidatedRequest,
    ) -> Result<UploadResult, UploadError> {
        let destination = request.destination_name().to_string();

        let metadata = tokio::fs::metadata(staged.local_path()).await?;
        if metadata.len() != staged.byte_count() {
            return Err(UploadError::Rejected {
                destination,
                reason: format!(
                    "staged size {} does not match recorded byte count {}",
                    metadata.len(),
                    staged.byte_count()
                ),
            });
        }
        if staged.byte_count() == 0 {
            return Err(UploadError::Rejected {
                destination,
                reason: "file is empty".to_string(),
            });
        }

        tokio::fs::create_dir_all(&self.store_dir).await?;
        let stored_path = self.store_dir.join(&destination);
        if tokio::fs::try_exists(&stored_path).await? {
            return Err(UploadError::Rejected {
                destination,
                reason: "destination already exists".to_string(),
            });
        }

        // Prefer a rename; fall back to copy+remove across filesystems
        if tokio::fs::rename(staged.local_path(), &stored_path)
            .await
            .is_err()
        {
            copy_then_remove(staged.local_path(), &stored_path).await?;
        }

        tracing::info!(
            destination = %destination,
            stored_path = %stored_path.display(),
            bytes = staged.byte_count(),
            "Persisted upload"
        );

        Ok(UploadResult {
            stored_path,
            destination_name: destination,
            byte_count: staged.byte_count(),
            sha256: staged.sha256().to_string(),
        })
    }
}

/// Copy fallback for moves across filesystems
///
/// A copy that fails partway must not leave bytes under the destination name,
/// or every later attempt would be refused as a collision. Once the copy has
/// succeeded the content is persisted; a staged file that then cannot be
/// removed is a leak worth a warning, not a failed persist.
async fn copy_then_remove(source: &Path, stored_path: &Path) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::copy(source, stored_path).await {
        if let Err(cleanup) = tokio::fs::remove_file(stored_path).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %stored_path.display(),
                error = %cleanup,
                "Failed to remove partial store file"
            );
        }
        return Err(e);
    }

    if let Err(e) = tokio::fs::remove_file(source).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::warn!(
            path = %source.display(),
            error = %e,
            "Failed to remove staged file after copy"
        );
    }
    Ok(())
}
