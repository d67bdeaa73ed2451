//! Token-keyed stash for deferred upload completion
//!
//! A stash holds staged files whose verification is deferred to a downstream
//! worker. Each entry is referenced by an opaque [`SessionToken`] created on
//! insert and consumed exactly once: [`Stash::take`] removes the entry, so a
//! second take with the same token fails with [`StashError::UnknownToken`].

use crate::error::StashError;
use crate::staging::StagedFile;
use crate::types::SessionToken;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

/// A staged upload held for deferred completion
#[derive(Clone, Debug)]
pub struct StashEntry {
    /// Path of the stashed file, now owned by the stash
    pub local_path: PathBuf,
    /// Size of the stashed file in bytes
    pub byte_count: u64,
    /// Hex-encoded SHA-256 digest of the content
    pub sha256: String,
    /// When the file was stashed
    pub stashed_at: DateTime<Utc>,
}

impl StashEntry {
    /// Re-arm the cleanup guard for worker-side processing
    ///
    /// The returned [`StagedFile`] behaves exactly like a freshly fetched one:
    /// deleted on drop unless persistence takes ownership.
    pub fn into_staged(self) -> StagedFile {
        StagedFile::new(self.local_path, self.byte_count, self.sha256)
    }
}

/// In-memory stash of staged uploads keyed by session token
#[derive(Debug, Default)]
pub struct Stash {
    entries: Mutex<HashMap<SessionToken, StashEntry>>,
}

impl Stash {
    /// Create an empty stash
    pub fn new() -> Self {
        Self::default()
    }

    /// Stash a staged file, taking ownership of it
    ///
    /// Disarms the file's cleanup guard and returns the fresh token that now
    /// references it.
    pub async fn put(&self, staged: StagedFile) -> SessionToken {
        let entry = StashEntry {
            byte_count: staged.byte_count(),
            sha256: staged.sha256().to_string(),
            local_path: staged.hand_off(),
            stashed_at: Utc::now(),
        };

        let token = SessionToken::generate();
        tracing::debug!(token = %token, path = %entry.local_path.display(), "Stashed upload");
        self.entries.lock().await.insert(token.clone(), entry);
        token
    }

    /// Consume a token, removing and returning its entry
    ///
    /// Ownership of the on-disk file passes to the caller. The token is
    /// invalidated by the removal; a consumed token cannot be used to stage a
    /// second completion.
    ///
    /// # Errors
    ///
    /// Returns [`StashError::UnknownToken`] when the token does not reference
    /// a staged upload (never existed, already consumed, or purged).
    pub async fn take(&self, token: &SessionToken) -> Result<StashEntry, StashError> {
        self.entries
            .lock()
            .await
            .remove(token)
            .ok_or(StashError::UnknownToken)
    }

    /// Whether the stash currently holds an entry for the token
    pub async fn contains(&self, token: &SessionToken) -> bool {
        self.entries.lock().await.contains_key(token)
    }

    /// Number of stashed uploads
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Whether the stash is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Delete stashed uploads older than `max_age`, including their files
    ///
    /// Entries nobody ever consumed must not leak staging space forever.
    /// Returns the number of purged entries.
    pub async fn purge_older_than(&self, max_age: Duration) -> usize {
        // A max_age too large to represent means nothing can have expired
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired: Vec<(SessionToken, StashEntry)> = {
            let mut entries = self.entries.lock().await;
            let tokens: Vec<SessionToken> = entries
                .iter()
                .filter(|(_, e)| e.stashed_at < cutoff)
                .map(|(t, _)| t.clone())
                .collect();
            tokens
                .into_iter()
                .filter_map(|t| entries.remove(&t).map(|e| (t, e)))
                .collect()
        };

        let purged = expired.len();
        for (token, entry) in expired {
            tracing::info!(token = %token, path = %entry.local_path.display(), "Purging expired stash entry");
            if let Err(e) = tokio::fs::remove_file(&entry.local_path).await
                && e.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %entry.local_path.display(), error = %e, "Failed to remove expired stash file");
            }
        }
        purged
    }
}
