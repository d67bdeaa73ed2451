//! # stagefetch
//!
//! Asynchronous remote-file fetch-and-stage pipeline.
//!
//! A [`RemoteFetchJob`] validates a source URL against an explicit policy
//! (scheme set, host allow-list), streams the resource to an exclusively-owned
//! staging file, and then either hands the staged file to a synchronous
//! persistence/verification collaborator or stashes it under a one-shot
//! session token and enqueues a deferred job for an external worker.
//!
//! ## Design Philosophy
//!
//! - **Explicit configuration** - All policy lives in [`FetchConfig`]; the
//!   pipeline never reads ambient global state
//! - **Structural cleanup** - A staged file that never reaches persistence is
//!   deleted, enforced by ownership rather than convention
//! - **No hidden retries** - Transfer failures are tagged retryable or not;
//!   the retry policy itself belongs to the caller ([`retry`])
//! - **Library-first** - No CLI or server surface, purely a Rust crate for
//!   embedding; consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use stagefetch::{FetchConfig, FetchRequest, FsPersister, RemoteFetchJob};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FetchConfig {
//!         allowed_hosts: vec!["files.example".to_string()],
//!         ..Default::default()
//!     };
//!     let mut job = RemoteFetchJob::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = job.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let request = FetchRequest::new("https://files.example/logo.png", "logo.png", "alice");
//!     let validated = job.validate(&request)?;
//!     let staged = job.fetch(&validated).await?;
//!     let result = job
//!         .complete_sync(staged, &validated, &FsPersister::new("./store"))
//!         .await?;
//!     println!("stored at {}", result.stored_path.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Fetch job state machine
pub mod job;
/// Deferred-job queue
pub mod queue;
/// Retry logic with exponential backoff
pub mod retry;
/// Staging-area management
pub mod staging;
/// Token-keyed stash for deferred completion
pub mod stash;
/// Core types and events
pub mod types;
/// Persistence/verification collaborator seam
pub mod verify;

// Re-export commonly used types
pub use config::{FetchConfig, RetryConfig};
pub use error::{Error, PolicyError, Result, StashError, TransferError, UploadError};
pub use job::RemoteFetchJob;
pub use queue::{DeferredJob, JobQueue};
pub use retry::{IsRetryable, fetch_with_retry};
pub use staging::{StagedFile, StagingArea};
pub use stash::{Stash, StashEntry};
pub use types::{
    Event, FetchRequest, JobState, SessionToken, TransferStatus, UploadResult, UploadSource,
    ValidatedRequest,
};
pub use verify::{FsPersister, Persister};
