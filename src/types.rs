//! Core types for stagefetch

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// A request to fetch a remote resource and stage it for upload
///
/// Carries the source, the desired destination name, and the metadata the
/// downstream persistence step needs. Requests are plain data; validation
/// produces an immutable [`ValidatedRequest`] and nothing mutates a request
/// after validation succeeds.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Source URL to fetch from
    pub source_url: String,
    /// Desired destination name (derived from the URL path when empty)
    pub destination_name: String,
    /// Identity of the requester, recorded on deferred jobs
    pub requested_by: String,
    /// Upload comment passed through to persistence
    #[serde(default)]
    pub comment_text: String,
    /// Initial page text passed through to persistence
    #[serde(default)]
    pub page_text: String,
    /// Whether the requester wants to watch the resulting page
    #[serde(default)]
    pub watch: bool,
    /// Whether the requester asked for asynchronous completion
    ///
    /// Honored only when the configuration also permits it; otherwise the
    /// request is downgraded to synchronous completion during validation.
    #[serde(default)]
    pub allow_async: bool,
}

impl FetchRequest {
    /// Create a request with the required fields; the rest default to empty
    pub fn new(
        source_url: impl Into<String>,
        destination_name: impl Into<String>,
        requested_by: impl Into<String>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            destination_name: destination_name.into(),
            requested_by: requested_by.into(),
            ..Default::default()
        }
    }
}

/// Where the bytes for an upload come from
///
/// Explicit variant tags replace virtual overriding: a single job type handles
/// every source, dispatching on the tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadSource {
    /// A remote URL, fetched over HTTP with redirect following
    FromUrl(Url),
    /// A local file, copied into the staging area
    FromFile(PathBuf),
    /// A previously staged upload, retrieved from the stash by token
    FromStash(SessionToken),
}

impl UploadSource {
    /// Short tag for the source kind, used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            UploadSource::FromUrl(_) => "url",
            UploadSource::FromFile(_) => "file",
            UploadSource::FromStash(_) => "stash",
        }
    }
}

/// A request that passed policy validation
///
/// Constructed only by [`RemoteFetchJob`](crate::RemoteFetchJob) validation;
/// immutable from then on.
#[derive(Clone, Debug)]
pub struct ValidatedRequest {
    request: FetchRequest,
    source: UploadSource,
    destination_name: String,
    allow_async: bool,
}

impl ValidatedRequest {
    pub(crate) fn new(
        request: FetchRequest,
        source: UploadSource,
        destination_name: String,
        allow_async: bool,
    ) -> Self {
        Self {
            request,
            source,
            destination_name,
            allow_async,
        }
    }

    /// The original request
    pub fn request(&self) -> &FetchRequest {
        &self.request
    }

    /// The validated upload source
    pub fn source(&self) -> &UploadSource {
        &self.source
    }

    /// The resolved destination name (never empty)
    pub fn destination_name(&self) -> &str {
        &self.destination_name
    }

    /// Whether asynchronous completion is effectively permitted
    ///
    /// True only when both the request asked for it and the configuration
    /// allows it.
    pub fn allow_async(&self) -> bool {
        self.allow_async
    }
}

/// Transfer progress for a single fetch attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// No transfer started yet
    Pending,
    /// Bytes are being streamed to the staging area
    InProgress,
    /// The staged file is complete
    Complete,
    /// The transfer failed with the given reason
    Failed(String),
}

/// Job lifecycle state
///
/// `Pending -> Validating -> (Rejected | Fetching) -> (Failed | Staged)
/// -> (Verifying -> (Persisted | Rejected)) | (Stashed -> Enqueued)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Created, nothing done yet
    Pending,
    /// Policy validation in progress
    Validating,
    /// Policy validation or verification rejected the request (terminal)
    Rejected,
    /// Streaming bytes into the staging area
    Fetching,
    /// The transfer failed (terminal)
    Failed,
    /// A complete staged file exists
    Staged,
    /// The downstream collaborator is verifying the staged file
    Verifying,
    /// The file was verified and persisted (terminal)
    Persisted,
    /// The staged file was stashed under a session token
    Stashed,
    /// A deferred job was enqueued for an external worker (terminal)
    Enqueued,
}

impl JobState {
    /// Whether the state is terminal for this job instance
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Rejected | JobState::Failed | JobState::Persisted | JobState::Enqueued
        )
    }
}

/// Opaque key referencing a previously staged upload
///
/// Created on stash, consumed exactly once by the downstream persistence
/// step; the stash invalidates the token on first use.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh random token (128 bits, hex-encoded)
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        let mut token = String::with_capacity(32);
        for b in bytes {
            use std::fmt::Write;
            // write! to a String cannot fail
            let _ = write!(token, "{:02x}", b);
        }
        Self(token)
    }

    /// The token text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a successful synchronous completion
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResult {
    /// Where the persisted file now lives
    pub stored_path: PathBuf,
    /// The destination name it was stored under
    pub destination_name: String,
    /// Size of the persisted file in bytes
    pub byte_count: u64,
    /// Hex-encoded SHA-256 digest of the content
    pub sha256: String,
}

/// Pipeline events, broadcast to subscribers
///
/// Consumers subscribe via [`RemoteFetchJob::subscribe`](crate::RemoteFetchJob::subscribe);
/// no polling required. Slow receivers may miss progress events.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum Event {
    /// Policy validation passed
    Validated {
        /// Resolved destination name
        destination: String,
        /// Source kind tag ("url", "file", "stash")
        source_kind: String,
    },
    /// Policy validation rejected the request
    Rejected {
        /// Rejection reason
        reason: String,
    },
    /// The transfer started
    FetchStarted {
        /// Source being fetched (URL or local path)
        source: String,
    },
    /// Bytes received and written so far
    FetchProgress {
        /// Total bytes written
        bytes: u64,
    },
    /// A complete staged file exists
    Staged {
        /// Staged file path
        path: PathBuf,
        /// Staged file size in bytes
        byte_count: u64,
    },
    /// The transfer failed and partial state was cleaned up
    Failed {
        /// Failure reason
        reason: String,
    },
    /// The staged file was verified and persisted
    Persisted {
        /// Destination name
        destination: String,
        /// Persisted size in bytes
        byte_count: u64,
    },
    /// The staged file was stashed under a session token
    Stashed {
        /// The session token
        token: SessionToken,
    },
    /// A deferred job was enqueued for an external worker
    Enqueued {
        /// The session token carried by the job
        token: SessionToken,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_token_is_opaque_hex() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), 32);
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_session_tokens_are_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Rejected.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Persisted.is_terminal());
        assert!(JobState::Enqueued.is_terminal());
        assert!(!JobState::Staged.is_terminal());
        assert!(!JobState::Stashed.is_terminal());
        assert!(!JobState::Verifying.is_terminal());
    }

    #[test]
    fn test_source_kind_tags() {
        let url = Url::parse("http://good.example/img.png").unwrap();
        assert_eq!(UploadSource::FromUrl(url).kind(), "url");
        assert_eq!(UploadSource::FromFile(PathBuf::from("/tmp/x")).kind(), "file");
        assert_eq!(
            UploadSource::FromStash(SessionToken::generate()).kind(),
            "stash"
        );
    }

    #[test]
    fn test_request_defaults() {
        let request = FetchRequest::new("http://good.example/img.png", "img.png", "alice");
        assert!(!request.allow_async);
        assert!(!request.watch);
        assert!(request.comment_text.is_empty());
    }
}
