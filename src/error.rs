//! Error types for stagefetch
//!
//! This module provides the error taxonomy for the fetch-and-stage pipeline:
//! - Policy rejections (determined without network I/O, never retryable)
//! - Transfer failures (terminal for the attempt, retryable by the caller)
//! - Upload failures (downstream verification rejected the staged content)
//! - Stash failures (unknown or already-consumed session tokens)
//!
//! Every failure path returns a tagged reason rather than a boolean; nothing
//! is silently swallowed.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for stagefetch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for stagefetch
///
/// This is the primary error type used throughout the library. Domain-specific
/// failures are nested sub-errors so callers can match on the stage that failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "staging_dir")
        key: Option<String>,
    },

    /// Policy rejection (invalid URL, disallowed scheme or host)
    #[error("policy rejection: {0}")]
    Policy(#[from] PolicyError),

    /// Transfer failure while streaming to the staging area
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Downstream persistence/verification failure
    #[error("upload error: {0}")]
    Upload(#[from] UploadError),

    /// Stash failure (unknown or already-consumed token)
    #[error("stash error: {0}")]
    Stash(#[from] StashError),

    /// Asynchronous completion requested but not permitted
    #[error("asynchronous completion is not permitted for this request")]
    AsyncDisabled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Validation failure determined without performing network I/O
///
/// Policy rejections are always terminal and caller-visible; retrying the
/// same request can never succeed.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Fetching from remote URLs is disabled in the configuration
    #[error("fetching from remote URLs is disabled")]
    FetchDisabled,

    /// The source URL could not be parsed
    #[error("invalid source URL '{url}': {reason}")]
    InvalidUrl {
        /// The offending URL text
        url: String,
        /// Why parsing or structural validation failed
        reason: String,
    },

    /// The URL scheme is not in the allowed set
    #[error("scheme '{scheme}' is not allowed for remote fetches")]
    DisallowedScheme {
        /// The rejected scheme
        scheme: String,
    },

    /// The URL host is absent from a non-empty host allow-list
    #[error("host '{host}' is not in the fetch allow-list")]
    DisallowedHost {
        /// The rejected host
        host: String,
    },

    /// No destination name was provided and none could be derived
    #[error("no destination name provided and none could be derived")]
    MissingDestination,
}

/// Failure while bringing bytes into the staging area
///
/// Transfer errors are terminal for the attempt. `WriteFailed`, `Network`, and
/// server-side `HttpStatus` failures may be retried by the caller (the job
/// itself never retries); `CreateFailed` is fatal for the job instance. Every
/// transfer failure leaves no partial file behind.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Could not create the exclusive destination file in the staging area
    #[error("failed to create staging file in '{dir}': {source}")]
    CreateFailed {
        /// Staging directory the allocation was attempted in
        dir: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A chunk failed to persist fully to the destination file
    #[error("write failed after {bytes_written} bytes: {source}")]
    WriteFailed {
        /// Bytes fully written before the failure
        bytes_written: u64,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The HTTP request or response stream failed
    #[error("network failure during transfer: {source}")]
    Network {
        /// Underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status
    #[error("HTTP status {status} fetching '{url}'")]
    HttpStatus {
        /// The HTTP status code
        status: u16,
        /// The fetched URL
        url: String,
    },

    /// Reading a local source file failed
    #[error("failed to read source file: {source}")]
    SourceRead {
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The response body exceeded the configured size limit
    #[error("transfer exceeded maximum size of {limit} bytes")]
    TooLarge {
        /// The configured limit in bytes
        limit: u64,
    },

    /// The caller abandoned the transfer between chunks
    #[error("transfer cancelled after {bytes_written} bytes")]
    Cancelled {
        /// Bytes written before cancellation
        bytes_written: u64,
    },

    /// The validated source kind cannot be brought into staging by `fetch`
    #[error("source kind '{kind}' cannot be fetched")]
    UnsupportedSource {
        /// The source kind tag
        kind: &'static str,
    },
}

/// Downstream persistence/verification failure
///
/// Terminal for the staged file; the pipeline deletes the staged file on any
/// upload error.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The verification collaborator rejected the staged content
    #[error("verification rejected '{destination}': {reason}")]
    Rejected {
        /// The requested destination name
        destination: String,
        /// Why the content was rejected
        reason: String,
    },

    /// I/O failure while verifying or persisting the staged file
    #[error("persistence I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Stash failure
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StashError {
    /// The session token does not reference a staged upload
    ///
    /// A consumed token is indistinguishable from one that never existed;
    /// tokens are invalidated on first use.
    #[error("unknown or already-consumed session token")]
    UnknownToken,
}
