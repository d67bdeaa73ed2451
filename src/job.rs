//! Remote fetch job: validate, fetch, and complete a single staging request.
//!
//! One job processes one request at a time through the lifecycle
//! `Pending -> Validating -> (Rejected | Fetching) -> (Failed | Staged) ->
//! (Verifying -> (Persisted | Rejected)) | (Stashed -> Enqueued)`.
//! Jobs share no mutable state with each other; each owns its staging file
//! exclusively until handoff or cleanup. The job never retries on its own —
//! retry policy belongs to the caller (see [`crate::retry`]).

use crate::config::FetchConfig;
use crate::error::{Error, PolicyError, TransferError, UploadError};
use crate::queue::{DeferredJob, JobQueue};
use crate::staging::{StagedFile, StagingArea};
use crate::stash::Stash;
use crate::types::{
    Event, FetchRequest, JobState, SessionToken, TransferStatus, UploadResult, UploadSource,
    ValidatedRequest,
};
use crate::verify::Persister;

use chrono::Utc;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A single fetch-and-stage job
///
/// Construct one per request with an explicit [`FetchConfig`]; the job never
/// consults global state. Collaborators (persister, stash, queue) are passed
/// into the completion methods.
///
/// # Examples
///
/// ```no_run
/// use stagefetch::{FetchConfig, FetchRequest, FsPersister, RemoteFetchJob};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = FetchConfig {
///         allowed_hosts: vec!["files.example".to_string()],
///         ..Default::default()
///     };
///     let mut job = RemoteFetchJob::new(config)?;
///
///     let request = FetchRequest::new("https://files.example/logo.png", "logo.png", "alice");
///     let validated = job.validate(&request)?;
///     let staged = job.fetch(&validated).await?;
///
///     let store = FsPersister::new("./store");
///     let result = job.complete_sync(staged, &validated, &store).await?;
///     println!("persisted {} ({} bytes)", result.destination_name, result.byte_count);
///     Ok(())
/// }
/// ```
pub struct RemoteFetchJob {
    config: FetchConfig,
    client: reqwest::Client,
    staging: StagingArea,
    state: JobState,
    status: TransferStatus,
    cancel: CancellationToken,
    event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl RemoteFetchJob {
    /// Create a job from an explicit configuration
    ///
    /// Builds the HTTP client (timeout, redirect limit, user agent, optional
    /// proxy) up front so transport misconfiguration surfaces here rather
    /// than mid-transfer.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the HTTP client
    /// cannot be constructed (e.g., a malformed proxy URL).
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone());
        if let Some(proxy) = &config.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        let client = builder.build()?;

        let staging = StagingArea::new(config.staging_dir.clone());
        let (event_tx, _) = tokio::sync::broadcast::channel(64);

        Ok(Self {
            config,
            client,
            staging,
            state: JobState::Pending,
            status: TransferStatus::Pending,
            cancel: CancellationToken::new(),
            event_tx,
        })
    }

    /// Subscribe to pipeline events for this job
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token for cooperative cancellation
    ///
    /// Cancelling between chunks aborts the transfer; the job deletes its
    /// partial staging file before returning.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Current transfer status
    pub fn status(&self) -> &TransferStatus {
        &self.status
    }

    /// Validate a URL request against policy, without any network I/O
    ///
    /// Rejects when the URL is malformed, the scheme is not allowed, or the
    /// host is absent from a non-empty allow-list. An empty allow-list allows
    /// all hosts — an explicit, intentional bypass. A request asking for
    /// asynchronous completion is downgraded to synchronous here when the
    /// configuration does not permit it.
    ///
    /// # Errors
    ///
    /// Returns a [`PolicyError`] naming the rejection reason; policy
    /// rejections are never retryable.
    pub fn validate(&mut self, request: &FetchRequest) -> Result<ValidatedRequest, PolicyError> {
        self.state = JobState::Validating;
        match self.check_url_policy(request) {
            Ok(validated) => Ok(self.accept(validated)),
            Err(e) => Err(self.reject(e)),
        }
    }

    /// Validate a request sourced from a local file
    ///
    /// No URL policy applies; the destination name falls back to the source
    /// file name when the request leaves it empty.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MissingDestination`] when no destination name
    /// can be resolved.
    pub fn validate_local(
        &mut self,
        request: &FetchRequest,
        source_path: &Path,
    ) -> Result<ValidatedRequest, PolicyError> {
        self.state = JobState::Validating;

        let name = request.destination_name.trim();
        let destination = if name.is_empty() {
            match source_path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => return Err(self.reject(PolicyError::MissingDestination)),
            }
        } else {
            name.to_string()
        };

        let allow_async = self.config.allow_async && request.allow_async;
        let validated = ValidatedRequest::new(
            request.clone(),
            UploadSource::FromFile(source_path.to_path_buf()),
            destination,
            allow_async,
        );
        Ok(self.accept(validated))
    }

    /// Validate a request resuming a previously stashed upload
    ///
    /// Used by the downstream worker that consumed a session token. The
    /// content was already fetched and host-checked when it was staged, so
    /// only the destination name is validated here.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::MissingDestination`] when the request carries
    /// no destination name.
    pub fn validate_stashed(
        &mut self,
        request: &FetchRequest,
        token: &SessionToken,
    ) -> Result<ValidatedRequest, PolicyError> {
        self.state = JobState::Validating;

        let name = request.destination_name.trim();
        if name.is_empty() {
            return Err(self.reject(PolicyError::MissingDestination));
        }

        let validated = ValidatedRequest::new(
            request.clone(),
            UploadSource::FromStash(token.clone()),
            name.to_string(),
            false,
        );
        Ok(self.accept(validated))
    }

    /// Bring the source's bytes into an exclusively-owned staging file
    ///
    /// For URL sources, issues a streaming GET (following redirects) and
    /// appends each received chunk to the destination, incrementing the byte
    /// count. For file sources, copies the local file through the same sink.
    /// If any single write fails to persist the full chunk, the transfer
    /// aborts immediately, the handle is closed, and the partial file is
    /// deleted — never silently truncated and kept.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`]; write and network failures may be retried
    /// by the caller, destination-file creation failure is fatal for the job
    /// instance. Partial state is always cleaned up.
    pub async fn fetch(&mut self, validated: &ValidatedRequest) -> Result<StagedFile, TransferError> {
        let source_desc = match validated.source() {
            UploadSource::FromUrl(url) => url.to_string(),
            UploadSource::FromFile(path) => path.display().to_string(),
            UploadSource::FromStash(_) => {
                let e = TransferError::UnsupportedSource { kind: "stash" };
                self.mark_failed(&e);
                return Err(e);
            }
        };

        self.state = JobState::Fetching;
        self.status = TransferStatus::InProgress;
        self.emit(Event::FetchStarted {
            source: source_desc.clone(),
        });
        tracing::info!(
            source = %source_desc,
            destination = validated.destination_name(),
            "Starting transfer to staging"
        );

        let (path, mut file) = match self.staging.allocate().await {
            Ok(allocated) => allocated,
            Err(e) => {
                self.mark_failed(&e);
                return Err(e);
            }
        };

        let outcome = match validated.source() {
            UploadSource::FromUrl(url) => self.transfer_url(url.clone(), &mut file).await,
            UploadSource::FromFile(src) => self.transfer_file(src, &mut file).await,
            UploadSource::FromStash(_) => Err(TransferError::UnsupportedSource { kind: "stash" }),
        };
        drop(file);

        match outcome {
            Ok((byte_count, sha256)) => {
                self.state = JobState::Staged;
                self.status = TransferStatus::Complete;
                self.emit(Event::Staged {
                    path: path.clone(),
                    byte_count,
                });
                tracing::info!(path = %path.display(), bytes = byte_count, "Transfer staged");
                Ok(StagedFile::new(path, byte_count, sha256))
            }
            Err(e) => {
                if let Err(remove_err) = tokio::fs::remove_file(&path).await
                    && remove_err.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(
                        path = %path.display(),
                        error = %remove_err,
                        "Failed to remove partial staging file"
                    );
                }
                self.mark_failed(&e);
                Err(e)
            }
        }
    }

    /// Hand the staged file to the persistence/verification collaborator
    ///
    /// On acceptance, ownership of the on-disk file passes to the persister.
    /// On any verification failure the staged file is deleted.
    ///
    /// # Errors
    ///
    /// Returns the collaborator's [`UploadError`]; the staged file no longer
    /// exists when this returns an error.
    pub async fn complete_sync<P>(
        &mut self,
        staged: StagedFile,
        validated: &ValidatedRequest,
        persister: &P,
    ) -> Result<UploadResult, UploadError>
    where
        P: Persister + ?Sized,
    {
        self.state = JobState::Verifying;
        tracing::info!(
            destination = validated.destination_name(),
            bytes = staged.byte_count(),
            "Verifying staged file"
        );

        match persister.verify_and_persist(&staged, validated).await {
            Ok(result) => {
                // The persister now owns the bytes; disarm the cleanup guard.
                let _ = staged.hand_off();
                self.state = JobState::Persisted;
                self.emit(Event::Persisted {
                    destination: result.destination_name.clone(),
                    byte_count: result.byte_count,
                });
                tracing::info!(
                    destination = %result.destination_name,
                    stored_path = %result.stored_path.display(),
                    "Upload persisted"
                );
                Ok(result)
            }
            Err(e) => {
                staged.discard().await;
                self.state = JobState::Rejected;
                self.emit(Event::Rejected {
                    reason: e.to_string(),
                });
                tracing::warn!(error = %e, "Verification rejected staged file");
                Err(e)
            }
        }
    }

    /// Stash the staged file under a session token and enqueue a deferred job
    ///
    /// Returns immediately without verifying content; the downstream worker
    /// consumes the token (exactly once) and performs verification later.
    /// Ownership of the staged file passes to the stash.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AsyncDisabled`] when the validated request does not
    /// permit asynchronous completion; the staged file is deleted in that
    /// case, honoring the rule that an unpersisted staged file never
    /// outlives its job.
    pub async fn complete_async(
        &mut self,
        staged: StagedFile,
        validated: &ValidatedRequest,
        stash: &Stash,
        queue: &JobQueue,
    ) -> Result<SessionToken, Error> {
        if !validated.allow_async() {
            staged.discard().await;
            return Err(Error::AsyncDisabled);
        }

        let byte_count = staged.byte_count();
        let token = stash.put(staged).await;
        self.state = JobState::Stashed;
        self.emit(Event::Stashed {
            token: token.clone(),
        });

        let request = validated.request();
        let job = DeferredJob {
            token: token.clone(),
            source_url: request.source_url.clone(),
            destination_name: validated.destination_name().to_string(),
            requested_by: request.requested_by.clone(),
            comment_text: request.comment_text.clone(),
            page_text: request.page_text.clone(),
            watch: request.watch,
            queued_at: Utc::now(),
        };
        queue.enqueue(job).await;

        self.state = JobState::Enqueued;
        self.emit(Event::Enqueued {
            token: token.clone(),
        });
        tracing::info!(token = %token, bytes = byte_count, "Deferred upload job enqueued");
        Ok(token)
    }

    fn check_url_policy(&self, request: &FetchRequest) -> Result<ValidatedRequest, PolicyError> {
        if !self.config.enable_url_fetch {
            return Err(PolicyError::FetchDisabled);
        }

        let raw = request.source_url.trim();
        let url = Url::parse(raw).map_err(|e| PolicyError::InvalidUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = url.scheme();
        if !self
            .config
            .allowed_schemes
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
        {
            return Err(PolicyError::DisallowedScheme {
                scheme: scheme.to_string(),
            });
        }

        let host = url.host_str().ok_or_else(|| PolicyError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL has no host".to_string(),
        })?;
        if !self.config.allowed_hosts.is_empty()
            && !self
                .config
                .allowed_hosts
                .iter()
                .any(|h| h.eq_ignore_ascii_case(host))
        {
            return Err(PolicyError::DisallowedHost {
                host: host.to_string(),
            });
        }

        let destination = resolve_destination_name(request, &url);
        let allow_async = self.config.allow_async && request.allow_async;
        Ok(ValidatedRequest::new(
            request.clone(),
            UploadSource::FromUrl(url),
            destination,
            allow_async,
        ))
    }

    fn accept(&mut self, validated: ValidatedRequest) -> ValidatedRequest {
        self.emit(Event::Validated {
            destination: validated.destination_name().to_string(),
            source_kind: validated.source().kind().to_string(),
        });
        tracing::debug!(
            destination = validated.destination_name(),
            source_kind = validated.source().kind(),
            "Request passed validation"
        );
        validated
    }

    fn reject(&mut self, err: PolicyError) -> PolicyError {
        self.state = JobState::Rejected;
        self.emit(Event::Rejected {
            reason: err.to_string(),
        });
        tracing::warn!(error = %err, "Request rejected by policy");
        err
    }

    fn mark_failed(&mut self, err: &TransferError) {
        self.state = JobState::Failed;
        self.status = TransferStatus::Failed(err.to_string());
        self.emit(Event::Failed {
            reason: err.to_string(),
        });
        tracing::warn!(error = %err, "Transfer failed");
    }

    fn emit(&self, event: Event) {
        // Nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    async fn transfer_url(
        &self,
        url: Url,
        file: &mut tokio::fs::File,
    ) -> Result<(u64, String), TransferError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TransferError::Network { source: e })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransferError::Network { source: e }));
        self.drain(stream, file).await
    }

    async fn transfer_file(
        &self,
        source_path: &Path,
        file: &mut tokio::fs::File,
    ) -> Result<(u64, String), TransferError> {
        let source = tokio::fs::File::open(source_path)
            .await
            .map_err(|e| TransferError::SourceRead { source: e })?;
        let stream = tokio_util::io::ReaderStream::new(source)
            .map(|chunk| chunk.map_err(|e| TransferError::SourceRead { source: e }));
        self.drain(stream, file).await
    }

    async fn drain<St, B>(
        &self,
        stream: St,
        file: &mut tokio::fs::File,
    ) -> Result<(u64, String), TransferError>
    where
        St: Stream<Item = Result<B, TransferError>> + Unpin,
        B: AsRef<[u8]>,
    {
        let (bytes, digest) = stream_to_sink(
            stream,
            file,
            self.config.max_file_size,
            &self.cancel,
            |written| self.emit(Event::FetchProgress { bytes: written }),
        )
        .await?;

        file.flush().await.map_err(|e| TransferError::WriteFailed {
            bytes_written: bytes,
            source: e,
        })?;
        Ok((bytes, digest))
    }
}

/// Drive a lazy, finite, non-restartable chunk stream into a sink
///
/// Returns the total bytes written and the hex-encoded SHA-256 digest of the
/// content. Aborts on the first short or failed write, when the optional size
/// limit would be exceeded, or when the cancellation token fires between
/// chunks. The caller owns cleanup of whatever the sink points at.
pub(crate) async fn stream_to_sink<St, B, W, F>(
    mut stream: St,
    sink: &mut W,
    max_bytes: Option<u64>,
    cancel: &CancellationToken,
    mut on_progress: F,
) -> Result<(u64, String), TransferError>
where
    St: Stream<Item = Result<B, TransferError>> + Unpin,
    B: AsRef<[u8]>,
    W: AsyncWrite + Unpin,
    F: FnMut(u64),
{
    let mut written: u64 = 0;
    let mut hasher = Sha256::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(TransferError::Cancelled {
                    bytes_written: written,
                });
            }
            next = stream.next() => next,
        };
        let Some(chunk) = next else { break };
        let chunk = chunk?;
        let bytes = chunk.as_ref();

        if let Some(limit) = max_bytes
            && written + bytes.len() as u64 > limit
        {
            return Err(TransferError::TooLarge { limit });
        }

        sink.write_all(bytes)
            .await
            .map_err(|e| TransferError::WriteFailed {
                bytes_written: written,
                source: e,
            })?;
        hasher.update(bytes);
        written += bytes.len() as u64;
        on_progress(written);
    }

    Ok((written, format!("{:x}", hasher.finalize())))
}

/// Resolve the destination name: the request's own name when present, else
/// the final non-empty URL path segment, else a generic fallback.
fn resolve_destination_name(request: &FetchRequest, url: &Url) -> String {
    let name = request.destination_name.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    if let Some(segments) = url.path_segments()
        && let Some(last) = segments.filter(|s| !s.is_empty()).last()
    {
        return last.to_string();
    }
    "download".to_string()
}
