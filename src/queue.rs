//! Deferred-job queue for asynchronous upload completion
//!
//! Asynchronous completion stashes the staged file and enqueues a
//! [`DeferredJob`] carrying the session token and request metadata. An
//! external worker drains the queue in FIFO order, consumes each token, and
//! runs verification and persistence; that worker is outside this crate's
//! scope.

use crate::types::SessionToken;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A (token, metadata) tuple queued for later processing
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeferredJob {
    /// Session token referencing the stashed file
    pub token: SessionToken,
    /// The original source URL, for audit and re-fetch-on-loss policies
    pub source_url: String,
    /// Destination name resolved at validation time
    pub destination_name: String,
    /// Identity that initiated the upload
    pub requested_by: String,
    /// Upload comment to apply on persistence
    pub comment_text: String,
    /// Initial page text to apply on persistence
    pub page_text: String,
    /// Whether the requester wants to watch the resulting page
    pub watch: bool,
    /// When the job was enqueued
    pub queued_at: DateTime<Utc>,
}

impl DeferredJob {
    /// Serialize the job to a JSON payload for an external queue backend
    pub fn payload(&self) -> crate::error::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Rebuild the request the worker should complete
    pub fn to_request(&self) -> crate::types::FetchRequest {
        crate::types::FetchRequest {
            source_url: self.source_url.clone(),
            destination_name: self.destination_name.clone(),
            requested_by: self.requested_by.clone(),
            comment_text: self.comment_text.clone(),
            page_text: self.page_text.clone(),
            watch: self.watch,
            allow_async: false,
        }
    }
}

/// FIFO queue of deferred upload jobs
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<DeferredJob>>,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job to the back of the queue
    pub async fn enqueue(&self, job: DeferredJob) {
        tracing::debug!(token = %job.token, destination = %job.destination_name, "Enqueued deferred job");
        self.jobs.lock().await.push_back(job);
    }

    /// Remove and return the oldest job, if any
    pub async fn dequeue(&self) -> Option<DeferredJob> {
        self.jobs.lock().await.pop_front()
    }

    /// Number of queued jobs
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}
