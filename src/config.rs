//! Configuration types for stagefetch

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Fetch pipeline configuration
///
/// All policy and transport settings are explicit fields passed into
/// [`RemoteFetchJob::new`](crate::RemoteFetchJob::new); the pipeline never
/// consults ambient global state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Staging directory for in-flight transfers (default: "./staging")
    ///
    /// Created on first allocation. File names are random-suffixed so
    /// concurrent jobs never collide.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Whether fetching from remote URLs is enabled at all (default: true)
    #[serde(default = "default_true")]
    pub enable_url_fetch: bool,

    /// Whether asynchronous (stash-and-enqueue) completion is permitted (default: false)
    ///
    /// When false, requests asking for asynchronous mode are downgraded to
    /// synchronous completion during validation.
    #[serde(default)]
    pub allow_async: bool,

    /// URL schemes accepted for remote fetches (default: ["http", "https"])
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,

    /// Host allow-list for remote fetches (default: empty)
    ///
    /// An empty list means all hosts are allowed — an explicit, intentional
    /// bypass. A non-empty list rejects any URL whose host is absent, before
    /// any network call is made.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,

    /// Outbound proxy URL for fetches (None = direct connection)
    #[serde(default)]
    pub proxy: Option<String>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Maximum number of redirects to follow (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Maximum staged file size in bytes (None = unlimited)
    ///
    /// The transfer aborts and the partial file is deleted as soon as the
    /// limit would be exceeded.
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// User-Agent header sent with fetch requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            enable_url_fetch: true,
            allow_async: false,
            allowed_schemes: default_allowed_schemes(),
            allowed_hosts: Vec::new(),
            proxy: None,
            request_timeout: default_request_timeout(),
            max_redirects: default_max_redirects(),
            max_file_size: None,
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    /// Validate the configuration, returning an error naming the offending key
    pub fn validate(&self) -> Result<()> {
        if self.allowed_schemes.is_empty() {
            return Err(Error::Config {
                message: "at least one URL scheme must be allowed".to_string(),
                key: Some("allowed_schemes".to_string()),
            });
        }
        if self.staging_dir.as_os_str().is_empty() {
            return Err(Error::Config {
                message: "staging directory must not be empty".to_string(),
                key: Some("staging_dir".to_string()),
            });
        }
        if let Some(limit) = self.max_file_size
            && limit == 0
        {
            return Err(Error::Config {
                message: "maximum file size must be greater than zero".to_string(),
                key: Some("max_file_size".to_string()),
            });
        }
        Ok(())
    }
}

/// Retry configuration for caller-side retry policies
///
/// The fetch job itself never retries; callers wrap transfer attempts with
/// [`fetch_with_retry`](crate::retry::fetch_with_retry) when they want one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_true() -> bool {
    true
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_redirects() -> usize {
    10
}

fn default_user_agent() -> String {
    format!("stagefetch/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_allow_all_hosts() {
        let config = FetchConfig::default();
        assert!(config.allowed_hosts.is_empty());
        assert!(config.enable_url_fetch);
        assert!(!config.allow_async);
        assert_eq!(config.allowed_schemes, vec!["http", "https"]);
        assert!(config.max_file_size.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let config: FetchConfig =
            serde_json::from_str(r#"{"allowed_hosts": ["files.example"]}"#).unwrap();
        assert_eq!(config.allowed_hosts, vec!["files.example"]);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.staging_dir, PathBuf::from("./staging"));
    }

    #[test]
    fn test_validate_rejects_empty_schemes() {
        let config = FetchConfig {
            allowed_schemes: Vec::new(),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scheme"));
    }

    #[test]
    fn test_validate_rejects_zero_size_limit() {
        let config = FetchConfig {
            max_file_size: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_config_roundtrip() {
        let config = RetryConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: RetryConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_attempts, 5);
        assert_eq!(back.initial_delay, Duration::from_secs(1));
    }
}
