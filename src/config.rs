//! Configuration for the Sala Solidária client

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

/// Environment variable holding the backend base URL
pub const ENV_BACKEND_URL: &str = "SALA_BACKEND_URL";

/// Environment variable holding the public API key
pub const ENV_API_KEY: &str = "SALA_API_KEY";

/// Tunables shared by the HTTP backends and the services
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request timeout
    pub request_timeout: Option<Duration>,

    /// How often a live item subscription re-reads its query over HTTP
    pub poll_interval: Duration,

    /// Retries for idempotent reads after a transient failure
    pub max_retries: u32,

    /// Delay before the first retry; doubled on every further attempt
    pub retry_backoff: Duration,

    /// Name of the database function that commits a write batch
    pub batch_rpc: String,

    /// Delete a project's items together with the project
    pub cascade_item_delete: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            poll_interval: Duration::from_secs(2),
            max_retries: 2,
            retry_backoff: Duration::from_millis(250),
            batch_rpc: "commit_batch".to_string(),
            cascade_item_delete: false,
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the live subscription poll interval
    pub fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }

    /// Set the retry count for idempotent reads
    pub fn with_max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    /// Set the initial retry backoff
    pub fn with_retry_backoff(mut self, value: Duration) -> Self {
        self.retry_backoff = value;
        self
    }

    /// Set the batch commit function name
    pub fn with_batch_rpc(mut self, value: &str) -> Self {
        self.batch_rpc = value.to_string();
        self
    }

    /// Set whether deleting a project also deletes its items
    pub fn with_cascade_item_delete(mut self, value: bool) -> Self {
        self.cascade_item_delete = value;
        self
    }
}

/// Connection settings for a hosted backend
#[derive(Debug, Clone)]
pub struct Config {
    pub url: Url,
    pub api_key: String,
    pub options: ClientOptions,
}

impl Config {
    /// Create a configuration, validating the URL and key
    pub fn new(url: &str, api_key: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| Error::config(format!("invalid backend URL: {}", e)))?;
        if api_key.trim().is_empty() {
            return Err(Error::config("api key cannot be empty"));
        }
        Ok(Self {
            url,
            api_key: api_key.to_string(),
            options: ClientOptions::default(),
        })
    }

    /// Read `SALA_BACKEND_URL` and `SALA_API_KEY` from the environment
    pub fn from_env() -> Result<Self> {
        let url = std::env::var(ENV_BACKEND_URL)
            .map_err(|_| Error::config(format!("{} environment variable not found", ENV_BACKEND_URL)))?;
        let key = std::env::var(ENV_API_KEY)
            .map_err(|_| Error::config(format!("{} environment variable not found", ENV_API_KEY)))?;
        Self::new(&url, &key)
    }

    /// Replace the options
    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}
