//! Configuration, per-call options and result types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::decode::ApkIndex;
use crate::fetch::http::HttpTransport;

/// Index client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient failures and for resuming interrupted bodies.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base of the exponential retry backoff, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// User-Agent sent by the default client.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    crate::INDEX_USER_AGENT.to_string()
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl IndexConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `APK_INDEX_TIMEOUT` | Request timeout in seconds |
    /// | `APK_INDEX_MAX_RETRIES` | Retry budget per request and per body |
    /// | `APK_INDEX_RETRY_BACKOFF_MS` | Base retry backoff in milliseconds |
    /// | `APK_INDEX_USER_AGENT` | User-Agent header |
    pub fn from_env() -> Self {
        Self {
            timeout_secs: std::env::var("APK_INDEX_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            max_retries: std::env::var("APK_INDEX_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_max_retries),
            retry_backoff_ms: std::env::var("APK_INDEX_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_retry_backoff_ms),
            user_agent: std::env::var("APK_INDEX_USER_AGENT")
                .unwrap_or_else(|_| default_user_agent()),
        }
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the base retry backoff.
    pub fn with_retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    /// Set the User-Agent.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Per-call options.
#[derive(Clone, Default)]
pub struct IndexOptions {
    /// Skip signature verification and decode the fetched bytes as-is.
    pub ignore_signatures: bool,

    /// Transport used for https fetches instead of the cache's default client.
    pub http_client: Option<Arc<dyn HttpTransport>>,
}

impl IndexOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip signature verification.
    pub fn with_ignore_signatures(mut self, ignore: bool) -> Self {
        self.ignore_signatures = ignore;
        self
    }

    /// Override the https transport.
    pub fn with_http_client(mut self, client: Arc<dyn HttpTransport>) -> Self {
        self.http_client = Some(client);
        self
    }
}

impl fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexOptions")
            .field("ignore_signatures", &self.ignore_signatures)
            .field("http_client", &self.http_client.is_some())
            .finish()
    }
}

/// A repository together with its parsed index.
#[derive(Debug, Clone)]
pub struct Repository {
    /// Repository base for one architecture (`{base_url}/{arch}`).
    pub uri: String,

    /// Parsed index.
    pub index: Arc<ApkIndex>,
}

/// An index loaded for a repository line, with its optional pin name.
#[derive(Debug, Clone)]
pub struct NamedIndex {
    /// Pin name; empty for unpinned repositories.
    pub name: String,

    /// Repository and index.
    pub repository: Repository,
}

impl NamedIndex {
    pub fn new(name: impl Into<String>, repository: Repository) -> Self {
        Self {
            name: name.into(),
            repository,
        }
    }

    /// Pin name (empty when unpinned).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the repository was pinned.
    pub fn is_pinned(&self) -> bool {
        !self.name.is_empty()
    }

    /// Repository base URI.
    pub fn uri(&self) -> &str {
        &self.repository.uri
    }

    pub fn index(&self) -> &ApkIndex {
        &self.repository.index
    }
}
