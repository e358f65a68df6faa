//! Index retrieval from local paths and https repositories.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tokio::fs;
use tracing::debug;
use url::Url;

use crate::error::{IndexError, IndexResult};
use crate::types::IndexConfig;

pub mod http;
mod range;

use http::{fetch_remote, HttpTransport};

/// Upper bound for a single retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Where an index URL points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    /// An https URL.
    Remote(Url),

    /// A filesystem path.
    Local(PathBuf),
}

impl IndexLocation {
    /// Classify an index URL.
    ///
    /// `https://` URLs are remote. Everything else is a local path, with a
    /// leading `file://` stripped. A path that still carries another
    /// `<scheme>://` prefix is rejected when it is fetched, which only happens
    /// once it exists on disk.
    pub fn classify(url: &str) -> IndexResult<Self> {
        if url.starts_with("https://") {
            return Url::parse(url).map(Self::Remote).map_err(|e| {
                IndexError::InvalidUrl {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            });
        }

        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }

        Ok(Self::Local(PathBuf::from(url)))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

fn url_scheme(url: &str) -> Option<&str> {
    let (scheme, _) = url.split_once("://")?;
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

/// Retry budget and backoff shared by request retries and body resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_retries: u32,
    pub(crate) backoff_ms: u64,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &IndexConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Exponential backoff with full jitter for the given (1-based) attempt.
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let base = Duration::from_millis(self.backoff_ms.saturating_mul(factor)).min(MAX_BACKOFF);
        if base.is_zero() {
            return base;
        }

        let jittered_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64);
        Duration::from_millis(jittered_ms.max(10.min(base.as_millis() as u64)))
    }

    /// Server-provided delay, capped and jittered by ±10%.
    pub(crate) fn delay_for_retry_after(&self, retry_after: Duration) -> Duration {
        let capped = retry_after.min(MAX_BACKOFF);
        let jitter_factor: f64 = rand::thread_rng().gen_range(0.9_f64..=1.1_f64);
        let jittered_ms = ((capped.as_millis() as f64) * jitter_factor).round() as u64;
        Duration::from_millis(jittered_ms.max(100))
    }
}

/// Fetch the raw bytes at `location`.
///
/// Returns `Ok(None)` when a local path does not exist.
pub(crate) async fn fetch(
    location: &IndexLocation,
    arch: &str,
    transport: &dyn HttpTransport,
    policy: &RetryPolicy,
) -> IndexResult<Option<Vec<u8>>> {
    match location {
        IndexLocation::Local(path) => {
            if let Some(scheme) = path.to_str().and_then(url_scheme) {
                return Err(IndexError::UnsupportedScheme {
                    scheme: scheme.to_string(),
                });
            }
            read_local(path).await
        }
        IndexLocation::Remote(url) => fetch_remote(transport, url, arch, policy).await.map(Some),
    }
}

async fn read_local(path: &Path) -> IndexResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => {
            debug!(path = %path.display(), size = bytes.len(), "read local repository index");
            Ok(Some(bytes))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(IndexError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        }),
    }
}
