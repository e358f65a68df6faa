//! In-memory cache of loaded indexes.
//!
//! Create one [`IndexCache`] at startup and share it (it is cheap to clone)
//! with everything that loads indexes. Entries live as long as the cache;
//! there is no eviction.
//!
//! - https indexes are loaded at most once. Concurrent callers for the same
//!   URL wait for the first load and all observe its outcome, success or
//!   failure. The load runs as its own task, so a caller that gives up
//!   waiting does not abort it for the others.
//! - Local indexes are reloaded whenever the file's modification time is
//!   newer than the one recorded at the last load. A missing file is not
//!   cached.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::fs;
use tracing::{debug, error, info};

use crate::decode::{ApkIndex, ApkIndexDecoder, IndexDecoder};
use crate::error::{IndexError, IndexResult};
use crate::fetch::http::{HttpTransport, ReqwestTransport};
use crate::fetch::{fetch, IndexLocation, RetryPolicy};
use crate::trust::TrustKeys;
use crate::types::{IndexConfig, IndexOptions};
use crate::verify::verify_index;

/// Stored outcome of one load.
type Outcome = IndexResult<Option<Arc<ApkIndex>>>;

type InFlight = Shared<BoxFuture<'static, ()>>;

/// Process-lifetime cache of repository indexes, keyed by index URL.
#[derive(Clone)]
pub struct IndexCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    /// Index URL -> outcome of the last load.
    entries: Mutex<HashMap<String, Outcome>>,

    /// Remote index URL -> load shared by every caller.
    in_flight: Mutex<HashMap<String, InFlight>>,

    /// Local index URL -> modification time recorded at the last load.
    local: Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<SystemTime>>>>>,

    transport: Arc<dyn HttpTransport>,
    decoder: Arc<dyn IndexDecoder>,
    policy: RetryPolicy,
}

impl IndexCache {
    /// Create a cache using the default reqwest transport and APKINDEX decoder.
    pub fn new(config: &IndexConfig) -> IndexResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config)?);
        Ok(Self::with_components(
            transport,
            Arc::new(ApkIndexDecoder),
            config,
        ))
    }

    /// Create a cache from environment configuration.
    pub fn from_env() -> IndexResult<Self> {
        Self::new(&IndexConfig::from_env())
    }

    /// Create a cache with a custom transport and decoder.
    pub fn with_components(
        transport: Arc<dyn HttpTransport>,
        decoder: Arc<dyn IndexDecoder>,
        config: &IndexConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                local: Mutex::new(HashMap::new()),
                transport,
                decoder,
                policy: RetryPolicy::from_config(config),
            }),
        }
    }

    /// Get the index at `url`, loading it if needed.
    ///
    /// Returns `Ok(None)` when `url` is a local path that does not exist.
    /// Any other failure to stat a local path (permission denied, for
    /// example) is returned as [`IndexError::Io`] and is not cached.
    ///
    /// # Panics
    ///
    /// Panics if no outcome is stored for `url` after a load completed, which
    /// means the load task itself panicked or was aborted.
    pub async fn get(
        &self,
        url: &str,
        keys: &TrustKeys,
        arch: &str,
        options: &IndexOptions,
    ) -> IndexResult<Option<Arc<ApkIndex>>> {
        let location = IndexLocation::classify(url)?;

        match &location {
            IndexLocation::Remote(_) => {
                self.load_remote_once(url, location.clone(), keys, arch, options)
                    .await
            }
            IndexLocation::Local(path) => {
                if !self
                    .revalidate_local(url, path, &location, keys, arch, options)
                    .await?
                {
                    return Ok(None);
                }
            }
        }

        let entries = lock(&self.inner.entries);
        match entries.get(url) {
            Some(outcome) => outcome.clone(),
            None => panic!("did not see index {:?} after writing it", url),
        }
    }

    /// Number of URLs with a stored outcome.
    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an outcome is stored for `url`.
    pub fn contains(&self, url: &str) -> bool {
        lock(&self.inner.entries).contains_key(url)
    }

    async fn load_remote_once(
        &self,
        url: &str,
        location: IndexLocation,
        keys: &TrustKeys,
        arch: &str,
        options: &IndexOptions,
    ) {
        let flight = {
            let mut in_flight = lock(&self.inner.in_flight);
            in_flight
                .entry(url.to_string())
                .or_insert_with(|| {
                    debug!(url, "starting remote index load");
                    let inner = Arc::clone(&self.inner);
                    let url = url.to_string();
                    let keys = keys.clone();
                    let arch = arch.to_string();
                    let options = options.clone();

                    let task = tokio::spawn(async move {
                        let outcome = inner.load(&url, &location, &keys, &arch, &options).await;
                        lock(&inner.entries).insert(url, outcome);
                    });

                    async move {
                        if let Err(e) = task.await {
                            error!(error = %e, "remote index load task failed");
                        }
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };

        flight.await;
    }

    /// Reload a local index if it changed. Returns `false` if the file does not exist.
    async fn revalidate_local(
        &self,
        url: &str,
        path: &Path,
        location: &IndexLocation,
        keys: &TrustKeys,
        arch: &str,
        options: &IndexOptions,
    ) -> IndexResult<bool> {
        let path_lock = Arc::clone(
            lock(&self.inner.local)
                .entry(url.to_string())
                .or_default(),
        );
        let mut recorded = path_lock.lock().await;

        let modified = match fs::metadata(path).await {
            Ok(meta) => meta.modified().map_err(|e| IndexError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(IndexError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        let changed = match *recorded {
            Some(before) => modified > before,
            None => true,
        };
        if changed {
            debug!(url, "local index changed, reloading");
            let outcome = self.inner.load(url, location, keys, arch, options).await;
            lock(&self.inner.entries).insert(url.to_string(), outcome);
            *recorded = Some(modified);
        }

        Ok(true)
    }
}

impl CacheInner {
    /// Fetch, verify and decode one index.
    async fn load(
        &self,
        url: &str,
        location: &IndexLocation,
        keys: &TrustKeys,
        arch: &str,
        options: &IndexOptions,
    ) -> Outcome {
        let transport = options
            .http_client
            .as_deref()
            .unwrap_or(self.transport.as_ref());

        let Some(bytes) = fetch(location, arch, transport, &self.policy).await? else {
            return Ok(None);
        };

        let payload = if options.ignore_signatures {
            bytes.as_slice()
        } else {
            verify_index(&bytes, keys)?
        };

        let index = self
            .decoder
            .decode(payload)
            .map_err(|e| IndexError::Decode {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        info!(
            url,
            packages = index.len(),
            verified = !options.ignore_signatures,
            "loaded repository index"
        );

        Ok(Some(Arc::new(index)))
    }
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("entries", &self.len())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
