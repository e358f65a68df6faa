//! Batch index resolution.
//!
//! Turns repository lines into loaded indexes:
//! 1. Parse the line (`[@pin] url`)
//! 2. Derive the index URL for the architecture
//! 3. Load it through the shared [`IndexCache`]
//!
//! The batch is fail-fast. Local repositories whose index file does not exist
//! are skipped.

use tracing::{debug, info, info_span, Instrument};

use crate::cache::IndexCache;
use crate::error::IndexResult;
use crate::repository::RepositorySpec;
use crate::trust::TrustKeys;
use crate::types::{IndexConfig, IndexOptions, NamedIndex, Repository};

/// Resolves repository lines to indexes.
#[derive(Debug, Clone)]
pub struct IndexResolver {
    cache: IndexCache,
}

impl IndexResolver {
    /// Create a resolver over an existing cache.
    pub fn new(cache: IndexCache) -> Self {
        Self { cache }
    }

    /// Create a resolver with its own cache.
    pub fn with_config(config: &IndexConfig) -> IndexResult<Self> {
        Ok(Self::new(IndexCache::new(config)?))
    }

    /// The cache used by this resolver.
    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Load the index of every repository line, in order.
    ///
    /// Stops at the first error. Returns one [`NamedIndex`] per repository
    /// whose index was found.
    pub async fn resolve_all<I, S>(
        &self,
        repositories: I,
        keys: &TrustKeys,
        arch: &str,
        options: &IndexOptions,
    ) -> IndexResult<Vec<NamedIndex>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let span = info_span!("get_repository_indexes", arch = %arch);
        self.resolve_in_order(repositories, keys, arch, options)
            .instrument(span)
            .await
    }

    async fn resolve_in_order<I, S>(
        &self,
        repositories: I,
        keys: &TrustKeys,
        arch: &str,
        options: &IndexOptions,
    ) -> IndexResult<Vec<NamedIndex>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut indexes = Vec::new();

        for line in repositories {
            let spec = RepositorySpec::parse(line.as_ref())?;
            let url = spec.index_url(arch);

            let Some(index) = self.cache.get(&url, keys, arch, options).await? else {
                debug!(url = %url, "repository index does not exist, skipping");
                continue;
            };

            indexes.push(NamedIndex::new(
                spec.pin_name(),
                Repository {
                    uri: spec.repo_base(arch),
                    index,
                },
            ));
        }

        info!(count = indexes.len(), "resolved repository indexes");
        Ok(indexes)
    }
}
