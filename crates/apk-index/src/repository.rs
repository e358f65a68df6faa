//! Repository line parsing.
//!
//! Supports two formats:
//! - `https://dl-cdn.alpinelinux.org/alpine/edge/main` → unpinned repository
//! - `@testing https://dl-cdn.alpinelinux.org/alpine/edge/testing` → pinned repository

use crate::error::{IndexError, IndexResult};

/// Name of the index file published for each architecture.
pub const INDEX_FILENAME: &str = "APKINDEX.tar.gz";

/// Marker introducing a pinned repository line.
const PIN_MARKER: char = '@';

/// A parsed repository line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositorySpec {
    /// Pin name, without the marker. `None` for unpinned lines.
    pub pin: Option<String>,

    /// Repository base URL or local path.
    pub base_url: String,
}

impl RepositorySpec {
    /// Parse a repository line.
    ///
    /// # Examples
    ///
    /// ```
    /// use apk_index::RepositorySpec;
    ///
    /// let plain = RepositorySpec::parse("https://example.test/main").unwrap();
    /// assert_eq!(plain.pin, None);
    ///
    /// let pinned = RepositorySpec::parse("@corp https://example.test/corp").unwrap();
    /// assert_eq!(pinned.pin.as_deref(), Some("corp"));
    /// assert_eq!(pinned.base_url, "https://example.test/corp");
    ///
    /// assert!(RepositorySpec::parse("@corp").is_err());
    /// ```
    pub fn parse(line: &str) -> IndexResult<Self> {
        if !line.starts_with(PIN_MARKER) {
            return Ok(Self {
                pin: None,
                base_url: line.to_string(),
            });
        }

        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(name), Some(url)) => Ok(Self {
                pin: Some(name[PIN_MARKER.len_utf8()..].to_string()),
                base_url: url.to_string(),
            }),
            _ => Err(IndexError::InvalidRepository {
                line: line.to_string(),
            }),
        }
    }

    /// Pin name, empty when unpinned.
    pub fn pin_name(&self) -> &str {
        self.pin.as_deref().unwrap_or_default()
    }

    /// Full URL of the index file for `arch`.
    pub fn index_url(&self, arch: &str) -> String {
        index_url(&self.base_url, arch)
    }

    /// Repository base for `arch`, used as the repository URI of loaded indexes.
    pub fn repo_base(&self, arch: &str) -> String {
        format!("{}/{}", self.base_url, arch)
    }
}

/// Full URL to the index file for the given repository and architecture.
///
/// No slash normalisation is performed.
pub fn index_url(repo: &str, arch: &str) -> String {
    format!("{}/{}/{}", repo, arch, INDEX_FILENAME)
}
