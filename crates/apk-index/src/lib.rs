//! Repository index retrieval for APK package repositories.
//!
//! This crate loads the signed `APKINDEX.tar.gz` of each configured
//! repository, providing:
//!
//! - Repository line parsing with optional `@pin` names
//! - Local and https retrieval with Basic-Auth and resumable range reads
//! - RSA/SHA-1 signature verification against a set of trusted keys
//! - A process-lifetime cache: remote indexes load once, local indexes
//!   reload when the file changes
//!
//! # Quick Start
//!
//! ```no_run
//! use apk_index::{IndexCache, IndexConfig, IndexOptions, IndexResolver, TrustKeys};
//!
//! # async fn example() -> apk_index::IndexResult<()> {
//! let resolver = IndexResolver::new(IndexCache::new(&IndexConfig::from_env())?);
//! let keys = TrustKeys::load_dir("/etc/apk/keys").await?;
//!
//! let indexes = resolver
//!     .resolve_all(
//!         ["https://dl-cdn.alpinelinux.org/alpine/edge/main"],
//!         &keys,
//!         "x86_64",
//!         &IndexOptions::new(),
//!     )
//!     .await?;
//!
//! for named in &indexes {
//!     println!("{}: {} packages", named.uri(), named.index().len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `APK_INDEX_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `APK_INDEX_MAX_RETRIES` | Max retries for transient failures and body resumes (default: 3) |
//! | `APK_INDEX_RETRY_BACKOFF_MS` | Base retry backoff in milliseconds (default: 1000) |
//! | `APK_INDEX_USER_AGENT` | User-Agent header for https requests |

pub mod cache;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod repository;
pub mod resolver;
pub mod trust;
pub mod types;
pub mod verify;

#[cfg(test)]
mod test_support;

/// Default User-Agent for index requests.
pub const INDEX_USER_AGENT: &str = concat!("apk-index/", env!("CARGO_PKG_VERSION"));

// Re-export main types
pub use cache::IndexCache;
pub use decode::{ApkIndex, ApkIndexDecoder, DecodeError, IndexDecoder, IndexPackage};
pub use error::{IndexError, IndexResult};
pub use fetch::http::{
    ByteStream, HttpTransport, ReqwestTransport, TransportRequest, TransportResponse,
};
pub use fetch::IndexLocation;
pub use repository::{index_url, RepositorySpec, INDEX_FILENAME};
pub use resolver::IndexResolver;
pub use trust::TrustKeys;
pub use types::{IndexConfig, IndexOptions, NamedIndex, Repository};
pub use verify::{split_signed_index, verify_index, SignedIndex};
