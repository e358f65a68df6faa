//! Trusted signing keys.
//!
//! Keys are supplied by the caller as raw bytes keyed by identifier. The
//! identifier is the key file name (`builder@example.test-5f2a1c3b.rsa.pub`),
//! which is what signature records name. Keys are only decoded when a
//! signature is checked against them.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;
use tokio::fs;
use tracing::debug;

use crate::error::{IndexError, IndexResult};

/// File name suffix of public keys in a keyring directory.
pub const KEY_EXTENSION: &str = ".rsa.pub";

/// Caller-supplied set of trusted public keys.
///
/// Cheap to clone; immutable once handed to a fetch.
#[derive(Debug, Clone, Default)]
pub struct TrustKeys {
    keys: Arc<BTreeMap<String, Vec<u8>>>,
}

impl TrustKeys {
    /// Create an empty key set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a key set from identifier → key bytes pairs.
    pub fn from_map<I, K, V>(keys: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Vec<u8>>,
    {
        Self {
            keys: Arc::new(
                keys.into_iter()
                    .map(|(id, key)| (id.into(), key.into()))
                    .collect(),
            ),
        }
    }

    /// Load every `*.rsa.pub` file in `dir`, keyed by file name.
    pub async fn load_dir(dir: impl AsRef<Path>) -> IndexResult<Self> {
        let dir = dir.as_ref();
        let io_err = |e: std::io::Error| IndexError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        };

        let mut keys = BTreeMap::new();
        let mut entries = fs::read_dir(dir).await.map_err(io_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(KEY_EXTENSION) {
                continue;
            }
            let path = entry.path();
            let bytes = fs::read(&path).await.map_err(|e| IndexError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            debug!(key = %name, "loaded trust key");
            keys.insert(name, bytes);
        }

        Ok(Self {
            keys: Arc::new(keys),
        })
    }

    /// Add a key, returning the updated set.
    pub fn insert(mut self, id: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Arc::make_mut(&mut self.keys).insert(id.into(), key.into());
        self
    }

    /// Raw key bytes for an identifier.
    pub fn get(&self, id: &str) -> Option<&[u8]> {
        self.keys.get(id).map(Vec::as_slice)
    }

    /// Keys in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.keys.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// All key identifiers, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.keys.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Decode a public key in PEM SPKI, PEM PKCS#1 or DER SPKI form.
pub(crate) fn decode_public_key(bytes: &[u8]) -> IndexResult<RsaPublicKey> {
    if let Ok(text) = std::str::from_utf8(bytes) {
        let text = text.trim();
        if let Ok(key) = RsaPublicKey::from_public_key_pem(text) {
            return Ok(key);
        }
        if let Ok(key) = RsaPublicKey::from_pkcs1_pem(text) {
            return Ok(key);
        }
    }

    RsaPublicKey::from_public_key_der(bytes).map_err(|e| IndexError::Config {
        message: format!("invalid RSA public key: {}", e),
    })
}
