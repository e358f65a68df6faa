//! Signed index verification.
//!
//! A signed index is a concatenation of gzip members. The first member is a
//! tar stream holding one record, `.SIGN.RSA.<keyname>.rsa.pub`, whose content
//! is an RSA PKCS#1 v1.5 signature over the SHA-1 digest of every byte that
//! follows the first member. Only the first member is decompressed here; the
//! signed payload is the raw remainder of the input.

use std::io::{self, Read};
use std::sync::LazyLock;

use regex::Regex;
use rsa::Pkcs1v15Sign;
use sha1::{Digest, Sha1};
use tracing::debug;

use crate::error::{IndexError, IndexResult};
use crate::trust::{decode_public_key, TrustKeys};

static SIGNATURE_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.SIGN\.RSA\.(.*\.rsa\.pub)$").expect("signature file pattern is valid")
});

/// Detached signature and the bytes it covers.
#[derive(Debug)]
pub struct SignedIndex<'a> {
    /// Key name taken from the signature record name.
    pub key_name: String,

    /// Raw signature bytes.
    pub signature: Vec<u8>,

    /// Signed payload: the input after the first gzip member.
    pub payload: &'a [u8],
}

/// Split a signed index into signature and payload.
pub fn split_signed_index(bytes: &[u8]) -> IndexResult<SignedIndex<'_>> {
    // bufread::GzDecoder stops at the end of the first member and consumes
    // exactly the bytes that member occupies.
    let mut decoder = flate2::bufread::GzDecoder::new(bytes);

    let (key_name, signature) = {
        let mut archive = tar::Archive::new(&mut decoder);
        let mut entries = archive.entries().map_err(|e| {
            IndexError::container(format!("unable to read gzip stream for repository index: {}", e))
        })?;

        let mut entry = match entries.next() {
            Some(Ok(entry)) => entry,
            Some(Err(e)) => {
                return Err(IndexError::container(format!(
                    "failed to read signature from repository index: {}",
                    e
                )))
            }
            None => {
                return Err(IndexError::container(
                    "failed to read signature from repository index: no records",
                ))
            }
        };

        let file_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let key_name = SIGNATURE_FILE
            .captures(&file_name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                IndexError::container(format!(
                    "failed to find key name in signature file name: {}",
                    file_name
                ))
            })?;

        let mut signature = Vec::new();
        entry.read_to_end(&mut signature).map_err(|e| {
            IndexError::container(format!(
                "failed to read signature from repository index: {}",
                e
            ))
        })?;

        if let Some(Err(e)) = entries.next() {
            return Err(IndexError::container(format!(
                "unexpected error reading from tgz: {}",
                e
            )));
        }

        (key_name, signature)
    };

    // Run the member out to its trailer so the reader sits on the boundary.
    io::copy(&mut decoder, &mut io::sink()).map_err(|e| {
        IndexError::container(format!("unexpected error reading from tgz: {}", e))
    })?;

    let remaining = decoder.into_inner();
    let consumed = bytes.len() - remaining.len();

    Ok(SignedIndex {
        key_name,
        signature,
        payload: &bytes[consumed..],
    })
}

/// Verify a signed index against the trusted keys and return the signed payload.
///
/// The key named by the signature record is tried first; if it is absent or
/// does not validate, every trusted key is tried in turn.
pub fn verify_index<'a>(bytes: &'a [u8], keys: &TrustKeys) -> IndexResult<&'a [u8]> {
    let signed = split_signed_index(bytes)?;
    let digest = Sha1::digest(signed.payload);

    if keys.is_empty() {
        return Err(IndexError::NoTrustKeys);
    }

    if let Some(key) = keys.get(&signed.key_name) {
        if verify_digest(&digest, &signed.signature, key) {
            debug!(key = %signed.key_name, "index signature verified with named key");
            return Ok(signed.payload);
        }
    }

    for (id, key) in keys.iter() {
        if verify_digest(&digest, &signed.signature, key) {
            debug!(
                key = %id,
                expected = %signed.key_name,
                "index signature verified with fallback key"
            );
            return Ok(signed.payload);
        }
    }

    Err(IndexError::Untrusted {
        key_name: signed.key_name,
        tried: keys.len(),
    })
}

fn verify_digest(digest: &[u8], signature: &[u8], key: &[u8]) -> bool {
    match decode_public_key(key) {
        Ok(public_key) => public_key
            .verify(Pkcs1v15Sign::new::<Sha1>(), digest, signature)
            .is_ok(),
        Err(e) => {
            debug!(error = %e, "skipping undecodable trust key");
            false
        }
    }
}
