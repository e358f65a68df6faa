//! Shared fixtures: signing keys, signed index archives and an in-memory transport.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use apk_index::{
    HttpTransport, IndexError, IndexResult, TransportRequest, TransportResponse, TrustKeys,
};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::{stream, StreamExt};
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};

pub struct SigningKey {
    pub name: String,
    private: RsaPrivateKey,
}

impl SigningKey {
    pub fn public_pem(&self) -> Vec<u8> {
        self.private
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("pem encoding failed")
            .into_bytes()
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.private
            .sign(Pkcs1v15Sign::new::<Sha1>(), &Sha1::digest(payload))
            .expect("signing failed")
    }
}

static KEYS: LazyLock<Vec<SigningKey>> = LazyLock::new(|| {
    ["alpine-devel@example.test-1.rsa.pub", "corp-builder@example.test-2.rsa.pub"]
        .into_iter()
        .map(|name| SigningKey {
            name: name.to_string(),
            private: RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("keygen failed"),
        })
        .collect()
});

pub fn alpine_key() -> &'static SigningKey {
    &KEYS[0]
}

pub fn corp_key() -> &'static SigningKey {
    &KEYS[1]
}

/// Trust set holding the given keys under their own names.
pub fn trust(keys: &[&SigningKey]) -> TrustKeys {
    TrustKeys::from_map(keys.iter().map(|k| (k.name.clone(), k.public_pem())))
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write failed");
    encoder.finish().expect("gzip finish failed")
}

/// Index payload: a gzipped tar with an APKINDEX listing `packages`.
pub fn index_payload(packages: &[&str]) -> Vec<u8> {
    let apkindex: String = packages
        .iter()
        .map(|name| format!("P:{}\nV:1.0.0-r0\nA:x86_64\nS:1024\nI:4096\n\n", name))
        .collect();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(apkindex.len() as u64);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "APKINDEX", apkindex.as_bytes())
        .expect("tar append failed");
    gzip(&builder.into_inner().expect("tar finish failed"))
}

/// Signed index whose signature record names `record_key`.
pub fn signed_as(signer: &SigningKey, record_key: &str, payload: &[u8]) -> Vec<u8> {
    let signature = signer.sign(payload);

    let mut header = tar::Header::new_gnu();
    header
        .set_path(format!(".SIGN.RSA.{}", record_key))
        .expect("set path failed");
    header.set_size(signature.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut record = header.as_bytes().to_vec();
    record.extend_from_slice(&signature);
    record.resize(record.len().div_ceil(512) * 512, 0);

    let mut out = gzip(&record);
    out.extend_from_slice(payload);
    out
}

/// Signed index whose signature record names the signing key.
pub fn signed(signer: &SigningKey, payload: &[u8]) -> Vec<u8> {
    signed_as(signer, &signer.name, payload)
}

/// Transport serving canned responses by URL and counting requests.
pub struct FakeTransport {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            routes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn serve(&self, url: &str, status: u16, body: Vec<u8>) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpTransport for FakeTransport {
    async fn get(&self, request: &TransportRequest) -> IndexResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
        let (status, body) = route.ok_or_else(|| IndexError::Network {
            message: format!("no route for {}", request.url),
        })?;

        Ok(TransportResponse {
            status,
            body: stream::once(async move { Ok(Bytes::from(body)) }).boxed(),
        })
    }
}
