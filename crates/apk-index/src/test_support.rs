//! Fixture builders for signed indexes.

use std::io::Write;
use std::sync::LazyLock;

use flate2::write::GzEncoder;
use flate2::Compression;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha1::{Digest, Sha1};

pub(crate) struct TestKey {
    pub name: String,
    pub private: RsaPrivateKey,
}

impl TestKey {
    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let digest = Sha1::digest(payload);
        self.private
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .expect("signing failed")
    }
}

static KEYS: LazyLock<Vec<TestKey>> = LazyLock::new(|| {
    (0..2)
        .map(|i| TestKey {
            name: format!("builder-{}@example.test.rsa.pub", i),
            private: RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("keygen failed"),
        })
        .collect()
});

pub(crate) fn test_key(i: usize) -> &'static TestKey {
    &KEYS[i]
}

pub(crate) fn public_key_pem(key: &TestKey) -> Vec<u8> {
    key.private
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("pem encoding failed")
        .into_bytes()
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).expect("gzip write failed");
    encoder.finish().expect("gzip finish failed")
}

/// A single tar record without end-of-archive blocks.
fn tar_record(name: &str, data: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_gnu();
    header.set_path(name).expect("set path failed");
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut out = header.as_bytes().to_vec();
    out.extend_from_slice(data);
    let padding = (512 - data.len() % 512) % 512;
    out.extend(std::iter::repeat(0u8).take(padding));
    out
}

/// A gzip-compressed, properly terminated tar archive.
pub(crate) fn gzip_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, name, *data)
            .expect("tar append failed");
    }
    gzip(&builder.into_inner().expect("tar finish failed"))
}

pub(crate) fn signed_index_with_name(key: &TestKey, payload: &[u8], record: &str) -> Vec<u8> {
    let mut out = gzip(&tar_record(record, &key.sign(payload)));
    out.extend_from_slice(payload);
    out
}

/// A signed index laid out the way repository tooling writes it.
pub(crate) fn signed_index(key: &TestKey, payload: &[u8]) -> Vec<u8> {
    signed_index_with_name(key, payload, &format!(".SIGN.RSA.{}", key.name))
}
