//! Index decoding.
//!
//! The index payload is a gzip-compressed tar stream holding an `APKINDEX`
//! text file and, usually, a `DESCRIPTION` file. `APKINDEX` is a list of
//! package records separated by blank lines; each line is `K:value`.
//!
//! ```text
//! C:Q1Lf8wwIBVaGHzLqGjr9V/n1Kk6nM=
//! P:busybox
//! V:1.36.1-r15
//! A:x86_64
//! S:508364
//! I:946176
//! T:Size optimized toolbox of many common UNIX utilities
//! D:so:libc.musl-x86_64.so.1
//! ```

use std::io::Read;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use flate2::read::MultiGzDecoder;
use serde::Serialize;

/// Name of the package list inside the index archive.
pub const APKINDEX_ENTRY: &str = "APKINDEX";

/// Name of the repository description inside the index archive.
pub const DESCRIPTION_ENTRY: &str = "DESCRIPTION";

/// Prefix of SHA-1 package checksums.
const SHA1_CHECKSUM_PREFIX: &str = "Q1";

/// Errors produced while decoding an index payload.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not a readable gzip tar stream.
    #[error("failed to read index archive: {0}")]
    Archive(#[from] std::io::Error),

    /// The archive has no APKINDEX entry.
    #[error("index archive has no APKINDEX entry")]
    MissingIndex,

    /// A line in APKINDEX is not `K:value`.
    #[error("malformed APKINDEX line {line}: {content:?}")]
    MalformedLine { line: usize, content: String },

    /// A numeric field did not parse.
    #[error("invalid value for field {field} on line {line}: {value:?}")]
    InvalidField {
        field: char,
        line: usize,
        value: String,
    },
}

/// Turns verified index bytes into an [`ApkIndex`].
pub trait IndexDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<ApkIndex, DecodeError>;
}

/// Decoder for the APKINDEX archive format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApkIndexDecoder;

impl IndexDecoder for ApkIndexDecoder {
    fn decode(&self, payload: &[u8]) -> Result<ApkIndex, DecodeError> {
        let mut archive = tar::Archive::new(MultiGzDecoder::new(payload));

        let mut packages = None;
        let mut description = None;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            match name.as_str() {
                APKINDEX_ENTRY => {
                    let mut text = String::new();
                    entry.read_to_string(&mut text)?;
                    packages = Some(parse_packages(&text)?);
                }
                DESCRIPTION_ENTRY => {
                    let mut text = String::new();
                    entry.read_to_string(&mut text)?;
                    description = Some(text.trim().to_string());
                }
                _ => {}
            }
        }

        Ok(ApkIndex {
            description,
            packages: packages.ok_or(DecodeError::MissingIndex)?,
        })
    }
}

/// A parsed repository index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApkIndex {
    /// Repository description, if the archive carried one.
    pub description: Option<String>,

    /// Packages in index order.
    pub packages: Vec<IndexPackage>,
}

impl ApkIndex {
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn packages(&self) -> &[IndexPackage] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// All entries for a package name, in index order.
    pub fn find<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a IndexPackage> + 'a {
        self.packages.iter().filter(move |p| p.name == name)
    }
}

/// One package record from APKINDEX.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexPackage {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub description: String,
    pub url: String,
    pub license: String,
    pub origin: String,
    pub maintainer: String,
    pub commit: String,

    /// Raw `C:` value.
    pub checksum: String,

    /// Compressed package size.
    pub size: u64,

    pub installed_size: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_time: Option<DateTime<Utc>>,

    pub provider_priority: Option<u64>,

    pub dependencies: Vec<String>,
    pub provides: Vec<String>,
    pub install_if: Vec<String>,
    pub replaces: Vec<String>,
}

impl IndexPackage {
    /// SHA-1 digest from a `Q1` checksum.
    pub fn checksum_sha1(&self) -> Option<Vec<u8>> {
        let encoded = self.checksum.strip_prefix(SHA1_CHECKSUM_PREFIX)?;
        BASE64.decode(encoded).ok().filter(|d| d.len() == 20)
    }

    /// `<name>-<version>.apk`
    pub fn filename(&self) -> String {
        format!("{}-{}.apk", self.name, self.version)
    }
}

fn parse_packages(text: &str) -> Result<Vec<IndexPackage>, DecodeError> {
    let mut packages = Vec::new();
    let mut current: Option<IndexPackage> = None;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim_end_matches('\r');

        if line.is_empty() {
            if let Some(pkg) = current.take() {
                packages.push(pkg);
            }
            continue;
        }

        let mut chars = line.chars();
        let (key, value) = match (chars.next(), chars.next()) {
            (Some(key), Some(':')) => (key, chars.as_str()),
            _ => {
                return Err(DecodeError::MalformedLine {
                    line: line_no,
                    content: line.to_string(),
                })
            }
        };

        let pkg = current.get_or_insert_with(IndexPackage::default);
        let number = |value: &str| {
            value.parse::<u64>().map_err(|_| DecodeError::InvalidField {
                field: key,
                line: line_no,
                value: value.to_string(),
            })
        };

        match key {
            'C' => pkg.checksum = value.to_string(),
            'P' => pkg.name = value.to_string(),
            'V' => pkg.version = value.to_string(),
            'A' => pkg.arch = value.to_string(),
            'S' => pkg.size = number(value)?,
            'I' => pkg.installed_size = number(value)?,
            'T' => pkg.description = value.to_string(),
            'U' => pkg.url = value.to_string(),
            'L' => pkg.license = value.to_string(),
            'o' => pkg.origin = value.to_string(),
            'm' => pkg.maintainer = value.to_string(),
            't' => {
                let secs = number(value)?;
                pkg.build_time = i64::try_from(secs)
                    .ok()
                    .and_then(|s| DateTime::from_timestamp(s, 0));
            }
            'c' => pkg.commit = value.to_string(),
            'k' => pkg.provider_priority = Some(number(value)?),
            'D' => pkg.dependencies = split_list(value),
            'p' => pkg.provides = split_list(value),
            'i' => pkg.install_if = split_list(value),
            'r' => pkg.replaces = split_list(value),
            _ => {}
        }
    }

    if let Some(pkg) = current {
        packages.push(pkg);
    }

    Ok(packages)
}

fn split_list(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::gzip_tar;

    const APKINDEX: &str = "\
C:Q1Lf8wwIBVaGHzLqGjr9V/n1Kk6nM=
P:busybox
V:1.36.1-r15
A:x86_64
S:508364
I:946176
T:Size optimized toolbox of many common UNIX utilities
U:https://busybox.net/
L:GPL-2.0-only
o:busybox
m:Sören Tempel <soeren+alpine@soeren-tempel.net>
t:1700000000
c:0123456789abcdef
D:so:libc.musl-x86_64.so.1
p:/bin/sh cmd:busybox=1.36.1-r15

P:musl
V:1.2.4-r2
A:x86_64
S:383152
I:622592
k:100
";

    #[test]
    fn test_parse_records() {
        let packages = parse_packages(APKINDEX).unwrap();
        assert_eq!(packages.len(), 2);

        let busybox = &packages[0];
        assert_eq!(busybox.name, "busybox");
        assert_eq!(busybox.version, "1.36.1-r15");
        assert_eq!(busybox.size, 508364);
        assert_eq!(busybox.installed_size, 946176);
        assert_eq!(busybox.dependencies, vec!["so:libc.musl-x86_64.so.1"]);
        assert_eq!(busybox.provides, vec!["/bin/sh", "cmd:busybox=1.36.1-r15"]);
        assert_eq!(
            busybox.build_time,
            DateTime::from_timestamp(1_700_000_000, 0)
        );
        assert_eq!(busybox.filename(), "busybox-1.36.1-r15.apk");
        assert_eq!(busybox.checksum_sha1().map(|d| d.len()), Some(20));

        let musl = &packages[1];
        assert_eq!(musl.name, "musl");
        assert_eq!(musl.provider_priority, Some(100));
        assert!(musl.checksum_sha1().is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_line() {
        match parse_packages("P:busybox\nnot a field\n") {
            Err(DecodeError::MalformedLine { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected MalformedLine, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_bad_size() {
        assert!(matches!(
            parse_packages("P:busybox\nS:big\n"),
            Err(DecodeError::InvalidField { field: 'S', line: 2, .. })
        ));
    }

    #[test]
    fn test_decode_archive() {
        let payload = gzip_tar(&[
            (DESCRIPTION_ENTRY, b"v3.19.0-100-g1234\n".as_slice()),
            (APKINDEX_ENTRY, APKINDEX.as_bytes()),
        ]);

        let index = ApkIndexDecoder.decode(&payload).unwrap();
        assert_eq!(index.description(), Some("v3.19.0-100-g1234"));
        assert_eq!(index.len(), 2);
        assert_eq!(index.find("musl").count(), 1);
        assert_eq!(index.find("openssl").count(), 0);
    }

    #[test]
    fn test_decode_without_apkindex() {
        let payload = gzip_tar(&[(DESCRIPTION_ENTRY, b"nothing here".as_slice())]);
        assert!(matches!(
            ApkIndexDecoder.decode(&payload),
            Err(DecodeError::MissingIndex)
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            ApkIndexDecoder.decode(b"plain text, not gzip"),
            Err(DecodeError::Archive(_))
        ));
    }
}
