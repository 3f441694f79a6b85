//! Streaming SHA-256 verification.
//!
//! A [`ChecksumSource`] hashes bytes as the installer reads them. The actual
//! digest only exists once the stream has returned EOF, so verification before
//! full consumption is always false.

use crate::error::{Error, IoContext, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// A readable artifact with an expected digest
pub trait Source: Read + Send {
    fn expected_checksum(&self) -> &[u8];

    /// `None` until the stream is exhausted
    fn actual_checksum(&self) -> Option<&[u8]>;

    fn verify_checksum(&self) -> bool;
}

/// Tees every read into a SHA-256 hasher
pub struct ChecksumSource<R> {
    inner: R,
    hasher: Sha256,
    expected: Vec<u8>,
    actual: Option<Vec<u8>>,
}

impl<R: Read> ChecksumSource<R> {
    pub fn new(inner: R, expected: Vec<u8>) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            expected,
            actual: None,
        }
    }
}

impl<R: Read> Read for ChecksumSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.actual.is_some() || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            let hasher = std::mem::take(&mut self.hasher);
            self.actual = Some(hasher.finalize().to_vec());
        } else {
            self.hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}

impl<R: Read + Send> Source for ChecksumSource<R> {
    fn expected_checksum(&self) -> &[u8] {
        &self.expected
    }

    fn actual_checksum(&self) -> Option<&[u8]> {
        self.actual.as_deref()
    }

    fn verify_checksum(&self) -> bool {
        matches!(&self.actual, Some(actual) if *actual == self.expected)
    }
}

/// Bytes delivered by the OS package manager, which does its own signing.
pub struct TrustedSource<R> {
    inner: R,
}

impl<R: Read> TrustedSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for TrustedSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + Send> Source for TrustedSource<R> {
    fn expected_checksum(&self) -> &[u8] {
        &[]
    }

    fn actual_checksum(&self) -> Option<&[u8]> {
        None
    }

    fn verify_checksum(&self) -> bool {
        true
    }
}

/// Extract the digest from a GNU coreutils line: `<hex digest>  <filename>`.
///
/// A bare digest without a filename is accepted too.
pub fn parse_gnu_checksum(content: &str) -> Result<Vec<u8>> {
    let digest = content
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::config("empty checksum file"))?;
    hex::decode(digest).map_err(|e| Error::config(format!("checksum {:?}: {}", digest, e)))
}

/// SHA-256 of a file on disk
pub fn file_sha256(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).context(|| format!("open {}", path.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).context(|| format!("hash {}", path.display()))?;
    Ok(hasher.finalize().to_vec())
}

/// Build a checksum error for `name` from a fully-read source
pub fn mismatch(name: &str, source: &dyn Source) -> Error {
    Error::Checksum {
        name: name.to_string(),
        expected: hex::encode(source.expected_checksum()),
        actual: source
            .actual_checksum()
            .map(hex::encode)
            .unwrap_or_else(|| "<stream not exhausted>".to_string()),
    }
}
