//! Segment and whole-file hashing.
//!
//! Physical addressing always uses [`CONTENT_ALGORITHM`]; the logical catalogs
//! may use any [`HashAlgorithm`], so the same bytes can be benchmarked under
//! several digests while stored once.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::io::{ErrorKind, Read};
use std::str::FromStr;

use crate::error::{DedupError, Result};

/// Fingerprint used for the physical index and whole-file identity.
pub const CONTENT_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha256,
    Sha512,
    Blake3,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 4] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha512,
        HashAlgorithm::Blake3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Blake3 => "blake3",
        }
    }

    /// Digest of `data` under this algorithm.
    pub fn digest(self, data: &[u8]) -> Digest {
        let hex = match self {
            HashAlgorithm::Md5 => hex::encode(md5::compute(data).0),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
            HashAlgorithm::Sha512 => hex::encode(Sha512::digest(data)),
            HashAlgorithm::Blake3 => hex::encode(blake3::hash(data).as_bytes()),
        };
        Digest(hex)
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name() == wanted)
            .ok_or_else(|| DedupError::InvalidInput(format!("unsupported hash algorithm: {s:?}")))
    }
}

/// Lowercase hex digest; the key type of every index in the repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines and listings.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whole-file fingerprint: streams `r` through [`CONTENT_ALGORITHM`] in
/// `buf_size` reads and returns the digest together with the byte count.
pub fn file_fingerprint<R: Read>(mut r: R, buf_size: usize) -> Result<(Digest, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; buf_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match r.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((Digest(hex::encode(hasher.finalize())), total))
}
