//! Engine configuration: the segment sizes, hash algorithms and read-buffer
//! size the repository is built for. Fixed at startup; every per-table handle
//! is created from these sets when the repository opens.
//!
//! Environment variables:
//! - `DEDUPL_ROOT`: repository directory (default `data_storage`)
//! - `DEDUPL_SEGMENT_SIZES`: comma list, e.g. `4,1024,4096`
//! - `DEDUPL_ALGORITHMS`: comma list, e.g. `md5,sha256`
//! - `DEDUPL_READ_BUFFER`: whole-file fingerprint read size in bytes

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DedupError, Result};
use crate::hash::HashAlgorithm;

pub const DEFAULT_SEGMENT_SIZES: [usize; 5] = [4, 32, 128, 1024, 4096];
pub const DEFAULT_ALGORITHMS: [HashAlgorithm; 3] = [
    HashAlgorithm::Md5,
    HashAlgorithm::Sha256,
    HashAlgorithm::Sha512,
];
pub const DEFAULT_READ_BUFFER: usize = 1024 * 1024;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the blobs and journals.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_segment_sizes")]
    pub segment_sizes: Vec<usize>,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<HashAlgorithm>,
    /// Read size used when fingerprinting a whole file.
    #[serde(default = "default_read_buffer")]
    pub read_buffer_size: usize,
}

fn default_root() -> PathBuf {
    PathBuf::from("data_storage")
}

fn default_segment_sizes() -> Vec<usize> {
    DEFAULT_SEGMENT_SIZES.to_vec()
}

fn default_algorithms() -> Vec<HashAlgorithm> {
    DEFAULT_ALGORITHMS.to_vec()
}

fn default_read_buffer() -> usize {
    DEFAULT_READ_BUFFER
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            segment_sizes: default_segment_sizes(),
            algorithms: default_algorithms(),
            read_buffer_size: default_read_buffer(),
        }
    }
}

impl EngineConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(root) = lookup("DEDUPL_ROOT") {
            cfg.root = PathBuf::from(root);
        }
        if let Some(sizes) = lookup("DEDUPL_SEGMENT_SIZES") {
            cfg.segment_sizes = parse_list(&sizes, |s| {
                s.parse::<usize>()
                    .map_err(|_| DedupError::InvalidInput(format!("bad segment size: {s:?}")))
            })?;
        }
        if let Some(algos) = lookup("DEDUPL_ALGORITHMS") {
            cfg.algorithms = parse_list(&algos, str::parse::<HashAlgorithm>)?;
        }
        if let Some(buf) = lookup("DEDUPL_READ_BUFFER") {
            cfg.read_buffer_size = buf
                .trim()
                .parse()
                .map_err(|_| DedupError::InvalidInput(format!("bad read buffer size: {buf:?}")))?;
        }
        cfg.validate()
    }

    /// Load from a TOML file with a `[dedupl]` section; without one, falls
    /// back to the environment.
    ///
    /// ```toml
    /// [dedupl]
    /// root = "/srv/dedupl"
    /// segment_sizes = [4, 1024]
    /// algorithms = ["md5", "sha256"]
    /// ```
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let table: toml::Table = contents
            .parse()
            .map_err(|e| DedupError::Format(format!("{}: {e}", path.display())))?;
        match table.get("dedupl") {
            Some(section) => {
                let cfg: EngineConfig = section
                    .clone()
                    .try_into()
                    .map_err(|e| DedupError::Format(format!("[dedupl] section: {e}")))?;
                cfg.validate()
            }
            None => Self::from_env(),
        }
    }

    /// Reject empty or zero settings and drop duplicate entries (first wins).
    pub fn validate(mut self) -> Result<Self> {
        if self.segment_sizes.is_empty() {
            return Err(DedupError::InvalidInput("no segment sizes configured".into()));
        }
        if self.segment_sizes.contains(&0) {
            return Err(DedupError::InvalidInput("segment size must be positive".into()));
        }
        if self.algorithms.is_empty() {
            return Err(DedupError::InvalidInput("no hash algorithms configured".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(DedupError::InvalidInput("read buffer size must be positive".into()));
        }
        dedup_in_place(&mut self.segment_sizes);
        dedup_in_place(&mut self.algorithms);
        Ok(self)
    }

    pub fn supports_segment_size(&self, segment_size: usize) -> bool {
        self.segment_sizes.contains(&segment_size)
    }

    pub fn supports_algorithm(&self, algorithm: HashAlgorithm) -> bool {
        self.algorithms.contains(&algorithm)
    }
}

fn parse_list<T, F>(raw: &str, parse: F) -> Result<Vec<T>>
where
    F: Fn(&str) -> Result<T>,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse)
        .collect()
}

pub(crate) fn dedup_in_place<T: PartialEq + Copy>(v: &mut Vec<T>) {
    let mut seen = Vec::with_capacity(v.len());
    v.retain(|x| {
        if seen.contains(x) {
            false
        } else {
            seen.push(*x);
            true
        }
    });
}
