// dedupl_core/src/layout.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{DedupError, Result};
use crate::hash::HashAlgorithm;

/// One (segment size, algorithm) pass. Displays as `"<segment_size>_<algorithm>"`,
/// the form stored in a file's `processing_done` set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableKey {
    pub segment_size: usize,
    pub algorithm: HashAlgorithm,
}

impl TableKey {
    pub fn new(segment_size: usize, algorithm: HashAlgorithm) -> Self {
        Self {
            segment_size,
            algorithm,
        }
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.segment_size, self.algorithm)
    }
}

impl FromStr for TableKey {
    type Err = DedupError;

    fn from_str(s: &str) -> Result<Self> {
        let (size, algo) = s
            .split_once('_')
            .ok_or_else(|| DedupError::InvalidInput(format!("expected <size>_<algo>, got {s:?}")))?;
        let segment_size = size
            .parse::<usize>()
            .map_err(|_| DedupError::InvalidInput(format!("bad segment size in {s:?}")))?;
        Ok(Self::new(segment_size, algo.parse()?))
    }
}

/// On-disk names under the repository root.
pub fn blob_path(root: &Path, segment_size: usize) -> PathBuf {
    root.join(format!("storage_{segment_size}.bin"))
}

pub fn index_path(root: &Path, segment_size: usize) -> PathBuf {
    root.join(format!("index_{segment_size}.log"))
}

pub fn catalog_path(root: &Path, key: TableKey) -> PathBuf {
    root.join(format!("catalog_{key}.log"))
}

pub fn recipe_path(root: &Path, key: TableKey) -> PathBuf {
    root.join(format!("recipe_{key}.log"))
}

pub fn registry_path(root: &Path) -> PathBuf {
    root.join("files.log")
}
