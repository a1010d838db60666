use serde::Serialize;
use std::time::Duration;

use crate::hash::{Digest, HashAlgorithm};

/// Per-algorithm counters for one ingestion pass.
#[derive(Clone, Debug, Serialize)]
pub struct AlgorithmStats {
    pub algorithm: HashAlgorithm,
    pub unique: u64,
    pub duplicate: u64,
    /// Time spent computing this algorithm's digests only.
    pub hashing: Duration,
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestReport {
    pub file_id: u64,
    pub file_name: String,
    pub file_size: u64,
    pub content_hash: Digest,
    pub segment_size: usize,
    pub total_segments: u64,
    pub physical_writes: u64,
    pub elapsed: Duration,
    /// Size of `storage_<segment_size>.bin` after the pass.
    pub storage_size: u64,
    pub algorithms: Vec<AlgorithmStats>,
}

impl IngestReport {
    pub fn for_algorithm(&self, algorithm: HashAlgorithm) -> Option<&AlgorithmStats> {
        self.algorithms.iter().find(|a| a.algorithm == algorithm)
    }
}

#[derive(Clone, Debug, Serialize)]
pub enum IngestOutcome {
    /// Every requested algorithm had already completed at this segment size.
    Skipped {
        file_name: String,
        content_hash: Digest,
        segment_size: usize,
    },
    Ingested(IngestReport),
}

impl IngestOutcome {
    pub fn report(&self) -> Option<&IngestReport> {
        match self {
            IngestOutcome::Ingested(r) => Some(r),
            IngestOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, IngestOutcome::Skipped { .. })
    }
}

/// Repository-wide totals for one segment size.
#[derive(Clone, Debug, Default, Serialize)]
pub struct StoreStats {
    pub segment_size: usize,
    pub physical_segments: u64,
    pub storage_bytes: u64,
    pub tables: Vec<TableStats>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TableStats {
    pub algorithm: HashAlgorithm,
    pub distinct_digests: u64,
    pub references: u64,
}
