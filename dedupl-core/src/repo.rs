// dedupl_core/src/repo.rs
use crate::config::EngineConfig;
use crate::domain::{ChunkRow, FileRow};
use crate::error::Result;
use crate::hash::HashAlgorithm;
use crate::layout::TableKey;
use crate::source::Source;
use crate::stats::{IngestOutcome, StoreStats};
use std::io::{Read, Write};

pub trait DedupRepo: Send + Sync {
    fn config(&self) -> &EngineConfig;

    fn ingest(
        &self,
        source: &dyn Source,
        segment_size: usize,
        algorithms: &[HashAlgorithm],
    ) -> Result<IngestOutcome>;

    fn list_files(&self) -> Result<Vec<FileRow>>;

    /// A numeric selector is a file id; anything else is a display name.
    fn resolve_file(&self, selector: &str) -> Result<FileRow>;

    fn chunk_map(&self, file_id: u64, key: TableKey) -> Result<Vec<ChunkRow>>;

    fn restore(&self, file_id: u64, key: TableKey, sink: &mut dyn Write) -> Result<u64>;

    fn verify(&self, file_id: u64, key: TableKey) -> Result<bool>;

    fn open_reader(&self, file_id: u64, key: TableKey) -> Result<Box<dyn Read + Send + '_>>;

    fn open_range(
        &self,
        file_id: u64,
        key: TableKey,
        start: u64,
        len: u64,
    ) -> Result<Box<dyn Read + Send + '_>>;

    fn stats(&self) -> Result<Vec<StoreStats>>;
}
