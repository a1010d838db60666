//! Rebuilds ingested files from their recipes.

use sha2::{Digest as _, Sha256};
use std::io::Write;

use crate::catalog::DedupCatalog;
use crate::error::{DedupError, Result};
use crate::layout::TableKey;
use crate::recipe::{RecipeStep, RecipeStore};
use crate::registry::{FileRecord, FileRegistry};
use crate::restore::stream::{RecipeReader, read_step};
use crate::store::ContentStore;
use crate::util::hash_forward::HashingForward;

pub struct Reconstructor<'a> {
    store: &'a ContentStore,
    catalog: &'a DedupCatalog,
    recipes: &'a RecipeStore,
    registry: &'a FileRegistry,
}

impl<'a> Reconstructor<'a> {
    pub fn new(
        store: &'a ContentStore,
        catalog: &'a DedupCatalog,
        recipes: &'a RecipeStore,
        registry: &'a FileRegistry,
    ) -> Self {
        Self {
            store,
            catalog,
            recipes,
            registry,
        }
    }

    fn file(&self, file_id: u64) -> Result<FileRecord> {
        self.registry
            .get(file_id)?
            .ok_or_else(|| DedupError::NotFound(format!("file id {file_id}")))
    }

    /// Resolved recipe of a completed pass, checked for gaps. Unknown files,
    /// passes that never completed and empty recipes are `RecipeNotFound`.
    fn steps(&self, file_id: u64, key: TableKey) -> Result<Vec<RecipeStep>> {
        let not_found = || DedupError::RecipeNotFound {
            file_id,
            segment_size: key.segment_size,
            algorithm: key.algorithm.to_string(),
        };
        let completed = self
            .registry
            .get(file_id)?
            .is_some_and(|f| f.processing_done.contains(&key));
        if !completed {
            return Err(not_found());
        }
        let steps = self.recipes.get(self.catalog, file_id, key)?;
        if steps.is_empty() {
            return Err(not_found());
        }
        for (expected, step) in steps.iter().enumerate() {
            if step.chunk_index != expected as u64 {
                return Err(DedupError::CorruptSegment {
                    chunk_index: expected as u64,
                    offset: step.loc.offset,
                    length: step.loc.length,
                    reason: format!("recipe jumps to chunk {}", step.chunk_index),
                });
            }
        }
        Ok(steps)
    }

    /// Write the bytes of `file_id` as recorded under `key` to `sink`.
    /// Returns the number of bytes written.
    pub fn reconstruct(&self, file_id: u64, key: TableKey, sink: &mut dyn Write) -> Result<u64> {
        let steps = self.steps(file_id, key)?;
        let mut written = 0u64;
        for step in &steps {
            let bytes = read_step(self.store, key.segment_size, step)?;
            sink.write_all(&bytes)?;
            written += bytes.len() as u64;
        }
        sink.flush()?;
        tracing::debug!(file_id, %key, segments = steps.len(), bytes = written, "reconstructed");
        Ok(written)
    }

    /// Like [`reconstruct`](Self::reconstruct), but an empty file that
    /// completed the pass restores to zero bytes instead of failing.
    pub fn restore(&self, file_id: u64, key: TableKey, sink: &mut dyn Write) -> Result<u64> {
        let file = self.file(file_id)?;
        if file.size == 0 && file.processing_done.contains(&key) {
            sink.flush()?;
            return Ok(0);
        }
        self.reconstruct(file_id, key, sink)
    }

    pub fn open_reader(&self, file_id: u64, key: TableKey) -> Result<RecipeReader<'a>> {
        let file = self.file(file_id)?;
        let steps = if file.size == 0 && file.processing_done.contains(&key) {
            Vec::new()
        } else {
            self.steps(file_id, key)?
        };
        Ok(RecipeReader::new(self.store, key.segment_size, steps))
    }

    /// Rebuild into a hashing sink and compare with the registered
    /// fingerprint and size.
    pub fn verify(&self, file_id: u64, key: TableKey) -> Result<bool> {
        let file = self.file(file_id)?;
        let mut hasher = Sha256::new();
        let counted = {
            let mut fwd = HashingForward::new(std::io::sink(), &mut hasher);
            self.restore(file_id, key, &mut fwd)?;
            fwd.counted
        };
        let ok = counted == file.size && hex::encode(hasher.finalize()) == file.content_hash.as_str();
        if !ok {
            tracing::warn!(file_id, %key, expected = file.size, got = counted, "verification failed");
        }
        Ok(ok)
    }
}
