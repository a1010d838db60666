//! Single-pass, multi-algorithm ingestion.
//!
//! A file is read twice at most: once to fingerprint the whole content, and
//! once to segment it. During the segmenting pass every physical segment is
//! stored (or found) once, then fanned out to each pending algorithm's catalog
//! and recipe table.

use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::catalog::{DedupCatalog, Sighting};
use crate::chunking::fixed::FixedChunker;
use crate::config::{EngineConfig, dedup_in_place};
use crate::error::{DedupError, Result};
use crate::hash::{CONTENT_ALGORITHM, Digest, HashAlgorithm, file_fingerprint};
use crate::layout::TableKey;
use crate::recipe::RecipeStore;
use crate::registry::FileRegistry;
use crate::source::Source;
use crate::stats::{AlgorithmStats, IngestOutcome, IngestReport};
use crate::store::ContentStore;

/// Passes currently running, keyed by (whole-file fingerprint, segment size).
/// A second ingestion of the same content at the same size waits for the
/// first to finish, then finds its algorithms completed.
#[derive(Default)]
pub struct InFlight {
    busy: Mutex<HashSet<(Digest, usize)>>,
    freed: Condvar,
}

impl InFlight {
    fn claim(&self, content_hash: &Digest, segment_size: usize) -> Result<Claim<'_>> {
        let key = (content_hash.clone(), segment_size);
        let mut busy = self.busy.lock()?;
        while busy.contains(&key) {
            busy = self.freed.wait(busy)?;
        }
        busy.insert(key.clone());
        Ok(Claim { owner: self, key })
    }
}

struct Claim<'a> {
    owner: &'a InFlight,
    key: (Digest, usize),
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut busy = self
            .owner
            .busy
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        busy.remove(&self.key);
        self.owner.freed.notify_all();
    }
}

pub struct Ingestor<'a> {
    store: &'a ContentStore,
    catalog: &'a DedupCatalog,
    registry: &'a FileRegistry,
    recipes: &'a RecipeStore,
    config: &'a EngineConfig,
    inflight: &'a InFlight,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        store: &'a ContentStore,
        catalog: &'a DedupCatalog,
        registry: &'a FileRegistry,
        recipes: &'a RecipeStore,
        config: &'a EngineConfig,
        inflight: &'a InFlight,
    ) -> Self {
        Self {
            store,
            catalog,
            registry,
            recipes,
            config,
            inflight,
        }
    }

    fn validate(&self, segment_size: usize, algorithms: &[HashAlgorithm]) -> Result<()> {
        if segment_size == 0 {
            return Err(DedupError::InvalidInput("segment size must be positive".into()));
        }
        if !self.config.supports_segment_size(segment_size) {
            return Err(DedupError::InvalidInput(format!(
                "segment size {segment_size} is not configured (have {:?})",
                self.config.segment_sizes
            )));
        }
        if algorithms.is_empty() {
            return Err(DedupError::InvalidInput("no hash algorithm requested".into()));
        }
        if let Some(a) = algorithms.iter().find(|a| !self.config.supports_algorithm(**a)) {
            return Err(DedupError::InvalidInput(format!("algorithm {a} is not configured")));
        }
        Ok(())
    }

    /// Ingest `source` at `segment_size` for every algorithm in `algorithms`
    /// that has not completed yet for this content.
    pub fn ingest(
        &self,
        source: &dyn Source,
        segment_size: usize,
        algorithms: &[HashAlgorithm],
    ) -> Result<IngestOutcome> {
        self.validate(segment_size, algorithms)?;
        let name = source.name();

        let (file_hash, file_size) = file_fingerprint(source.open()?, self.config.read_buffer_size)?;
        // Held through mark_completed so the pending set cannot go stale.
        let _claim = self.inflight.claim(&file_hash, segment_size)?;

        let mut pending = algorithms.to_vec();
        dedup_in_place(&mut pending);
        let mut todo = Vec::with_capacity(pending.len());
        for algorithm in pending {
            let key = TableKey::new(segment_size, algorithm);
            if !self.registry.has_completed(&file_hash, key)? {
                todo.push(key);
            }
        }
        if todo.is_empty() {
            tracing::info!(file = name, segment_size, "already processed, skipping");
            return Ok(IngestOutcome::Skipped {
                file_name: name.to_string(),
                content_hash: file_hash,
                segment_size,
            });
        }

        let file_id = self.registry.register(&file_hash, name, file_size)?;
        let started = Instant::now();

        let mut stats: Vec<AlgorithmStats> = todo
            .iter()
            .map(|k| AlgorithmStats {
                algorithm: k.algorithm,
                unique: 0,
                duplicate: 0,
                hashing: Duration::ZERO,
            })
            .collect();
        let mut physical_writes = 0u64;
        let mut total_segments = 0u64;
        let mut total_bytes = 0u64;
        let mut rehash = Sha256::new();

        for segment in FixedChunker::new(source.open()?, segment_size)? {
            let segment = segment?;
            rehash.update(&segment.data);
            total_bytes += segment.data.len() as u64;

            let content_hash = CONTENT_ALGORITHM.digest(&segment.data);
            let placed = self
                .store
                .put_if_absent(segment_size, &content_hash, &segment.data)?;
            if placed.was_new {
                physical_writes += 1;
            }

            for (key, st) in todo.iter().zip(stats.iter_mut()) {
                let t0 = Instant::now();
                let digest = if key.algorithm == CONTENT_ALGORITHM {
                    content_hash.clone()
                } else {
                    key.algorithm.digest(&segment.data)
                };
                st.hashing += t0.elapsed();

                match self.catalog.record(*key, &digest, placed.loc)? {
                    Sighting::Unique => st.unique += 1,
                    Sighting::Duplicate => st.duplicate += 1,
                }
                self.recipes
                    .append(*key, file_id, segment.index, &digest)?;
            }

            total_segments += 1;
            if total_segments % 100_000 == 0 {
                tracing::debug!(file = name, segments = total_segments, "segmenting");
            }
        }

        // The second read must see the bytes the fingerprint was taken over,
        // otherwise the recipe would not rebuild `file_hash`.
        let reread = hex::encode(rehash.finalize());
        if reread != file_hash.as_str() || total_bytes != file_size {
            return Err(DedupError::InvalidInput(format!(
                "{name} changed while being ingested ({file_size} -> {total_bytes} bytes)"
            )));
        }

        for key in &todo {
            self.registry.mark_completed(&file_hash, *key)?;
        }

        let report = IngestReport {
            file_id,
            file_name: name.to_string(),
            file_size,
            content_hash: file_hash,
            segment_size,
            total_segments,
            physical_writes,
            elapsed: started.elapsed(),
            storage_size: self.store.size(segment_size)?,
            algorithms: stats,
        };
        tracing::info!(
            file = name,
            file_id,
            segment_size,
            segments = total_segments,
            physical_writes,
            algorithms = ?todo.iter().map(|k| k.algorithm.name()).collect::<Vec<_>>(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingested"
        );
        Ok(IngestOutcome::Ingested(report))
    }
}
