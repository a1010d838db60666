use std::io::{Read, Write};

use crate::catalog::DedupCatalog;
use crate::config::EngineConfig;
use crate::domain::{ChunkRow, FileRow};
use crate::error::{DedupError, Result};
use crate::hash::HashAlgorithm;
use crate::ingest::{InFlight, Ingestor};
use crate::layout::TableKey;
use crate::recipe::RecipeStore;
use crate::registry::{FileRecord, FileRegistry};
use crate::repo::DedupRepo;
use crate::restore::reconstruct::Reconstructor;
use crate::restore::stream::RangeReader;
use crate::source::Source;
use crate::stats::{IngestOutcome, StoreStats, TableStats};
use crate::store::ContentStore;

/// Directory-backed repository: every component opened once from the config.
pub struct FsDedupRepo {
    config: EngineConfig,
    store: ContentStore,
    catalog: DedupCatalog,
    registry: FileRegistry,
    recipes: RecipeStore,
    inflight: InFlight,
}

impl FsDedupRepo {
    pub fn open(config: EngineConfig) -> Result<Self> {
        let config = config.validate()?;
        std::fs::create_dir_all(&config.root)?;

        let keys: Vec<TableKey> = config
            .segment_sizes
            .iter()
            .flat_map(|&s| config.algorithms.iter().map(move |&a| TableKey::new(s, a)))
            .collect();

        let store = ContentStore::open(&config.root, &config.segment_sizes)?;
        let catalog = DedupCatalog::open(&config.root, keys.iter().copied())?;
        let recipes = RecipeStore::open(&config.root, keys.iter().copied())?;
        let registry = FileRegistry::open(&config.root)?;

        tracing::info!(
            root = %config.root.display(),
            segment_sizes = ?config.segment_sizes,
            algorithms = ?config.algorithms,
            "repository opened"
        );
        Ok(Self {
            config,
            store,
            catalog,
            registry,
            recipes,
            inflight: InFlight::default(),
        })
    }

    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(
            &self.store,
            &self.catalog,
            &self.registry,
            &self.recipes,
            &self.config,
            &self.inflight,
        )
    }

    pub fn reconstructor(&self) -> Reconstructor<'_> {
        Reconstructor::new(&self.store, &self.catalog, &self.recipes, &self.registry)
    }

    fn row(f: FileRecord) -> FileRow {
        FileRow {
            file_id: f.file_id,
            name: f.name,
            content_hash: f.content_hash.to_string(),
            size: f.size,
            processing_done: f.processing_done.iter().map(|k| k.to_string()).collect(),
            registered_at: f.registered_at,
        }
    }
}

impl DedupRepo for FsDedupRepo {
    fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ingest(
        &self,
        source: &dyn Source,
        segment_size: usize,
        algorithms: &[HashAlgorithm],
    ) -> Result<IngestOutcome> {
        self.ingestor().ingest(source, segment_size, algorithms)
    }

    fn list_files(&self) -> Result<Vec<FileRow>> {
        Ok(self.registry.list()?.into_iter().map(Self::row).collect())
    }

    fn resolve_file(&self, selector: &str) -> Result<FileRow> {
        let found = match selector.parse::<u64>() {
            Ok(id) => self.registry.get(id)?,
            Err(_) => self.registry.find_by_name(selector)?,
        };
        found
            .map(Self::row)
            .ok_or_else(|| DedupError::NotFound(format!("file {selector:?}")))
    }

    fn chunk_map(&self, file_id: u64, key: TableKey) -> Result<Vec<ChunkRow>> {
        let completed = self
            .registry
            .get(file_id)?
            .is_some_and(|f| f.processing_done.contains(&key));
        if !completed {
            return Ok(Vec::new());
        }
        let steps = self.recipes.get(&self.catalog, file_id, key)?;
        let total: u64 = steps.iter().map(|s| s.loc.length).sum();
        let mut file_off = 0u64;
        let mut rows = Vec::with_capacity(steps.len());
        for s in steps {
            let ref_count = self
                .catalog
                .entry(key, &s.digest)?
                .map(|e| e.ref_count)
                .unwrap_or(0);
            let end = file_off + s.loc.length;
            rows.push(ChunkRow {
                chunk_index: s.chunk_index,
                digest: s.digest.to_string(),
                offset: s.loc.offset,
                length: s.loc.length,
                ref_count,
                file_off,
                pct_end: if total == 0 {
                    100.0
                } else {
                    (end as f64 * 100.0 / total as f64) as f32
                },
            });
            file_off = end;
        }
        Ok(rows)
    }

    fn restore(&self, file_id: u64, key: TableKey, sink: &mut dyn Write) -> Result<u64> {
        self.reconstructor().restore(file_id, key, sink)
    }

    fn verify(&self, file_id: u64, key: TableKey) -> Result<bool> {
        self.reconstructor().verify(file_id, key)
    }

    fn open_reader(&self, file_id: u64, key: TableKey) -> Result<Box<dyn Read + Send + '_>> {
        let r = self.reconstructor().open_reader(file_id, key)?;
        Ok(Box::new(r))
    }

    fn open_range(
        &self,
        file_id: u64,
        key: TableKey,
        start: u64,
        len: u64,
    ) -> Result<Box<dyn Read + Send + '_>> {
        let r = self.reconstructor().open_reader(file_id, key)?;
        Ok(Box::new(RangeReader::new(r, start, len)?))
    }

    fn stats(&self) -> Result<Vec<StoreStats>> {
        let mut out = Vec::new();
        for segment_size in self.store.segment_sizes() {
            let mut tables = Vec::new();
            for &algorithm in &self.config.algorithms {
                let key = TableKey::new(segment_size, algorithm);
                tables.push(TableStats {
                    algorithm,
                    distinct_digests: self.catalog.len(key)? as u64,
                    references: self.catalog.total_refs(key)?,
                });
            }
            out.push(StoreStats {
                segment_size,
                physical_segments: self.store.segment_count(segment_size)? as u64,
                storage_bytes: self.store.size(segment_size)?,
                tables,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn config(root: &std::path::Path) -> EngineConfig {
        EngineConfig {
            root: root.to_path_buf(),
            segment_sizes: vec![4, 8],
            algorithms: vec![HashAlgorithm::Md5, HashAlgorithm::Sha256],
            read_buffer_size: 16,
        }
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let data = b"AAAABBBBAAAACC".to_vec();
        let id = {
            let repo = FsDedupRepo::open(config(dir.path())).unwrap();
            let out = repo
                .ingest(&MemorySource::new("f.bin", data.clone()), 4, &[HashAlgorithm::Md5])
                .unwrap();
            out.report().unwrap().file_id
        };

        let repo = FsDedupRepo::open(config(dir.path())).unwrap();
        let key = TableKey::new(4, HashAlgorithm::Md5);
        let mut out = Vec::new();
        repo.restore(id, key, &mut out).unwrap();
        assert_eq!(out, data);
        assert!(repo.verify(id, key).unwrap());

        let again = repo
            .ingest(&MemorySource::new("f.bin", data), 4, &[HashAlgorithm::Md5])
            .unwrap();
        assert!(again.is_skipped());

        let files = repo.list_files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].processing_done, vec!["4_md5".to_string()]);
    }

    #[test]
    fn resolve_by_id_or_name() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsDedupRepo::open(config(dir.path())).unwrap();
        repo.ingest(&MemorySource::new("a.txt", b"hello".to_vec()), 4, &[HashAlgorithm::Md5])
            .unwrap();
        assert_eq!(repo.resolve_file("1").unwrap().name, "a.txt");
        assert_eq!(repo.resolve_file("a.txt").unwrap().file_id, 1);
        assert!(matches!(repo.resolve_file("b.txt"), Err(DedupError::NotFound(_))));
    }

    #[test]
    fn chunk_map_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsDedupRepo::open(config(dir.path())).unwrap();
        let algos = [HashAlgorithm::Md5, HashAlgorithm::Sha256];
        repo.ingest(&MemorySource::new("f", b"AAAAAAAAZZ".to_vec()), 4, &algos)
            .unwrap();

        let rows = repo.chunk_map(1, TableKey::new(4, HashAlgorithm::Sha256)).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].ref_count, 2);
        assert_eq!(rows[1].offset, rows[0].offset);
        assert_eq!(rows[2].file_off, 8);
        assert_eq!(rows[2].pct_end, 100.0);
        assert!(repo.chunk_map(1, TableKey::new(8, HashAlgorithm::Md5)).unwrap().is_empty());

        let stats = repo.stats().unwrap();
        let s4 = stats.iter().find(|s| s.segment_size == 4).unwrap();
        assert_eq!(s4.physical_segments, 2);
        assert_eq!(s4.storage_bytes, 6);
        for t in &s4.tables {
            assert_eq!((t.distinct_digests, t.references), (2, 3));
        }
        let s8 = stats.iter().find(|s| s.segment_size == 8).unwrap();
        assert_eq!(s8.storage_bytes, 0);
    }

    #[test]
    fn range_reads_cross_segments() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FsDedupRepo::open(config(dir.path())).unwrap();
        let data: Vec<u8> = (b'a'..=b'z').collect();
        repo.ingest(&MemorySource::new("abc", data.clone()), 8, &[HashAlgorithm::Sha256])
            .unwrap();
        let mut part = Vec::new();
        repo.open_range(1, TableKey::new(8, HashAlgorithm::Sha256), 6, 5)
            .unwrap()
            .read_to_end(&mut part)
            .unwrap();
        assert_eq!(part, &data[6..11]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.segment_sizes.clear();
        assert!(matches!(FsDedupRepo::open(cfg), Err(DedupError::InvalidInput(_))));
    }
}
