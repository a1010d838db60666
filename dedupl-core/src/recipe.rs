//! Recipe store: per (segment size, algorithm), the ordered digests that
//! rebuild each file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::catalog::DedupCatalog;
use crate::container::journal::Journal;
use crate::error::{DedupError, Result};
use crate::hash::Digest;
use crate::layout::{self, TableKey};
use crate::store::Loc;

/// One resolved recipe row: which digest sits at `chunk_index`, and where
/// its bytes live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecipeStep {
    pub chunk_index: u64,
    pub digest: Digest,
    pub loc: Loc,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct RecipeRecord {
    file_id: u64,
    chunk_index: u64,
    digest: Digest,
}

struct Table {
    rows: BTreeMap<(u64, u64), Digest>,
    journal: Journal<RecipeRecord>,
}

pub struct RecipeStore {
    tables: BTreeMap<TableKey, Mutex<Table>>,
}

impl RecipeStore {
    pub fn open(root: &Path, keys: impl IntoIterator<Item = TableKey>) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for key in keys {
            let (journal, records) = Journal::<RecipeRecord>::open(&layout::recipe_path(root, key))?;
            let rows = records
                .into_iter()
                .map(|r| ((r.file_id, r.chunk_index), r.digest))
                .collect();
            tables.insert(key, Mutex::new(Table { rows, journal }));
        }
        Ok(Self { tables })
    }

    fn table(&self, key: TableKey) -> Result<&Mutex<Table>> {
        self.tables
            .get(&key)
            .ok_or_else(|| DedupError::InvalidInput(format!("no recipe table {key}")))
    }

    /// Record that chunk `chunk_index` of `file_id` is `digest`. Re-appending
    /// an existing index (a retried pass) replaces the earlier row.
    pub fn append(&self, key: TableKey, file_id: u64, chunk_index: u64, digest: &Digest) -> Result<()> {
        let mut t = self.table(key)?.lock()?;
        t.journal.append(&RecipeRecord {
            file_id,
            chunk_index,
            digest: digest.clone(),
        })?;
        t.rows.insert((file_id, chunk_index), digest.clone());
        Ok(())
    }

    /// Rows for `file_id` in chunk order, joined with `catalog` for their
    /// locations. Empty when the file never completed this pass.
    pub fn get(&self, catalog: &DedupCatalog, file_id: u64, key: TableKey) -> Result<Vec<RecipeStep>> {
        let digests: Vec<(u64, Digest)> = {
            let t = self.table(key)?.lock()?;
            t.rows
                .range((file_id, 0)..=(file_id, u64::MAX))
                .map(|(&(_, idx), d)| (idx, d.clone()))
                .collect()
        };

        digests
            .into_iter()
            .map(|(chunk_index, digest)| {
                let loc = catalog.lookup(key, &digest)?.ok_or_else(|| {
                    DedupError::NotFound(format!(
                        "catalog {key} has no entry for {digest} (file {file_id} chunk {chunk_index})"
                    ))
                })?;
                Ok(RecipeStep {
                    chunk_index,
                    digest,
                    loc,
                })
            })
            .collect()
    }

    pub fn len(&self, file_id: u64, key: TableKey) -> Result<usize> {
        let t = self.table(key)?.lock()?;
        Ok(t.rows.range((file_id, 0)..=(file_id, u64::MAX)).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    const K: TableKey = TableKey {
        segment_size: 4,
        algorithm: HashAlgorithm::Sha256,
    };

    #[test]
    fn rows_come_back_in_chunk_order_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let rec = RecipeStore::open(dir.path(), [K]).unwrap();

        let a = HashAlgorithm::Sha256.digest(b"AAAA");
        let b = HashAlgorithm::Sha256.digest(b"BB");
        cat.insert_new(K, &a, Loc { offset: 0, length: 4 }).unwrap();
        cat.insert_new(K, &b, Loc { offset: 4, length: 2 }).unwrap();

        rec.append(K, 1, 0, &a).unwrap();
        rec.append(K, 2, 0, &b).unwrap();
        rec.append(K, 1, 1, &a).unwrap();
        rec.append(K, 1, 2, &b).unwrap();

        let steps = rec.get(&cat, 1, K).unwrap();
        assert_eq!(
            steps.iter().map(|s| s.chunk_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(steps[2].loc, Loc { offset: 4, length: 2 });
        assert_eq!(rec.len(2, K).unwrap(), 1);
        assert!(rec.get(&cat, 3, K).unwrap().is_empty());
    }

    #[test]
    fn dangling_digest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let rec = RecipeStore::open(dir.path(), [K]).unwrap();
        rec.append(K, 1, 0, &HashAlgorithm::Sha256.digest(b"ghost"))
            .unwrap();
        assert!(matches!(rec.get(&cat, 1, K), Err(DedupError::NotFound(_))));
    }

    #[test]
    fn reappend_replaces_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let a = HashAlgorithm::Sha256.digest(b"AAAA");
        let b = HashAlgorithm::Sha256.digest(b"BBBB");
        {
            let rec = RecipeStore::open(dir.path(), [K]).unwrap();
            rec.append(K, 1, 0, &a).unwrap();
            rec.append(K, 1, 0, &b).unwrap();
        }
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        cat.insert_new(K, &b, Loc { offset: 0, length: 4 }).unwrap();
        let rec = RecipeStore::open(dir.path(), [K]).unwrap();
        let steps = rec.get(&cat, 1, K).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].digest, b);
    }
}
