//! Logical dedup catalog: one table per (segment size, algorithm) mapping a
//! segment digest to the physical location it shares and a reference count.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use crate::container::journal::Journal;
use crate::error::{DedupError, Result};
use crate::hash::Digest;
use crate::layout::{self, TableKey};
use crate::store::Loc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogicalEntry {
    pub loc: Loc,
    pub ref_count: u64,
}

/// Outcome of [`DedupCatalog::record`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sighting {
    Unique,
    Duplicate,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
enum CatalogRecord {
    Insert { digest: Digest, offset: u64, length: u64 },
    Increment { digest: Digest },
}

struct Table {
    entries: HashMap<Digest, LogicalEntry>,
    journal: Journal<CatalogRecord>,
}

impl Table {
    fn open(root: &Path, key: TableKey) -> Result<Self> {
        let (journal, records) = Journal::<CatalogRecord>::open(&layout::catalog_path(root, key))?;
        let mut entries = HashMap::new();
        for rec in &records {
            apply(&mut entries, rec);
        }
        Ok(Self { entries, journal })
    }

    fn insert(&mut self, digest: &Digest, loc: Loc) -> Result<()> {
        let rec = CatalogRecord::Insert {
            digest: digest.clone(),
            offset: loc.offset,
            length: loc.length,
        };
        self.journal.append(&rec)?;
        apply(&mut self.entries, &rec);
        Ok(())
    }

    fn bump(&mut self, digest: &Digest) -> Result<()> {
        let rec = CatalogRecord::Increment {
            digest: digest.clone(),
        };
        self.journal.append(&rec)?;
        apply(&mut self.entries, &rec);
        Ok(())
    }
}

fn apply(entries: &mut HashMap<Digest, LogicalEntry>, rec: &CatalogRecord) {
    match rec {
        CatalogRecord::Insert {
            digest,
            offset,
            length,
        } => {
            entries.entry(digest.clone()).or_insert(LogicalEntry {
                loc: Loc {
                    offset: *offset,
                    length: *length,
                },
                ref_count: 1,
            });
        }
        CatalogRecord::Increment { digest } => {
            if let Some(e) = entries.get_mut(digest) {
                e.ref_count += 1;
            }
        }
    }
}

/// Every configured (segment size, algorithm) table.
pub struct DedupCatalog {
    tables: BTreeMap<TableKey, Mutex<Table>>,
}

impl DedupCatalog {
    pub fn open(root: &Path, keys: impl IntoIterator<Item = TableKey>) -> Result<Self> {
        let mut tables = BTreeMap::new();
        for key in keys {
            tables.insert(key, Mutex::new(Table::open(root, key)?));
        }
        Ok(Self { tables })
    }

    fn table(&self, key: TableKey) -> Result<&Mutex<Table>> {
        self.tables
            .get(&key)
            .ok_or_else(|| DedupError::InvalidInput(format!("no catalog table {key}")))
    }

    pub fn lookup(&self, key: TableKey, digest: &Digest) -> Result<Option<Loc>> {
        Ok(self.entry(key, digest)?.map(|e| e.loc))
    }

    pub fn entry(&self, key: TableKey, digest: &Digest) -> Result<Option<LogicalEntry>> {
        let t = self.table(key)?.lock()?;
        Ok(t.entries.get(digest).copied())
    }

    /// Create the entry with `ref_count = 1`; first writer wins.
    pub fn insert_new(&self, key: TableKey, digest: &Digest, loc: Loc) -> Result<()> {
        let mut t = self.table(key)?.lock()?;
        if t.entries.contains_key(digest) {
            return Ok(());
        }
        t.insert(digest, loc)
    }

    pub fn increment(&self, key: TableKey, digest: &Digest) -> Result<()> {
        let mut t = self.table(key)?.lock()?;
        if !t.entries.contains_key(digest) {
            return Err(DedupError::NotFound(format!("digest {digest} in {key}")));
        }
        t.bump(digest)
    }

    /// Insert-or-increment as one step under the table lock.
    pub fn record(&self, key: TableKey, digest: &Digest, loc: Loc) -> Result<Sighting> {
        let mut t = self.table(key)?.lock()?;
        if t.entries.contains_key(digest) {
            t.bump(digest)?;
            Ok(Sighting::Duplicate)
        } else {
            t.insert(digest, loc)?;
            Ok(Sighting::Unique)
        }
    }

    /// Number of distinct digests in the table.
    pub fn len(&self, key: TableKey) -> Result<usize> {
        Ok(self.table(key)?.lock()?.entries.len())
    }

    /// Sum of all reference counts in the table.
    pub fn total_refs(&self, key: TableKey) -> Result<u64> {
        let t = self.table(key)?.lock()?;
        Ok(t.entries.values().map(|e| e.ref_count).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashAlgorithm;

    const K: TableKey = TableKey {
        segment_size: 4,
        algorithm: HashAlgorithm::Md5,
    };

    fn loc(offset: u64) -> Loc {
        Loc { offset, length: 4 }
    }

    #[test]
    fn insert_is_first_writer_wins() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let d = HashAlgorithm::Md5.digest(b"AAAA");
        cat.insert_new(K, &d, loc(0)).unwrap();
        cat.insert_new(K, &d, loc(99)).unwrap();
        let e = cat.entry(K, &d).unwrap().unwrap();
        assert_eq!(e.loc, loc(0));
        assert_eq!(e.ref_count, 1);
    }

    #[test]
    fn increment_requires_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let d = HashAlgorithm::Md5.digest(b"AAAA");
        assert!(matches!(cat.increment(K, &d), Err(DedupError::NotFound(_))));
        cat.insert_new(K, &d, loc(0)).unwrap();
        cat.increment(K, &d).unwrap();
        assert_eq!(cat.entry(K, &d).unwrap().unwrap().ref_count, 2);
    }

    #[test]
    fn record_counts_unique_then_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let d = HashAlgorithm::Md5.digest(b"AAAA");
        assert_eq!(cat.record(K, &d, loc(0)).unwrap(), Sighting::Unique);
        assert_eq!(cat.record(K, &d, loc(8)).unwrap(), Sighting::Duplicate);
        assert_eq!(cat.record(K, &d, loc(8)).unwrap(), Sighting::Duplicate);
        let e = cat.entry(K, &d).unwrap().unwrap();
        assert_eq!(e.ref_count, 3);
        assert_eq!(e.loc, loc(0));
        assert_eq!(cat.len(K).unwrap(), 1);
        assert_eq!(cat.total_refs(K).unwrap(), 3);
    }

    #[test]
    fn ref_counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let d = HashAlgorithm::Md5.digest(b"AAAA");
        {
            let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
            cat.record(K, &d, loc(0)).unwrap();
            cat.record(K, &d, loc(0)).unwrap();
        }
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        assert_eq!(cat.entry(K, &d).unwrap().unwrap().ref_count, 2);
        assert_eq!(cat.lookup(K, &d).unwrap(), Some(loc(0)));
    }

    #[test]
    fn unknown_table_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let other = TableKey::new(4, HashAlgorithm::Sha256);
        let d = HashAlgorithm::Sha256.digest(b"x");
        assert!(matches!(cat.lookup(other, &d), Err(DedupError::InvalidInput(_))));
    }

    #[test]
    fn concurrent_records_count_every_sighting() {
        let dir = tempfile::tempdir().unwrap();
        let cat = DedupCatalog::open(dir.path(), [K]).unwrap();
        let d = HashAlgorithm::Md5.digest(b"AAAA");
        let uniques: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| s.spawn(|| cat.record(K, &d, loc(0)).unwrap() == Sighting::Unique))
                .collect();
            handles
                .into_iter()
                .map(|t| t.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(uniques, 1);
        assert_eq!(cat.entry(K, &d).unwrap().unwrap().ref_count, 6);
    }
}
