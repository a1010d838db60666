//! Content-addressed physical store: one append-only blob per segment size.
//!
//! Each shard owns `storage_<size>.bin` and its physical index journal
//! `index_<size>.log`. The shard mutex makes "look up content hash, append,
//! record" a single step, so concurrent first sightings of the same bytes
//! write them once.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::container::journal::Journal;
use crate::error::{DedupError, Result};
use crate::hash::Digest;
use crate::layout;

/// Location of one physical segment inside its blob.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Loc {
    pub offset: u64,
    pub length: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct PhysicalRecord {
    content_hash: Digest,
    offset: u64,
    length: u64,
}

/// Result of [`ContentStore::put_if_absent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub loc: Loc,
    pub was_new: bool,
}

struct Shard {
    blob_path: PathBuf,
    blob: Option<File>,
    end: u64,
    index: HashMap<Digest, Loc>,
    journal: Journal<PhysicalRecord>,
}

impl Shard {
    fn open(root: &Path, segment_size: usize) -> Result<Self> {
        let blob_path = layout::blob_path(root, segment_size);
        let (blob, end) = if blob_path.exists() {
            let mut f = OpenOptions::new().read(true).write(true).open(&blob_path)?;
            let end = f.seek(SeekFrom::End(0))?;
            (Some(f), end)
        } else {
            (None, 0)
        };

        let (journal, records) = Journal::<PhysicalRecord>::open(&layout::index_path(root, segment_size))?;
        let mut index = HashMap::with_capacity(records.len());
        for r in records {
            // First record wins; a later duplicate can only come from a retried append.
            index.entry(r.content_hash).or_insert(Loc {
                offset: r.offset,
                length: r.length,
            });
        }

        Ok(Self {
            blob_path,
            blob,
            end,
            index,
            journal,
        })
    }

    fn blob_for_append(&mut self) -> Result<&mut File> {
        let f = match self.blob.take() {
            Some(f) => f,
            None => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.blob_path)?,
        };
        Ok(self.blob.insert(f))
    }
}

/// All physical shards, keyed by segment size. Built once from the configured sizes.
pub struct ContentStore {
    shards: BTreeMap<usize, Mutex<Shard>>,
}

impl ContentStore {
    pub fn open(root: &Path, segment_sizes: &[usize]) -> Result<Self> {
        let mut shards = BTreeMap::new();
        for &size in segment_sizes {
            if size == 0 {
                return Err(DedupError::InvalidInput("segment size must be positive".into()));
            }
            shards.insert(size, Mutex::new(Shard::open(root, size)?));
        }
        Ok(Self { shards })
    }

    fn shard(&self, segment_size: usize) -> Result<&Mutex<Shard>> {
        self.shards.get(&segment_size).ok_or_else(|| {
            DedupError::InvalidInput(format!("segment size {segment_size} is not configured"))
        })
    }

    pub fn segment_sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.shards.keys().copied()
    }

    /// Store `bytes` under `content_hash` unless it is already present.
    pub fn put_if_absent(
        &self,
        segment_size: usize,
        content_hash: &Digest,
        bytes: &[u8],
    ) -> Result<Placement> {
        let mut shard = self.shard(segment_size)?.lock()?;
        if let Some(&loc) = shard.index.get(content_hash) {
            return Ok(Placement {
                loc,
                was_new: false,
            });
        }

        // The blob end, not the index, decides the offset: bytes orphaned by
        // an interrupted append are skipped rather than overwritten.
        let offset = shard.end;
        {
            let f = shard.blob_for_append()?;
            f.seek(SeekFrom::Start(offset))?;
            f.write_all(bytes)?;
            f.flush()?;
        }
        let loc = Loc {
            offset,
            length: bytes.len() as u64,
        };
        shard.end = offset + loc.length;
        shard.journal.append(&PhysicalRecord {
            content_hash: content_hash.clone(),
            offset,
            length: loc.length,
        })?;
        shard.index.insert(content_hash.clone(), loc);

        tracing::debug!(
            segment_size,
            content_hash = content_hash.short(),
            offset,
            length = loc.length,
            "physical write"
        );
        Ok(Placement { loc, was_new: true })
    }

    pub fn lookup(&self, segment_size: usize, content_hash: &Digest) -> Result<Option<Loc>> {
        let shard = self.shard(segment_size)?.lock()?;
        Ok(shard.index.get(content_hash).copied())
    }

    /// Read `length` bytes at `offset`. Never returns a short read.
    pub fn read(&self, segment_size: usize, offset: u64, length: u64) -> Result<Vec<u8>> {
        let mut shard = self.shard(segment_size)?.lock()?;
        let store_size = shard.end;
        let path = shard.blob_path.display().to_string();
        let f = shard
            .blob
            .as_mut()
            .ok_or_else(|| DedupError::NotFound(format!("blob store {path}")))?;

        // The file may have been truncated behind our back; trust the disk.
        let on_disk = f.metadata()?.len().min(store_size);
        let end = offset.checked_add(length);
        if end.is_none_or(|e| e > on_disk) {
            return Err(DedupError::OutOfRange {
                segment_size,
                offset,
                length,
                store_size: on_disk,
            });
        }

        let mut buf = vec![0u8; length as usize];
        f.seek(SeekFrom::Start(offset))?;
        f.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Bytes currently stored for `segment_size` (0 before the first write).
    pub fn size(&self, segment_size: usize) -> Result<u64> {
        Ok(self.shard(segment_size)?.lock()?.end)
    }

    /// Number of distinct physical segments recorded for `segment_size`.
    pub fn segment_count(&self, segment_size: usize) -> Result<usize> {
        Ok(self.shard(segment_size)?.lock()?.index.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::CONTENT_ALGORITHM;

    fn put(store: &ContentStore, size: usize, bytes: &[u8]) -> Placement {
        let h = CONTENT_ALGORITHM.digest(bytes);
        store.put_if_absent(size, &h, bytes).unwrap()
    }

    #[test]
    fn identical_content_is_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path(), &[4]).unwrap();

        let a = put(&store, 4, b"AAAA");
        let b = put(&store, 4, b"BBBB");
        let again = put(&store, 4, b"AAAA");

        assert!(a.was_new && b.was_new);
        assert!(!again.was_new);
        assert_eq!(again.loc, a.loc);
        assert_eq!(b.loc.offset, 4);
        assert_eq!(store.size(4).unwrap(), 8);
        assert_eq!(store.read(4, 4, 4).unwrap(), b"BBBB");
    }

    #[test]
    fn shards_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path(), &[4, 8]).unwrap();
        put(&store, 4, b"AAAA");
        let p = put(&store, 8, b"AAAA");
        assert!(p.was_new);
        assert_eq!(p.loc.offset, 0);
        assert!(dir.path().join("storage_4.bin").exists());
        assert!(dir.path().join("storage_8.bin").exists());
    }

    #[test]
    fn missing_blob_is_not_found_and_size_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path(), &[4]).unwrap();
        assert_eq!(store.size(4).unwrap(), 0);
        assert!(matches!(store.read(4, 0, 4), Err(DedupError::NotFound(_))));
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path(), &[4]).unwrap();
        put(&store, 4, b"AAAA");
        assert!(matches!(
            store.read(4, 2, 4),
            Err(DedupError::OutOfRange { store_size: 4, .. })
        ));
        assert!(matches!(
            store.read(4, u64::MAX, 2),
            Err(DedupError::OutOfRange { .. })
        ));
    }

    #[test]
    fn unconfigured_size_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path(), &[4]).unwrap();
        let h = CONTENT_ALGORITHM.digest(b"x");
        assert!(matches!(
            store.put_if_absent(16, &h, b"x"),
            Err(DedupError::InvalidInput(_))
        ));
    }

    #[test]
    fn index_and_offsets_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ContentStore::open(dir.path(), &[4]).unwrap();
            put(&store, 4, b"AAAA");
            put(&store, 4, b"CC");
        }
        let store = ContentStore::open(dir.path(), &[4]).unwrap();
        assert_eq!(store.size(4).unwrap(), 6);
        assert!(!put(&store, 4, b"CC").was_new);
        let d = put(&store, 4, b"DDDD");
        assert_eq!(d.loc.offset, 6);
    }

    #[test]
    fn orphaned_tail_bytes_are_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = ContentStore::open(dir.path(), &[4]).unwrap();
            put(&store, 4, b"AAAA");
        }
        // Blob grew but the index record never made it.
        {
            let mut f = OpenOptions::new()
                .append(true)
                .open(dir.path().join("storage_4.bin"))
                .unwrap();
            f.write_all(b"ZZ").unwrap();
        }
        let store = ContentStore::open(dir.path(), &[4]).unwrap();
        let p = put(&store, 4, b"BBBB");
        assert_eq!(p.loc.offset, 6);
        assert_eq!(store.read(4, 0, 4).unwrap(), b"AAAA");
    }

    #[test]
    fn concurrent_first_sightings_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path(), &[4]).unwrap();
        let h = CONTENT_ALGORITHM.digest(b"SAME");
        let news: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| store.put_if_absent(4, &h, b"SAME").unwrap().was_new))
                .collect();
            handles
                .into_iter()
                .map(|t| t.join().unwrap() as usize)
                .sum()
        });
        assert_eq!(news, 1);
        assert_eq!(store.size(4).unwrap(), 4);
    }
}
