//! File registry: one row per distinct whole-file content, plus the set of
//! (segment size, algorithm) passes already completed for it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Mutex;
use time::OffsetDateTime;

use crate::container::journal::Journal;
use crate::error::{DedupError, Result};
use crate::hash::Digest;
use crate::layout::{self, TableKey};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileRecord {
    pub file_id: u64,
    pub name: String,
    pub content_hash: Digest,
    pub size: u64,
    pub processing_done: BTreeSet<TableKey>,
    /// Unix seconds of first registration.
    pub registered_at: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
enum RegistryRecord {
    Registered {
        file_id: u64,
        content_hash: Digest,
        name: String,
        size: u64,
        at: i64,
    },
    Renamed {
        file_id: u64,
        name: String,
    },
    Completed {
        file_id: u64,
        key: TableKey,
    },
}

#[derive(Default)]
struct State {
    by_id: BTreeMap<u64, FileRecord>,
    by_hash: HashMap<Digest, u64>,
    next_id: u64,
}

impl State {
    fn apply(&mut self, rec: &RegistryRecord) {
        match rec {
            RegistryRecord::Registered {
                file_id,
                content_hash,
                name,
                size,
                at,
            } => {
                if self.by_hash.contains_key(content_hash) {
                    return;
                }
                self.by_hash.insert(content_hash.clone(), *file_id);
                self.by_id.insert(
                    *file_id,
                    FileRecord {
                        file_id: *file_id,
                        name: name.clone(),
                        content_hash: content_hash.clone(),
                        size: *size,
                        processing_done: BTreeSet::new(),
                        registered_at: *at,
                    },
                );
                self.next_id = self.next_id.max(*file_id);
            }
            RegistryRecord::Renamed { file_id, name } => {
                if let Some(f) = self.by_id.get_mut(file_id) {
                    f.name = name.clone();
                }
            }
            RegistryRecord::Completed { file_id, key } => {
                if let Some(f) = self.by_id.get_mut(file_id) {
                    f.processing_done.insert(*key);
                }
            }
        }
    }

    fn by_hash(&self, content_hash: &Digest) -> Option<&FileRecord> {
        self.by_hash.get(content_hash).and_then(|id| self.by_id.get(id))
    }
}

struct Inner {
    state: State,
    journal: Journal<RegistryRecord>,
}

impl Inner {
    fn commit(&mut self, rec: RegistryRecord) -> Result<()> {
        self.journal.append(&rec)?;
        self.state.apply(&rec);
        Ok(())
    }
}

pub struct FileRegistry {
    inner: Mutex<Inner>,
}

impl FileRegistry {
    pub fn open(root: &Path) -> Result<Self> {
        let (journal, records) = Journal::<RegistryRecord>::open(&layout::registry_path(root))?;
        let mut state = State::default();
        for rec in &records {
            state.apply(rec);
        }
        Ok(Self {
            inner: Mutex::new(Inner { state, journal }),
        })
    }

    /// Upsert by content hash. New content gets a fresh id; known content
    /// only has its display name updated.
    pub fn register(&self, content_hash: &Digest, name: &str, size: u64) -> Result<u64> {
        let mut inner = self.inner.lock()?;
        let existing = inner
            .state
            .by_hash(content_hash)
            .map(|f| (f.file_id, f.name != name));
        if let Some((file_id, renamed)) = existing {
            if renamed {
                inner.commit(RegistryRecord::Renamed {
                    file_id,
                    name: name.to_string(),
                })?;
            }
            return Ok(file_id);
        }

        let file_id = inner.state.next_id + 1;
        inner.commit(RegistryRecord::Registered {
            file_id,
            content_hash: content_hash.clone(),
            name: name.to_string(),
            size,
            at: OffsetDateTime::now_utc().unix_timestamp(),
        })?;
        tracing::debug!(file_id, name, size, "registered file");
        Ok(file_id)
    }

    pub fn has_completed(&self, content_hash: &Digest, key: TableKey) -> Result<bool> {
        let inner = self.inner.lock()?;
        Ok(inner
            .state
            .by_hash(content_hash)
            .is_some_and(|f| f.processing_done.contains(&key)))
    }

    pub fn mark_completed(&self, content_hash: &Digest, key: TableKey) -> Result<()> {
        let mut inner = self.inner.lock()?;
        let (file_id, done) = inner
            .state
            .by_hash(content_hash)
            .map(|f| (f.file_id, f.processing_done.contains(&key)))
            .ok_or_else(|| DedupError::NotFound(format!("file with content {content_hash}")))?;
        if done {
            return Ok(());
        }
        inner.commit(RegistryRecord::Completed { file_id, key })
    }

    /// All files ordered by id.
    pub fn list(&self) -> Result<Vec<FileRecord>> {
        let inner = self.inner.lock()?;
        Ok(inner.state.by_id.values().cloned().collect())
    }

    pub fn get(&self, file_id: u64) -> Result<Option<FileRecord>> {
        Ok(self.inner.lock()?.state.by_id.get(&file_id).cloned())
    }

    /// Most recently registered file currently displayed under `name`.
    pub fn find_by_name(&self, name: &str) -> Result<Option<FileRecord>> {
        let inner = self.inner.lock()?;
        Ok(inner
            .state
            .by_id
            .values()
            .rev()
            .find(|f| f.name == name)
            .cloned())
    }
}
