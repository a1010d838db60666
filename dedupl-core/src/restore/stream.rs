use std::io::{Cursor, Read};

use crate::error::{DedupError, Result};
use crate::recipe::RecipeStep;
use crate::store::ContentStore;

/// Fetch one recipe step's bytes. A missing blob or a location past its end
/// means the store no longer matches the catalog.
pub(crate) fn read_step(store: &ContentStore, segment_size: usize, step: &RecipeStep) -> Result<Vec<u8>> {
    let corrupt = |reason: String| DedupError::CorruptSegment {
        chunk_index: step.chunk_index,
        offset: step.loc.offset,
        length: step.loc.length,
        reason,
    };
    match store.read(segment_size, step.loc.offset, step.loc.length) {
        Ok(bytes) => Ok(bytes),
        Err(e @ (DedupError::OutOfRange { .. } | DedupError::NotFound(_))) => Err(corrupt(e.to_string())),
        Err(e) => Err(e),
    }
}

/// Lazy reader over a resolved recipe; holds at most one segment in memory.
pub struct RecipeReader<'a> {
    store: &'a ContentStore,
    segment_size: usize,
    steps: Vec<RecipeStep>,
    cur: usize,
    cur_buf: Option<Cursor<Vec<u8>>>,
}

impl<'a> RecipeReader<'a> {
    pub fn new(store: &'a ContentStore, segment_size: usize, steps: Vec<RecipeStep>) -> Self {
        Self {
            store,
            segment_size,
            steps,
            cur: 0,
            cur_buf: None,
        }
    }

    /// Total bytes the reader will produce.
    pub fn len(&self) -> u64 {
        self.steps.iter().map(|s| s.loc.length).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load_next(&mut self) -> std::io::Result<bool> {
        let Some(step) = self.steps.get(self.cur) else {
            return Ok(false);
        };
        let bytes = read_step(self.store, self.segment_size, step).map_err(std::io::Error::other)?;
        self.cur += 1;
        self.cur_buf = Some(Cursor::new(bytes));
        Ok(true)
    }
}

impl Read for RecipeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if let Some(ref mut cur) = self.cur_buf {
                let n = cur.read(buf)?;
                if n > 0 || buf.is_empty() {
                    return Ok(n);
                }
                self.cur_buf = None;
            }
            if !self.load_next()? {
                return Ok(0);
            }
        }
    }
}

/// A byte range of a reconstructed file.
pub struct RangeReader<'a> {
    inner: RecipeReader<'a>,
    remain: u64,
}

impl<'a> RangeReader<'a> {
    pub fn new(mut inner: RecipeReader<'a>, start: u64, len: u64) -> Result<Self> {
        // Skip whole segments without reading them, then consume the rest.
        let mut skip = start;
        while let Some(step) = inner.steps.get(inner.cur) {
            if step.loc.length > skip {
                break;
            }
            skip -= step.loc.length;
            inner.cur += 1;
        }
        std::io::copy(&mut (&mut inner).take(skip), &mut std::io::sink())?;
        Ok(Self { inner, remain: len })
    }
}

impl Read for RangeReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.remain == 0 {
            return Ok(0);
        }
        let cap = std::cmp::min(self.remain, buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..cap])?;
        self.remain -= n as u64;
        Ok(n)
    }
}
