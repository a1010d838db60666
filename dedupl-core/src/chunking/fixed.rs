use std::io::{ErrorKind, Read};

use crate::error::{DedupError, Result};

/// One fixed-size slice of the input, tagged with its 0-based position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: u64,
    pub data: Vec<u8>,
}

/// Splits a reader into `segment_size` pieces; only the last may be shorter.
///
/// The iterator is lazy and single-use, and holds at most one segment's worth
/// of bytes at a time.
pub struct FixedChunker<R: Read> {
    inner: R,
    segment_size: usize,
    next_index: u64,
    done: bool,
}

impl<R: Read> FixedChunker<R> {
    pub fn new(inner: R, segment_size: usize) -> Result<Self> {
        if segment_size == 0 {
            return Err(DedupError::InvalidInput("segment size must be positive".into()));
        }
        Ok(Self {
            inner,
            segment_size,
            next_index: 0,
            done: false,
        })
    }

    /// Fill `buf` up to `segment_size`, tolerating short reads.
    fn fill(&mut self, buf: &mut Vec<u8>) -> std::io::Result<usize> {
        buf.resize(self.segment_size, 0);
        let mut filled = 0;
        while filled < self.segment_size {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(filled)
    }
}

impl<R: Read> Iterator for FixedChunker<R> {
    type Item = Result<Segment>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut data = Vec::with_capacity(self.segment_size);
        match self.fill(&mut data) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < self.segment_size {
                    self.done = true;
                }
                let index = self.next_index;
                self.next_index += 1;
                Some(Ok(Segment { index, data }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}
