use sha2::{Digest as _, Sha256};
use std::io::{Result, Write};

/// Write adapter that hashes (SHA-256) and counts everything passing through.
pub struct HashingForward<'a, W: Write> {
    inner: W,
    hasher: &'a mut Sha256,
    pub counted: u64,
}

impl<'a, W: Write> HashingForward<'a, W> {
    pub fn new(inner: W, hasher: &'a mut Sha256) -> Self {
        Self {
            inner,
            hasher,
            counted: 0,
        }
    }
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for HashingForward<'_, W> {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.counted += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> Result<()> {
        self.inner.flush()
    }
}
