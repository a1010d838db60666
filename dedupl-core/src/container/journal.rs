use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

use crate::error::{DedupError, Result};
use crate::util::varint::{get_uvarint, put_uvarint};

const MAGIC: &[u8; 8] = b"DDPLLOG\0";
const VERSION: u8 = 1;
const HEADER_LEN: u64 = (MAGIC.len() + 1) as u64;

/// Append-only log of CBOR records, each framed as `uvarint(len) || payload`.
///
/// Every catalog table in the repository is one of these: the in-memory state
/// is rebuilt by replaying the records at open, and every mutation is appended
/// before it is applied.
pub struct Journal<T> {
    f: File,
    _rec: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Journal<T> {
    /// Open (or create) the journal at `path` and return it together with the
    /// records already on disk, in append order.
    pub fn open(path: &Path) -> Result<(Self, Vec<T>)> {
        let mut f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut header = Vec::with_capacity(HEADER_LEN as usize);
        (&mut f).take(HEADER_LEN).read_to_end(&mut header)?;
        let expected = [&MAGIC[..], &[VERSION]].concat();

        let records = if header.len() < HEADER_LEN as usize {
            // Empty, or a header torn mid-write: nothing was ever appended.
            if header[..] != expected[..header.len()] {
                return Err(DedupError::Format(format!(
                    "{}: not a dedupl journal",
                    path.display()
                )));
            }
            f.set_len(0)?;
            f.seek(SeekFrom::Start(0))?;
            f.write_all(&expected)?;
            f.flush()?;
            Vec::new()
        } else {
            if header[..MAGIC.len()] != MAGIC[..] {
                return Err(DedupError::Format(format!(
                    "{}: not a dedupl journal",
                    path.display()
                )));
            }
            let ver = header[MAGIC.len()];
            if ver != VERSION {
                return Err(DedupError::Format(format!(
                    "{}: unsupported journal version {}",
                    path.display(),
                    ver
                )));
            }
            replay(&mut f, path)?
        };

        tracing::debug!(path = %path.display(), records = records.len(), "journal opened");
        Ok((
            Self {
                f,
                _rec: PhantomData,
            },
            records,
        ))
    }

    /// Append a single record (length-delimited). Partial tails are ignored on replay.
    pub fn append(&mut self, rec: &T) -> Result<()> {
        let mut payload = Vec::with_capacity(128);
        ciborium::ser::into_writer(rec, &mut payload)
            .map_err(|e| DedupError::Format(format!("journal encode: {e}")))?;

        let mut frame = Vec::with_capacity(payload.len() + 10);
        put_uvarint(&mut frame, payload.len() as u64);
        frame.extend_from_slice(&payload);
        self.f.write_all(&frame)?;
        self.f.flush()?;
        Ok(())
    }
}

/// Reads records until EOF. A torn record at the tail (crash mid-append) is
/// cut off so the next append starts on a frame boundary.
fn replay<T: DeserializeOwned>(f: &mut File, path: &Path) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut good_end = HEADER_LEN;
    let file_len = f.metadata()?.len();
    {
        let mut r = BufReader::new(&mut *f);
        r.seek(SeekFrom::Start(HEADER_LEN))?;
        loop {
            let len = match get_uvarint(&mut r) {
                Ok(Some(n)) => n,
                Ok(None) => break,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            };
            // A frame longer than what is left can only be a torn append.
            if len > file_len - r.stream_position()? {
                break;
            }
            let mut buf = vec![0u8; len as usize];
            match r.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let rec: T = ciborium::de::from_reader(buf.as_slice())
                .map_err(|e| DedupError::Format(format!("{}: record decode: {e}", path.display())))?;
            out.push(rec);
            good_end = r.stream_position()?;
        }
    }

    if file_len > good_end {
        tracing::warn!(
            path = %path.display(),
            dropped = file_len - good_end,
            "truncating torn journal tail"
        );
        f.set_len(good_end)?;
    }
    f.seek(SeekFrom::End(0))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    enum Rec {
        Put { key: String, n: u64 },
        Bump { key: String },
    }

    #[test]
    fn records_survive_reopen_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        {
            let (mut j, recs) = Journal::<Rec>::open(&path).unwrap();
            assert!(recs.is_empty());
            j.append(&Rec::Put { key: "a".into(), n: 7 }).unwrap();
            j.append(&Rec::Bump { key: "a".into() }).unwrap();
        }
        let (_j, recs) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(
            recs,
            vec![Rec::Put { key: "a".into(), n: 7 }, Rec::Bump { key: "a".into() }]
        );
    }

    #[test]
    fn torn_tail_is_dropped_and_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        {
            let (mut j, _) = Journal::<Rec>::open(&path).unwrap();
            j.append(&Rec::Put { key: "a".into(), n: 1 }).unwrap();
        }
        // Simulate a crash halfway through the second frame.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[40, 0xa2, 0x01]).unwrap();
        }
        {
            let (mut j, recs) = Journal::<Rec>::open(&path).unwrap();
            assert_eq!(recs.len(), 1);
            j.append(&Rec::Bump { key: "a".into() }).unwrap();
        }
        let (_j, recs) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1], Rec::Bump { key: "a".into() });
    }

    #[test]
    fn torn_header_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, &MAGIC[..5]).unwrap();
        {
            let (mut j, recs) = Journal::<Rec>::open(&path).unwrap();
            assert!(recs.is_empty());
            j.append(&Rec::Bump { key: "b".into() }).unwrap();
        }
        let (_j, recs) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recs, vec![Rec::Bump { key: "b".into() }]);

        let other = dir.path().join("short.log");
        std::fs::write(&other, b"XY").unwrap();
        assert!(matches!(
            Journal::<Rec>::open(&other),
            Err(DedupError::Format(_))
        ));
    }

    #[test]
    fn oversized_frame_length_is_treated_as_torn() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        {
            let (mut j, _) = Journal::<Rec>::open(&path).unwrap();
            j.append(&Rec::Put { key: "a".into(), n: 1 }).unwrap();
        }
        let good_len = std::fs::metadata(&path).unwrap().len();
        {
            let mut frame = Vec::new();
            put_uvarint(&mut frame, u64::MAX >> 8);
            frame.extend_from_slice(b"junk");
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&frame).unwrap();
        }
        let (_j, recs) = Journal::<Rec>::open(&path).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), good_len);
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"definitely not a journal").unwrap();
        let err = Journal::<Rec>::open(&path).err().unwrap();
        assert!(matches!(err, DedupError::Format(_)));
    }
}
