use std::io::{ErrorKind, Read};

pub fn put_uvarint(out: &mut Vec<u8>, mut x: u64) {
    while x >= 0x80 {
        out.push((x as u8) | 0x80);
        x >>= 7;
    }
    out.push(x as u8);
}

/// Reads one LEB128 varint. `Ok(None)` on a clean EOF before the first byte;
/// EOF in the middle of a varint is reported as `UnexpectedEof`.
pub fn get_uvarint<R: Read>(r: &mut R) -> std::io::Result<Option<u64>> {
    let mut x = 0u64;
    let mut s = 0u32;
    let mut byte = [0u8; 1];
    for i in 0..10 {
        match r.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && i == 0 => return Ok(None),
            Err(e) => return Err(e),
        }
        let b = byte[0];
        if b < 0x80 {
            return Ok(Some(x | (u64::from(b) << s)));
        }
        x |= u64::from(b & 0x7f) << s;
        s += 7;
    }
    Err(std::io::Error::new(
        ErrorKind::InvalidData,
        "varint too long",
    ))
}
