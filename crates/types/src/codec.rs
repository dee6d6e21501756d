//! Canonical binary serialization.
//!
//! All on-wire and on-disk structures use the same layout rules: integers
//! little-endian, booleans one byte, byte slices length-prefixed with a
//! `u32`, strings length-prefixed with a `u16`, nested structures inlined in
//! declaration order. Structural hashes are computed over exactly these
//! bytes, so implementations of [`Codec`] must be stable.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// A structure with a canonical binary form.
pub trait Codec: Sized {
    /// Serialize into the writer.
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()>;

    /// Deserialize from the reader.
    fn read_from<R: Read>(r: &mut R) -> io::Result<Self>;

    /// Serialize into a fresh buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail.
        self.write_to(&mut buf).expect("write to Vec");
        buf
    }

    /// Deserialize from a byte slice.
    fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut cursor = io::Cursor::new(bytes);
        Self::read_from(&mut cursor)
    }
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_u8(v)
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> io::Result<()> {
    w.write_u16::<LittleEndian>(v)
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v)
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v)
}

pub fn write_bool<W: Write>(w: &mut W, v: bool) -> io::Result<()> {
    w.write_u8(v as u8)
}

/// Length-prefixed (u32) byte slice.
pub fn write_bytes<W: Write>(w: &mut W, v: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(v.len() as u32)?;
    w.write_all(v)
}

/// Length-prefixed (u16) UTF-8 string.
pub fn write_string<W: Write>(w: &mut W, v: &str) -> io::Result<()> {
    w.write_u16::<LittleEndian>(v.len() as u16)?;
    w.write_all(v.as_bytes())
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    r.read_u8()
}

pub fn read_u16<R: Read>(r: &mut R) -> io::Result<u16> {
    r.read_u16::<LittleEndian>()
}

pub fn read_u32<R: Read>(r: &mut R) -> io::Result<u32> {
    r.read_u32::<LittleEndian>()
}

pub fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    r.read_u64::<LittleEndian>()
}

pub fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    Ok(r.read_u8()? != 0)
}

pub fn read_bytes<R: Read>(r: &mut R) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub fn read_string<R: Read>(r: &mut R) -> io::Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

impl Codec for Vec<u8> {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_bytes(w, self)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        read_bytes(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip() {
        let mut buf = Vec::new();
        write_u8(&mut buf, 0xab).unwrap();
        write_u16(&mut buf, 0xbeef).unwrap();
        write_u32(&mut buf, 0xdead_beef).unwrap();
        write_u64(&mut buf, u64::MAX - 7).unwrap();
        write_bool(&mut buf, true).unwrap();
        write_bytes(&mut buf, b"payload").unwrap();
        write_string(&mut buf, "fornax").unwrap();

        let mut r = io::Cursor::new(buf);
        assert_eq!(read_u8(&mut r).unwrap(), 0xab);
        assert_eq!(read_u16(&mut r).unwrap(), 0xbeef);
        assert_eq!(read_u32(&mut r).unwrap(), 0xdead_beef);
        assert_eq!(read_u64(&mut r).unwrap(), u64::MAX - 7);
        assert!(read_bool(&mut r).unwrap());
        assert_eq!(read_bytes(&mut r).unwrap(), b"payload");
        assert_eq!(read_string(&mut r).unwrap(), "fornax");
    }

    #[test]
    fn integers_are_little_endian() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 1).unwrap();
        assert_eq!(buf, [1, 0, 0, 0]);
    }

    #[test]
    fn truncated_input_errors() {
        let mut r = io::Cursor::new(vec![1, 2]);
        assert!(read_u32(&mut r).is_err());
    }
}
