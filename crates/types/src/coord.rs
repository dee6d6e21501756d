//! Chain coordinates.

use crate::codec::{read_u16, read_u32, write_u16, write_u32, Codec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};

/// A (height, index) pair identifying a chain and a position within it.
///
/// The chain itself is identified by a coordinate; a transaction inside a
/// block is identified by the coordinate of its execution slot.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub height: u32,
    pub index: u16,
}

impl Coordinate {
    pub const fn new(height: u32, index: u16) -> Self {
        Self { height, index }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.height, self.index)
    }
}

impl fmt::Debug for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coordinate({}:{})", self.height, self.index)
    }
}

impl Codec for Coordinate {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u32(w, self.height)?;
        write_u16(w, self.index)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let height = read_u32(r)?;
        let index = read_u16(r)?;
        Ok(Self { height, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_round_trip() {
        let coord = Coordinate::new(77, 3);
        assert_eq!(Coordinate::from_bytes(&coord.to_bytes()).unwrap(), coord);
        assert_eq!(coord.to_bytes().len(), 6);
    }
}
