//! Block headers.

use crate::address::Address;
use crate::codec::{read_u16, read_u32, read_u64, write_u16, write_u32, write_u64, Codec};
use crate::coord::Coordinate;
use crate::hash::{hash_of, Hash256};
use std::io::{self, Read, Write};

/// The consensus-visible metadata of a block.
///
/// The header hash (double-SHA256 of this serialization) is what the
/// generator and the observers sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u16,
    pub height: u32,
    pub prev_hash: Hash256,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u64,
    pub chain_coord: Coordinate,
    /// The formulator that produced this block.
    pub formulator: Address,
    /// Consecutive failed round votes at this height before this block.
    pub timeout_count: u32,
    /// Hash of the fully-executed context.
    pub context_hash: Hash256,
    /// Level root over `prev_hash ‖ tx_hashes…`.
    pub level_root_hash: Hash256,
}

impl Header {
    pub fn hash(&self) -> Hash256 {
        hash_of(self)
    }
}

impl Codec for Header {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_u16(w, self.version)?;
        write_u32(w, self.height)?;
        self.prev_hash.write_to(w)?;
        write_u64(w, self.timestamp)?;
        self.chain_coord.write_to(w)?;
        self.formulator.write_to(w)?;
        write_u32(w, self.timeout_count)?;
        self.context_hash.write_to(w)?;
        self.level_root_hash.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            version: read_u16(r)?,
            height: read_u32(r)?,
            prev_hash: Hash256::read_from(r)?,
            timestamp: read_u64(r)?,
            chain_coord: Coordinate::read_from(r)?,
            formulator: Address::read_from(r)?,
            timeout_count: read_u32(r)?,
            context_hash: Hash256::read_from(r)?,
            level_root_hash: Hash256::read_from(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::double_hash;

    fn sample_header() -> Header {
        Header {
            version: 1,
            height: 12,
            prev_hash: double_hash(b"prev"),
            timestamp: 1_700_000_000_000_000_000,
            chain_coord: Coordinate::new(0, 0),
            formulator: Address::with_coordinate(Coordinate::new(0, 0), 1),
            timeout_count: 2,
            context_hash: double_hash(b"ctx"),
            level_root_hash: double_hash(b"root"),
        }
    }

    #[test]
    fn codec_round_trip() {
        let header = sample_header();
        let decoded = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.hash(), header.hash());
    }

    #[test]
    fn hash_commits_to_every_field() {
        let header = sample_header();
        let mut changed = header.clone();
        changed.timeout_count += 1;
        assert_ne!(header.hash(), changed.hash());
    }
}
