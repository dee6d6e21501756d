//! A formulator's position in the candidate table.

use fornax_types::{read_u32, write_u32, Address, Codec, Hash256, PublicHash};
use std::cmp::Ordering;
use std::io::{self, Read, Write};

/// One candidate row: who, with which key, at which phase, with which
/// tiebreaker.
///
/// The total order is (phase, hash-space, address), smallest first. The
/// hash-space is re-seeded with the produced block hash every time the rank
/// produces, so the ordering inside a phase is unpredictable ahead of time
/// but identical on every node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rank {
    pub address: Address,
    pub public_hash: PublicHash,
    phase: u32,
    hash_space: Hash256,
}

impl Rank {
    pub fn new(address: Address, public_hash: PublicHash, phase: u32, hash_space: Hash256) -> Self {
        Self {
            address,
            public_hash,
            phase,
            hash_space,
        }
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn hash_space(&self) -> Hash256 {
        self.hash_space
    }

    pub fn set_phase(&mut self, phase: u32) {
        self.phase = phase;
    }

    /// Advance after producing: new phase plus the produced block hash as
    /// the tiebreaker.
    pub fn set(&mut self, phase: u32, hash_space: Hash256) {
        self.phase = phase;
        self.hash_space = hash_space;
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        self.phase
            .cmp(&other.phase)
            .then_with(|| self.hash_space.cmp(&other.hash_space))
            .then_with(|| self.address.cmp(&other.address))
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Codec for Rank {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.address.write_to(w)?;
        self.public_hash.write_to(w)?;
        write_u32(w, self.phase)?;
        self.hash_space.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            address: Address::read_from(r)?,
            public_hash: PublicHash::read_from(r)?,
            phase: read_u32(r)?,
            hash_space: Hash256::read_from(r)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::{double_hash, Coordinate, KeyPair};

    fn rank(n: u64, phase: u32, space: &[u8]) -> Rank {
        Rank::new(
            Address::with_coordinate(Coordinate::new(0, 0), n),
            KeyPair::generate().public_hash(),
            phase,
            double_hash(space),
        )
    }

    #[test]
    fn phase_dominates_ordering() {
        let low = rank(9, 1, b"zzz");
        let high = rank(1, 2, b"aaa");
        assert!(low < high);
    }

    #[test]
    fn hash_space_breaks_phase_ties() {
        let mut a = rank(1, 1, b"x");
        let mut b = rank(2, 1, b"y");
        if a.hash_space() > b.hash_space() {
            std::mem::swap(&mut a, &mut b);
        }
        assert!(a < b);
    }

    #[test]
    fn codec_round_trip() {
        let r = rank(3, 7, b"space");
        assert_eq!(Rank::from_bytes(&r.to_bytes()).unwrap(), r);
    }
}
