//! Account addresses.

use crate::codec::Codec;
use crate::coord::Coordinate;
use crate::hash::Hash256;
use crate::key::PublicHash;
use std::fmt;
use std::io::{self, Read, Write};

/// Size of an [`Address`] in bytes.
pub const ADDRESS_SIZE: usize = 14;

/// A fixed-size account identifier.
///
/// The leading six bytes always carry the coordinate of the creating slot,
/// so two accounts created by different transactions can never collide.
/// Two derivations exist:
///
/// - [`Address::with_coordinate`]: coordinate plus a 64-bit ordinal, used
///   when an executing transaction creates an account at its own slot.
/// - [`Address::from_hash`]: coordinate, type tag, hash prefix and signer
///   checksum, used for deterministic off-chain address computation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// Derive an address from the creating coordinate and an ordinal.
    pub fn with_coordinate(coord: Coordinate, ordinal: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[..4].copy_from_slice(&coord.height.to_le_bytes());
        bytes[4..6].copy_from_slice(&coord.index.to_le_bytes());
        bytes[6..].copy_from_slice(&ordinal.to_le_bytes());
        Address(bytes)
    }

    /// Derive an address from (coordinate, type tag, hash, signer checksum).
    pub fn from_hash(coord: Coordinate, type_tag: u8, h: Hash256, checksum: u8) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[..4].copy_from_slice(&coord.height.to_le_bytes());
        bytes[4..6].copy_from_slice(&coord.index.to_le_bytes());
        bytes[6] = type_tag;
        bytes[7..13].copy_from_slice(&h.as_bytes()[..6]);
        bytes[13] = checksum;
        Address(bytes)
    }

    /// The coordinate embedded in the address.
    pub fn coordinate(&self) -> Coordinate {
        let height = u32::from_le_bytes(self.0[..4].try_into().expect("4 bytes"));
        let index = u16::from_le_bytes(self.0[4..6].try_into().expect("2 bytes"));
        Coordinate::new(height, index)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; ADDRESS_SIZE]>::try_from(bytes).ok().map(Address)
    }
}

/// XOR-fold checksum over signer public hashes, used in address derivation.
pub fn checksum_from_public_hashes(hashes: &[PublicHash]) -> u8 {
    let mut checksum = 0u8;
    for h in hashes {
        for b in h.as_bytes() {
            checksum ^= b;
        }
    }
    checksum
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

impl Codec for Address {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; ADDRESS_SIZE];
        r.read_exact(&mut bytes)?;
        Ok(Address(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::double_hash;

    #[test]
    fn coordinate_round_trip() {
        let coord = Coordinate::new(42, 7);
        let addr = Address::with_coordinate(coord, 5);
        assert_eq!(addr.coordinate(), coord);
    }

    #[test]
    fn derivations_are_disjoint_per_slot() {
        let a = Address::with_coordinate(Coordinate::new(1, 0), 0);
        let b = Address::with_coordinate(Coordinate::new(1, 1), 0);
        let c = Address::with_coordinate(Coordinate::new(2, 0), 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn from_hash_uses_all_inputs() {
        let coord = Coordinate::new(9, 0);
        let h = double_hash(b"tx");
        let base = Address::from_hash(coord, 1, h, 0x55);
        assert_ne!(base, Address::from_hash(coord, 2, h, 0x55));
        assert_ne!(base, Address::from_hash(coord, 1, double_hash(b"other"), 0x55));
        assert_ne!(base, Address::from_hash(coord, 1, h, 0x56));
    }

    #[test]
    fn codec_round_trip() {
        let addr = Address::with_coordinate(Coordinate::new(3, 1), 99);
        assert_eq!(Address::from_bytes(&addr.to_bytes()).unwrap(), addr);
    }
}
