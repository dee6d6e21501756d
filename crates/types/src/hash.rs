//! 32-byte digests and the canonical double hash.

use crate::codec::Codec;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read, Write};

/// Size of a [`Hash256`] in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte cryptographic digest.
///
/// All structural hashes in the protocol are the double-SHA256 of the
/// canonical serialization, computed via [`double_hash`] or [`hash_of`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; HASH_SIZE]);

impl Hash256 {
    /// The all-zero hash, used as the previous hash of the genesis block.
    pub const ZERO: Hash256 = Hash256([0u8; HASH_SIZE]);

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; HASH_SIZE]>::try_from(bytes).ok().map(Hash256)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", &hex::encode(self.0)[..16])
    }
}

impl Codec for Hash256 {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; HASH_SIZE];
        r.read_exact(&mut bytes)?;
        Ok(Hash256(bytes))
    }
}

/// Double-SHA256 of raw bytes.
pub fn double_hash(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256(second.into())
}

/// Double-SHA256 of a structure's canonical serialization.
pub fn hash_of<T: Codec>(value: &T) -> Hash256 {
    double_hash(&value.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_hash_is_deterministic() {
        let a = double_hash(b"fornax");
        let b = double_hash(b"fornax");
        assert_eq!(a, b);
        assert_ne!(a, double_hash(b"fornaxx"));
    }

    #[test]
    fn double_hash_differs_from_single() {
        let single: [u8; 32] = Sha256::digest(b"fornax").into();
        assert_ne!(double_hash(b"fornax").0, single);
    }

    #[test]
    fn codec_round_trip() {
        let h = double_hash(b"round trip");
        let decoded = Hash256::from_bytes(&h.to_bytes()).unwrap();
        assert_eq!(h, decoded);
    }
}
