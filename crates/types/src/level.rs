//! Level-root commitment.

use crate::hash::{double_hash, Hash256, HASH_SIZE};

/// Fold an ordered hash list into a single commitment.
///
/// Adjacent entries are paired and double-hashed; an odd tail is lifted to
/// the next level unchanged. Deterministic and side-free. The block header
/// commits to `build_level_root([prev_hash, tx_hash_0, tx_hash_1, …])`.
///
/// An empty list folds to the zero hash; callers always seed the list with
/// the previous block hash, so this does not occur on chain.
pub fn build_level_root(hashes: &[Hash256]) -> Hash256 {
    match hashes.len() {
        0 => Hash256::ZERO,
        1 => hashes[0],
        _ => {
            let mut level: Vec<Hash256> = hashes.to_vec();
            while level.len() > 1 {
                let mut next = Vec::with_capacity(level.len() / 2 + 1);
                for pair in level.chunks(2) {
                    if pair.len() == 2 {
                        let mut buf = [0u8; HASH_SIZE * 2];
                        buf[..HASH_SIZE].copy_from_slice(pair[0].as_bytes());
                        buf[HASH_SIZE..].copy_from_slice(pair[1].as_bytes());
                        next.push(double_hash(&buf));
                    } else {
                        next.push(pair[0]);
                    }
                }
                level = next;
            }
            level[0]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(n: u8) -> Hash256 {
        double_hash(&[n])
    }

    #[test]
    fn single_entry_is_identity() {
        assert_eq!(build_level_root(&[h(1)]), h(1));
    }

    #[test]
    fn pair_is_double_hash_of_concatenation() {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(h(1).as_bytes());
        buf[32..].copy_from_slice(h(2).as_bytes());
        assert_eq!(build_level_root(&[h(1), h(2)]), double_hash(&buf));
    }

    #[test]
    fn odd_tail_is_lifted() {
        // With three leaves, the third pairs with hash(1,2) at the next level.
        let pair = build_level_root(&[h(1), h(2)]);
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(pair.as_bytes());
        buf[32..].copy_from_slice(h(3).as_bytes());
        assert_eq!(build_level_root(&[h(1), h(2), h(3)]), double_hash(&buf));
    }

    #[test]
    fn order_matters() {
        assert_ne!(
            build_level_root(&[h(1), h(2), h(3)]),
            build_level_root(&[h(3), h(2), h(1)])
        );
    }
}
