//! Staking keys inside hyper-formulator account data.

use fornax_types::{Address, ADDRESS_SIZE};

/// Prefix of staked-balance entries: `0x01,0x00 ‖ staker address`.
pub const TAG_STAKING: [u8; 2] = [1, 0];

/// Prefix of auto-staking flags: `0x01,0x01 ‖ staker address`.
pub const TAG_AUTO_STAKING: [u8; 2] = [1, 1];

pub fn staking_key(address: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + ADDRESS_SIZE);
    key.extend_from_slice(&TAG_STAKING);
    key.extend_from_slice(address.as_bytes());
    key
}

pub fn auto_staking_key(address: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + ADDRESS_SIZE);
    key.extend_from_slice(&TAG_AUTO_STAKING);
    key.extend_from_slice(address.as_bytes());
    key
}

/// Recover the staker address from a staking data key.
pub fn address_from_staking_key(key: &[u8]) -> Option<Address> {
    if key.len() != 2 + ADDRESS_SIZE || key[..2] != TAG_STAKING {
        return None;
    }
    Address::from_slice(&key[2..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::Coordinate;

    #[test]
    fn staking_key_round_trip() {
        let addr = Address::with_coordinate(Coordinate::new(3, 0), 9);
        let key = staking_key(addr);
        assert_eq!(address_from_staking_key(&key), Some(addr));
        assert_eq!(address_from_staking_key(&auto_staking_key(addr)), None);
    }
}
