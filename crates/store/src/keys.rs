//! The on-disk key layout.
//!
//! Every key is a two-byte tag followed by its payload. This layout is the
//! authoritative persisted format; changing a tag is a chain-breaking
//! migration.

use fornax_types::{Address, Hash256, ADDRESS_SIZE};

pub const TAG_HEIGHT_HASH: [u8; 2] = [0x01, 0x00];
pub const TAG_HEIGHT_HEADER: [u8; 2] = [0x01, 0x02];
pub const TAG_HEIGHT_DATA: [u8; 2] = [0x01, 0x03];
pub const TAG_HASH_HEIGHT: [u8; 2] = [0x01, 0x04];
pub const TAG_ACCOUNT: [u8; 2] = [0x02, 0x00];
pub const TAG_ACCOUNT_NAME: [u8; 2] = [0x02, 0x01];
pub const TAG_ACCOUNT_SEQ: [u8; 2] = [0x02, 0x02];
pub const TAG_ACCOUNT_BALANCE: [u8; 2] = [0x02, 0x03];
pub const TAG_ACCOUNT_DATA: [u8; 2] = [0x02, 0x04];
pub const TAG_UTXO: [u8; 2] = [0x03, 0x00];
pub const TAG_CUSTOM: [u8; 2] = [0x04, 0x00];
pub const TAG_EVENT: [u8; 2] = [0x05, 0x00];
pub const TAG_LOCKED_BALANCE: [u8; 2] = [0x06, 0x00];
pub const TAG_LOCKED_BALANCE_HEIGHT: [u8; 2] = [0x06, 0x01];

/// The scalar row holding the committed height.
pub const HEIGHT_KEY: &[u8] = b"height";

fn tagged(tag: [u8; 2], payload: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + payload.len());
    key.extend_from_slice(&tag);
    key.extend_from_slice(payload);
    key
}

pub fn to_height_hash_key(height: u32) -> Vec<u8> {
    tagged(TAG_HEIGHT_HASH, &height.to_le_bytes())
}

pub fn to_height_header_key(height: u32) -> Vec<u8> {
    tagged(TAG_HEIGHT_HEADER, &height.to_le_bytes())
}

pub fn to_height_data_key(height: u32) -> Vec<u8> {
    tagged(TAG_HEIGHT_DATA, &height.to_le_bytes())
}

pub fn to_hash_height_key(hash: Hash256) -> Vec<u8> {
    tagged(TAG_HASH_HEIGHT, hash.as_bytes())
}

pub fn to_account_key(address: Address) -> Vec<u8> {
    tagged(TAG_ACCOUNT, address.as_bytes())
}

pub fn to_account_name_key(name: &str) -> Vec<u8> {
    tagged(TAG_ACCOUNT_NAME, name.as_bytes())
}

pub fn to_account_seq_key(address: Address) -> Vec<u8> {
    tagged(TAG_ACCOUNT_SEQ, address.as_bytes())
}

pub fn to_account_balance_key(address: Address) -> Vec<u8> {
    tagged(TAG_ACCOUNT_BALANCE, address.as_bytes())
}

/// `0x02,0x04 ‖ address ‖ application key`.
pub fn to_account_data_key(address: Address, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + ADDRESS_SIZE + key.len());
    out.extend_from_slice(&TAG_ACCOUNT_DATA);
    out.extend_from_slice(address.as_bytes());
    out.extend_from_slice(key);
    out
}

pub fn to_account_data_prefix(address: Address) -> Vec<u8> {
    tagged(TAG_ACCOUNT_DATA, address.as_bytes())
}

pub fn to_utxo_key(id: u64) -> Vec<u8> {
    tagged(TAG_UTXO, &id.to_le_bytes())
}

pub fn from_utxo_key(key: &[u8]) -> Option<u64> {
    key.get(2..10)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_le_bytes)
}

pub fn to_custom_key(key: &str) -> Vec<u8> {
    tagged(TAG_CUSTOM, key.as_bytes())
}

pub fn to_event_key(id: u64) -> Vec<u8> {
    tagged(TAG_EVENT, &id.to_le_bytes())
}

pub fn from_event_key(key: &[u8]) -> Option<u64> {
    key.get(2..10)
        .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
        .map(u64::from_le_bytes)
}

/// `0x06,0x00 ‖ address ‖ unlock height`.
pub fn to_locked_balance_key(address: Address, unlock_height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + ADDRESS_SIZE + 4);
    key.extend_from_slice(&TAG_LOCKED_BALANCE);
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(&unlock_height.to_le_bytes());
    key
}

pub fn to_locked_balance_prefix(address: Address) -> Vec<u8> {
    tagged(TAG_LOCKED_BALANCE, address.as_bytes())
}

pub fn from_locked_balance_key(key: &[u8]) -> Option<(Address, u32)> {
    let address = Address::from_slice(key.get(2..2 + ADDRESS_SIZE)?)?;
    let height = key
        .get(2 + ADDRESS_SIZE..)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(u32::from_le_bytes)?;
    Some((address, height))
}

/// `0x06,0x01 ‖ unlock height ‖ address`.
pub fn to_locked_balance_height_key(unlock_height: u32, address: Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + 4 + ADDRESS_SIZE);
    key.extend_from_slice(&TAG_LOCKED_BALANCE_HEIGHT);
    key.extend_from_slice(&unlock_height.to_le_bytes());
    key.extend_from_slice(address.as_bytes());
    key
}

pub fn to_locked_balance_height_prefix(unlock_height: u32) -> Vec<u8> {
    tagged(TAG_LOCKED_BALANCE_HEIGHT, &unlock_height.to_le_bytes())
}

pub fn from_locked_balance_height_key(key: &[u8]) -> Option<(Address, u32)> {
    let height = key
        .get(2..6)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(u32::from_le_bytes)?;
    let address = Address::from_slice(key.get(6..)?)?;
    Some((address, height))
}

/// The smallest key strictly greater than every key with this prefix.
/// Empty when the prefix is all `0xff` (scan to the end).
pub fn next_prefix(prefix: &[u8]) -> Vec<u8> {
    let mut next = prefix.to_vec();
    while let Some(last) = next.last_mut() {
        if *last < 0xff {
            *last += 1;
            return next;
        }
        next.pop();
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::Coordinate;

    #[test]
    fn locked_balance_keys_round_trip() {
        let addr = Address::with_coordinate(Coordinate::new(1, 0), 9);
        let (a, h) = from_locked_balance_key(&to_locked_balance_key(addr, 77)).unwrap();
        assert_eq!((a, h), (addr, 77));
        let (a, h) = from_locked_balance_height_key(&to_locked_balance_height_key(77, addr)).unwrap();
        assert_eq!((a, h), (addr, 77));
    }

    #[test]
    fn locked_balance_indexes_do_not_collide() {
        let addr = Address::with_coordinate(Coordinate::new(1, 0), 9);
        assert_ne!(
            to_locked_balance_key(addr, 77)[..2],
            to_locked_balance_height_key(77, addr)[..2]
        );
    }

    #[test]
    fn next_prefix_increments_with_carry() {
        assert_eq!(next_prefix(&[1, 2]), vec![1, 3]);
        assert_eq!(next_prefix(&[1, 0xff]), vec![2]);
        assert_eq!(next_prefix(&[0xff, 0xff]), Vec::<u8>::new());
    }

    #[test]
    fn utxo_key_round_trip() {
        assert_eq!(from_utxo_key(&to_utxo_key(0xdead_beef)), Some(0xdead_beef));
    }
}
