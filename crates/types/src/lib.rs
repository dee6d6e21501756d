//! Core types for the fornax proof-of-formulation chain.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Codec**: the canonical little-endian wire serialization
//! - **Primitives**: [`Hash256`], [`Coordinate`], [`Address`], [`Amount`]
//! - **Crypto**: recoverable secp256k1 keys, [`Signature`], [`PublicHash`]
//! - **Consensus data**: block [`Header`], the level-root commitment
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crate, making it the foundation layer. Every structural hash in the
//! protocol is the double-SHA256 of the canonical serialization, so the
//! codec here is normative: changing a field order changes the chain.

mod address;
mod amount;
mod codec;
mod coord;
mod hash;
mod header;
mod key;
mod level;

pub use address::{checksum_from_public_hashes, Address, ADDRESS_SIZE};
pub use amount::{Amount, COIN};
pub use codec::{
    read_bool, read_bytes, read_string, read_u16, read_u32, read_u64, read_u8, write_bool,
    write_bytes, write_string, write_u16, write_u32, write_u64, write_u8, Codec,
};
pub use coord::Coordinate;
pub use hash::{double_hash, hash_of, Hash256, HASH_SIZE};
pub use header::Header;
pub use key::{
    recover_public_hash, recover_public_key, validate_signatures_majority, CryptoError, KeyPair,
    PublicHash, PublicKey, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
};
pub use level::build_level_root;

/// Maximum allowed clock skew for signed timestamps, in nanoseconds.
pub const MAX_TIMESTAMP_SKEW_NANOS: u64 = 30_000_000_000;

/// Check a signed timestamp (nanoseconds since epoch) against local time.
pub fn is_timestamp_acceptable(timestamp: u64, now: u64) -> bool {
    now.abs_diff(timestamp) <= MAX_TIMESTAMP_SKEW_NANOS
}
