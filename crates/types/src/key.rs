//! Recoverable secp256k1 signatures.
//!
//! A public key is never transmitted: verifiers recover it from the
//! (hash, signature) pair and compare the derived [`PublicHash`] against the
//! expected one. Signatures are 65 bytes: `r ‖ s ‖ recovery-id`.

use crate::codec::Codec;
use crate::hash::{double_hash, Hash256};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use std::collections::HashSet;
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Size of a compressed SEC1 public key.
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Size of a recoverable signature.
pub const SIGNATURE_SIZE: usize = 65;

/// Errors from signature creation, recovery and quorum validation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public hash")]
    InvalidPublicHash,
    #[error("invalid signature count")]
    InvalidSignatureCount,
    #[error("invalid key")]
    InvalidKey,
    #[error("invalid timestamp")]
    InvalidTimestamp,
}

/// A compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl Codec for PublicKey {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        r.read_exact(&mut bytes)?;
        Ok(PublicKey(bytes))
    }
}

/// The double hash of a compressed public key; total-order comparable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PublicHash(pub Hash256);

impl PublicHash {
    pub fn from_public_key(key: &PublicKey) -> Self {
        PublicHash(double_hash(key.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PublicHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PublicHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicHash({})", &hex::encode(self.0 .0)[..16])
    }
}

impl Codec for PublicHash {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.0.write_to(w)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(PublicHash(Hash256::read_from(r)?))
    }
}

/// A recoverable ECDSA signature: `r ‖ s ‖ recovery-id`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; SIGNATURE_SIZE]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", &hex::encode(self.0)[..16])
    }
}

impl Codec for Signature {
    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut bytes = [0u8; SIGNATURE_SIZE];
        r.read_exact(&mut bytes)?;
        Ok(Signature(bytes))
    }
}

/// A secp256k1 signing key.
#[derive(Clone)]
pub struct KeyPair {
    signing: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::random(&mut rand::rngs::OsRng),
        }
    }

    /// Restore a key from its 32-byte scalar.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        SigningKey::from_slice(bytes)
            .map(|signing| Self { signing })
            .map_err(|_| CryptoError::InvalidKey)
    }

    /// Sign a 32-byte digest, producing a recoverable signature.
    pub fn sign(&self, h: &Hash256) -> Result<Signature, CryptoError> {
        let (sig, recovery_id) = self
            .signing
            .sign_prehash_recoverable(h.as_bytes())
            .map_err(|_| CryptoError::InvalidKey)?;
        let mut bytes = [0u8; SIGNATURE_SIZE];
        bytes[..64].copy_from_slice(&sig.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Ok(Signature(bytes))
    }

    pub fn public_key(&self) -> PublicKey {
        let sec1 = self.signing.verifying_key().to_sec1_bytes();
        let bytes = <[u8; PUBLIC_KEY_SIZE]>::try_from(sec1.as_ref())
            .expect("compressed SEC1 point is 33 bytes");
        PublicKey(bytes)
    }

    pub fn public_hash(&self) -> PublicHash {
        PublicHash::from_public_key(&self.public_key())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_hash())
    }
}

/// Recover the public key that produced `sig` over the digest `h`.
pub fn recover_public_key(h: Hash256, sig: &Signature) -> Result<PublicKey, CryptoError> {
    let ecdsa_sig = EcdsaSignature::from_slice(&sig.0[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let recovery_id = RecoveryId::from_byte(sig.0[64]).ok_or(CryptoError::InvalidSignature)?;
    let verifying = VerifyingKey::recover_from_prehash(h.as_bytes(), &ecdsa_sig, recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let bytes = <[u8; PUBLIC_KEY_SIZE]>::try_from(verifying.to_sec1_bytes().as_ref())
        .expect("compressed SEC1 point is 33 bytes");
    Ok(PublicKey(bytes))
}

/// Recover the public hash that produced `sig` over the digest `h`.
pub fn recover_public_hash(h: Hash256, sig: &Signature) -> Result<PublicHash, CryptoError> {
    Ok(PublicHash::from_public_key(&recover_public_key(h, sig)?))
}

/// Validate that `sigs` carries a majority (`⌊N/2⌋+1`) of distinct observer
/// signatures over `sign_hash`.
///
/// Every signature must recover to a distinct member of `observers`; the
/// count of valid signatures must reach the majority threshold.
pub fn validate_signatures_majority(
    sign_hash: Hash256,
    sigs: &[Signature],
    observers: &HashSet<PublicHash>,
) -> Result<(), CryptoError> {
    let majority = observers.len() / 2 + 1;
    if sigs.len() < majority {
        return Err(CryptoError::InvalidSignatureCount);
    }
    let mut seen = HashSet::with_capacity(sigs.len());
    for sig in sigs {
        let pubhash = recover_public_hash(sign_hash, sig)?;
        if !observers.contains(&pubhash) {
            return Err(CryptoError::InvalidPublicHash);
        }
        if !seen.insert(pubhash) {
            return Err(CryptoError::InvalidSignatureCount);
        }
    }
    Ok(())
}
