//! Connection authentication.
//!
//! Each side issues a 40-byte challenge (32 random bytes plus a little-
//! endian nanosecond timestamp) and verifies the peer's recoverable
//! signature over its double hash. Stale challenges (skew above 30 s) abort
//! the handshake.

use crate::MeshError;
use fornax_types::{
    double_hash, is_timestamp_acceptable, recover_public_hash, Codec, KeyPair, PublicHash,
    Signature, SIGNATURE_SIZE,
};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHALLENGE_SIZE: usize = 40;

fn unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Send our challenge and recover the peer's identity from its answer.
pub async fn issue_challenge<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
) -> Result<PublicHash, MeshError> {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut challenge[..32]);
    challenge[32..].copy_from_slice(&unix_nanos().to_le_bytes());
    stream.write_all(&challenge).await?;
    stream.flush().await?;

    let mut sig_bytes = [0u8; SIGNATURE_SIZE];
    stream.read_exact(&mut sig_bytes).await?;
    let signature = Signature(sig_bytes);
    Ok(recover_public_hash(double_hash(&challenge), &signature)?)
}

/// Answer the peer's challenge with our signature.
pub async fn answer_challenge<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    key: &KeyPair,
) -> Result<(), MeshError> {
    let mut challenge = [0u8; CHALLENGE_SIZE];
    stream.read_exact(&mut challenge).await?;
    let timestamp = u64::from_le_bytes(challenge[32..].try_into().expect("8 bytes"));
    if !is_timestamp_acceptable(timestamp, unix_nanos()) {
        return Err(MeshError::InvalidTimestamp);
    }
    let signature = key.sign(&double_hash(&challenge))?;
    stream.write_all(&signature.to_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
