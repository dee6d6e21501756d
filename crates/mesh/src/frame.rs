//! Wire framing.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Keep-alive frame; carries no payload and is consumed by the mesh itself.
pub const MSG_PING: u64 = 0x01;

/// Frames larger than this are treated as a protocol violation.
const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Serialize a frame: `u64 LE type ‖ u32 LE length ‖ payload`.
pub fn encode_frame(type_id: u64, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(12 + payload.len());
    frame.extend_from_slice(&type_id.to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    type_id: u64,
    payload: &[u8],
) -> io::Result<()> {
    w.write_all(&encode_frame(type_id, payload)).await?;
    w.flush().await
}

/// Read one frame, returning `(type, payload)`.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<(u64, Vec<u8>)> {
    let mut header = [0u8; 12];
    r.read_exact(&mut header).await?;
    let type_id = u64::from_le_bytes(header[..8].try_into().expect("8 bytes"));
    let len = u32::from_le_bytes(header[8..].try_into().expect("4 bytes"));
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;
    Ok((type_id, payload))
}
