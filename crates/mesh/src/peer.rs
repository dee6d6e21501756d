//! One authenticated connection.

use crate::frame::encode_frame;
use crate::MeshError;
use fornax_types::PublicHash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tracing::trace;

/// A live peer: the recovered identity plus a non-blocking write queue.
///
/// Dropping the last handle closes the queue, which ends the writer task
/// and with it the connection. The ping counter is shared with the reader
/// task: any inbound frame resets it.
#[derive(Clone)]
pub struct Peer {
    pub public_hash: PublicHash,
    sender: mpsc::UnboundedSender<Vec<u8>>,
    ping_count: Arc<AtomicU64>,
}

impl Peer {
    /// Wrap the write half of a fresh connection, spawning its writer task.
    pub fn spawn(public_hash: PublicHash, mut write_half: OwnedWriteHalf) -> Self {
        let (sender, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write_half.write_all(&bytes).await.is_err() {
                    break;
                }
                if write_half.flush().await.is_err() {
                    break;
                }
            }
            trace!("peer writer task finished");
        });
        Self {
            public_hash,
            sender,
            ping_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue pre-framed bytes.
    pub fn send_raw(&self, bytes: Vec<u8>) -> Result<(), MeshError> {
        self.sender.send(bytes).map_err(|_| MeshError::UnknownPeer)
    }

    /// Frame and queue one message.
    pub fn send(&self, type_id: u64, payload: &[u8]) -> Result<(), MeshError> {
        self.send_raw(encode_frame(type_id, payload))
    }

    /// Bump the unanswered-ping counter; returns the new count.
    pub fn ping_sent(&self) -> u64 {
        self.ping_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Any inbound traffic counts as a pong.
    pub fn mark_alive(&self) {
        self.ping_count.store(0, Ordering::Release);
    }

    /// Whether two handles refer to the same connection.
    pub fn same_connection(&self, other: &Peer) -> bool {
        self.sender.same_channel(&other.sender)
    }
}
