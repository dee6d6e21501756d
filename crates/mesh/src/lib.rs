//! Authenticated peer meshes.
//!
//! Both meshes speak the same framed protocol (`u64 LE type ‖ payload`,
//! the payload carried as a length-prefixed byte slice) and authenticate
//! every connection with a recoverable signature over a nonce+timestamp
//! challenge. The observer mesh keeps both a dialed and an accepted
//! connection per peer; the formulator mesh only dials.
//!
//! Inbound frames are delivered on an mpsc channel as [`MeshEvent`]s; the
//! consumer (the observer runner) decodes payloads. Sends never block: each
//! connection has a writer task fed by an unbounded queue.

mod config;
mod formulator_mesh;
mod frame;
mod handshake;
mod observer_mesh;
mod peer;

pub use config::{MeshConfig, PeerConfig};
pub use formulator_mesh::FormulatorMesh;
pub use frame::{encode_frame, read_frame, write_frame, MSG_PING};
pub use handshake::{answer_challenge, issue_challenge};
pub use observer_mesh::ObserverMesh;
pub use peer::Peer;

use fornax_types::PublicHash;
use thiserror::Error;

/// Transport error kinds.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("unknown peer")]
    UnknownPeer,
    #[error("not allowed public hash")]
    NotAllowedPublicHash,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("peer identity mismatch")]
    PeerMismatch,
    #[error(transparent)]
    Crypto(#[from] fornax_types::CryptoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What a mesh reports to its consumer.
#[derive(Debug)]
pub enum MeshEvent {
    Connected { peer: PublicHash },
    Disconnected { peer: PublicHash },
    Frame {
        from: PublicHash,
        type_id: u64,
        payload: Vec<u8>,
    },
}

/// The common mesh surface: peers, directed send, broadcast, removal.
pub trait Mesh: Send + Sync {
    fn peers(&self) -> Vec<PublicHash>;

    /// Send one frame to one peer.
    fn send_to(&self, target: PublicHash, type_id: u64, payload: &[u8]) -> Result<(), MeshError>;

    /// Send one frame to every peer. The frame is serialized once and the
    /// raw bytes fan out.
    fn broadcast(&self, type_id: u64, payload: &[u8]);

    fn remove_peer(&self, target: PublicHash);
}
