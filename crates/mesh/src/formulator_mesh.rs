//! The formulator-side mesh: dial-only connections to every observer.

use crate::frame::{encode_frame, read_frame, MSG_PING};
use crate::handshake::{answer_challenge, issue_challenge};
use crate::peer::Peer;
use crate::{Mesh, MeshError, MeshEvent};
use fornax_types::{KeyPair, PublicHash};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(10);
const PING_LIMIT: u64 = 3;

/// A formulator maintains one authenticated outbound connection per
/// observer; there is no listener. Same framing, handshake and ping rules
/// as the observer mesh.
pub struct FormulatorMesh {
    key: KeyPair,
    observer_addresses: HashMap<PublicHash, String>,
    peers: Mutex<HashMap<PublicHash, Peer>>,
    events: mpsc::Sender<MeshEvent>,
}

impl FormulatorMesh {
    pub fn new(
        key: KeyPair,
        observer_addresses: HashMap<PublicHash, String>,
        events: mpsc::Sender<MeshEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            observer_addresses,
            peers: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Spawn one reconnect loop per observer and return.
    pub fn run(self: Arc<Self>) {
        info!(formulator = %self.key.public_hash(), observers = self.observer_addresses.len(), "formulator mesh starting");
        for (pubhash, address) in &self.observer_addresses {
            let mesh = Arc::clone(&self);
            let pubhash = *pubhash;
            let address = address.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                    if mesh.peers.lock().contains_key(&pubhash) {
                        continue;
                    }
                    if let Err(e) = Arc::clone(&mesh).dial(address.clone(), pubhash).await {
                        debug!(observer = %pubhash, error = %e, "dial failed");
                    }
                }
            });
        }
    }

    async fn dial(self: Arc<Self>, address: String, expected: PublicHash) -> Result<(), MeshError> {
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timeout"))??;
        answer_challenge(&mut stream, &self.key).await?;
        let pubhash = issue_challenge(&mut stream).await?;
        if pubhash != expected {
            return Err(MeshError::PeerMismatch);
        }
        self.run_connection(stream, pubhash).await;
        Ok(())
    }

    async fn run_connection(self: Arc<Self>, stream: TcpStream, pubhash: PublicHash) {
        let (mut read_half, write_half) = stream.into_split();
        let peer = Peer::spawn(pubhash, write_half);
        self.peers.lock().insert(pubhash, peer.clone());
        info!(observer = %pubhash, "connected to observer");
        let _ = self.events.send(MeshEvent::Connected { peer: pubhash }).await;

        {
            let peer = peer.clone();
            let mesh = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(PING_INTERVAL).await;
                    if peer.send(MSG_PING, &[]).is_err() {
                        return;
                    }
                    if peer.ping_sent() > PING_LIMIT {
                        warn!(observer = %peer.public_hash, "observer stopped answering pings");
                        mesh.remove_exact(&peer);
                        return;
                    }
                }
            });
        }

        loop {
            match read_frame(&mut read_half).await {
                Ok((type_id, payload)) => {
                    peer.mark_alive();
                    if type_id == MSG_PING {
                        continue;
                    }
                    if self
                        .events
                        .send(MeshEvent::Frame {
                            from: pubhash,
                            type_id,
                            payload,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    debug!(observer = %pubhash, error = %e, "connection closed");
                    break;
                }
            }
        }
        self.remove_exact(&peer);
        let _ = self
            .events
            .send(MeshEvent::Disconnected { peer: pubhash })
            .await;
    }

    fn remove_exact(&self, peer: &Peer) {
        let mut map = self.peers.lock();
        if map
            .get(&peer.public_hash)
            .is_some_and(|existing| existing.same_connection(peer))
        {
            map.remove(&peer.public_hash);
        }
    }
}

impl Mesh for FormulatorMesh {
    fn peers(&self) -> Vec<PublicHash> {
        self.peers.lock().keys().copied().collect()
    }

    fn send_to(&self, target: PublicHash, type_id: u64, payload: &[u8]) -> Result<(), MeshError> {
        let peer = self
            .peers
            .lock()
            .get(&target)
            .cloned()
            .ok_or(MeshError::UnknownPeer)?;
        if peer.send(type_id, payload).is_err() {
            self.remove_peer(target);
            return Err(MeshError::UnknownPeer);
        }
        Ok(())
    }

    fn broadcast(&self, type_id: u64, payload: &[u8]) {
        let bytes = encode_frame(type_id, payload);
        let peers: Vec<Peer> = self.peers.lock().values().cloned().collect();
        for peer in peers {
            if peer.send_raw(bytes.clone()).is_err() {
                self.remove_peer(peer.public_hash);
            }
        }
    }

    fn remove_peer(&self, target: PublicHash) {
        self.peers.lock().remove(&target);
    }
}
