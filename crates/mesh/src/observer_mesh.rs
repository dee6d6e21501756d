//! The fully-connected observer mesh.

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
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(10);
const PING_LIMIT: u64 = 3;

/// Every observer dials every other observer and also accepts from it; both
/// connections are kept and either can carry traffic. A 1-second reconnect
/// loop per missing peer runs for the lifetime of the mesh.
pub struct ObserverMesh {
    key: KeyPair,
    /// Allow-list: observer public hash → dial address. Read-only.
    net_addresses: HashMap<PublicHash, String>,
    client_peers: Mutex<HashMap<PublicHash, Peer>>,
    server_peers: Mutex<HashMap<PublicHash, Peer>>,
    events: mpsc::Sender<MeshEvent>,
}

impl ObserverMesh {
    pub fn new(
        key: KeyPair,
        net_addresses: HashMap<PublicHash, String>,
        events: mpsc::Sender<MeshEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            net_addresses,
            client_peers: Mutex::new(HashMap::new()),
            server_peers: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Start the reconnect loops and the accept loop. Runs until the
    /// listener fails.
    pub async fn run(self: Arc<Self>, bind_address: String) -> io::Result<()> {
        let me = self.key.public_hash();
        for (pubhash, address) in &self.net_addresses {
            if *pubhash == me {
                continue;
            }
            let mesh = Arc::clone(&self);
            let pubhash = *pubhash;
            let address = address.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(RECONNECT_INTERVAL).await;
                    let connected = mesh.client_peers.lock().contains_key(&pubhash)
                        || mesh.server_peers.lock().contains_key(&pubhash);
                    if connected {
                        continue;
                    }
                    if let Err(e) = Arc::clone(&mesh).dial(address.clone(), pubhash).await {
                        debug!(peer = %pubhash, error = %e, "dial failed");
                    }
                }
            });
        }

        let listener = TcpListener::bind(&bind_address).await?;
        info!(observer = %me, bind = %bind_address, "observer mesh listening");
        loop {
            let (stream, _) = listener.accept().await?;
            let mesh = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = mesh.accept(stream).await {
                    debug!(error = %e, "inbound connection rejected");
                }
            });
        }
    }

    /// Outbound connection: answer the server's challenge, verify the
    /// server is exactly who we dialed.
    async fn dial(self: Arc<Self>, address: String, expected: PublicHash) -> Result<(), MeshError> {
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "dial timeout"))??;
        answer_challenge(&mut stream, &self.key).await?;
        let pubhash = issue_challenge(&mut stream).await?;
        if pubhash != expected {
            return Err(MeshError::PeerMismatch);
        }
        if !self.net_addresses.contains_key(&pubhash) {
            return Err(MeshError::NotAllowedPublicHash);
        }
        self.run_connection(stream, pubhash, true).await;
        Ok(())
    }

    /// Inbound connection: learn the client's identity first, then answer.
    async fn accept(self: Arc<Self>, mut stream: TcpStream) -> Result<(), MeshError> {
        let pubhash = issue_challenge(&mut stream).await?;
        if !self.net_addresses.contains_key(&pubhash) {
            return Err(MeshError::NotAllowedPublicHash);
        }
        answer_challenge(&mut stream, &self.key).await?;
        self.run_connection(stream, pubhash, false).await;
        Ok(())
    }

    /// Register the peer, run its ping task, and read frames until the
    /// connection dies. The calling task is the reader.
    async fn run_connection(self: Arc<Self>, stream: TcpStream, pubhash: PublicHash, is_client: bool) {
        let (mut read_half, write_half) = stream.into_split();
        let peer = Peer::spawn(pubhash, write_half);
        {
            let mut map = if is_client {
                self.client_peers.lock()
            } else {
                self.server_peers.lock()
            };
            // A replaced connection dies when its last handle drops.
            map.insert(pubhash, peer.clone());
        }
        info!(peer = %pubhash, is_client, "observer connected");
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
                        warn!(peer = %peer.public_hash, "peer stopped answering pings");
                        mesh.remove_exact(&peer, is_client);
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
                    debug!(peer = %pubhash, error = %e, "connection closed");
                    break;
                }
            }
        }
        self.remove_exact(&peer, is_client);
        let _ = self
            .events
            .send(MeshEvent::Disconnected { peer: pubhash })
            .await;
    }

    /// Remove the peer only if the map still holds this very connection;
    /// a reconnect may have replaced it already.
    fn remove_exact(&self, peer: &Peer, is_client: bool) {
        let mut map = if is_client {
            self.client_peers.lock()
        } else {
            self.server_peers.lock()
        };
        if map
            .get(&peer.public_hash)
            .is_some_and(|existing| existing.same_connection(peer))
        {
            map.remove(&peer.public_hash);
        }
    }

    fn peer_for(&self, target: PublicHash) -> Option<Peer> {
        // The dialed connection is preferred for sends.
        if let Some(peer) = self.client_peers.lock().get(&target) {
            return Some(peer.clone());
        }
        self.server_peers.lock().get(&target).cloned()
    }

    fn all_peers(&self) -> Vec<Peer> {
        let mut map: HashMap<PublicHash, Peer> = HashMap::new();
        for (pubhash, peer) in self.server_peers.lock().iter() {
            map.insert(*pubhash, peer.clone());
        }
        for (pubhash, peer) in self.client_peers.lock().iter() {
            map.insert(*pubhash, peer.clone());
        }
        map.into_values().collect()
    }
}

impl Mesh for ObserverMesh {
    fn peers(&self) -> Vec<PublicHash> {
        self.all_peers().into_iter().map(|p| p.public_hash).collect()
    }

    fn send_to(&self, target: PublicHash, type_id: u64, payload: &[u8]) -> Result<(), MeshError> {
        let peer = self.peer_for(target).ok_or(MeshError::UnknownPeer)?;
        if peer.send(type_id, payload).is_err() {
            self.remove_peer(target);
            return Err(MeshError::UnknownPeer);
        }
        Ok(())
    }

    fn broadcast(&self, type_id: u64, payload: &[u8]) {
        let bytes = encode_frame(type_id, payload);
        for peer in self.all_peers() {
            if peer.send_raw(bytes.clone()).is_err() {
                self.remove_peer(peer.public_hash);
            }
        }
    }

    fn remove_peer(&self, target: PublicHash) {
        self.client_peers.lock().remove(&target);
        self.server_peers.lock().remove(&target);
    }
}
