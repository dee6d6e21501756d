//! Mesh configuration.

use crate::MeshError;
use fornax_types::{Hash256, PublicHash};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One allow-listed peer: its public hash (hex) and its dial address.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    pub public_hash: String,
    pub address: String,
}

/// Static mesh parameters as loaded from a node's configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshConfig {
    pub bind_address: String,
    pub peers: Vec<PeerConfig>,
}

impl MeshConfig {
    /// Resolve the peer list into the allow-list map the meshes consume.
    pub fn net_address_map(&self) -> Result<HashMap<PublicHash, String>, MeshError> {
        let mut map = HashMap::with_capacity(self.peers.len());
        for peer in &self.peers {
            let bytes = hex::decode(&peer.public_hash)
                .map_err(|_| MeshError::NotAllowedPublicHash)?;
            let hash = Hash256::from_slice(&bytes).ok_or(MeshError::NotAllowedPublicHash)?;
            map.insert(PublicHash(hash), peer.address.clone());
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fornax_types::KeyPair;

    #[test]
    fn peer_list_resolves_to_map() {
        let key = KeyPair::generate();
        let config = MeshConfig {
            bind_address: "0.0.0.0:3000".into(),
            peers: vec![PeerConfig {
                public_hash: key.public_hash().to_string(),
                address: "10.0.0.1:3000".into(),
            }],
        };
        let map = config.net_address_map().unwrap();
        assert_eq!(map.get(&key.public_hash()), Some(&"10.0.0.1:3000".to_string()));
    }

    #[test]
    fn malformed_hash_is_rejected() {
        let config = MeshConfig {
            bind_address: "0.0.0.0:3000".into(),
            peers: vec![PeerConfig {
                public_hash: "zz".into(),
                address: "10.0.0.1:3000".into(),
            }],
        };
        assert!(config.net_address_map().is_err());
    }
}
