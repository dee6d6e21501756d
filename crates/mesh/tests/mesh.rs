//! Loopback mesh tests over real TCP.

use fornax_mesh::{FormulatorMesh, Mesh, MeshEvent, ObserverMesh};
use fornax_types::{KeyPair, PublicHash};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Reserve a local address for a mesh to bind shortly after.
async fn free_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn wait_for_connected(rx: &mut mpsc::Receiver<MeshEvent>) -> PublicHash {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(20), rx.recv())
            .await
            .expect("timed out waiting for connection")
            .expect("channel closed");
        if let MeshEvent::Connected { peer } = event {
            return peer;
        }
    }
}

async fn wait_for_frame(rx: &mut mpsc::Receiver<MeshEvent>) -> (PublicHash, u64, Vec<u8>) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(20), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("channel closed");
        if let MeshEvent::Frame {
            from,
            type_id,
            payload,
        } = event
        {
            return (from, type_id, payload);
        }
    }
}

#[tokio::test]
async fn observers_connect_and_exchange_frames() {
    let key_a = KeyPair::generate();
    let key_b = KeyPair::generate();
    let addr_a = free_address().await;
    let addr_b = free_address().await;

    let mut net = HashMap::new();
    net.insert(key_a.public_hash(), addr_a.clone());
    net.insert(key_b.public_hash(), addr_b.clone());

    let (tx_a, mut rx_a) = mpsc::channel(64);
    let (tx_b, mut rx_b) = mpsc::channel(64);
    let mesh_a = ObserverMesh::new(key_a.clone(), net.clone(), tx_a);
    let mesh_b = ObserverMesh::new(key_b.clone(), net.clone(), tx_b);

    {
        let mesh_a = Arc::clone(&mesh_a);
        let addr_a = addr_a.clone();
        tokio::spawn(async move { mesh_a.run(addr_a).await });
    }
    {
        let mesh_b = Arc::clone(&mesh_b);
        let addr_b = addr_b.clone();
        tokio::spawn(async move { mesh_b.run(addr_b).await });
    }

    assert_eq!(wait_for_connected(&mut rx_a).await, key_b.public_hash());
    assert_eq!(wait_for_connected(&mut rx_b).await, key_a.public_hash());

    mesh_a.broadcast(0x42, b"round vote bytes");
    let (from, type_id, payload) = wait_for_frame(&mut rx_b).await;
    assert_eq!(from, key_a.public_hash());
    assert_eq!(type_id, 0x42);
    assert_eq!(payload, b"round vote bytes");

    // Directed send on the other mesh.
    mesh_b.send_to(key_a.public_hash(), 0x43, b"reply").unwrap();
    let (from, type_id, payload) = wait_for_frame(&mut rx_a).await;
    assert_eq!(from, key_b.public_hash());
    assert_eq!(type_id, 0x43);
    assert_eq!(payload, b"reply");

    assert!(mesh_a.peers().contains(&key_b.public_hash()));
}

#[tokio::test]
async fn formulator_dials_observer() {
    let observer_key = KeyPair::generate();
    let formulator_key = KeyPair::generate();
    let observer_addr = free_address().await;

    // The observer's allow-list must contain the formulator; the dial
    // address for it is never used.
    let mut observer_net = HashMap::new();
    observer_net.insert(observer_key.public_hash(), observer_addr.clone());
    observer_net.insert(formulator_key.public_hash(), "127.0.0.1:1".to_string());

    let (tx_obs, mut rx_obs) = mpsc::channel(64);
    let observer_mesh = ObserverMesh::new(observer_key.clone(), observer_net, tx_obs);
    {
        let observer_mesh = Arc::clone(&observer_mesh);
        let observer_addr = observer_addr.clone();
        tokio::spawn(async move { observer_mesh.run(observer_addr).await });
    }

    let mut observer_addresses = HashMap::new();
    observer_addresses.insert(observer_key.public_hash(), observer_addr);
    let (tx_f, mut rx_f) = mpsc::channel(64);
    let formulator_mesh = FormulatorMesh::new(formulator_key.clone(), observer_addresses, tx_f);
    Arc::clone(&formulator_mesh).run();

    assert_eq!(
        wait_for_connected(&mut rx_f).await,
        observer_key.public_hash()
    );
    assert_eq!(
        wait_for_connected(&mut rx_obs).await,
        formulator_key.public_hash()
    );

    formulator_mesh.broadcast(0x12, b"block gen bytes");
    let (from, type_id, payload) = wait_for_frame(&mut rx_obs).await;
    assert_eq!(from, formulator_key.public_hash());
    assert_eq!(type_id, 0x12);
    assert_eq!(payload, b"block gen bytes");

    let unknown = KeyPair::generate().public_hash();
    assert!(formulator_mesh.send_to(unknown, 0x01, &[]).is_err());
}
