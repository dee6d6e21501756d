//! The production runner: glues the mesh to the state machine.

use crate::messages::Message;
use crate::state::{ObserverAction, ObserverEvent, ObserverState};
use fornax_mesh::{Mesh, MeshEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How often the kernel's transaction-expiry queue is advanced.
const EXPIRY_TICK: Duration = Duration::from_secs(1);

fn unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Drives one observer: mesh frames in, actions out, timers in between.
///
/// The state machine itself never touches a socket or a clock; this loop
/// feeds it the wall clock before every event and executes the actions it
/// returns.
pub struct ObserverNode {
    state: ObserverState,
    mesh: Arc<dyn Mesh>,
    events: mpsc::Receiver<MeshEvent>,
    round_deadline: tokio::time::Instant,
}

impl ObserverNode {
    pub fn new(state: ObserverState, mesh: Arc<dyn Mesh>, events: mpsc::Receiver<MeshEvent>) -> Self {
        Self {
            state,
            mesh,
            events,
            round_deadline: tokio::time::Instant::now() + Duration::from_secs(10),
        }
    }

    /// Run until the mesh event channel closes.
    pub async fn run(mut self) {
        self.state.set_time(unix_nanos());
        let actions = self.state.start();
        self.execute(actions);

        let mut expiry = tokio::time::interval(EXPIRY_TICK);
        loop {
            tokio::select! {
                maybe_event = self.events.recv() => {
                    match maybe_event {
                        Some(event) => self.on_mesh_event(event),
                        None => break,
                    }
                }
                _ = tokio::time::sleep_until(self.round_deadline) => {
                    self.state.set_time(unix_nanos());
                    // Push the deadline out before handling; the actions
                    // usually re-arm it precisely.
                    self.round_deadline = tokio::time::Instant::now() + Duration::from_secs(10);
                    let actions = self.state.handle(ObserverEvent::RoundTimer);
                    self.execute(actions);
                }
                _ = expiry.tick() => {
                    self.state.kernel().flush_expired();
                }
            }
        }
        debug!("observer runner stopped");
    }

    fn on_mesh_event(&mut self, event: MeshEvent) {
        match event {
            MeshEvent::Frame {
                from,
                type_id,
                payload,
            } => match Message::from_frame(type_id, &payload) {
                Ok(message) => {
                    self.state.set_time(unix_nanos());
                    let actions = self.state.handle(ObserverEvent::Received { from, message });
                    self.execute(actions);
                }
                Err(e) => debug!(from = %from, type_id, error = %e, "undecodable frame dropped"),
            },
            MeshEvent::Connected { peer } => {
                // Help a rejoining peer catch up immediately.
                let (height, last_hash) = self.state.status();
                let status = Message::StatusPing {
                    height,
                    last_hash,
                    timestamp: unix_nanos(),
                };
                let (type_id, payload) = status.to_frame();
                if let Err(e) = self.mesh.send_to(peer, type_id, &payload) {
                    debug!(peer = %peer, error = %e, "status ping failed");
                }
            }
            MeshEvent::Disconnected { peer } => {
                debug!(peer = %peer, "peer disconnected");
            }
        }
    }

    fn execute(&mut self, actions: Vec<ObserverAction>) {
        for action in actions {
            match action {
                ObserverAction::Broadcast(message) => {
                    let (type_id, payload) = message.to_frame();
                    self.mesh.broadcast(type_id, &payload);
                }
                ObserverAction::SendTo { target, message } => {
                    let (type_id, payload) = message.to_frame();
                    if let Err(e) = self.mesh.send_to(target, type_id, &payload) {
                        warn!(target = %target, error = %e, "directed send failed");
                    }
                }
                ObserverAction::ResetRoundTimer { duration } => {
                    self.round_deadline = tokio::time::Instant::now() + duration;
                }
            }
        }
    }
}
