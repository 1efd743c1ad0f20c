//! The session transport over websocket connections.
//!
//! Each connection owns a bounded outbound queue drained by its socket task.
//! Inbound frames and connection changes reach the session through one
//! unbounded channel, so the simulation never waits on a socket.

use dashmap::DashMap;
use delve_core::{Error, PeerId, Result};
use delve_net::{Delivery, Target, Transport, TransportEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Outbound frames buffered per connection before it counts as stalled
pub const OUTBOUND_CAPACITY: usize = 256;

/// Shared connection registry, cloned into every socket task
#[derive(Clone)]
pub struct WsHub {
    connections: Arc<DashMap<PeerId, mpsc::Sender<Vec<u8>>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl WsHub {
    /// A hub and the session side of it
    pub fn new() -> (Self, WsTransport) {
        let (events, inbound) = mpsc::unbounded_channel();
        let connections = Arc::new(DashMap::new());
        let hub = Self {
            connections: connections.clone(),
            events,
        };
        let transport = WsTransport {
            local: PeerId::new(),
            connections,
            events: hub.events.clone(),
            inbound,
        };
        (hub, transport)
    }

    /// Register a new connection and return its outbound queue
    pub fn join(&self) -> (PeerId, mpsc::Receiver<Vec<u8>>) {
        let peer = PeerId::new();
        let (sender, receiver) = mpsc::channel(OUTBOUND_CAPACITY);
        self.connections.insert(peer, sender);
        let _ = self.events.send(TransportEvent::PeerJoined(peer));
        crate::record_gauge!("connections", self.connections.len());
        (peer, receiver)
    }

    pub fn receive(&self, peer: PeerId, bytes: Vec<u8>) {
        trace!(peer = %peer, size = bytes.len(), "Frame received");
        let _ = self.events.send(TransportEvent::Message { from: peer, bytes });
    }

    pub fn leave(&self, peer: PeerId) {
        if self.connections.remove(&peer).is_some() {
            let _ = self.events.send(TransportEvent::PeerLeft(peer));
            crate::record_gauge!("connections", self.connections.len());
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

pub struct WsTransport {
    local: PeerId,
    connections: Arc<DashMap<PeerId, mpsc::Sender<Vec<u8>>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport for WsTransport {
    fn local_peer(&self) -> PeerId {
        self.local
    }

    fn send(&mut self, target: Target, delivery: Delivery, bytes: Vec<u8>) -> Result<()> {
        let mut stalled = Vec::new();

        for entry in self.connections.iter() {
            let peer = *entry.key();
            if !target.includes(peer) {
                continue;
            }
            match entry.value().try_send(bytes.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) if delivery == Delivery::Unreliable => {
                    trace!(peer = %peer, "Unreliable frame dropped, queue full");
                }
                Err(_) => stalled.push(peer),
            }
        }

        // A reliable frame that cannot be queued would break ordering, so
        // the connection is dropped instead.
        for peer in &stalled {
            warn!(peer = %peer, "Connection stalled, dropping it");
            if self.connections.remove(peer).is_some() {
                let _ = self.events.send(TransportEvent::PeerLeft(*peer));
            }
        }

        match target {
            Target::Peer(peer) if stalled.contains(&peer) => {
                Err(Error::Network(format!("connection {} stalled", peer)))
            }
            _ => Ok(()),
        }
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.inbound.try_recv() {
            events.push(event);
        }
        if !events.is_empty() {
            debug!(count = events.len(), "Transport events drained");
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_receive_leave() {
        let (hub, mut transport) = WsHub::new();
        let (peer, _outbound) = hub.join();
        hub.receive(peer, vec![7]);
        hub.leave(peer);
        hub.leave(peer);

        assert_eq!(
            transport.poll(),
            vec![
                TransportEvent::PeerJoined(peer),
                TransportEvent::Message {
                    from: peer,
                    bytes: vec![7]
                },
                TransportEvent::PeerLeft(peer),
            ]
        );
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_send_respects_target() {
        let (hub, mut transport) = WsHub::new();
        let (a, mut a_out) = hub.join();
        let (_b, mut b_out) = hub.join();

        transport
            .send(Target::AllExcept(a), Delivery::Reliable, vec![1])
            .unwrap();
        transport
            .send(Target::Peer(a), Delivery::Reliable, vec![2])
            .unwrap();

        assert_eq!(a_out.recv().await, Some(vec![2]));
        assert_eq!(b_out.recv().await, Some(vec![1]));
        assert!(a_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_unreliable_and_disconnects_reliable() {
        let (hub, mut transport) = WsHub::new();
        let (peer, _outbound) = hub.join();

        for _ in 0..OUTBOUND_CAPACITY {
            transport
                .send(Target::Broadcast, Delivery::Reliable, vec![0])
                .unwrap();
        }
        transport
            .send(Target::Broadcast, Delivery::Unreliable, vec![1])
            .unwrap();
        assert_eq!(hub.connection_count(), 1);

        assert!(transport
            .send(Target::Peer(peer), Delivery::Reliable, vec![2])
            .is_err());
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(
            transport.poll().last(),
            Some(&TransportEvent::PeerLeft(peer))
        );
    }
}
