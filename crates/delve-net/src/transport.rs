//! Transport abstraction and an in-process implementation.

use delve_core::{Error, PeerId, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Arrives once, in order with other reliable sends
    Reliable,
    /// May be dropped; a newer send from the same peer replaces an
    /// undelivered older one
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Broadcast,
    Peer(PeerId),
    AllExcept(PeerId),
}

impl Target {
    pub fn includes(&self, peer: PeerId) -> bool {
        match self {
            Target::Broadcast => true,
            Target::Peer(target) => *target == peer,
            Target::AllExcept(excluded) => *excluded != peer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Message { from: PeerId, bytes: Vec<u8> },
}

/// Moves opaque payloads between participants
pub trait Transport: Send {
    fn local_peer(&self) -> PeerId;
    fn send(&mut self, target: Target, delivery: Delivery, bytes: Vec<u8>) -> Result<()>;
    /// Everything received since the last poll
    fn poll(&mut self) -> Vec<TransportEvent>;
}

#[derive(Default)]
struct Inbox {
    reliable: VecDeque<TransportEvent>,
    latest: Vec<(PeerId, Vec<u8>)>,
}

impl Inbox {
    fn push_unreliable(&mut self, from: PeerId, bytes: Vec<u8>) {
        match self.latest.iter_mut().find(|(peer, _)| *peer == from) {
            Some(slot) => slot.1 = bytes,
            None => self.latest.push((from, bytes)),
        }
    }
}

#[derive(Default)]
struct Hub {
    inboxes: HashMap<PeerId, Inbox>,
    drop_unreliable: bool,
}

/// A set of participants in one process, connected through shared queues
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join a new participant. Everyone already present hears about it and
    /// the newcomer hears about everyone.
    pub fn connect(&self) -> LoopbackTransport {
        let peer = PeerId::new();
        let mut hub = self.hub.lock();

        let mut inbox = Inbox::default();
        for (existing, other) in hub.inboxes.iter_mut() {
            other.reliable.push_back(TransportEvent::PeerJoined(peer));
            inbox.reliable.push_back(TransportEvent::PeerJoined(*existing));
        }
        hub.inboxes.insert(peer, inbox);
        debug!(peer = %peer, peers = hub.inboxes.len(), "Loopback peer connected");

        LoopbackTransport {
            peer,
            hub: self.hub.clone(),
        }
    }

    /// Simulate a lossy link for unreliable sends
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.hub.lock().drop_unreliable = drop;
    }

    pub fn peer_count(&self) -> usize {
        self.hub.lock().inboxes.len()
    }

    fn disconnect(&self, peer: PeerId) {
        let mut hub = self.hub.lock();
        if hub.inboxes.remove(&peer).is_some() {
            for other in hub.inboxes.values_mut() {
                other.reliable.push_back(TransportEvent::PeerLeft(peer));
            }
            debug!(peer = %peer, "Loopback peer disconnected");
        }
    }
}

pub struct LoopbackTransport {
    peer: PeerId,
    hub: Arc<Mutex<Hub>>,
}

impl Transport for LoopbackTransport {
    fn local_peer(&self) -> PeerId {
        self.peer
    }

    fn send(&mut self, target: Target, delivery: Delivery, bytes: Vec<u8>) -> Result<()> {
        let mut hub = self.hub.lock();
        if !hub.inboxes.contains_key(&self.peer) {
            return Err(Error::Network("transport disconnected".to_string()));
        }
        if delivery == Delivery::Unreliable && hub.drop_unreliable {
            trace!(peer = %self.peer, "Unreliable send dropped");
            return Ok(());
        }

        let from = self.peer;
        for (peer, inbox) in hub.inboxes.iter_mut() {
            if *peer == from || !target.includes(*peer) {
                continue;
            }
            match delivery {
                Delivery::Reliable => inbox.reliable.push_back(TransportEvent::Message {
                    from,
                    bytes: bytes.clone(),
                }),
                Delivery::Unreliable => inbox.push_unreliable(from, bytes.clone()),
            }
        }
        Ok(())
    }

    fn poll(&mut self) -> Vec<TransportEvent> {
        let mut hub = self.hub.lock();
        let Some(inbox) = hub.inboxes.get_mut(&self.peer) else {
            return Vec::new();
        };

        let mut events: Vec<TransportEvent> = inbox.reliable.drain(..).collect();
        events.extend(
            inbox
                .latest
                .drain(..)
                .map(|(from, bytes)| TransportEvent::Message { from, bytes }),
        );
        events
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        LoopbackNetwork {
            hub: self.hub.clone(),
        }
        .disconnect(self.peer);
    }
}
