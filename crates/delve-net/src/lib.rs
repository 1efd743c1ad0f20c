//! Host-authoritative replication for the sandbox world.
//!
//! One participant hosts: it owns the canonical map, drives every mob that
//! no client drives, and relays everything it hears. Clients edit tiles
//! optimistically and send their own player's state; mob states settle by
//! last-write-wins on a per-mob sequence number.

pub mod codec;
pub mod protocol;
pub mod session;
pub mod transport;

pub use protocol::Message;
pub use session::{Role, Session, SessionEvent};
pub use transport::{
    Delivery, LoopbackNetwork, LoopbackTransport, Target, Transport, TransportEvent,
};
