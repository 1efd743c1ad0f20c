//! Binary framing for [`Message`]s.

use crate::protocol::Message;
use bincode::Options;
use delve_core::{Error, Result};

/// Largest message accepted from the wire. A full default-sized map is
/// about 64 KiB, so this leaves plenty of headroom.
pub const MAX_MESSAGE_BYTES: u64 = 16 * 1024 * 1024;

fn options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_MESSAGE_BYTES)
}

pub fn encode(message: &Message) -> Result<Vec<u8>> {
    Ok(options().serialize(message)?)
}

pub fn decode(bytes: &[u8]) -> Result<Message> {
    options()
        .deserialize(bytes)
        .map_err(|e| Error::Network(format!("undecodable message: {}", e)))
}
