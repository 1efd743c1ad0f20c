//! Messages exchanged between participants.

use crate::transport::Delivery;
use delve_core::{ItemStack, MobId};
use delve_world::{MobSnapshot, TileChange};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Client asks the host for the whole map
    RequestMap,
    /// The map in its save format
    MapData { bytes: Vec<u8> },
    TileChange(TileChange),
    ActorStates { is_host: bool, mobs: Vec<MobSnapshot> },
    /// Host heartbeat
    IAmHost { version: String },
    ChatMessage { from: String, text: String },
    Remove { mob: MobId },
    /// Host hands an item to the participant driving `mob`
    GiveItem { mob: MobId, item: ItemStack },
}

impl Message {
    /// Actor states are superseded by the next round, so only the latest
    /// needs to arrive. Everything else must arrive in order.
    pub fn delivery(&self) -> Delivery {
        match self {
            Message::ActorStates { .. } => Delivery::Unreliable,
            _ => Delivery::Reliable,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::RequestMap => "request_map",
            Message::MapData { .. } => "map_data",
            Message::TileChange(_) => "tile_change",
            Message::ActorStates { .. } => "actor_states",
            Message::IAmHost { .. } => "i_am_host",
            Message::ChatMessage { .. } => "chat",
            Message::Remove { .. } => "remove",
            Message::GiveItem { .. } => "give_item",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_actor_states_are_unreliable() {
        let states = Message::ActorStates {
            is_host: true,
            mobs: Vec::new(),
        };
        assert_eq!(states.delivery(), Delivery::Unreliable);
        assert_eq!(Message::RequestMap.delivery(), Delivery::Reliable);
        assert_eq!(
            Message::Remove { mob: MobId::new() }.delivery(),
            Delivery::Reliable
        );
        assert_eq!(states.kind(), "actor_states");
    }
}
