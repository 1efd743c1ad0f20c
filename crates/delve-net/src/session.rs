//! Host-authoritative replication of one world across participants.
//!
//! A `Session` owns the local world, the extension sandbox and a transport.
//! Each call to `frame` drains the transport, advances the world by one tick
//! once a map is present, and sends whatever the tick produced.

use crate::codec;
use crate::protocol::Message;
use crate::transport::{Target, Transport, TransportEvent};
use delve_core::{GameConfig, MobId, PeerId};
use delve_mods::{ModEvent, Sandbox};
use delve_world::{EditOrigin, MobSnapshot, PortalEntered, TileChange, TileGrid, World};
use tracing::{debug, info, instrument, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Client,
}

/// Things the embedding application may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A map arrived from the host and replaced the local one
    MapLoaded,
    PeerJoined(PeerId),
    PeerLeft(PeerId),
    Chat { from: String, text: String },
    /// The host went away; the session is back to requesting a map
    HostLost,
    /// The host runs a different protocol version
    ReloadRequired { local: String, host: String },
    PortalEntered(PortalEntered),
}

pub struct Session<T: Transport> {
    role: Role,
    world: World,
    sandbox: Sandbox,
    transport: T,
    player: MobId,
    started: bool,
    map_ready: bool,
    host_peer: Option<PeerId>,
    last_host_heard_ms: u64,
    last_map_request_ms: Option<u64>,
    last_heartbeat_ms: Option<u64>,
    last_actor_broadcast_ms: Option<u64>,
    reload_reported: bool,
}

impl<T: Transport> Session<T> {
    /// Host a world, restoring `saved` when it is readable
    pub fn host(
        config: GameConfig,
        saved: Option<&[u8]>,
        sandbox: Sandbox,
        transport: T,
        name: impl Into<String>,
    ) -> Self {
        let peer = transport.local_peer();
        let world = match saved {
            Some(bytes) => World::load(config, peer, true, bytes),
            None => World::new(config, peer, true),
        };
        info!(peer = %peer, "Hosting session");
        Self::build(Role::Host, world, sandbox, transport, name.into(), true)
    }

    /// Join as a client. The world stays empty until the host sends its map.
    pub fn client(
        config: GameConfig,
        sandbox: Sandbox,
        transport: T,
        name: impl Into<String>,
    ) -> Self {
        let peer = transport.local_peer();
        let grid = TileGrid::new(config.world.width, config.world.depth);
        let world = World::with_grid(config, peer, false, grid);
        info!(peer = %peer, "Joining session");
        Self::build(Role::Client, world, sandbox, transport, name.into(), false)
    }

    fn build(
        role: Role,
        mut world: World,
        sandbox: Sandbox,
        transport: T,
        name: String,
        map_ready: bool,
    ) -> Self {
        let player = world.spawn_player(transport.local_peer(), name);
        Self {
            role,
            world,
            sandbox,
            transport,
            player,
            started: false,
            map_ready,
            host_peer: None,
            last_host_heard_ms: 0,
            last_map_request_ms: None,
            last_heartbeat_ms: None,
            last_actor_broadcast_ms: None,
            reload_reported: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    pub fn sandbox_mut(&mut self) -> &mut Sandbox {
        &mut self.sandbox
    }

    /// The local participant's avatar
    pub fn player(&self) -> MobId {
        self.player
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    pub fn is_map_ready(&self) -> bool {
        self.map_ready
    }

    pub fn host_peer(&self) -> Option<PeerId> {
        match self.role {
            Role::Host => Some(self.transport.local_peer()),
            Role::Client => self.host_peer,
        }
    }

    /// Send a chat line from the local player
    pub fn say(&mut self, from: impl Into<String>, text: impl Into<String>) {
        let message = Message::ChatMessage {
            from: from.into(),
            text: text.into(),
        };
        self.send_upstream(message);
    }

    /// Run one frame of the session
    #[instrument(skip(self), fields(role = ?self.role, tick = self.world.tick()))]
    pub fn frame(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            self.world.dispatch(&mut self.sandbox, ModEvent::GameStart);
        }

        for event in self.transport.poll() {
            self.handle_transport_event(event, now_ms, &mut events);
        }

        if self.role == Role::Client {
            self.check_host(now_ms, &mut events);
        }

        if self.map_ready {
            let report = self.world.step(&mut self.sandbox);
            if report.failed_hooks > 0 {
                debug!(failed = report.failed_hooks, "Extension hooks failed this tick");
            }
            events.extend(report.portals.into_iter().map(SessionEvent::PortalEntered));
        }

        self.flush_outbox(&mut events);

        let heartbeat = self.network().host_heartbeat_interval_ms;
        if self.role == Role::Host && due(self.last_heartbeat_ms, now_ms, heartbeat) {
            self.last_heartbeat_ms = Some(now_ms);
            let version = self.network().protocol_version.clone();
            self.send(Target::Broadcast, &Message::IAmHost { version });
        }

        let actor_interval = self.network().actor_broadcast_interval_ms;
        if due(self.last_actor_broadcast_ms, now_ms, actor_interval) {
            self.last_actor_broadcast_ms = Some(now_ms);
            self.broadcast_actors(now_ms);
        }

        if self.role == Role::Client {
            let timeout = self.network().mob_timeout_ms;
            let pruned = self.world.prune_stale(now_ms, timeout);
            if !pruned.is_empty() {
                debug!(count = pruned.len(), "Pruned silent mobs");
            }
        }

        events
    }

    fn network(&self) -> &delve_core::NetworkConfig {
        &self.world.config().network
    }

    fn handle_transport_event(
        &mut self,
        event: TransportEvent,
        now_ms: u64,
        events: &mut Vec<SessionEvent>,
    ) {
        match event {
            TransportEvent::PeerJoined(peer) => {
                info!(peer = %peer, "Peer joined");
                events.push(SessionEvent::PeerJoined(peer));
            }
            TransportEvent::PeerLeft(peer) => {
                info!(peer = %peer, "Peer left");
                events.push(SessionEvent::PeerLeft(peer));
                match self.role {
                    Role::Host => self.forget_peer(peer),
                    Role::Client if self.host_peer == Some(peer) => self.host_lost(events),
                    Role::Client => {}
                }
            }
            TransportEvent::Message { from, bytes } => match codec::decode(&bytes) {
                Ok(message) => self.handle_message(from, message, now_ms, events),
                Err(e) => warn!(peer = %from, error = %e, "Undecodable message dropped"),
            },
        }
    }

    fn handle_message(
        &mut self,
        from: PeerId,
        message: Message,
        now_ms: u64,
        events: &mut Vec<SessionEvent>,
    ) {
        trace!(peer = %from, event = message.kind(), "Message received");
        match (self.role, message) {
            (Role::Host, Message::RequestMap) => match self.world.serialize_map() {
                Ok(bytes) => {
                    debug!(peer = %from, size = bytes.len(), "Sending map");
                    self.send(Target::Peer(from), &Message::MapData { bytes });
                }
                Err(e) => warn!(error = %e, "Map could not be serialized"),
            },
            (Role::Host, Message::TileChange(change)) => {
                self.world.apply_edits(&[change.clone()], EditOrigin::Remote);
                self.send(Target::AllExcept(from), &Message::TileChange(change));
            }
            (Role::Host, Message::ChatMessage { from: name, text }) => {
                events.push(SessionEvent::Chat {
                    from: name.clone(),
                    text: text.clone(),
                });
                self.send(Target::AllExcept(from), &Message::ChatMessage { from: name, text });
            }
            (Role::Host, Message::ActorStates { mobs, .. }) => {
                for snapshot in mobs {
                    if snapshot.owner != Some(from) || snapshot.id != from.player_mob() {
                        debug!(peer = %from, mob_id = %snapshot.id, "Snapshot for foreign mob ignored");
                        continue;
                    }
                    self.world.apply_snapshot(&snapshot, now_ms);
                }
            }
            (Role::Host, other) => {
                debug!(peer = %from, event = other.kind(), "Unexpected message on host");
            }

            (Role::Client, Message::IAmHost { version }) => {
                self.heard_from_host(from, now_ms);
                let local = self.network().protocol_version.clone();
                if version != local && !self.reload_reported {
                    self.reload_reported = true;
                    warn!(local = %local, host = %version, "Host runs a different version");
                    events.push(SessionEvent::ReloadRequired {
                        local,
                        host: version,
                    });
                }
            }
            (Role::Client, Message::MapData { bytes }) => {
                if self.map_ready {
                    trace!("Duplicate map ignored");
                    return;
                }
                match self.world.replace_map(&bytes) {
                    Ok(()) => {
                        self.heard_from_host(from, now_ms);
                        self.map_ready = true;
                        self.world.respawn(self.player);
                        info!(host = %from, size = bytes.len(), "Map received");
                        events.push(SessionEvent::MapLoaded);
                    }
                    Err(e) => warn!(host = %from, error = %e, "Received map unreadable"),
                }
            }
            (Role::Client, message) if self.host_peer != Some(from) => {
                trace!(peer = %from, event = message.kind(), "Message from non-host ignored");
            }
            (Role::Client, Message::TileChange(change)) => {
                self.world.apply_edits(&[change], EditOrigin::Remote);
            }
            (Role::Client, Message::ActorStates { is_host, mobs }) => {
                if !is_host {
                    return;
                }
                self.last_host_heard_ms = now_ms;
                self.apply_host_states(&mobs, now_ms);
            }
            (Role::Client, Message::ChatMessage { from: name, text }) => {
                events.push(SessionEvent::Chat { from: name, text });
            }
            (Role::Client, Message::Remove { mob }) => {
                if mob != self.player {
                    self.world.remove_mob(mob);
                }
            }
            (Role::Client, Message::GiveItem { mob, item }) => {
                self.world.give_item(mob, item);
            }
            (Role::Client, Message::RequestMap) => {}
        }
    }

    fn apply_host_states(&mut self, mobs: &[MobSnapshot], now_ms: u64) {
        let local_peer = self.transport.local_peer();
        for snapshot in mobs {
            if snapshot.owner == Some(local_peer) {
                continue;
            }
            self.world.apply_snapshot(snapshot, now_ms);
        }
    }

    fn heard_from_host(&mut self, host: PeerId, now_ms: u64) {
        if self.host_peer != Some(host) {
            info!(host = %host, "Host found");
            self.host_peer = Some(host);
        }
        self.last_host_heard_ms = now_ms;
    }

    fn check_host(&mut self, now_ms: u64, events: &mut Vec<SessionEvent>) {
        if self.host_peer.is_some() {
            let silence = now_ms.saturating_sub(self.last_host_heard_ms);
            if silence > self.network().host_timeout_ms {
                warn!(silence_ms = silence, "Host timed out");
                self.host_lost(events);
            }
        }

        if !self.map_ready
            && due(self.last_map_request_ms, now_ms, self.network().request_map_interval_ms)
        {
            self.last_map_request_ms = Some(now_ms);
            let target = self.host_peer.map_or(Target::Broadcast, Target::Peer);
            debug!(target = ?target, "Requesting map");
            self.send(target, &Message::RequestMap);
        }
    }

    fn host_lost(&mut self, events: &mut Vec<SessionEvent>) {
        let dropped = self.world.drop_remote_mobs();
        warn!(dropped, "Lost the host, waiting for a new map");
        self.host_peer = None;
        self.map_ready = false;
        self.last_map_request_ms = None;
        self.reload_reported = false;
        events.push(SessionEvent::HostLost);
    }

    /// Remove everything a departed participant drove and tell the others
    fn forget_peer(&mut self, peer: PeerId) {
        let owned: Vec<MobId> = self
            .world
            .mobs()
            .filter(|mob| mob.owner == Some(peer))
            .map(|mob| mob.id)
            .collect();
        for mob in owned {
            self.world.remove_mob(mob);
            self.send(Target::Broadcast, &Message::Remove { mob });
        }
    }

    fn flush_outbox(&mut self, events: &mut Vec<SessionEvent>) {
        let outbox = self.world.take_outbox();
        if outbox.is_empty() {
            return;
        }

        for change in outbox.tile_changes {
            self.send_edit(change);
        }

        for (from, text) in outbox.chat {
            events.push(SessionEvent::Chat {
                from: from.clone(),
                text: text.clone(),
            });
            self.send_upstream(Message::ChatMessage { from, text });
        }

        if self.role == Role::Host {
            for mob in outbox.removed {
                self.send(Target::Broadcast, &Message::Remove { mob });
            }
            for (mob, item) in outbox.grants {
                let Some(owner) = self.world.mob(mob).and_then(|m| m.owner) else {
                    continue;
                };
                self.send(Target::Peer(owner), &Message::GiveItem { mob, item });
            }
        } else if !outbox.removed.is_empty() || !outbox.grants.is_empty() {
            trace!(
                removed = outbox.removed.len(),
                grants = outbox.grants.len(),
                "Host-only outbox entries discarded"
            );
        }
    }

    fn send_edit(&mut self, change: TileChange) {
        self.send_upstream(Message::TileChange(change));
    }

    /// Hosts broadcast; clients send to the host if one is known
    fn send_upstream(&mut self, message: Message) {
        match (self.role, self.host_peer) {
            (Role::Host, _) => self.send(Target::Broadcast, &message),
            (Role::Client, Some(host)) => self.send(Target::Peer(host), &message),
            (Role::Client, None) => {
                debug!(event = message.kind(), "No host yet, message kept local");
            }
        }
    }

    fn broadcast_actors(&mut self, now_ms: u64) {
        if self.role == Role::Client && (!self.map_ready || self.host_peer.is_none()) {
            return;
        }
        let mobs = self.world.broadcast_snapshots(now_ms);
        if mobs.is_empty() {
            return;
        }
        let message = Message::ActorStates {
            is_host: self.role == Role::Host,
            mobs,
        };
        self.send_upstream(message);
    }

    fn send(&mut self, target: Target, message: &Message) {
        let bytes = match codec::encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(event = message.kind(), error = %e, "Message could not be encoded");
                return;
            }
        };
        trace!(event = message.kind(), size = bytes.len(), "Message sent");
        if let Err(e) = self.transport.send(target, message.delivery(), bytes) {
            warn!(event = message.kind(), error = %e, "Send failed");
        }
    }
}

fn due(last: Option<u64>, now_ms: u64, interval_ms: u64) -> bool {
    last.map_or(true, |last| now_ms.saturating_sub(last) >= interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Delivery, LoopbackNetwork, LoopbackTransport};
    use delve_core::blocks::ids;
    use delve_core::{Layer, WorldConfig, EMPTY};
    use delve_mods::{Hook, ModBundle, ModManifest, NativeExtension};
    use delve_world::{Mob, MobKind};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const FRAME_MS: u64 = 50;

    fn config() -> GameConfig {
        GameConfig {
            world: WorldConfig {
                width: 24,
                depth: 16,
                surface_row: 8,
                cave_density: 0.0,
                tree_density: 0.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Flat stone from row 8 down, in the save format
    fn flat_map() -> Vec<u8> {
        let mut grid = TileGrid::new(24, 16);
        for x in 0..24 {
            for y in 8..16 {
                grid.write(x, y, Layer::Foreground, ids::STONE);
            }
        }
        World::with_grid(config(), PeerId::new(), true, grid)
            .serialize_map()
            .unwrap()
    }

    fn flat_host(network: &LoopbackNetwork) -> Session<LoopbackTransport> {
        Session::host(config(), Some(&flat_map()), Sandbox::new(), network.connect(), "host")
    }

    fn run(sessions: &mut [&mut Session<LoopbackTransport>], clock: &mut u64, frames: usize) {
        for _ in 0..frames {
            for session in sessions.iter_mut() {
                session.frame(*clock);
            }
            *clock += FRAME_MS;
        }
    }

    #[test]
    fn test_tile_changes_converge_through_the_host() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut alice = Session::client(config(), Sandbox::new(), network.connect(), "alice");
        let mut bob = Session::client(config(), Sandbox::new(), network.connect(), "bob");
        let mut clock = 0;

        run(&mut [&mut host, &mut alice, &mut bob], &mut clock, 4);
        assert!(alice.is_map_ready());
        assert!(bob.is_map_ready());
        assert_eq!(alice.host_peer(), Some(host.local_peer()));

        // Client edit, applied optimistically then relayed by the host.
        assert!(alice
            .world_mut()
            .set_tile(3, 2, ids::DIRT, Layer::Foreground, EditOrigin::Local));
        // Host edit, broadcast to both clients.
        assert!(host
            .world_mut()
            .set_tile(7, 1, ids::GLASS, Layer::Foreground, EditOrigin::Local));
        run(&mut [&mut host, &mut alice, &mut bob], &mut clock, 3);

        for session in [&host, &alice, &bob] {
            assert_eq!(session.world().get_tile(3, 2, Layer::Foreground), ids::DIRT);
            assert_eq!(session.world().get_tile(7, 1, Layer::Foreground), ids::GLASS);
        }

        // Every participant sees every player.
        for session in [&host, &alice, &bob] {
            assert!(session.world().mob(alice.player()).is_some());
            assert!(session.world().mob(bob.player()).is_some());
            assert!(session.world().mob(host.player()).is_some());
        }
    }

    #[test]
    fn test_client_movement_reaches_other_clients() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut alice = Session::client(config(), Sandbox::new(), network.connect(), "alice");
        let mut bob = Session::client(config(), Sandbox::new(), network.connect(), "bob");
        let mut clock = 0;
        run(&mut [&mut host, &mut alice, &mut bob], &mut clock, 4);

        let id = alice.player();
        let start = alice.world().mob(id).unwrap().x;
        alice.world_mut().mob_mut(id).unwrap().controls.right = true;
        run(&mut [&mut host, &mut alice, &mut bob], &mut clock, 6);

        assert!(alice.world().mob(id).unwrap().x > start);
        assert!(host.world().mob(id).unwrap().x > start);
        assert!(bob.world().mob(id).unwrap().x > start);
    }

    #[test]
    fn test_chat_is_relayed() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut alice = Session::client(config(), Sandbox::new(), network.connect(), "alice");
        let mut bob = Session::client(config(), Sandbox::new(), network.connect(), "bob");
        let mut clock = 0;
        run(&mut [&mut host, &mut alice, &mut bob], &mut clock, 4);

        alice.say("alice", "hello");
        host.frame(clock);
        let events = bob.frame(clock);

        assert!(events.contains(&SessionEvent::Chat {
            from: "alice".to_string(),
            text: "hello".to_string(),
        }));
        assert!(alice.frame(clock).iter().all(|e| !matches!(e, SessionEvent::Chat { .. })));
    }

    /// Drives a client from a raw transport pretending to be the host
    struct FakeHost {
        transport: LoopbackTransport,
        world: World,
    }

    impl FakeHost {
        fn new(network: &LoopbackNetwork) -> Self {
            let transport = network.connect();
            let world = World::load(config(), transport.local_peer(), true, &flat_map());
            Self { transport, world }
        }

        fn send(&mut self, message: Message) {
            let bytes = codec::encode(&message).unwrap();
            self.transport
                .send(Target::Broadcast, message.delivery(), bytes)
                .unwrap();
        }

        fn announce(&mut self, version: &str) {
            self.send(Message::IAmHost {
                version: version.to_string(),
            });
            let bytes = self.world.serialize_map().unwrap();
            self.send(Message::MapData { bytes });
        }

        fn send_creature(&mut self, id: MobId, name: &str, sequence: u64) {
            let mut snapshot = Mob::new(id, name, MobKind::Creature, 64.0, 0.0, 20.0, 20.0).snapshot();
            snapshot.sequence = sequence;
            self.send(Message::ActorStates {
                is_host: true,
                mobs: vec![snapshot],
            });
        }
    }

    #[test]
    fn test_stale_actor_states_are_ignored() {
        let network = LoopbackNetwork::new();
        let mut fake = FakeHost::new(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");
        let version = config().network.protocol_version;
        fake.announce(&version);
        client.frame(0);
        assert!(client.is_map_ready());

        let id = MobId::new();
        fake.send_creature(id, "slime", 5);
        client.frame(10);
        fake.send_creature(id, "stale", 3);
        client.frame(20);
        fake.send_creature(id, "duplicate", 5);
        client.frame(30);

        let seen = client.world().mob(id).unwrap();
        assert_eq!(seen.name, "slime");
        assert_eq!(seen.sequence, 5);

        fake.send_creature(id, "renamed", 6);
        client.frame(40);
        let seen = client.world().mob(id).unwrap();
        assert_eq!(seen.name, "renamed");
        assert_eq!(seen.sequence, 6);
    }

    #[test]
    fn test_late_actor_state_does_not_revive_removed_mob() {
        let network = LoopbackNetwork::new();
        let mut fake = FakeHost::new(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");
        fake.announce(&config().network.protocol_version);
        client.frame(0);

        let id = MobId::new();
        fake.send_creature(id, "slime", 5);
        client.frame(10);
        assert!(client.world().mob(id).is_some());

        // The reliable removal is polled ahead of the older unreliable state.
        fake.send_creature(id, "slime", 4);
        fake.send(Message::Remove { mob: id });
        client.frame(20);
        assert!(client.world().mob(id).is_none());

        fake.send_creature(id, "slime", 5);
        client.frame(30);
        assert!(client.world().mob(id).is_none());
    }

    #[test]
    fn test_game_start_reaches_extensions_before_world_start() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut extension = NativeExtension::new();
        for hook in [Hook::GameStart, Hook::WorldStart] {
            let order = order.clone();
            extension = extension.on(hook, move |event, _| {
                order.lock().push(event.hook());
                Ok(())
            });
        }
        let mut sandbox = Sandbox::new();
        sandbox.load(ModManifest::new("lifecycle", "1"), ModBundle::new(), Box::new(extension));

        let network = LoopbackNetwork::new();
        let mut host = Session::host(config(), Some(&flat_map()), sandbox, network.connect(), "host");
        host.frame(0);
        host.frame(FRAME_MS);

        assert_eq!(*order.lock(), vec![Hook::GameStart, Hook::WorldStart]);
    }

    #[test]
    fn test_own_player_state_from_host_is_ignored() {
        let network = LoopbackNetwork::new();
        let mut fake = FakeHost::new(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");
        fake.announce(&config().network.protocol_version);
        client.frame(0);

        let mut own = client.world().mob(client.player()).unwrap().snapshot();
        own.x = -500.0;
        own.sequence = 1_000;
        fake.send(Message::ActorStates {
            is_host: true,
            mobs: vec![own],
        });
        client.frame(10);

        assert_ne!(client.world().mob(client.player()).unwrap().x, -500.0);
    }

    #[test]
    fn test_version_mismatch_is_reported_once() {
        let network = LoopbackNetwork::new();
        let mut fake = FakeHost::new(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");

        fake.announce("0.0.0-other");
        let events = client.frame(0);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::ReloadRequired { host, .. } if host == "0.0.0-other"
        )));

        fake.send(Message::IAmHost {
            version: "0.0.0-other".to_string(),
        });
        let events = client.frame(10);
        assert!(!events
            .iter()
            .any(|e| matches!(e, SessionEvent::ReloadRequired { .. })));
    }

    #[test]
    fn test_host_leaving_resets_the_client() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");
        let mut clock = 0;
        run(&mut [&mut host, &mut client], &mut clock, 4);
        assert!(client.world().mob(host.player()).is_some());

        drop(host);
        let events = client.frame(clock);

        assert!(events.contains(&SessionEvent::HostLost));
        assert!(!client.is_map_ready());
        assert_eq!(client.world().mob_count(), 1);
        assert!(client.world().mob(client.player()).is_some());
    }

    #[test]
    fn test_silent_host_times_out() {
        let network = LoopbackNetwork::new();
        let mut fake = FakeHost::new(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");
        fake.announce(&config().network.protocol_version);
        client.frame(0);
        assert!(client.is_map_ready());

        let timeout = config().network.host_timeout_ms;
        assert!(!client.frame(timeout).contains(&SessionEvent::HostLost));
        assert!(client.frame(timeout + 1).contains(&SessionEvent::HostLost));

        // Back to asking for the map.
        let mut requests = 0;
        for event in fake.transport.poll() {
            if let TransportEvent::Message { bytes, .. } = event {
                if codec::decode(&bytes).unwrap() == Message::RequestMap {
                    requests += 1;
                }
            }
        }
        assert_eq!(requests, 1);
    }

    #[test]
    fn test_departed_client_is_removed_everywhere() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut alice = Session::client(config(), Sandbox::new(), network.connect(), "alice");
        let mut bob = Session::client(config(), Sandbox::new(), network.connect(), "bob");
        let mut clock = 0;
        run(&mut [&mut host, &mut alice, &mut bob], &mut clock, 4);

        let bob_player = bob.player();
        assert!(alice.world().mob(bob_player).is_some());

        drop(bob);
        run(&mut [&mut host, &mut alice], &mut clock, 2);

        assert!(host.world().mob(bob_player).is_none());
        assert!(alice.world().mob(bob_player).is_none());
    }

    #[test]
    fn test_host_rejects_snapshots_for_mobs_the_peer_does_not_own() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut rogue = network.connect();
        host.frame(0);

        let mut forged = host.world().mob(host.player()).unwrap().snapshot();
        forged.x = 0.0;
        forged.sequence = 10_000;
        let message = Message::ActorStates {
            is_host: false,
            mobs: vec![forged],
        };
        rogue
            .send(Target::Broadcast, Delivery::Unreliable, codec::encode(&message).unwrap())
            .unwrap();
        host.frame(10);

        assert!(host.world().mob(host.player()).unwrap().sequence < 10_000);
    }

    #[test]
    fn test_host_serves_its_saved_map() {
        let network = LoopbackNetwork::new();
        let mut host = flat_host(&network);
        let mut client = Session::client(config(), Sandbox::new(), network.connect(), "c");
        assert_eq!(client.world().get_tile(3, 10, Layer::Foreground), EMPTY);

        let mut clock = 0;
        run(&mut [&mut host, &mut client], &mut clock, 3);

        assert_eq!(client.world().get_tile(3, 10, Layer::Foreground), ids::STONE);
        assert_eq!(client.world().get_tile(3, 7, Layer::Foreground), EMPTY);
        assert_eq!(client.world().spawn(), host.world().spawn());
    }
}
