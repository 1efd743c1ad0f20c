//! The simulation task driving the hosted session.

use crate::checkpoint::CheckpointManager;
use crate::transport::WsTransport;
use delve_core::Result;
use delve_net::{Session, SessionEvent};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Requests from the HTTP side, answered between frames
#[derive(Debug)]
pub enum HostCommand {
    /// The current map in its save format
    Map(oneshot::Sender<Result<Vec<u8>>>),
    /// Save now instead of waiting for the next autosave
    Save(oneshot::Sender<Result<()>>),
}

/// Published after every frame for the stats endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct HostStatus {
    pub tick: u64,
    pub mobs: usize,
    /// Player avatars, the server's own included
    pub players: usize,
    pub failed_hooks: u64,
    pub last_save_tick: Option<u64>,
}

pub struct HostLoop {
    session: Session<WsTransport>,
    checkpoints: CheckpointManager,
    status: Arc<RwLock<HostStatus>>,
    tick_rate_hz: u32,
    autosave: Duration,
}

impl HostLoop {
    pub fn new(
        session: Session<WsTransport>,
        checkpoints: CheckpointManager,
        status: Arc<RwLock<HostStatus>>,
        tick_rate_hz: u32,
        autosave_interval_secs: u64,
    ) -> Self {
        Self {
            session,
            checkpoints,
            status,
            tick_rate_hz: tick_rate_hz.max(1),
            autosave: Duration::from_secs(autosave_interval_secs.max(1)),
        }
    }

    /// Run frames until `shutdown` flips, then save one last time
    #[instrument(skip_all, fields(tick_rate_hz = self.tick_rate_hz))]
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<HostCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let started = Instant::now();
        let mut frames = interval(Duration::from_secs(1) / self.tick_rate_hz);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut autosave = interval(self.autosave);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first autosave tick completes immediately; skip it.
        autosave.tick().await;

        info!("Simulation started");
        loop {
            tokio::select! {
                _ = frames.tick() => {
                    let now_ms = started.elapsed().as_millis() as u64;
                    self.frame(now_ms);
                }
                _ = autosave.tick() => {
                    if let Err(e) = self.save().await {
                        error!(error = %e, "Autosave failed");
                    }
                }
                Some(command) = commands.recv() => self.handle(command).await,
                _ = shutdown.changed() => break,
            }
        }

        info!("Simulation stopping, saving world");
        if let Err(e) = self.save().await {
            error!(error = %e, "Final save failed");
        }
    }

    pub fn frame(&mut self, now_ms: u64) {
        let frame_start = std::time::Instant::now();
        let events = self.session.frame(now_ms);

        for event in events {
            match event {
                SessionEvent::Chat { from, text } => info!(from = %from, text = %text, "Chat"),
                SessionEvent::PortalEntered(entered) => {
                    info!(mob_id = %entered.mob, destination = %entered.destination, "Portal entered")
                }
                SessionEvent::PeerJoined(peer) => {
                    crate::record_counter!("peers_joined", 1);
                    debug!(peer = %peer, "Participant joined");
                }
                SessionEvent::PeerLeft(peer) => debug!(peer = %peer, "Participant left"),
                other => warn!(event = ?other, "Unexpected session event on host"),
            }
        }

        let world = self.session.world();
        let failed: u64 = self
            .session
            .sandbox()
            .extensions()
            .iter()
            .map(|extension| extension.failures())
            .sum();
        let mut status = self.status.write();
        status.tick = world.tick();
        status.mobs = world.mob_count();
        status.players = world.mobs().filter(|mob| mob.is_player()).count();
        status.failed_hooks = failed;
        crate::record_histogram!("frame_micros", frame_start.elapsed().as_micros() as u64);
    }

    async fn handle(&mut self, command: HostCommand) {
        match command {
            HostCommand::Map(reply) => {
                let _ = reply.send(self.session.world().serialize_map());
            }
            HostCommand::Save(reply) => {
                let _ = reply.send(self.save().await);
            }
        }
    }

    async fn save(&mut self) -> Result<()> {
        let tick = self.session.world().tick();
        let map = self.session.world().serialize_map()?;
        self.checkpoints.save(tick, map).await?;
        self.status.write().last_save_tick = Some(tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::transport::WsHub;
    use delve_core::{GameConfig, WorldConfig};
    use delve_mods::Sandbox;

    fn config() -> GameConfig {
        GameConfig {
            world: WorldConfig {
                width: 16,
                depth: 12,
                surface_row: 6,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn host_loop() -> (HostLoop, WsHub, CheckpointManager) {
        let db = Database::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        let checkpoints = CheckpointManager::new(db, "world");
        let (hub, transport) = WsHub::new();
        let session = Session::host(config(), None, Sandbox::new(), transport, "server");
        let status = Arc::new(RwLock::new(HostStatus::default()));
        let host = HostLoop::new(session, checkpoints.clone(), status, 60, 60);
        (host, hub, checkpoints)
    }

    #[tokio::test]
    async fn test_frames_publish_status() {
        let (mut host, hub, _) = host_loop().await;
        let (_peer, _outbound) = hub.join();

        host.frame(0);
        host.frame(16);

        let status = host.status.read().clone();
        assert_eq!(status.tick, 2);
        assert_eq!(status.players, 1);
    }

    #[tokio::test]
    async fn test_commands_and_final_save() {
        let (host, _hub, checkpoints) = host_loop().await;
        let (command_tx, command_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(host.run(command_rx, shutdown_rx));

        let (reply, map) = oneshot::channel();
        command_tx.send(HostCommand::Map(reply)).await.unwrap();
        let map = map.await.unwrap().unwrap();
        assert_eq!(map[0], 0xFF);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let saved = checkpoints.restore_latest().await.unwrap().unwrap();
        assert_eq!(saved.map.len(), map.len());
    }
}
