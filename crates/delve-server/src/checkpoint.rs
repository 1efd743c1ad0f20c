//! Autosave and restore of the hosted world.

use crate::database::Database;
use delve_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub timestamp: i64,
    pub tick: u64,
    /// The map in its save format
    pub map: Vec<u8>,
}

impl Checkpoint {
    pub fn new(tick: u64, map: Vec<u8>) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            timestamp: chrono::Utc::now().timestamp(),
            tick,
            map,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let checkpoint: Checkpoint = bincode::deserialize(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize checkpoint: {}", e)))?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(Error::Serialization(format!(
                "Unsupported checkpoint version {}",
                checkpoint.version
            )));
        }
        Ok(checkpoint)
    }
}

#[derive(Clone)]
pub struct CheckpointManager {
    db: Database,
    key: String,
}

impl CheckpointManager {
    pub fn new(db: Database, key: impl Into<String>) -> Self {
        Self { db, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn save(&self, tick: u64, map: Vec<u8>) -> Result<()> {
        let checkpoint = Checkpoint::new(tick, map);
        let bytes = checkpoint.to_bytes()?;
        self.db.store(&self.key, &bytes).await?;

        crate::record_histogram!("checkpoint_bytes", bytes.len());
        info!(key = %self.key, tick, size = bytes.len(), "Checkpoint saved");
        Ok(())
    }

    /// The saved map, if one exists and can be read.
    ///
    /// A corrupt checkpoint is reported and treated as absent so the caller
    /// generates a fresh world.
    pub async fn restore_latest(&self) -> Result<Option<Checkpoint>> {
        let Some(bytes) = self.db.load(&self.key).await? else {
            info!(key = %self.key, "No checkpoint found");
            return Ok(None);
        };

        match Checkpoint::from_bytes(&bytes) {
            Ok(checkpoint) => {
                info!(
                    key = %self.key,
                    tick = checkpoint.tick,
                    timestamp = checkpoint.timestamp,
                    "Restoring checkpoint"
                );
                Ok(Some(checkpoint))
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Checkpoint unreadable, ignoring it");
                Ok(None)
            }
        }
    }
}
