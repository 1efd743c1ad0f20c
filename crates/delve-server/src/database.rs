//! SQLite key/value store for world saves.

use delve_core::{Error, Result};
use sqlx::{
    sqlite::{SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::Path;
use tracing::{debug, info};

/// One stored save, without its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveInfo {
    pub key: String,
    pub size: usize,
    pub updated_at: i64,
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Database(format!("Failed to create database directory: {}", e))
            })?;
        }

        // Every connection to an in-memory database sees its own empty
        // database, so those get exactly one.
        let max_connections = if path == ":memory:" { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(&format!("sqlite:{}?mode=rwc", path))
            .await
            .map_err(|e| Error::Database(format!("Failed to connect to database: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saves (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Migration failed: {}", e)))?;

        info!("Database migrations complete");
        Ok(())
    }

    /// Store `data` under `key`, replacing any earlier value
    pub async fn store(&self, key: &str, data: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO saves (key, data, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(key) DO UPDATE SET
                data = ?2,
                updated_at = ?4
            "#,
        )
        .bind(key)
        .bind(data)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to store {}: {}", key, e)))?;

        debug!(key, size = data.len(), "Save stored");
        Ok(())
    }

    pub async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT data FROM saves WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to load {}: {}", key, e)))?;

        Ok(row.map(|row| row.get("data")))
    }

    pub async fn delete(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM saves WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to delete {}: {}", key, e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Every save, most recently written first
    pub async fn list(&self) -> Result<Vec<SaveInfo>> {
        let rows = sqlx::query(
            "SELECT key, length(data) AS size, updated_at FROM saves ORDER BY updated_at DESC, key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(format!("Failed to list saves: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let size: i64 = row.get("size");
                SaveInfo {
                    key: row.get("key"),
                    size: size as usize,
                    updated_at: row.get("updated_at"),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_db() -> Database {
        let db = Database::new(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let db = create_test_db().await;
        assert_eq!(db.load("world").await.unwrap(), None);

        db.store("world", &[1, 2, 3]).await.unwrap();
        assert_eq!(db.load("world").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_store_replaces() {
        let db = create_test_db().await;
        db.store("world", &[1]).await.unwrap();
        db.store("world", &[4, 5]).await.unwrap();
        db.store("other", &[9]).await.unwrap();

        assert_eq!(db.load("world").await.unwrap(), Some(vec![4, 5]));
        let saves = db.list().await.unwrap();
        assert_eq!(saves.len(), 2);
        let world = saves.iter().find(|s| s.key == "world").unwrap();
        assert_eq!(world.size, 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let db = create_test_db().await;
        db.store("world", &[1]).await.unwrap();

        assert!(db.delete("world").await.unwrap());
        assert!(!db.delete("world").await.unwrap());
        assert_eq!(db.load("world").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("delve.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::new(path).await.unwrap();
            db.migrate().await.unwrap();
            db.store("world", b"map").await.unwrap();
        }

        let db = Database::new(path).await.unwrap();
        db.migrate().await.unwrap();
        assert_eq!(db.load("world").await.unwrap(), Some(b"map".to_vec()));
    }
}
