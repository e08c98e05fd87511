//! Shared key-value store for cross-tenant aggregates
//!
//! Aggregates written by one tenant's experience are read by every tenant.
//! The store is an external collaborator: anything offering string get and
//! set-with-expiry can back it. Two implementations ship here, a SQLite
//! table shared by every process pointing at the same database file, and a
//! process-local map.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// SQL to create the shared key-value table
pub const CREATE_SHARED_KV_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS shared_kv (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

/// Longest expiry the in-memory store tracks; longer TTLs are capped to it
pub const MAX_IN_MEMORY_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// String key-value store with per-entry expiry
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Fetch a live value, `None` if absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that expires after `ttl`, overwriting any previous value
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Process-local store, used in tests and single-node deployments
#[derive(Debug, Default)]
pub struct InMemorySharedStore {
    entries: RwLock<HashMap<String, (String, Instant)>>,
}

impl InMemorySharedStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet evicted
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store holds no entries
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl SharedStore for InMemorySharedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value.clone()))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now()
            .checked_add(ttl.min(MAX_IN_MEMORY_TTL))
            .ok_or_else(|| Error::InvalidArgument(format!("ttl {:?} is out of range", ttl)))?;

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }
}

/// SQLite-backed store shared by every process using the same database
pub struct SqliteSharedStore {
    pool: SqlitePool,
}

impl SqliteSharedStore {
    /// Create a new store from an existing connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to (creating if needed) the database and initialize the schema
    pub async fn connect(database_path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", database_path.display());

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(Error::DatabaseError)?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_SHARED_KV_TABLE_SQL)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        info!("Shared key-value table initialized");
        Ok(())
    }

    /// Delete expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM shared_kv WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        let deleted = result.rows_affected();
        debug!(deleted = deleted, "Purged expired shared entries");
        Ok(deleted)
    }
}

#[async_trait]
impl SharedStore for SqliteSharedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM shared_kv WHERE key = ? AND expires_at > ?")
            .bind(key)
            .bind(Utc::now().timestamp())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let expires_at = Utc::now().timestamp().saturating_add(ttl_secs);

        sqlx::query(
            r#"
            INSERT INTO shared_kv (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        debug!(key = %key, ttl_secs = ttl_secs, "Wrote shared entry");
        Ok(())
    }
}
