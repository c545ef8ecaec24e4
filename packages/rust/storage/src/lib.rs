//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding price-drop
//! subscriptions and the persistent key-value cache. [`MemoryCache`] is the
//! in-process alternative used when no database is configured.
//!
//! **Access rules:**
//! - the alert scanner and CLI write via [`Storage::open`]
//! - read-only CLI commands (`alerts list`, `fx show`) use [`Storage::open_readonly`]

mod memory;
mod migrations;

pub use memory::MemoryCache;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Value, params};
use shopally_shared::{
    KeyValueCache, Result, ShopAllyError, Subscription, SubscriptionRecord, SubscriptionStore,
};
use uuid::Uuid;

fn storage_err(e: libsql::Error) -> ShopAllyError {
    ShopAllyError::Storage(e.to_string())
}

fn cache_err(e: libsql::Error) -> ShopAllyError {
    ShopAllyError::Cache(e.to_string())
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ShopAllyError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode. Migrations are
    /// not run, so the file must have been created by [`Storage::open`].
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ShopAllyError::Storage(format!(
                "no database at {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    ShopAllyError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(ShopAllyError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Subscription operations
    // -----------------------------------------------------------------------

    /// Create an active subscription for `item_id` at `reference_price`.
    pub async fn insert_subscription(
        &self,
        owner_token: &str,
        item_id: &str,
        title: &str,
        reference_price: f64,
    ) -> Result<Subscription> {
        self.check_writable()?;
        if owner_token.trim().is_empty() || item_id.trim().is_empty() {
            return Err(ShopAllyError::validation(
                "owner token and item id must not be empty",
            ));
        }
        if !(reference_price > 0.0) {
            return Err(ShopAllyError::validation(
                "reference price must be greater than zero",
            ));
        }

        let sub = Subscription {
            id: Uuid::now_v7().to_string(),
            owner_token: owner_token.trim().to_string(),
            item_id: item_id.trim().to_string(),
            title: title.trim().to_string(),
            reference_price,
            active: true,
            created_at: Utc::now(),
        };
        let created_at = sub.created_at.to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO subscriptions
                    (id, owner_token, item_id, title, reference_price, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![
                    sub.id.as_str(),
                    sub.owner_token.as_str(),
                    sub.item_id.as_str(),
                    sub.title.as_str(),
                    sub.reference_price,
                    created_at.as_str()
                ],
            )
            .await
            .map_err(storage_err)?;

        tracing::debug!(id = %sub.id, item_id = %sub.item_id, "subscription created");
        Ok(sub)
    }

    /// Get a subscription by id, active or not.
    pub async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_token, item_id, title, reference_price, active, created_at
                 FROM subscriptions WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_subscription(&row)?)),
            None => Ok(None),
        }
    }

    /// List subscriptions, optionally restricted to one owner, oldest first.
    pub async fn list_subscriptions(&self, owner_token: Option<&str>) -> Result<Vec<Subscription>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_token, item_id, title, reference_price, active, created_at
                 FROM subscriptions
                 WHERE ?1 IS NULL OR owner_token = ?1
                 ORDER BY id",
                params![owner_token],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_subscription(&row)?);
        }
        Ok(results)
    }

    /// Stop scanning a subscription. Returns `false` if it was not active.
    pub async fn deactivate_subscription(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE subscriptions SET active = 0 WHERE id = ?1 AND active = 1",
                params![id],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    /// Delete a subscription. Returns `false` if no such id existed.
    pub async fn delete_subscription(&self, id: &str) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute("DELETE FROM subscriptions WHERE id = ?1", params![id])
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Cache maintenance
    // -----------------------------------------------------------------------

    /// Remove expired cache entries. Returns the number of rows removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.check_writable()?;
        let removed = self
            .conn
            .execute(
                "DELETE FROM kv_cache WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![Utc::now().timestamp_millis()],
            )
            .await
            .map_err(cache_err)?;
        if removed > 0 {
            tracing::info!(removed, "purged expired cache entries");
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl SubscriptionStore for Storage {
    async fn active_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SubscriptionRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut rows = self
            .conn
            .query(
                "SELECT id, owner_token, item_id, title, reference_price
                 FROM subscriptions
                 WHERE active = 1 AND (?1 IS NULL OR id > ?1)
                 ORDER BY id
                 LIMIT ?2",
                params![after, limit],
            )
            .await
            .map_err(storage_err)?;

        let mut page = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            page.push(SubscriptionRecord {
                id: row.get::<String>(0).map_err(storage_err)?,
                owner_token: row.get::<String>(1).map_err(storage_err)?,
                item_id: row.get::<String>(2).map_err(storage_err)?,
                title: row.get::<String>(3).map_err(storage_err)?,
                reference_price: row.get::<f64>(4).map_err(storage_err)?,
            });
        }
        Ok(page)
    }

    async fn lower_reference_price(&self, id: &str, new_price: f64) -> Result<bool> {
        self.check_writable()?;
        // Conditional update keeps the reference price monotonically non-increasing.
        let changed = self
            .conn
            .execute(
                "UPDATE subscriptions SET reference_price = ?2
                 WHERE id = ?1 AND active = 1 AND reference_price > ?2",
                params![id, new_price],
            )
            .await
            .map_err(storage_err)?;
        Ok(changed > 0)
    }
}

#[async_trait]
impl KeyValueCache for Storage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value FROM kv_cache
                 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                params![key, Utc::now().timestamp_millis()],
            )
            .await
            .map_err(cache_err)?;

        match rows.next().await.map_err(cache_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(cache_err)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.check_writable()?;
        let expires_at = ttl.map(|ttl| {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            Utc::now().timestamp_millis().saturating_add(ttl_ms)
        });
        self.conn
            .execute(
                "INSERT INTO kv_cache (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at = excluded.expires_at",
                params![key, value, expires_at],
            )
            .await
            .map_err(cache_err)?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute("DELETE FROM kv_cache WHERE key = ?1", params![key])
            .await
            .map_err(cache_err)?;
        Ok(())
    }
}

/// Convert a libSQL row to a [`Subscription`].
fn row_to_subscription(row: &libsql::Row) -> Result<Subscription> {
    let active = match row.get_value(5).map_err(storage_err)? {
        Value::Integer(v) => v != 0,
        _ => false,
    };
    let created_at: String = row.get(6).map_err(storage_err)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ShopAllyError::Storage(format!("bad created_at '{created_at}': {e}")))?;

    Ok(Subscription {
        id: row.get(0).map_err(storage_err)?,
        owner_token: row.get(1).map_err(storage_err)?,
        item_id: row.get(2).map_err(storage_err)?,
        title: row.get(3).map_err(storage_err)?,
        reference_price: row.get(4).map_err(storage_err)?,
        active,
        created_at,
    })
}
