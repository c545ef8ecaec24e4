//! SQL migration definitions for the ShopAlly database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its own version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: subscriptions",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Price-drop subscriptions. Ids are UUIDv7 so keyset paging by id follows
-- insertion order.
CREATE TABLE IF NOT EXISTS subscriptions (
    id              TEXT PRIMARY KEY,
    owner_token     TEXT NOT NULL,
    item_id         TEXT NOT NULL,
    title           TEXT NOT NULL DEFAULT '',
    reference_price REAL NOT NULL,
    active          INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_active ON subscriptions(active, id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_owner ON subscriptions(owner_token);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Key-value cache with optional expiry",
            sql: r#"
-- expires_at is unix milliseconds; NULL never expires
CREATE TABLE IF NOT EXISTS kv_cache (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_kv_cache_expires ON kv_cache(expires_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
