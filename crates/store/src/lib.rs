//! Shared key-value persistence and the small stores built on it.
//!
//! Key space:
//! - `dedup:<namespace>:<id>` idempotency markers (TTL)
//! - `cron:job:<name>` scheduler records
//! - `access:<target>` permission masks
//! - `avatar:<user>` avatar images (128x128 PNG, base64)

pub mod access;
pub mod avatar;
pub mod dedup;
pub mod error;
pub mod kv;
pub mod kv_memory;
pub mod kv_sqlite;

pub use {
    access::{Access, AccessEntry, AccessService},
    avatar::AvatarStore,
    dedup::IdempotencyStore,
    error::{Error, Result},
    kv::KvStore,
    kv_memory::MemoryKvStore,
    kv_sqlite::SqliteKvStore,
};

/// Run database migrations for the key-value table.
///
/// Call at startup when sharing a pool with [`SqliteKvStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}
