use std::path::PathBuf;

use {
    anyhow::Context as _,
    clap::Subcommand,
    parley_config::ParleyConfig,
    parley_store::{KvStore as _, SqliteKvStore},
};

#[derive(Subcommand)]
pub enum DbAction {
    /// Print the database path.
    Path,
    /// Create the database if needed and run pending migrations.
    Migrate,
    /// Delete expired keys (dedup markers, sessions, visited posts).
    Purge,
}

/// The configured database path, or `parley.db` in the data dir.
pub fn db_path(config: &ParleyConfig) -> PathBuf {
    config
        .app
        .database
        .clone()
        .unwrap_or_else(|| parley_config::data_dir().join("parley.db"))
}

pub async fn open(config: &ParleyConfig) -> anyhow::Result<SqliteKvStore> {
    let path = db_path(config);
    SqliteKvStore::open(&path)
        .await
        .with_context(|| format!("failed to open database {}", path.display()))
}

pub async fn handle_db(action: DbAction, config: &ParleyConfig) -> anyhow::Result<()> {
    match action {
        DbAction::Path => println!("{}", db_path(config).display()),
        DbAction::Migrate => {
            open(config).await?;
            println!("Database ready: {}", db_path(config).display());
        },
        DbAction::Purge => {
            let removed = open(config).await?.purge_expired().await?;
            println!("Removed {removed} expired key(s).");
        },
    }
    Ok(())
}
