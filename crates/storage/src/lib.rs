//! Storage layer: SQLite schemas and helpers.
//!
//! Holds DB pool setup, the migration runner and the metadata repositories for
//! dataset images and predictions.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

pub mod datasets;
pub mod models;
pub mod predictions;

pub use datasets::DatasetRepo;
pub use predictions::PredictionRepo;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let mut url = database_url.to_string();
    if !database_url.starts_with("sqlite:") {
        let path = std::path::PathBuf::from(database_url);
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let norm = path.to_string_lossy().replace('\\', "/");
        if path.is_absolute() {
            url = format!("sqlite:///{}?mode=rwc", norm.trim_start_matches('/'));
        } else {
            url = format!("sqlite://{}?mode=rwc", norm);
        }
    }
    let mut opts = SqlitePoolOptions::new();
    if url.contains("memory") {
        // A private in-memory database only lives as long as its connection.
        opts = opts
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    } else {
        opts = opts.max_connections(5);
    }
    let pool = opts.connect(&url).await?;
    debug!(url = %url, "metadata store connected");
    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    // Applies SQLx migrations located in crates/storage/migrations.
    // Safe to run multiple times (idempotent).
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("metadata store migrations applied");
    Ok(())
}

/// JSON column value for a hierarchy. sqlx 0.7 has no encode variant, so a
/// failure is reported as a protocol error.
pub(crate) fn hierarchy_json(hierarchy: &[String]) -> sqlx::Result<String> {
    serde_json::to_string(hierarchy)
        .map_err(|e| sqlx::Error::Protocol(format!("encoding hierarchy: {e}")))
}

/// Slash-joined hierarchy used for exact and subtree matching in SQL.
pub(crate) fn hierarchy_path(hierarchy: &[String]) -> String {
    hierarchy.join("/")
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = connect("sqlite::memory:").await.unwrap();
    migrate(&pool).await.unwrap();
    pool
}
