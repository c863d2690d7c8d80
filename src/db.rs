use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::store::StoreError;

pub const DATABASE_VERSION: i64 = 1;

const DB_INIT: &str = "
CREATE TABLE IF NOT EXISTS channels(
    id TEXT PRIMARY KEY,
    name TEXT,
    uploads_playlist TEXT,
    download_directory TEXT COLLATE NOCASE,
    queuefile_extension TEXT COLLATE NOCASE,
    automark TEXT,
    autorefresh INT NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS videos(
    id TEXT PRIMARY KEY,
    published INT,
    author_id TEXT,
    title TEXT,
    description TEXT,
    duration INT,
    views INT,
    thumbnail TEXT,
    live_broadcast TEXT,
    state TEXT
);

CREATE INDEX IF NOT EXISTS index_video_author_published on videos(author_id, published);
CREATE INDEX IF NOT EXISTS index_video_author_state_published on videos(author_id, state, published);
CREATE INDEX IF NOT EXISTS index_video_published on videos(published);
CREATE INDEX IF NOT EXISTS index_video_state_published on videos(state, published);
";

pub async fn init_db(database_path: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{database_path}"))
        .map_err(StoreError::Sqlx)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await?;

    prepare_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests. Capped at one connection so every query
/// sees the same database.
pub async fn init_db_in_memory() -> Result<SqlitePool, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    prepare_schema(&pool).await?;
    Ok(pool)
}

/// Runs first-time setup on an empty database, otherwise verifies the
/// schema version and refuses to start on a mismatch.
async fn prepare_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let table_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'")
            .fetch_one(pool)
            .await?;

    if table_count == 0 {
        tracing::debug!("Running first-time database setup");
        sqlx::raw_sql(DB_INIT).execute(pool).await?;
        sqlx::raw_sql(&format!("PRAGMA user_version = {DATABASE_VERSION}"))
            .execute(pool)
            .await?;
        return Ok(());
    }

    let existing: i64 = sqlx::query_scalar("PRAGMA user_version").fetch_one(pool).await?;
    if existing != DATABASE_VERSION {
        return Err(StoreError::OutOfDate {
            existing,
            required: DATABASE_VERSION,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_database_gets_current_version() {
        let pool = init_db_in_memory().await.unwrap();
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, DATABASE_VERSION);
    }

    #[tokio::test]
    async fn version_mismatch_is_fatal() {
        let pool = init_db_in_memory().await.unwrap();
        sqlx::raw_sql("PRAGMA user_version = 99")
            .execute(&pool)
            .await
            .unwrap();
        let result = prepare_schema(&pool).await;
        assert!(matches!(
            result,
            Err(StoreError::OutOfDate { existing: 99, required: DATABASE_VERSION })
        ));
    }
}
