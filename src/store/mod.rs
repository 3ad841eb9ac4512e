//! SQLite-backed persistence for files, chunks, and form requests

pub mod chunks;
pub mod files;
pub mod requests;

use crate::config::DatabaseConfig;
use crate::error::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// Connect to the database, creating the file if needed.
///
/// Foreign keys are enabled per connection; the cascade rules depend on it.
pub async fn connect(config: &DatabaseConfig) -> Result<SqlitePool> {
    // Ensure the directory for the database file exists
    if let Some(db_path) = config.url.strip_prefix("sqlite:") {
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if db_path != ":memory:" {
            if let Some(parent) = std::path::Path::new(db_path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
    }

    let options = SqliteConnectOptions::from_str(&config.url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create tables and indexes
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    info!("Initializing database schema");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            personal_instructions TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_tokens (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            label TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            size INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            page_count INTEGER,
            data BLOB NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_type TEXT NOT NULL,
            content TEXT NOT NULL DEFAULT '',
            raw_content BLOB,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS form_requests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            fields_detected INTEGER,
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS form_request_progress (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL REFERENCES form_requests(id) ON DELETE CASCADE,
            stage TEXT NOT NULL,
            message TEXT NOT NULL,
            progress INTEGER,
            payload TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS form_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            request_id TEXT NOT NULL REFERENCES form_requests(id) ON DELETE CASCADE,
            action_type TEXT NOT NULL,
            selector TEXT NOT NULL,
            value TEXT,
            label TEXT,
            question TEXT,
            order_index INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for statement in [
        "CREATE INDEX IF NOT EXISTS idx_files_user ON files(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_file ON document_chunks(file_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_user ON document_chunks(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_requests_user ON form_requests(user_id)",
        "CREATE INDEX IF NOT EXISTS idx_requests_status ON form_requests(status)",
        "CREATE INDEX IF NOT EXISTS idx_progress_request ON form_request_progress(request_id)",
        "CREATE INDEX IF NOT EXISTS idx_actions_request ON form_actions(request_id)",
    ] {
        sqlx::query(statement).execute(pool).await?;
    }

    info!("Database schema ready");
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    };
    let pool = connect(&config).await.unwrap();
    init_schema(&pool).await.unwrap();
    pool
}
