//! File store: user-owned uploads and their processing status

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePool, Row};
use tracing::debug;
use uuid::Uuid;

/// Processing status of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FileStatus::Pending),
            "processing" => Some(FileStatus::Processing),
            "completed" => Some(FileStatus::Completed),
            "failed" => Some(FileStatus::Failed),
            _ => None,
        }
    }
}

/// An uploaded file row
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: String,
    pub user_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub status: FileStatus,
    pub page_count: Option<i64>,
    pub data: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Lightweight file metadata without the blob
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub status: FileStatus,
    pub page_count: Option<i64>,
}

/// SQLite-backed file store
#[derive(Clone)]
pub struct FileStore {
    pool: SqlitePool,
}

impl FileStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new upload with status pending; returns the file id
    pub async fn create(
        &self,
        user_id: &str,
        filename: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO files (id, user_id, filename, content_type, size, status, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)
            "#,
        )
        .bind(&id)
        .bind(user_id)
        .bind(filename)
        .bind(content_type)
        .bind(data.len() as i64)
        .bind(&data)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!("Stored file {} ({} bytes)", id, data.len());
        Ok(id)
    }

    pub async fn get(&self, file_id: &str) -> Result<Option<StoredFile>> {
        let row = sqlx::query("SELECT * FROM files WHERE id = ?1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Self::row_to_file(&row)))
    }

    /// Filename lookup for retrieval source labels
    pub async fn get_filename(&self, file_id: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT filename FROM files WHERE id = ?1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get("filename")))
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<FileInfo>> {
        let rows = sqlx::query(
            "SELECT id, filename, content_type, size, status, page_count
             FROM files WHERE user_id = ?1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let status: String = row.get("status");
                FileInfo {
                    id: row.get("id"),
                    filename: row.get("filename"),
                    content_type: row.get("content_type"),
                    size: row.get("size"),
                    status: FileStatus::parse(&status).unwrap_or(FileStatus::Failed),
                    page_count: row.get("page_count"),
                }
            })
            .collect())
    }

    pub async fn update_status(&self, file_id: &str, status: FileStatus) -> Result<()> {
        sqlx::query("UPDATE files SET status = ?1 WHERE id = ?2")
            .bind(status.as_str())
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_page_count(&self, file_id: &str, page_count: i64) -> Result<()> {
        sqlx::query("UPDATE files SET page_count = ?1 WHERE id = ?2")
            .bind(page_count)
            .bind(file_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete a file owned by the user; chunks cascade.
    /// Returns false when the file does not exist or is not owned.
    pub async fn delete(&self, file_id: &str, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?1 AND user_id = ?2")
            .bind(file_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    fn row_to_file(row: &sqlx::sqlite::SqliteRow) -> StoredFile {
        let status: String = row.get("status");
        let created_at: String = row.get("created_at");

        StoredFile {
            id: row.get("id"),
            user_id: row.get("user_id"),
            filename: row.get("filename"),
            content_type: row.get("content_type"),
            size: row.get("size"),
            status: FileStatus::parse(&status).unwrap_or(FileStatus::Failed),
            page_count: row.get("page_count"),
            data: row.get("data"),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_pool;

    #[tokio::test]
    async fn test_file_lifecycle() {
        let store = FileStore::new(test_pool().await);

        let id = store
            .create("u1", "resume.pdf", "application/pdf", vec![1, 2, 3, 4])
            .await
            .unwrap();

        let file = store.get(&id).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Pending);
        assert_eq!(file.size, 4);
        assert_eq!(file.data, vec![1, 2, 3, 4]);

        store.update_status(&id, FileStatus::Processing).await.unwrap();
        store.update_page_count(&id, 7).await.unwrap();
        store.update_status(&id, FileStatus::Completed).await.unwrap();

        let file = store.get(&id).await.unwrap().unwrap();
        assert_eq!(file.status, FileStatus::Completed);
        assert_eq!(file.page_count, Some(7));

        assert_eq!(store.get_filename(&id).await.unwrap().unwrap(), "resume.pdf");
    }

    #[tokio::test]
    async fn test_delete_requires_ownership() {
        let store = FileStore::new(test_pool().await);

        let id = store
            .create("u1", "a.png", "image/png", vec![0])
            .await
            .unwrap();

        assert!(!store.delete(&id, "someone-else").await.unwrap());
        assert!(store.delete(&id, "u1").await.unwrap());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_for_user() {
        let store = FileStore::new(test_pool().await);

        store.create("u1", "a.pdf", "application/pdf", vec![0]).await.unwrap();
        store.create("u1", "b.png", "image/png", vec![0]).await.unwrap();
        store.create("u2", "c.png", "image/png", vec![0]).await.unwrap();

        let files = store.list_for_user("u1").await.unwrap();
        assert_eq!(files.len(), 2);
    }
}
