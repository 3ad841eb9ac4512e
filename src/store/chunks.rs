//! Chunk store: durable metadata and raw bytes for every document chunk

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{sqlite::SqlitePool, Row};
use tracing::{debug, warn};

/// Kind of content a chunk carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Text,
    Image,
}

impl ChunkType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Image => "image",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(ChunkType::Text),
            "image" => Some(ChunkType::Image),
            _ => None,
        }
    }
}

/// Unit of retrieval produced by the document processor
///
/// The id doubles as the identifier in the text index and, for image
/// chunks, in the image index.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: String,
    pub file_id: String,
    pub user_id: String,
    pub chunk_index: i64,
    pub chunk_type: ChunkType,
    pub content: String,
    pub raw_content: Option<Vec<u8>>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// SQLite-backed chunk store
#[derive(Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Batch insert chunks
    pub async fn insert_batch(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (id, file_id, user_id, chunk_index, chunk_type, content, raw_content, metadata, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.file_id)
            .bind(&chunk.user_id)
            .bind(chunk.chunk_index)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.content)
            .bind(chunk.raw_content.as_deref())
            .bind(chunk.metadata.to_string())
            .bind(chunk.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }

        debug!("Stored {} chunks", chunks.len());
        Ok(chunks.len())
    }

    /// Fetch chunks by id set.
    ///
    /// May legitimately return fewer rows than ids requested, e.g. after a
    /// concurrent file deletion; the drift is logged, not an error.
    pub async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<DocumentChunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query_str =
            format!("SELECT * FROM document_chunks WHERE id IN ({placeholders})");

        let mut query = sqlx::query(&query_str);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let chunks: Vec<DocumentChunk> = rows.iter().map(Self::row_to_chunk).collect::<Result<_>>()?;

        if chunks.len() < ids.len() {
            warn!(
                "Chunk lookup returned {} rows for {} ids; possible integrity drift",
                chunks.len(),
                ids.len()
            );
        }

        Ok(chunks)
    }

    /// All chunks of one file, ordered by chunk_index
    pub async fn get_by_file(&self, file_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            "SELECT * FROM document_chunks WHERE file_id = ?1 ORDER BY chunk_index",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_chunk).collect()
    }

    /// Delete every chunk of a file; returns the number removed
    pub async fn delete_by_file(&self, file_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM document_chunks WHERE file_id = ?1")
            .bind(file_id)
            .execute(&self.pool)
            .await?;

        debug!("Deleted {} chunks for file {}", result.rows_affected(), file_id);
        Ok(result.rows_affected())
    }

    fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Result<DocumentChunk> {
        let chunk_type_str: String = row.get("chunk_type");
        let metadata_json: String = row.get("metadata");
        let created_at: String = row.get("created_at");

        Ok(DocumentChunk {
            id: row.get("id"),
            file_id: row.get("file_id"),
            user_id: row.get("user_id"),
            chunk_index: row.get("chunk_index"),
            chunk_type: ChunkType::parse(&chunk_type_str).unwrap_or(ChunkType::Text),
            content: row.get("content"),
            raw_content: row.get("raw_content"),
            metadata: serde_json::from_str(&metadata_json).unwrap_or(Value::Null),
            created_at: DateTime::parse_from_rfc3339(&created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        })
    }
}
