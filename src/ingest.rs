//! Background file ingestion: process, store, and index uploads

use crate::documents::DocumentProcessor;
use crate::error::{DocumentError, Error, Result};
use crate::index::{ImageIndex, TextIndex};
use crate::store::chunks::ChunkStore;
use crate::store::files::{FileStatus, FileStore};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Drives one file from upload to indexed chunks
pub struct IngestionService {
    files: FileStore,
    chunks: ChunkStore,
    processor: Arc<DocumentProcessor>,
    text_index: Arc<TextIndex>,
    image_index: Arc<ImageIndex>,
}

impl IngestionService {
    pub fn new(
        files: FileStore,
        chunks: ChunkStore,
        processor: Arc<DocumentProcessor>,
        text_index: Arc<TextIndex>,
        image_index: Arc<ImageIndex>,
    ) -> Self {
        Self {
            files,
            chunks,
            processor,
            text_index,
            image_index,
        }
    }

    /// Process and index one uploaded file.
    ///
    /// Unsupported content types mark the file completed and skip indexing;
    /// real failures mark it failed. In-flight form requests are unaffected
    /// either way.
    pub async fn process_file(&self, file_id: &str, user_id: &str) -> bool {
        match self.process_file_inner(file_id, user_id).await {
            Ok(indexed) => indexed,
            Err(e) => {
                error!("Ingestion failed for file {}: {}", file_id, e);
                if let Err(e) = self.files.update_status(file_id, FileStatus::Failed).await {
                    error!("Could not mark file {} failed: {}", file_id, e);
                }
                false
            }
        }
    }

    async fn process_file_inner(&self, file_id: &str, user_id: &str) -> Result<bool> {
        info!("Starting ingestion for file {}", file_id);

        let Some(file) = self.files.get(file_id).await? else {
            return Err(Error::NotFound(format!("file {file_id}")));
        };

        self.files.update_status(file_id, FileStatus::Processing).await?;

        let processed = match self
            .processor
            .process(file_id, user_id, &file.content_type, file.data)
            .await
        {
            Ok(processed) => processed,
            Err(Error::Document(DocumentError::UnsupportedFormat(content_type))) => {
                warn!(
                    "Unsupported content type {} for file {}, skipping indexing",
                    content_type, file_id
                );
                self.files.update_status(file_id, FileStatus::Completed).await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        self.chunks.insert_batch(&processed.chunks).await?;

        let text_added = self.text_index.add_chunks(&processed.chunks).await?;
        let images_added = self.image_index.add_image_chunks(&processed.chunks).await?;

        if let Some(page_count) = processed.page_count {
            self.files.update_page_count(file_id, page_count).await?;
        }
        self.files.update_status(file_id, FileStatus::Completed).await?;

        info!(
            "File {} ingested: {} chunks in text collection, {} in image collection",
            file_id, text_added, images_added
        );
        Ok(true)
    }

    /// Delete a file with all its chunks and vectors.
    ///
    /// The chunk rows cascade with the file row; both collections are
    /// purged explicitly.
    pub async fn delete_file(&self, file_id: &str, user_id: &str) -> Result<bool> {
        if let Err(e) = self.text_index.delete_by_file(file_id).await {
            warn!("Text collection cleanup failed for file {}: {}", file_id, e);
        }
        if let Err(e) = self.image_index.delete_by_file(file_id).await {
            warn!("Image collection cleanup failed for file {}: {}", file_id, e);
        }

        let deleted = self.files.delete(file_id, user_id).await?;
        if deleted {
            info!("Deleted file {} with chunks and vectors", file_id);
        }
        Ok(deleted)
    }
}
