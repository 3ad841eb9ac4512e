//! Dual retrieval: joint text and image search merged by chunk id

use crate::error::Result;
use crate::index::{ImageSearch, TextSearch};
use crate::store::chunks::{ChunkStore, ChunkType};
use crate::store::files::FileStore;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// One retrieved text excerpt
#[derive(Debug, Clone, Serialize)]
pub struct TextContext {
    pub content: String,
    pub source: String,
    pub file_id: String,
    pub similarity: f32,
}

/// One retrieved image with its OCR caption
#[derive(Debug, Clone)]
pub struct ImageContext {
    pub image_bytes: Vec<u8>,
    pub ocr_text: String,
    pub source: String,
    pub file_id: String,
    pub similarity: f32,
    /// Whether the visual search surfaced this chunk
    pub visual_match: bool,
}

/// Ranked context for one query
#[derive(Debug, Default)]
pub struct RetrievedContext {
    pub text_chunks: Vec<TextContext>,
    pub image_chunks: Vec<ImageContext>,
}

/// Retrieval over the two collections and the chunk store
pub struct RetrievalService {
    text_index: Arc<dyn TextSearch>,
    image_index: Arc<dyn ImageSearch>,
    chunks: ChunkStore,
    files: FileStore,
}

impl RetrievalService {
    pub fn new(
        text_index: Arc<dyn TextSearch>,
        image_index: Arc<dyn ImageSearch>,
        chunks: ChunkStore,
        files: FileStore,
    ) -> Self {
        Self {
            text_index,
            image_index,
            chunks,
            files,
        }
    }

    /// Retrieve ranked text and image context for a query.
    ///
    /// Any search or embedding failure degrades to empty result lists;
    /// retrieval never fails the caller.
    pub async fn retrieve(&self, query: &str, user_id: &str, top_k: usize) -> RetrievedContext {
        match self.retrieve_inner(query, user_id, top_k).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Context retrieval failed, continuing without context: {}", e);
                RetrievedContext::default()
            }
        }
    }

    async fn retrieve_inner(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> Result<RetrievedContext> {
        let text_hits = self.text_index.search(query, user_id, top_k, None).await?;

        // Fewer images: visual embeddings are expensive and less often decisive
        let image_top_k = std::cmp::max(5, top_k / 2);
        let image_hits = self
            .image_index
            .search_images(query, user_id, image_top_k, None)
            .await?;

        let text_similarity: HashMap<String, f32> = text_hits
            .iter()
            .map(|h| (h.chunk_id.clone(), h.similarity))
            .collect();
        let image_similarity: HashMap<String, f32> = image_hits
            .iter()
            .map(|h| (h.chunk_id.clone(), h.similarity))
            .collect();

        let mut ids: Vec<String> = Vec::new();
        for hit in text_hits.iter().chain(image_hits.iter()) {
            if !ids.contains(&hit.chunk_id) {
                ids.push(hit.chunk_id.clone());
            }
        }

        debug!(
            "Collected {} unique chunk ids (text: {}, image: {})",
            ids.len(),
            text_similarity.len(),
            image_similarity.len()
        );

        let rows = self.chunks.get_by_ids(&ids).await?;

        let mut filename_cache: HashMap<String, String> = HashMap::new();
        let mut context = RetrievedContext::default();

        for chunk in rows {
            let filename = match filename_cache.get(&chunk.file_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self
                        .files
                        .get_filename(&chunk.file_id)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| format!("file:{}", chunk.file_id));
                    filename_cache.insert(chunk.file_id.clone(), name.clone());
                    name
                }
            };

            let page = chunk
                .metadata
                .get("page")
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string());
            let source = format!("{filename} (page {page})");

            let text_sim = text_similarity.get(&chunk.id).copied().unwrap_or(0.0);
            let image_sim = image_similarity.get(&chunk.id).copied().unwrap_or(0.0);
            let similarity = text_sim.max(image_sim);

            match chunk.chunk_type {
                ChunkType::Text => context.text_chunks.push(TextContext {
                    content: chunk.content,
                    source,
                    file_id: chunk.file_id,
                    similarity,
                }),
                ChunkType::Image => context.image_chunks.push(ImageContext {
                    image_bytes: chunk.raw_content.unwrap_or_default(),
                    ocr_text: chunk.content,
                    source,
                    file_id: chunk.file_id,
                    similarity,
                    visual_match: image_sim > 0.0,
                }),
            }
        }

        context
            .text_chunks
            .sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        context
            .image_chunks
            .sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        debug!(
            "Retrieved {} text chunks and {} image chunks",
            context.text_chunks.len(),
            context.image_chunks.len()
        );

        Ok(context)
    }
}
