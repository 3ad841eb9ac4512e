//! Dual embedding index: a text collection and an image collection
//! addressed by the same chunk id space

pub mod chroma;
pub mod embedding;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::store::chunks::{ChunkType, DocumentChunk};
use async_trait::async_trait;
use chroma::{where_filter, ChromaClient, CollectionHandle, VectorRecord};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub use embedding::{GeminiTextEmbedder, ImageEmbedder, MultimodalEmbedder, TextEmbedder};

/// Embedded text used when an image chunk has no OCR caption
const EMPTY_CAPTION_PLACEHOLDER: &str = "[Image content]";

/// One similarity hit from either collection
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub similarity: f32,
    pub document: String,
    pub metadata: Value,
}

/// Read side of the text collection
#[async_trait]
pub trait TextSearch: Send + Sync {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        file_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>>;
}

/// Read side of the image collection
#[async_trait]
pub trait ImageSearch: Send + Sync {
    async fn search_images(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        file_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>>;
}

/// Coerce chunk metadata into the flat scalar map the store accepts.
///
/// Scalars pass through, scalar lists are filtered in place, nulls are
/// dropped, and anything else is stringified.
fn coerce_metadata(chunk: &DocumentChunk) -> Value {
    let mut out = Map::new();
    out.insert("user_id".to_string(), json!(chunk.user_id));
    out.insert("file_id".to_string(), json!(chunk.file_id));
    out.insert("chunk_id".to_string(), json!(chunk.id));
    out.insert("chunk_type".to_string(), json!(chunk.chunk_type.as_str()));

    if let Value::Object(map) = &chunk.metadata {
        for (key, value) in map {
            match value {
                Value::Null => {}
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    out.insert(key.clone(), value.clone());
                }
                Value::Array(items) => {
                    let scalars: Vec<Value> = items
                        .iter()
                        .filter(|v| {
                            matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
                        })
                        .cloned()
                        .collect();
                    if !scalars.is_empty() {
                        out.insert(key.clone(), Value::Array(scalars));
                    }
                }
                other => {
                    out.insert(key.clone(), json!(other.to_string()));
                }
            }
        }
    }

    Value::Object(out)
}

/// The text collection: one vector per chunk, embedding chunk text or the
/// OCR caption for image chunks
pub struct TextIndex {
    chroma: ChromaClient,
    collection: CollectionHandle,
    embedder: Arc<dyn TextEmbedder>,
}

impl TextIndex {
    pub async fn new(
        config: &IndexConfig,
        embedder: Arc<dyn TextEmbedder>,
    ) -> Result<Self> {
        let chroma = ChromaClient::new(config)?;
        let collection = chroma.get_or_create_collection(&config.text_collection).await?;
        info!("Text collection '{}' ready", collection.name);

        Ok(Self {
            chroma,
            collection,
            embedder,
        })
    }

    /// Embed and add chunks; image chunks contribute their OCR caption
    pub async fn add_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let mut records = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let text = match chunk.chunk_type {
                ChunkType::Text => chunk.content.as_str(),
                ChunkType::Image => {
                    if chunk.content.trim().is_empty() {
                        warn!("Image chunk {} has no OCR caption, using generic marker", chunk.id);
                        EMPTY_CAPTION_PLACEHOLDER
                    } else {
                        chunk.content.as_str()
                    }
                }
            };

            let embedding = self.embedder.embed(text).await?;
            records.push(VectorRecord {
                id: chunk.id.clone(),
                embedding,
                document: chunk.content.clone(),
                metadata: coerce_metadata(chunk),
            });
        }

        self.chroma.add(&self.collection, records).await
    }

    pub async fn delete_by_file(&self, file_id: &str) -> Result<()> {
        self.chroma
            .delete(&self.collection, json!({"file_id": file_id}))
            .await
    }
}

#[async_trait]
impl TextSearch for TextIndex {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        file_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let embedding = self.embedder.embed(query).await?;
        let filter = where_filter(user_id, file_ids, None);

        let hits = self
            .chroma
            .query(&self.collection, embedding, top_k, filter)
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                chunk_id: hit.id,
                similarity: 1.0 - hit.distance,
                document: hit.document,
                metadata: hit.metadata,
            })
            .collect())
    }
}

/// The image collection: one vector per image chunk from a multimodal
/// embedding of the raw bytes.
///
/// The embedder is optional; without one the collection silently accepts
/// zero adds and returns zero results.
pub struct ImageIndex {
    chroma: ChromaClient,
    collection: CollectionHandle,
    embedder: Option<Arc<dyn ImageEmbedder>>,
}

impl ImageIndex {
    pub async fn new(
        config: &IndexConfig,
        embedder: Option<Arc<dyn ImageEmbedder>>,
    ) -> Result<Self> {
        let chroma = ChromaClient::new(config)?;
        let collection = chroma
            .get_or_create_collection(&config.image_collection)
            .await?;
        if embedder.is_none() {
            warn!("Image embedder not configured, image collection is disabled");
        }
        info!("Image collection '{}' ready", collection.name);

        Ok(Self {
            chroma,
            collection,
            embedder,
        })
    }

    /// Embed and add image chunks only; non-image chunks are ignored
    pub async fn add_image_chunks(&self, chunks: &[DocumentChunk]) -> Result<usize> {
        let Some(embedder) = &self.embedder else {
            return Ok(0);
        };

        let mut records = Vec::new();

        for chunk in chunks {
            if chunk.chunk_type != ChunkType::Image {
                continue;
            }
            let Some(raw) = &chunk.raw_content else {
                warn!("Image chunk {} has no raw content, skipping", chunk.id);
                continue;
            };

            match embedder.embed_image(raw).await {
                Ok(embedding) => records.push(VectorRecord {
                    id: chunk.id.clone(),
                    embedding,
                    document: chunk.content.clone(),
                    metadata: coerce_metadata(chunk),
                }),
                Err(e) => warn!("Failed to embed image chunk {}: {}", chunk.id, e),
            }
        }

        self.chroma.add(&self.collection, records).await
    }

    pub async fn delete_by_file(&self, file_id: &str) -> Result<()> {
        self.chroma
            .delete(&self.collection, json!({"file_id": file_id}))
            .await
    }
}

#[async_trait]
impl ImageSearch for ImageIndex {
    async fn search_images(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        file_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let Some(embedder) = &self.embedder else {
            return Ok(Vec::new());
        };

        let embedding = embedder.embed_text(query).await?;
        let filter = where_filter(user_id, file_ids, Some("image"));

        let hits = self
            .chroma
            .query(&self.collection, embedding, top_k, filter)
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| SearchHit {
                chunk_id: hit.id,
                similarity: 1.0 - hit.distance,
                document: hit.document,
                metadata: hit.metadata,
            })
            .collect())
    }
}
