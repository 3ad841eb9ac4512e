//! Document processing: split uploads into ordered text and image chunks

pub mod ocr;

use crate::config::DocumentConfig;
use crate::error::{DocumentError, Result};
use crate::store::chunks::{ChunkType, DocumentChunk};
use chrono::Utc;
use image::imageops::FilterType;
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use ocr::{NoopOcr, OcrEngine, TesseractOcr};

/// Result of processing one uploaded file
#[derive(Debug)]
pub struct ProcessedDocument {
    pub chunks: Vec<DocumentChunk>,
    pub page_count: Option<i64>,
}

/// Raw embedded image pulled out of a PDF page
struct ExtractedImage {
    page: usize,
    image_index: usize,
    bytes: Vec<u8>,
    original_format: String,
}

/// Splits PDFs and images into retrieval chunks
pub struct DocumentProcessor {
    config: DocumentConfig,
    ocr: Arc<dyn OcrEngine>,
}

impl DocumentProcessor {
    pub fn new(config: DocumentConfig, ocr: Arc<dyn OcrEngine>) -> Self {
        Self { config, ocr }
    }

    /// Process one file into chunks.
    ///
    /// Fails with `UnsupportedFormat` for content types outside the PDF and
    /// image whitelist; individual image or OCR failures inside a document
    /// are logged and skipped.
    pub async fn process(
        &self,
        file_id: &str,
        user_id: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<ProcessedDocument> {
        if content_type == "application/pdf" {
            self.process_pdf(file_id, user_id, data).await
        } else if content_type.starts_with("image/") {
            self.process_standalone_image(file_id, user_id, content_type, data)
                .await
        } else {
            Err(DocumentError::UnsupportedFormat(content_type.to_string()).into())
        }
    }

    /// Process a PDF: per-page text chunks followed by per-page embedded images
    async fn process_pdf(
        &self,
        file_id: &str,
        user_id: &str,
        data: Vec<u8>,
    ) -> Result<ProcessedDocument> {
        let (page_texts, images) = tokio::task::spawn_blocking(move || {
            let page_texts = pdf_extract::extract_text_from_mem_by_pages(&data)
                .map_err(|e| DocumentError::PdfParseFailed(e.to_string()))?;
            let images = extract_pdf_images(&data);
            Ok::<_, DocumentError>((page_texts, images))
        })
        .await
        .map_err(|e| DocumentError::PdfParseFailed(e.to_string()))??;

        let total_pages = page_texts.len();
        info!("Processing PDF {}: {} pages", file_id, total_pages);

        let mut chunks: Vec<DocumentChunk> = Vec::new();
        let mut chunk_index: i64 = 0;

        for (page_idx, text) in page_texts.iter().enumerate() {
            let page = page_idx + 1;

            if !text.trim().is_empty() {
                let pieces = chunk_text(text, self.config.chunk_size, self.config.chunk_overlap);
                for (chunk_in_page, piece) in pieces.into_iter().enumerate() {
                    chunks.push(DocumentChunk {
                        id: Uuid::new_v4().to_string(),
                        file_id: file_id.to_string(),
                        user_id: user_id.to_string(),
                        chunk_index,
                        chunk_type: ChunkType::Text,
                        content: piece,
                        raw_content: None,
                        metadata: json!({
                            "page": page,
                            "chunk_in_page": chunk_in_page,
                            "total_pages": total_pages,
                        }),
                        created_at: Utc::now(),
                    });
                    chunk_index += 1;
                }
            }

            for image in images.iter().filter(|i| i.page == page) {
                match self.image_chunk(file_id, user_id, chunk_index, image, total_pages).await {
                    Ok(chunk) => {
                        chunks.push(chunk);
                        chunk_index += 1;
                    }
                    Err(e) => {
                        warn!(
                            "Skipping image {} on page {} of {}: {}",
                            image.image_index, page, file_id, e
                        );
                    }
                }
            }
        }

        info!("PDF {} processed: {} chunks extracted", file_id, chunks.len());
        Ok(ProcessedDocument {
            chunks,
            page_count: Some(total_pages as i64),
        })
    }

    /// Process a standalone image into a single chunk at ordinal 0
    async fn process_standalone_image(
        &self,
        file_id: &str,
        user_id: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<ProcessedDocument> {
        let ocr_text = self.ocr_caption(&data).await;
        let resized = self.downscale(data).await?;

        let chunk = DocumentChunk {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            user_id: user_id.to_string(),
            chunk_index: 0,
            chunk_type: ChunkType::Image,
            content: ocr_text,
            raw_content: Some(resized),
            metadata: json!({
                "content_type": content_type,
                "is_standalone": true,
            }),
            created_at: Utc::now(),
        };

        info!("Image {} processed: 1 chunk extracted", file_id);
        Ok(ProcessedDocument {
            chunks: vec![chunk],
            page_count: None,
        })
    }

    async fn image_chunk(
        &self,
        file_id: &str,
        user_id: &str,
        chunk_index: i64,
        image: &ExtractedImage,
        total_pages: usize,
    ) -> Result<DocumentChunk> {
        let ocr_text = self.ocr_caption(&image.bytes).await;
        let resized = self.downscale(image.bytes.clone()).await?;

        Ok(DocumentChunk {
            id: Uuid::new_v4().to_string(),
            file_id: file_id.to_string(),
            user_id: user_id.to_string(),
            chunk_index,
            chunk_type: ChunkType::Image,
            content: ocr_text,
            raw_content: Some(resized),
            metadata: json!({
                "page": image.page,
                "image_index": image.image_index,
                "total_pages": total_pages,
                "original_format": image.original_format,
            }),
            created_at: Utc::now(),
        })
    }

    /// OCR an image, degrading to an empty caption on failure
    async fn ocr_caption(&self, bytes: &[u8]) -> String {
        match self.ocr.recognize(bytes).await {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR failed: {}", e);
                String::new()
            }
        }
    }

    /// Downscale to fit within the configured bounds and re-encode as PNG
    async fn downscale(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let max_dim = self.config.max_image_dim;

        tokio::task::spawn_blocking(move || {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| DocumentError::ImageDecodeFailed(e.to_string()))?;

            let img = if img.width() > max_dim || img.height() > max_dim {
                img.resize(max_dim, max_dim, FilterType::Lanczos3)
            } else {
                img
            };

            let mut out = Vec::new();
            img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
                .map_err(|e| DocumentError::ImageDecodeFailed(e.to_string()))?;
            Ok::<_, DocumentError>(out)
        })
        .await
        .map_err(|e| DocumentError::ImageDecodeFailed(e.to_string()))?
        .map_err(Into::into)
    }
}

/// Split text into overlapping chunks by approximate token count.
///
/// One token is approximated as three quarters of a word.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return vec![text.to_string()];
    }

    let words_per_chunk = ((chunk_size * 3) / 4).max(1);
    let words_overlap = (overlap * 3) / 4;
    let step = words_per_chunk.saturating_sub(words_overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < words.len() {
        let end = (start + words_per_chunk).min(words.len());
        chunks.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Walk every page's XObject resources and pull out image streams.
///
/// Failures on individual pages or objects are logged and skipped; a PDF
/// without extractable images simply yields none.
fn extract_pdf_images(data: &[u8]) -> Vec<ExtractedImage> {
    let doc = match lopdf::Document::load_mem(data) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Image extraction skipped, PDF load failed: {}", e);
            return Vec::new();
        }
    };

    let mut images = Vec::new();

    for (page_num, page_id) in doc.get_pages() {
        let mut image_index = 0usize;

        let xobjects = page_xobject_ids(&doc, page_id);
        for object_id in xobjects {
            let Ok(object) = doc.get_object(object_id) else {
                continue;
            };
            let Ok(stream) = object.as_stream() else {
                continue;
            };

            let is_image = matches!(
                stream.dict.get(b"Subtype"),
                Ok(lopdf::Object::Name(name)) if name.as_slice() == b"Image"
            );
            if !is_image {
                continue;
            }

            // DCTDecode streams are raw JPEG; anything else is handed to the
            // decoder as-is and skipped when it cannot be identified
            let filter_is_dct = matches!(
                stream.dict.get(b"Filter"),
                Ok(lopdf::Object::Name(name)) if name.as_slice() == b"DCTDecode"
            );

            let (bytes, original_format) = if filter_is_dct {
                (stream.content.clone(), "jpeg".to_string())
            } else {
                match stream.decompressed_content() {
                    Ok(content) => (content, "png".to_string()),
                    Err(_) => (stream.content.clone(), "raw".to_string()),
                }
            };

            if image::load_from_memory(&bytes).is_err() {
                debug!(
                    "Undecodable image stream on page {} (format {}), skipping",
                    page_num, original_format
                );
                continue;
            }

            images.push(ExtractedImage {
                page: page_num as usize,
                image_index,
                bytes,
                original_format,
            });
            image_index += 1;
        }
    }

    images
}

/// Resolve the XObject entries of one page's resource dictionary
fn page_xobject_ids(doc: &lopdf::Document, page_id: lopdf::ObjectId) -> Vec<lopdf::ObjectId> {
    let Ok(page) = doc.get_object(page_id).and_then(|o| o.as_dict()) else {
        return Vec::new();
    };

    let resources = match page.get(b"Resources") {
        Ok(lopdf::Object::Dictionary(dict)) => dict.clone(),
        Ok(lopdf::Object::Reference(id)) => {
            match doc.get_object(*id).and_then(|o| o.as_dict()) {
                Ok(dict) => dict.clone(),
                Err(_) => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    let xobjects = match resources.get(b"XObject") {
        Ok(lopdf::Object::Dictionary(dict)) => dict.clone(),
        Ok(lopdf::Object::Reference(id)) => {
            match doc.get_object(*id).and_then(|o| o.as_dict()) {
                Ok(dict) => dict.clone(),
                Err(_) => return Vec::new(),
            }
        }
        _ => return Vec::new(),
    };

    xobjects
        .iter()
        .filter_map(|(_, object)| object.as_reference().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> DocumentProcessor {
        DocumentProcessor::new(DocumentConfig::default(), Arc::new(NoopOcr))
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn test_chunk_text_short() {
        let chunks = chunk_text("just a few words", 1000, 200);
        assert_eq!(chunks, vec!["just a few words".to_string()]);
    }

    #[test]
    fn test_chunk_text_overlap() {
        // 40-token chunks are 30 words; 20-token overlap is 15 words
        let words: Vec<String> = (0..100).map(|i| format!("w{i}")).collect();
        let text = words.join(" ");
        let chunks = chunk_text(&text, 40, 20);

        assert!(chunks.len() > 1);
        // Each step advances by 15 words, so consecutive chunks share content
        let first: Vec<&str> = chunks[0].split_whitespace().collect();
        let second: Vec<&str> = chunks[1].split_whitespace().collect();
        assert_eq!(first.len(), 30);
        assert_eq!(second[0], "w15");

        // Every word is covered
        let last = chunks.last().unwrap();
        assert!(last.ends_with("w99"));
    }

    #[test]
    fn test_chunk_text_always_progresses() {
        // Overlap >= chunk size must not loop forever
        let text = (0..50).map(|i| format!("t{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&text, 10, 10);
        assert!(!chunks.is_empty());
        assert!(chunks.len() <= 50);
    }

    #[tokio::test]
    async fn test_unsupported_format() {
        let err = processor()
            .process("f1", "u1", "text/html", b"<html></html>".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Document(DocumentError::UnsupportedFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_standalone_image_chunk() {
        let data = png_bytes(64, 64);
        let result = processor()
            .process("f1", "u1", "image/png", data)
            .await
            .unwrap();

        assert_eq!(result.page_count, None);
        assert_eq!(result.chunks.len(), 1);
        let chunk = &result.chunks[0];
        assert_eq!(chunk.chunk_index, 0);
        assert_eq!(chunk.chunk_type, ChunkType::Image);
        assert!(chunk.raw_content.is_some());
        assert_eq!(chunk.metadata["is_standalone"], true);
    }

    #[tokio::test]
    async fn test_downscale_bounds() {
        let data = png_bytes(2048, 512);
        let result = processor()
            .process("f1", "u1", "image/png", data)
            .await
            .unwrap();

        let resized = result.chunks[0].raw_content.as_ref().unwrap();
        let img = image::load_from_memory(resized).unwrap();
        assert!(img.width() <= 1024 && img.height() <= 1024);
        // Aspect ratio preserved: 4:1 stays 4:1
        assert_eq!(img.width(), 1024);
        assert_eq!(img.height(), 256);
    }

    #[tokio::test]
    async fn test_small_image_not_upscaled() {
        let data = png_bytes(32, 16);
        let result = processor()
            .process("f1", "u1", "image/png", data)
            .await
            .unwrap();

        let resized = result.chunks[0].raw_content.as_ref().unwrap();
        let img = image::load_from_memory(resized).unwrap();
        assert_eq!((img.width(), img.height()), (32, 16));
    }
}
