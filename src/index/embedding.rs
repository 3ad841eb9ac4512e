//! Embedding providers for the two collections

use crate::config::EmbeddingConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

/// Embeds text into the text collection's vector space
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Expected vector dimension
    fn dimensions(&self) -> usize;
}

/// Embeds images, and text queries into the same visual space
#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed_image(&self, image_bytes: &[u8]) -> Result<Vec<f32>>;

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Text embedder backed by the generative API's embedContent endpoint
pub struct GeminiTextEmbedder {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest {
    content: EmbedContent,
    task_type: String,
    output_dimensionality: usize,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

impl GeminiTextEmbedder {
    pub fn new(api_base: &str, api_key: &str, config: &EmbeddingConfig, timeout: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: config.text_model.clone(),
            dimensions: config.text_dimensions,
        })
    }
}

#[async_trait]
impl TextEmbedder for GeminiTextEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Embedding text of length {}", text.len());

        let request = EmbedContentRequest {
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: self.dimensions,
        };

        let url = format!(
            "{}/v1beta/models/{}:embedContent?key={}",
            self.api_base, self.model, self.api_key
        );

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Text embedding API error: {}", text);
            return Err(LlmError::EmbeddingFailed(text).into());
        }

        let body: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(body.embedding.values)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Multimodal embedder backed by a prediction endpoint that accepts image
/// bytes or contextual text and answers in one shared vector space
pub struct MultimodalEmbedder {
    client: reqwest::Client,
    endpoint: String,
    dimensions: usize,
}

#[derive(Debug, Serialize)]
struct PredictRequest {
    instances: Vec<PredictInstance>,
    parameters: PredictParameters,
}

#[derive(Debug, Serialize)]
struct PredictInstance {
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<PredictImage>,
    #[serde(rename = "text", skip_serializing_if = "Option::is_none")]
    contextual_text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictImage {
    bytes_base64_encoded: String,
}

#[derive(Debug, Serialize)]
struct PredictParameters {
    dimension: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    #[serde(default)]
    image_embedding: Option<Vec<f32>>,
    #[serde(default)]
    text_embedding: Option<Vec<f32>>,
}

impl MultimodalEmbedder {
    pub fn new(endpoint: &str, dimensions: usize, timeout: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            dimensions,
        })
    }

    async fn predict(&self, instance: PredictInstance) -> Result<Prediction> {
        let request = PredictRequest {
            instances: vec![instance],
            parameters: PredictParameters {
                dimension: self.dimensions,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("Multimodal embedding API error: {}", text);
            return Err(LlmError::EmbeddingFailed(text).into());
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        body.predictions
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("empty predictions".to_string()).into())
    }
}

#[async_trait]
impl ImageEmbedder for MultimodalEmbedder {
    async fn embed_image(&self, image_bytes: &[u8]) -> Result<Vec<f32>> {
        let b64 = base64::engine::general_purpose::STANDARD;
        let prediction = self
            .predict(PredictInstance {
                image: Some(PredictImage {
                    bytes_base64_encoded: b64.encode(image_bytes),
                }),
                contextual_text: None,
            })
            .await?;

        prediction
            .image_embedding
            .ok_or_else(|| LlmError::InvalidResponse("missing image embedding".to_string()).into())
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let prediction = self
            .predict(PredictInstance {
                image: None,
                contextual_text: Some(text.to_string()),
            })
            .await?;

        prediction
            .text_embedding
            .ok_or_else(|| LlmError::InvalidResponse("missing text embedding".to_string()).into())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_request_shape() {
        let request = EmbedContentRequest {
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: "query".to_string(),
                }],
            },
            task_type: "RETRIEVAL_DOCUMENT".to_string(),
            output_dimensionality: 3072,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["taskType"], "RETRIEVAL_DOCUMENT");
        assert_eq!(value["outputDimensionality"], 3072);
        assert_eq!(value["content"]["parts"][0]["text"], "query");
    }

    #[test]
    fn test_predict_response_parsing() {
        let raw = r#"{"predictions": [{"imageEmbedding": [0.1, 0.2], "textEmbedding": null}]}"#;
        let parsed: PredictResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.predictions[0].image_embedding.as_ref().unwrap().len(), 2);
        assert!(parsed.predictions[0].text_embedding.is_none());
    }
}
