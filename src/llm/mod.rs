//! Language model integration over the generative REST API

pub mod json_repair;
pub mod runner;

use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error};

pub use runner::{AgentRunner, RunnerOptions, StructuredOutput};

/// One part of a prompt, preserved in the order given
#[derive(Debug, Clone)]
pub enum PromptPart {
    /// Plain text
    Text(String),
    /// Inline image bytes with a MIME type
    InlineImage { mime_type: String, data: Vec<u8> },
    /// Inline PDF bytes
    InlinePdf(Vec<u8>),
}

impl PromptPart {
    pub fn text(content: impl Into<String>) -> Self {
        PromptPart::Text(content.into())
    }

    pub fn png(data: Vec<u8>) -> Self {
        PromptPart::InlineImage {
            mime_type: "image/png".to_string(),
            data,
        }
    }
}

/// Response from text generation
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// The model signalled it cannot complete the request
#[derive(Debug, Clone)]
pub struct Escalation {
    pub reason: String,
}

/// Outcome of a single model invocation, before any retry policy
#[derive(Debug, Clone)]
pub enum ModelOutcome {
    /// A final text response arrived
    Final(GenerationResponse),
    /// The model escalated instead of answering
    Escalated(Escalation),
    /// No final response was produced
    Empty,
}

/// Trait for language model operations
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run one generation call against the named model
    async fn generate(
        &self,
        model: &str,
        system_instruction: &str,
        parts: &[PromptPart],
    ) -> Result<ModelOutcome>;
}

/// Client for the generative REST API
pub struct GeminiClient {
    client: reqwest::Client,
    config: LlmConfig,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    system_instruction: WireContent,
    contents: Vec<WireContent>,
}

#[derive(Debug, Serialize)]
struct WireContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WirePart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: WireInlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WireResponsePart>,
}

#[derive(Debug, Deserialize)]
struct WireResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiClient {
    /// Create a new client
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{}?key={}",
            self.config.api_base.trim_end_matches('/'),
            model,
            method,
            self.config.api_key,
        )
    }

    fn encode_parts(parts: &[PromptPart]) -> Vec<WirePart> {
        let b64 = base64::engine::general_purpose::STANDARD;
        parts
            .iter()
            .map(|part| match part {
                PromptPart::Text(text) => WirePart::Text { text: text.clone() },
                PromptPart::InlineImage { mime_type, data } => WirePart::InlineData {
                    inline_data: WireInlineData {
                        mime_type: mime_type.clone(),
                        data: b64.encode(data),
                    },
                },
                PromptPart::InlinePdf(data) => WirePart::InlineData {
                    inline_data: WireInlineData {
                        mime_type: "application/pdf".to_string(),
                        data: b64.encode(data),
                    },
                },
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        system_instruction: &str,
        parts: &[PromptPart],
    ) -> Result<ModelOutcome> {
        debug!("Generating with model {} ({} parts)", model, parts.len());

        let request = GenerateContentRequest {
            system_instruction: WireContent {
                role: None,
                parts: vec![WirePart::Text {
                    text: system_instruction.to_string(),
                }],
            },
            contents: vec![WireContent {
                role: Some("user".to_string()),
                parts: Self::encode_parts(parts),
            }],
        };

        let url = self.api_url(model, "generateContent");

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.client.post(&url).json(&request).send(),
        )
        .await
        .map_err(|_| LlmError::Timeout)?
        .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("Generation API error: {}", error_text);
            return Err(LlmError::GenerationFailed(error_text).into());
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let Some(candidate) = body.candidates.into_iter().next() else {
            return Ok(ModelOutcome::Empty);
        };

        let text: String = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            // A candidate without text is either a refusal or a truncation
            let reason = candidate
                .finish_reason
                .unwrap_or_else(|| "no content".to_string());
            if reason == "STOP" {
                return Ok(ModelOutcome::Empty);
            }
            return Ok(ModelOutcome::Escalated(Escalation { reason }));
        }

        Ok(ModelOutcome::Final(GenerationResponse {
            text,
            model: model.to_string(),
            finish_reason: candidate.finish_reason,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url() {
        let mut config = LlmConfig::default();
        config.api_key = "k".to_string();
        let client = GeminiClient::new(config).unwrap();
        assert_eq!(
            client.api_url("gemini-2.5-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent?key=k"
        );
    }

    #[test]
    fn test_encode_parts_order_preserved() {
        let parts = vec![
            PromptPart::text("before"),
            PromptPart::png(vec![1, 2, 3]),
            PromptPart::text("after"),
        ];
        let wire = GeminiClient::encode_parts(&parts);
        assert_eq!(wire.len(), 3);
        assert!(matches!(wire[0], WirePart::Text { .. }));
        assert!(matches!(wire[1], WirePart::InlineData { .. }));
        assert!(matches!(wire[2], WirePart::Text { .. }));
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"hello"}]},"finishReason":"STOP"}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.candidates.len(), 1);
        assert_eq!(
            parsed.candidates[0].content.as_ref().unwrap().parts[0]
                .text
                .as_deref(),
            Some("hello")
        );
    }
}
