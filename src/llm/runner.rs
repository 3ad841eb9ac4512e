//! Agent runner: one model call behind a uniform retry and repair contract

use super::json_repair::parse_tolerant;
use super::{LlmClient, ModelOutcome, PromptPart};
use crate::error::{LlmError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy for a runner invocation
#[derive(Debug, Clone, Copy)]
pub struct RunnerOptions {
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// Result of a structured run
///
/// `Typed` carries the schema-validated object; `Raw` is the fallback when
/// the response parsed as JSON but did not match the schema.
#[derive(Debug, Clone)]
pub enum StructuredOutput<T> {
    Typed(T),
    Raw(Value),
}

impl<T> StructuredOutput<T> {
    /// The raw value regardless of validation outcome
    pub fn into_value(self) -> Value
    where
        T: serde::Serialize,
    {
        match self {
            StructuredOutput::Typed(t) => serde_json::to_value(t).unwrap_or(Value::Null),
            StructuredOutput::Raw(v) => v,
        }
    }
}

/// Wraps one model behind structured and unstructured run contracts
pub struct AgentRunner {
    llm: Arc<dyn LlmClient>,
    model: String,
    system_prompt: String,
    last_raw_response: Mutex<Option<String>>,
}

impl AgentRunner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
            system_prompt: system_prompt.into(),
            last_raw_response: Mutex::new(None),
        }
    }

    /// The model this runner invokes
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Last raw response text, retained for diagnostic logging
    pub fn last_raw_response(&self) -> Option<String> {
        self.last_raw_response.lock().ok().and_then(|g| g.clone())
    }

    fn record_raw(&self, text: &str) {
        if let Ok(mut guard) = self.last_raw_response.lock() {
            *guard = Some(text.to_string());
        }
    }

    /// Run the model and return raw response text
    pub async fn run_text(&self, parts: &[PromptPart], options: RunnerOptions) -> Result<String> {
        let mut last_error = String::new();

        for attempt in 0..=options.max_retries {
            match self.invoke(parts).await {
                Ok(text) => return Ok(text),
                Err(e) => {
                    last_error = e;
                    if attempt < options.max_retries {
                        warn!(
                            "Attempt {} failed, retrying in {:?}: {}",
                            attempt + 1,
                            options.retry_delay,
                            last_error
                        );
                        tokio::time::sleep(options.retry_delay).await;
                    }
                }
            }
        }

        Err(LlmError::RetriesExhausted(last_error).into())
    }

    /// Run the model and parse structured JSON output
    ///
    /// Fence stripping, control-character escaping, and JSON repair are
    /// applied before parsing. When the parsed JSON does not match `T`,
    /// the raw value is returned instead of failing the attempt; only an
    /// unparseable response counts as a failed attempt.
    pub async fn run_structured<T: DeserializeOwned>(
        &self,
        parts: &[PromptPart],
        options: RunnerOptions,
    ) -> Result<StructuredOutput<T>> {
        let mut last_error = String::new();

        for attempt in 0..=options.max_retries {
            match self.invoke(parts).await {
                Ok(text) => match parse_tolerant(&text) {
                    Some(value) => {
                        return Ok(match serde_json::from_value::<T>(value.clone()) {
                            Ok(typed) => StructuredOutput::Typed(typed),
                            Err(e) => {
                                warn!("Schema validation failed, falling back to raw JSON: {}", e);
                                StructuredOutput::Raw(value)
                            }
                        });
                    }
                    None => {
                        last_error = "Error parsing JSON response".to_string();
                        debug!(
                            "Unparseable response on attempt {} ({} chars)",
                            attempt + 1,
                            text.len()
                        );
                    }
                },
                Err(e) => last_error = e,
            }

            if attempt < options.max_retries {
                warn!(
                    "Attempt {} failed, retrying in {:?}: {}",
                    attempt + 1,
                    options.retry_delay,
                    last_error
                );
                tokio::time::sleep(options.retry_delay).await;
            }
        }

        Err(LlmError::RetriesExhausted(last_error).into())
    }

    /// One invocation: classify the outcome into text or a transient error string
    async fn invoke(&self, parts: &[PromptPart]) -> std::result::Result<String, String> {
        match self
            .llm
            .generate(&self.model, &self.system_prompt, parts)
            .await
        {
            Ok(ModelOutcome::Final(response)) => {
                self.record_raw(&response.text);
                Ok(response.text)
            }
            Ok(ModelOutcome::Escalated(escalation)) => {
                Err(format!("Agent escalated: {}", escalation.reason))
            }
            Ok(ModelOutcome::Empty) => {
                Err("Agent did not give a final response. Unknown error occurred.".to_string())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
