//! Form analysis pipeline: Parse -> Solve -> Act
//!
//! One invocation drives a single request through the three phases,
//! emitting progress events and persisting the final action list.
//! Cancellation is cooperative: the pipeline future is dropped at its next
//! suspension point and the request is left in its last recorded state
//! with a `cancelled` progress event appended.

use crate::agents::actions::{build_action_prompt, postprocess_actions, ActionBatch, GeneratedAction};
use crate::agents::parser::{normalize_questions, parsed_form_from_output, ParsedForm, Question};
use crate::agents::solver::{build_search_query, build_solver_prompt, format_context_section};
use crate::agents::{AgentSet, Quality};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::llm::{PromptPart, StructuredOutput};
use crate::retrieval::RetrievalService;
use crate::sanitize::{sanitize_block, sanitize_instructions};
use crate::store::requests::{RequestStatus, RequestStore};
use base64::Engine;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Concurrent solver calls per request
const SOLVER_CONCURRENCY: usize = 10;

/// Questions per action-generation batch
const ACTION_BATCH_SIZE: usize = 10;

/// Analysis mode requested by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzeMode {
    #[default]
    Basic,
    /// Honours screenshots
    Extended,
}

/// Raw analysis inputs from the boundary
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzePayload {
    pub html: String,
    pub visible_text: String,
    #[serde(default)]
    pub clipboard_text: Option<String>,
    #[serde(default)]
    pub screenshots: Option<Vec<String>>,
    #[serde(default)]
    pub mode: AnalyzeMode,
    #[serde(default)]
    pub quality: Quality,
}

/// One scheduled pipeline run
#[derive(Debug, Clone)]
pub struct PipelineJob {
    pub request_id: String,
    pub user_id: String,
    pub payload: AnalyzePayload,
    pub personal_instructions: Option<String>,
}

/// The three-phase orchestrator
pub struct FormPipeline {
    agents: Arc<AgentSet>,
    retrieval: Arc<RetrievalService>,
    requests: RequestStore,
    config: PipelineConfig,
}

impl FormPipeline {
    pub fn new(
        agents: Arc<AgentSet>,
        retrieval: Arc<RetrievalService>,
        requests: RequestStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            agents,
            retrieval,
            requests,
            config,
        }
    }

    /// Run one request to completion, failure, or cancellation
    pub async fn run(&self, job: PipelineJob, cancel: CancellationToken) {
        let request_id = job.request_id.clone();

        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Pipeline cancelled for request {}", request_id);
                let _ = self
                    .requests
                    .log_progress(&request_id, "cancelled", "Analysis cancelled", None, None)
                    .await;
            }
            result = self.execute(&job) => {
                if let Err(e) = result {
                    error!("Pipeline error for request {}: {}", request_id, e);
                    let _ = self
                        .requests
                        .update_status(&request_id, RequestStatus::Failed, None, Some(&e.to_string()))
                        .await;
                    let _ = self
                        .requests
                        .log_progress(&request_id, "failed", "Analysis failed", None, None)
                        .await;
                }
            }
        }
    }

    /// The pipeline body. Phase failures handle their own status and
    /// events and return Ok; Err is reserved for unexpected store errors.
    async fn execute(&self, job: &PipelineJob) -> Result<()> {
        let request_id = &job.request_id;
        let quality = job.payload.quality;

        // Sanitize inputs before anything reaches a prompt
        let html = sanitize_block(&job.payload.html);
        let visible_text = sanitize_block(&job.payload.visible_text);
        let clipboard = job
            .payload
            .clipboard_text
            .as_deref()
            .map(sanitize_block)
            .filter(|s| !s.is_empty());
        let instructions = job
            .personal_instructions
            .as_deref()
            .map(|text| sanitize_instructions(text, self.config.personal_instructions_max_length))
            .filter(|s| !s.is_empty());

        self.requests
            .log_progress(request_id, "inputs_sanitized", "Inputs normalized", Some(5), None)
            .await?;

        // ----- Phase 1: Parse -----
        self.requests
            .update_status(request_id, RequestStatus::ProcessingStep1, None, None)
            .await?;
        self.requests
            .log_progress(request_id, "parser_started", "Parsing form structure", Some(10), None)
            .await?;

        let screenshots = self.decode_screenshots(&job.payload);

        let parser_prompt = build_parser_prompt(
            &html,
            &visible_text,
            clipboard.as_deref(),
            instructions.as_deref(),
        );
        let mut parts = vec![PromptPart::text(parser_prompt)];
        for screenshot in screenshots {
            parts.push(PromptPart::png(screenshot));
        }

        let parsed = self
            .agents
            .parser(quality)
            .run_structured::<ParsedForm>(&parts, self.agents.options())
            .await;

        let form = match parsed {
            Ok(output) => parsed_form_from_output(output),
            Err(e) => {
                warn!("Parser agent failed for request {}: {}", request_id, e);
                None
            }
        };

        let Some(form) = form else {
            self.requests
                .log_progress(request_id, "parser_failed", "Could not parse form structure", None, None)
                .await?;
            self.requests
                .update_status(
                    request_id,
                    RequestStatus::Failed,
                    None,
                    Some("Failed to parse form structure"),
                )
                .await?;
            return Ok(());
        };

        let mut questions = form.questions;
        normalize_questions(&mut questions);
        let total_questions = questions.len();

        if questions.is_empty() {
            info!("No questions detected for request {}", request_id);
            self.requests
                .log_progress(
                    request_id,
                    "no_questions",
                    "No form fields detected on this page",
                    None,
                    None,
                )
                .await?;
            self.requests
                .update_status(request_id, RequestStatus::Completed, Some(0), None)
                .await?;
            return Ok(());
        }

        self.requests
            .log_progress(
                request_id,
                "parser_completed",
                &format!("Detected {total_questions} questions"),
                Some(40),
                Some(json!({"questions": total_questions})),
            )
            .await?;

        // ----- Phase 2: Solve (bounded parallel) -----
        self.requests
            .update_status(request_id, RequestStatus::ProcessingStep2, None, None)
            .await?;
        self.requests
            .log_progress(request_id, "solutions_started", "Generating solutions", Some(50), None)
            .await?;

        let semaphore = Arc::new(Semaphore::new(SOLVER_CONCURRENCY));
        let completed = Arc::new(AtomicUsize::new(0));

        let tasks = questions.iter().map(|question| {
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let clipboard = clipboard.as_deref();
            let instructions = instructions.as_deref();

            async move {
                let _permit = semaphore.acquire().await;

                let (solution, success) = self
                    .solve_question(question, &job.user_id, quality, clipboard, instructions)
                    .await;

                let k = completed.fetch_add(1, Ordering::SeqCst) + 1;
                let percent = std::cmp::min(75, 50 + (k * 25 / total_questions) as i64);
                let _ = self
                    .requests
                    .log_progress(
                        request_id,
                        "solutions_progress",
                        &format!("Solved question {k}/{total_questions}"),
                        Some(percent),
                        Some(json!({
                            "question_number": k,
                            "total_questions": total_questions,
                            "question_id": question.stable_id(),
                            "success": success,
                        })),
                    )
                    .await;

                (solution, success)
            }
        });

        // Reassembled deterministically: join_all preserves input order
        let solved: Vec<(String, bool)> = join_all(tasks).await;
        let success_count = solved.iter().filter(|(_, ok)| *ok).count();

        self.requests
            .log_progress(
                request_id,
                "solutions_completed",
                &format!("Generated {success_count}/{total_questions} solutions"),
                Some(80),
                Some(json!({"total": total_questions, "success": success_count})),
            )
            .await?;

        // ----- Phase 3: Actions (batched) -----
        self.requests
            .log_progress(request_id, "actions_started", "Generating actions", None, None)
            .await?;

        let pairs: Vec<(&Question, &str)> = questions
            .iter()
            .zip(solved.iter())
            .map(|(q, (solution, _))| (q, solution.as_str()))
            .collect();

        let batches: Vec<&[(&Question, &str)]> = pairs.chunks(ACTION_BATCH_SIZE).collect();
        let batch_count = batches.len();

        let batch_tasks = batches.into_iter().map(|batch| self.generate_batch(batch, quality));
        let batch_results: Vec<Option<Vec<GeneratedAction>>> = join_all(batch_tasks).await;

        let failed_batches = batch_results.iter().filter(|r| r.is_none()).count();
        if failed_batches == batch_count {
            self.requests
                .log_progress(request_id, "actions_failed", "Could not generate actions", None, None)
                .await?;
            self.requests
                .update_status(
                    request_id,
                    RequestStatus::Failed,
                    None,
                    Some("Failed to generate form actions"),
                )
                .await?;
            return Ok(());
        }

        let combined: Vec<GeneratedAction> = batch_results.into_iter().flatten().flatten().collect();

        self.requests
            .log_progress(
                request_id,
                "actions_generated",
                &format!("Generated {} actions", combined.len()),
                Some(90),
                Some(json!({"actions": combined.len()})),
            )
            .await?;

        // ----- Post-processing and persistence -----
        let actions = postprocess_actions(combined);
        self.requests.insert_actions(request_id, &actions).await?;
        self.requests
            .log_progress(
                request_id,
                "actions_saved",
                &format!("Saved {} actions", actions.len()),
                Some(95),
                Some(json!({"actions": actions.len()})),
            )
            .await?;

        self.requests
            .update_status(
                request_id,
                RequestStatus::Completed,
                Some(total_questions as i64),
                None,
            )
            .await?;
        self.requests
            .log_progress(request_id, "completed", "Analysis complete", Some(100), None)
            .await?;

        info!(
            "Request {} completed: {} questions, {} actions",
            request_id,
            total_questions,
            actions.len()
        );
        Ok(())
    }

    /// Solve one question; failures degrade to an error-string solution
    async fn solve_question(
        &self,
        question: &Question,
        user_id: &str,
        quality: Quality,
        clipboard: Option<&str>,
        instructions: Option<&str>,
    ) -> (String, bool) {
        let query = build_search_query(question);
        let context = self
            .retrieval
            .retrieve(&query, user_id, self.config.rag_top_k)
            .await;

        let context_section = format_context_section(&context.text_chunks, &context.image_chunks);
        let prompt = build_solver_prompt(clipboard, instructions, &context_section, question);

        let mut parts = vec![PromptPart::text(prompt)];
        for image in &context.image_chunks {
            if !image.image_bytes.is_empty() {
                parts.push(PromptPart::png(image.image_bytes.clone()));
            }
        }

        match self
            .agents
            .solver(quality)
            .run_text(&parts, self.agents.options())
            .await
        {
            Ok(solution) => (solution, true),
            Err(e) => {
                warn!("Solution failed for question {}: {}", question.stable_id(), e);
                (format!("Error: {e}"), false)
            }
        }
    }

    /// Generate actions for one batch; None marks a failed batch
    async fn generate_batch(
        &self,
        batch: &[(&Question, &str)],
        quality: Quality,
    ) -> Option<Vec<GeneratedAction>> {
        let prompt = build_action_prompt(batch);
        let parts = vec![PromptPart::text(prompt)];

        let output = self
            .agents
            .actions(quality)
            .run_structured::<ActionBatch>(&parts, self.agents.options())
            .await;

        match output {
            Ok(StructuredOutput::Typed(batch_output)) => Some(batch_output.actions),
            Ok(StructuredOutput::Raw(value)) => {
                let actions = value.get("actions")?.as_array()?;
                Some(
                    actions
                        .iter()
                        .filter_map(|a| serde_json::from_value::<GeneratedAction>(a.clone()).ok())
                        .collect(),
                )
            }
            Err(e) => {
                warn!("Action batch failed: {}", e);
                None
            }
        }
    }

    /// Decode screenshots for extended mode; bad entries are skipped
    fn decode_screenshots(&self, payload: &AnalyzePayload) -> Vec<Vec<u8>> {
        if payload.mode != AnalyzeMode::Extended {
            return Vec::new();
        }
        let Some(screenshots) = &payload.screenshots else {
            return Vec::new();
        };

        let b64 = base64::engine::general_purpose::STANDARD;
        screenshots
            .iter()
            .enumerate()
            .filter_map(|(idx, encoded)| {
                // Strip a data URL prefix if present
                let encoded = match encoded.split_once(',') {
                    Some((_, rest)) => rest,
                    None => encoded.as_str(),
                };
                match b64.decode(encoded.trim()) {
                    Ok(bytes) => Some(bytes),
                    Err(e) => {
                        warn!("Failed to decode screenshot {}: {}", idx, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Assemble the parser prompt text
fn build_parser_prompt(
    html: &str,
    visible_text: &str,
    clipboard: Option<&str>,
    instructions: Option<&str>,
) -> String {
    let mut parts: Vec<String> = vec![
        "Please analyze the following HTML and describe every form question with its inputs and context.".to_string(),
        "Follow the JSON structure and extraction rules specified in your system instructions.".to_string(),
    ];

    if let Some(clipboard) = clipboard {
        parts.push(String::new());
        parts.push("Personal Instructions specifically for this Session:".to_string());
        parts.push(clipboard.to_string());
    }

    if let Some(instructions) = instructions {
        parts.push(String::new());
        parts.push("Personal Instructions:".to_string());
        parts.push(instructions.to_string());
    }

    parts.push(String::new());
    parts.push("HTML Code:".to_string());
    parts.push("```html".to_string());
    parts.push(html.to_string());
    parts.push("```".to_string());
    parts.push(String::new());
    parts.push("Visible Text Content:".to_string());
    parts.push(visible_text.to_string());
    parts.push(String::new());

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::solver::NO_CONTEXT_NOTE;
    use crate::config::LlmConfig;
    use crate::error::{LlmError, Result as CrateResult};
    use crate::index::{ImageSearch, SearchHit, TextSearch};
    use crate::llm::{GenerationResponse, LlmClient, ModelOutcome};
    use crate::store::chunks::ChunkStore;
    use crate::store::files::FileStore;
    use crate::store::test_pool;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EmptyText;
    struct EmptyImages;

    #[async_trait]
    impl TextSearch for EmptyText {
        async fn search(
            &self,
            _q: &str,
            _u: &str,
            _k: usize,
            _f: Option<&[String]>,
        ) -> CrateResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ImageSearch for EmptyImages {
        async fn search_images(
            &self,
            _q: &str,
            _u: &str,
            _k: usize,
            _f: Option<&[String]>,
        ) -> CrateResult<Vec<SearchHit>> {
            Ok(Vec::new())
        }
    }

    /// Routes calls on the agent role encoded in the system prompt
    struct RoleClient {
        parser_json: Option<String>,
        solver_text: Option<String>,
        actions_json: Option<String>,
        solver_delay: Option<std::time::Duration>,
        seen_prompts: Mutex<Vec<String>>,
    }

    impl RoleClient {
        fn new(parser: &str, solver: &str, actions: &str) -> Self {
            Self {
                parser_json: Some(parser.to_string()),
                solver_text: Some(solver.to_string()),
                actions_json: Some(actions.to_string()),
                solver_delay: None,
                seen_prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for RoleClient {
        async fn generate(
            &self,
            _model: &str,
            system: &str,
            parts: &[PromptPart],
        ) -> CrateResult<ModelOutcome> {
            if let Some(PromptPart::Text(text)) = parts.first() {
                self.seen_prompts.lock().unwrap().push(text.clone());
            }

            let reply = if system == crate::agents::parser::SYSTEM_PROMPT {
                self.parser_json.clone()
            } else if system == crate::agents::solver::SYSTEM_PROMPT {
                if let Some(delay) = self.solver_delay {
                    tokio::time::sleep(delay).await;
                }
                self.solver_text.clone()
            } else {
                self.actions_json.clone()
            };

            match reply {
                Some(text) => Ok(ModelOutcome::Final(GenerationResponse {
                    text,
                    model: "test".to_string(),
                    finish_reason: Some("STOP".to_string()),
                })),
                None => Err(LlmError::ConnectionFailed("scripted failure".to_string()).into()),
            }
        }
    }

    fn llm_config() -> LlmConfig {
        LlmConfig {
            max_retries: 0,
            retry_delay_secs: 0.0,
            ..LlmConfig::default()
        }
    }

    async fn pipeline_with(client: Arc<RoleClient>) -> (FormPipeline, RequestStore) {
        let pool = test_pool().await;
        let requests = RequestStore::new(pool.clone());
        let retrieval = Arc::new(RetrievalService::new(
            Arc::new(EmptyText),
            Arc::new(EmptyImages),
            ChunkStore::new(pool.clone()),
            FileStore::new(pool),
        ));
        let agents = Arc::new(AgentSet::new(client, &llm_config()));
        let pipeline = FormPipeline::new(agents, retrieval, requests.clone(), PipelineConfig::default());
        (pipeline, requests)
    }

    fn job(request_id: &str) -> PipelineJob {
        PipelineJob {
            request_id: request_id.to_string(),
            user_id: "u1".to_string(),
            payload: AnalyzePayload {
                html: "<input name=\"email\" type=\"email\">".to_string(),
                visible_text: "Your email".to_string(),
                clipboard_text: None,
                screenshots: None,
                mode: AnalyzeMode::Basic,
                quality: Quality::Fast,
            },
            personal_instructions: None,
        }
    }

    const ONE_QUESTION: &str = r#"{"questions": [{
        "id": "email",
        "type": "text",
        "question_data": {"question": "Your email"},
        "interaction_data": {"primary_selector": "input[name=\"email\"]", "action_type": "fillText",
                             "targets": [{"selector": "input[name=\"email\"]"}]}
    }]}"#;

    const ONE_ACTION: &str = r#"{"actions": [{
        "action_type": "fillText",
        "selector": "input[name=\"email\"]",
        "value": "alice@example.com",
        "label": "Email"
    }]}"#;

    #[tokio::test]
    async fn test_happy_path_single_field() {
        let client = Arc::new(RoleClient::new(ONE_QUESTION, "alice@example.com", ONE_ACTION));
        let (pipeline, requests) = pipeline_with(client).await;
        let request = requests.create("u1").await.unwrap();

        pipeline.run(job(&request.id), CancellationToken::new()).await;

        let done = requests.get(&request.id, None).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.fields_detected, Some(1));
        assert!(done.started_at.unwrap() <= done.completed_at.unwrap());

        let actions = requests.get_actions(&request.id).await.unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, "fillText");
        assert_eq!(actions[0].selector, "input[name=\"email\"]");
        assert_eq!(actions[0].value, Some(json!("alice@example.com")));

        let events = requests.list_progress(&request.id).await.unwrap();
        let stages: Vec<&str> = events.iter().map(|e| e.stage.as_str()).collect();
        for expected in [
            "queued",
            "inputs_sanitized",
            "parser_started",
            "parser_completed",
            "solutions_started",
            "solutions_progress",
            "solutions_completed",
            "actions_started",
            "actions_generated",
            "actions_saved",
            "completed",
        ] {
            assert!(stages.contains(&expected), "missing stage {expected}");
        }

        // Progress is monotone over the event log
        let mut last = 0i64;
        for event in &events {
            if let Some(p) = event.progress {
                assert!(p >= last, "progress went backwards at {}", event.stage);
                last = p;
            }
        }
        assert_eq!(last, 100);
    }

    #[tokio::test]
    async fn test_empty_questions_completes_early() {
        let client = Arc::new(RoleClient::new(r#"{"questions": []}"#, "unused", "unused"));
        let (pipeline, requests) = pipeline_with(client).await;
        let request = requests.create("u1").await.unwrap();

        pipeline.run(job(&request.id), CancellationToken::new()).await;

        let done = requests.get(&request.id, None).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.fields_detected, Some(0));

        let events = requests.list_progress(&request.id).await.unwrap();
        let stages: Vec<&str> = events.iter().map(|e| e.stage.as_str()).collect();
        assert!(stages.contains(&"no_questions"));
        assert!(!stages.contains(&"solutions_started"));
        assert!(requests.get_actions(&request.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parser_failure_fails_request() {
        // Parser replies with JSON missing the questions array
        let client = Arc::new(RoleClient::new(r#"{"fields": []}"#, "unused", "unused"));
        let (pipeline, requests) = pipeline_with(client).await;
        let request = requests.create("u1").await.unwrap();

        pipeline.run(job(&request.id), CancellationToken::new()).await;

        let done = requests.get(&request.id, None).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Failed);
        assert_eq!(done.error_message.as_deref(), Some("Failed to parse form structure"));
        assert!(done.completed_at.is_some());

        let stages: Vec<String> = requests
            .list_progress(&request.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.stage)
            .collect();
        assert!(stages.contains(&"parser_failed".to_string()));
    }

    #[tokio::test]
    async fn test_solver_failure_degrades_not_fails() {
        let client = Arc::new(RoleClient {
            parser_json: Some(ONE_QUESTION.to_string()),
            solver_text: None, // every solver call errors
            actions_json: Some(ONE_ACTION.to_string()),
            solver_delay: None,
            seen_prompts: Mutex::new(Vec::new()),
        });
        let (pipeline, requests) = pipeline_with(client.clone()).await;
        let request = requests.create("u1").await.unwrap();

        pipeline.run(job(&request.id), CancellationToken::new()).await;

        let done = requests.get(&request.id, None).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);

        // The failing question was reported unsuccessful in progress
        let events = requests.list_progress(&request.id).await.unwrap();
        let progress_event = events
            .iter()
            .find(|e| e.stage == "solutions_progress")
            .unwrap();
        assert_eq!(progress_event.payload.as_ref().unwrap()["success"], false);

        // The action agent received the error-string solution
        let prompts = client.seen_prompts.lock().unwrap();
        assert!(prompts.iter().any(|p| p.contains("\"solution\": \"Error:")));
    }

    #[tokio::test]
    async fn test_empty_context_note_reaches_solver() {
        let client = Arc::new(RoleClient::new(ONE_QUESTION, "fine", ONE_ACTION));
        let (pipeline, requests) = pipeline_with(client.clone()).await;
        let request = requests.create("u1").await.unwrap();

        pipeline.run(job(&request.id), CancellationToken::new()).await;

        let prompts = client.seen_prompts.lock().unwrap();
        assert!(prompts.iter().any(|p| p.contains(NO_CONTEXT_NOTE)));
    }

    #[tokio::test]
    async fn test_cancellation_mid_phase_2() {
        let client = Arc::new(RoleClient {
            parser_json: Some(ONE_QUESTION.to_string()),
            solver_text: Some("never delivered".to_string()),
            actions_json: Some(ONE_ACTION.to_string()),
            solver_delay: Some(std::time::Duration::from_secs(60)),
            seen_prompts: Mutex::new(Vec::new()),
        });
        let (pipeline, requests) = pipeline_with(client).await;
        let request = requests.create("u1").await.unwrap();
        let pipeline = Arc::new(pipeline);

        let cancel = CancellationToken::new();
        let handle = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            let job = job(&request.id);
            tokio::spawn(async move { pipeline.run(job, cancel).await })
        };

        // Let the pipeline reach the stalled solver, then cancel
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let done = requests.get(&request.id, None).await.unwrap().unwrap();
        assert_ne!(done.status, RequestStatus::Completed);
        assert_ne!(done.status, RequestStatus::Failed);

        let events = requests.list_progress(&request.id).await.unwrap();
        let stages: Vec<&str> = events.iter().map(|e| e.stage.as_str()).collect();
        assert!(stages.contains(&"solutions_started"));
        assert_eq!(*stages.last().unwrap(), "cancelled");
        assert!(requests.get_actions(&request.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_null_value_actions_filtered_on_persist() {
        let actions_json = r##"{"actions": [
            {"action_type": "fillText", "selector": "#a", "value": "x"},
            {"action_type": "fillText", "selector": "#b", "value": null},
            {"action_type": "click", "selector": "#c", "value": null}
        ]}"##;
        let client = Arc::new(RoleClient::new(ONE_QUESTION, "ok", actions_json));
        let (pipeline, requests) = pipeline_with(client).await;
        let request = requests.create("u1").await.unwrap();

        pipeline.run(job(&request.id), CancellationToken::new()).await;

        let stored = requests.get_actions(&request.id).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].selector, "#a");
        assert_eq!(stored[1].selector, "#c");
        assert_eq!(stored[0].order_index, 0);
        assert_eq!(stored[1].order_index, 1);
    }
}
