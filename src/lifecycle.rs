//! Request lifecycle: admission, task registry, cancellation, cleanup,
//! and graceful shutdown

use crate::error::{Error, Result};
use crate::pipeline::{AnalyzePayload, FormPipeline, PipelineJob};
use crate::store::requests::{FormRequest, RequestStatus, RequestStore};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Tracks running pipelines and owns the request state machine edges the
/// pipeline itself does not drive
pub struct RequestLifecycle {
    store: RequestStore,
    pipeline: Arc<FormPipeline>,
    tasks: Arc<Mutex<HashMap<String, RunningTask>>>,
    shutdown_grace: Duration,
}

impl RequestLifecycle {
    pub fn new(store: RequestStore, pipeline: Arc<FormPipeline>, shutdown_grace: Duration) -> Self {
        Self {
            store,
            pipeline,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            shutdown_grace,
        }
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    /// Admit, create, and schedule one analysis request.
    ///
    /// Rejects with Conflict while the user has any request in a
    /// non-terminal state. The admission check races with concurrent
    /// inserts by design; the loser of the race is the next caller.
    pub async fn schedule(
        &self,
        user_id: &str,
        payload: AnalyzePayload,
        personal_instructions: Option<String>,
    ) -> Result<FormRequest> {
        if let Some(active) = self.store.get_active_for_user(user_id).await? {
            warn!(
                "User {} already has active request {} ({})",
                user_id,
                active.id,
                active.status.as_str()
            );
            return Err(Error::Conflict(
                "An analysis request is already in progress".to_string(),
            ));
        }

        let request = self.store.create(user_id).await?;
        let request_id = request.id.clone();

        let job = PipelineJob {
            request_id: request_id.clone(),
            user_id: user_id.to_string(),
            payload,
            personal_instructions,
        };

        let cancel = CancellationToken::new();

        // Hold the registry lock across spawn so the task cannot try to
        // deregister before it has been registered
        let mut tasks = self.tasks.lock().await;
        let handle = {
            let pipeline = self.pipeline.clone();
            let registry = self.tasks.clone();
            let cancel = cancel.clone();
            let request_id = request_id.clone();
            tokio::spawn(async move {
                pipeline.run(job, cancel).await;
                // Deregister regardless of how the run ended
                registry.lock().await.remove(&request_id);
            })
        };
        tasks.insert(request_id.clone(), RunningTask { cancel, handle });
        drop(tasks);

        info!("Scheduled request {} for user {}", request_id, user_id);
        Ok(request)
    }

    /// Cancel a running pipeline and await its termination.
    ///
    /// Always safe to call on a finished or unknown request.
    pub async fn cancel(&self, request_id: &str) {
        let task = self.tasks.lock().await.remove(request_id);

        if let Some(task) = task {
            info!("Cancelling request {}", request_id);
            task.cancel.cancel();
            if let Err(e) = task.handle.await {
                if !e.is_cancelled() {
                    error!("Pipeline task for {} panicked: {}", request_id, e);
                }
            }
        }
    }

    /// Number of currently tracked pipelines
    pub async fn running_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Delete requests older than the threshold
    pub async fn cleanup_once(&self, age_hours: u64) -> Result<u64> {
        let deleted = self.store.cleanup_old(age_hours).await?;
        if deleted > 0 {
            info!("Cleanup removed {} old requests", deleted);
        }
        Ok(deleted)
    }

    /// Periodic cleanup until the token is cancelled
    pub async fn run_cleanup_scheduler(
        self: Arc<Self>,
        interval_hours: u64,
        age_hours: u64,
        stop: CancellationToken,
    ) {
        let period = Duration::from_secs(interval_hours * 3600);
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    info!("Cleanup scheduler stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.cleanup_once(age_hours).await {
                        error!("Cleanup run failed: {}", e);
                    }
                }
            }
        }
    }

    /// Graceful shutdown: wait up to the grace period for tracked tasks,
    /// then cancel stragglers and mark their requests failed.
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, RunningTask)> = self.tasks.lock().await.drain().collect();
        if tasks.is_empty() {
            return;
        }

        info!(
            "Shutting down with {} running pipelines (grace {:?})",
            tasks.len(),
            self.shutdown_grace
        );
        let deadline = Instant::now() + self.shutdown_grace;

        for (request_id, mut task) in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());

            let finished = timeout(remaining, &mut task.handle).await.is_ok();
            if finished {
                continue;
            }

            warn!("Request {} still running past shutdown deadline", request_id);
            task.cancel.cancel();
            let _ = task.handle.await;

            match self.store.get(&request_id, None).await {
                Ok(Some(request)) if !request.status.is_terminal() => {
                    let _ = self
                        .store
                        .update_status(
                            &request_id,
                            RequestStatus::Failed,
                            None,
                            Some("Server shutdown before completion"),
                        )
                        .await;
                }
                Ok(_) => {}
                Err(e) => error!("Could not finalize request {} at shutdown: {}", request_id, e),
            }
        }

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentSet;
    use crate::config::{LlmConfig, PipelineConfig};
    use crate::error::Result as CrateResult;
    use crate::index::{ImageSearch, SearchHit, TextSearch};
    use crate::llm::{GenerationResponse, LlmClient, ModelOutcome, PromptPart};
    use crate::pipeline::AnalyzeMode;
    use crate::retrieval::RetrievalService;
    use crate::store::chunks::ChunkStore;
    use crate::store::files::FileStore;
    use crate::store::test_pool;
    use async_trait::async_trait;

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

    /// Parser answers with an empty question list after an optional stall
    struct StubClient {
        stall: Option<Duration>,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn generate(
            &self,
            _model: &str,
            _system: &str,
            _parts: &[PromptPart],
        ) -> CrateResult<ModelOutcome> {
            if let Some(stall) = self.stall {
                tokio::time::sleep(stall).await;
            }
            Ok(ModelOutcome::Final(GenerationResponse {
                text: r#"{"questions": []}"#.to_string(),
                model: "test".to_string(),
                finish_reason: Some("STOP".to_string()),
            }))
        }
    }

    async fn lifecycle_with(stall: Option<Duration>, grace: Duration) -> Arc<RequestLifecycle> {
        let pool = test_pool().await;
        let store = RequestStore::new(pool.clone());
        let retrieval = Arc::new(RetrievalService::new(
            Arc::new(EmptyText),
            Arc::new(EmptyImages),
            ChunkStore::new(pool.clone()),
            FileStore::new(pool),
        ));
        let llm_config = LlmConfig {
            max_retries: 0,
            retry_delay_secs: 0.0,
            ..LlmConfig::default()
        };
        let agents = Arc::new(AgentSet::new(Arc::new(StubClient { stall }), &llm_config));
        let pipeline = Arc::new(FormPipeline::new(
            agents,
            retrieval,
            store.clone(),
            PipelineConfig::default(),
        ));

        Arc::new(RequestLifecycle::new(store, pipeline, grace))
    }

    fn payload() -> AnalyzePayload {
        AnalyzePayload {
            html: "<form></form>".to_string(),
            visible_text: "nothing here".to_string(),
            clipboard_text: None,
            screenshots: None,
            mode: AnalyzeMode::Basic,
            quality: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_schedule_completes_and_deregisters() {
        let lifecycle = lifecycle_with(None, Duration::from_secs(5)).await;

        let request = lifecycle.schedule("u1", payload(), None).await.unwrap();
        assert_eq!(request.status, RequestStatus::Pending);

        // Wait for the quick pipeline to finish and deregister
        for _ in 0..50 {
            if lifecycle.running_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lifecycle.running_count().await, 0);

        let done = lifecycle.store().get(&request.id, None).await.unwrap().unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.fields_detected, Some(0));
    }

    #[tokio::test]
    async fn test_admission_conflict() {
        let lifecycle = lifecycle_with(Some(Duration::from_secs(60)), Duration::from_secs(5)).await;

        let first = lifecycle.schedule("u1", payload(), None).await.unwrap();

        let second = lifecycle.schedule("u1", payload(), None).await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        // Another user is unaffected
        assert!(lifecycle.schedule("u2", payload(), None).await.is_ok());

        // No extra request row was created for u1
        let active = lifecycle.store().get_active_for_user("u1").await.unwrap().unwrap();
        assert_eq!(active.id, first.id);

        lifecycle.cancel(&first.id).await;
    }

    #[tokio::test]
    async fn test_cancel_allows_rescheduling() {
        let lifecycle = lifecycle_with(Some(Duration::from_secs(60)), Duration::from_secs(5)).await;

        let request = lifecycle.schedule("u1", payload(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        lifecycle.cancel(&request.id).await;
        assert_eq!(lifecycle.running_count().await, 0);

        // The cancelled request is still non-terminal, so admission still
        // blocks until the row is deleted
        let row = lifecycle.store().get(&request.id, None).await.unwrap().unwrap();
        assert!(!row.status.is_terminal());
        lifecycle.store().delete(&request.id, None).await.unwrap();

        assert!(lifecycle.schedule("u1", payload(), None).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_on_unknown_request_is_safe() {
        let lifecycle = lifecycle_with(None, Duration::from_secs(5)).await;
        lifecycle.cancel("no-such-request").await;
    }

    #[tokio::test]
    async fn test_shutdown_marks_stragglers_failed() {
        let lifecycle = lifecycle_with(Some(Duration::from_secs(60)), Duration::from_millis(50)).await;

        let request = lifecycle.schedule("u1", payload(), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        lifecycle.shutdown().await;

        let row = lifecycle.store().get(&request.id, None).await.unwrap().unwrap();
        assert_eq!(row.status, RequestStatus::Failed);
        assert_eq!(
            row.error_message.as_deref(),
            Some("Server shutdown before completion")
        );
    }

    #[tokio::test]
    async fn test_shutdown_with_nothing_running() {
        let lifecycle = lifecycle_with(None, Duration::from_secs(1)).await;
        lifecycle.shutdown().await;
    }
}
