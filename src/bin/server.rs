//! Backend server entrypoint

use autoform::api::{self, AppState};
use autoform::auth::AuthService;
use autoform::config::AppConfig;
use autoform::documents::{DocumentProcessor, TesseractOcr};
use autoform::index::{GeminiTextEmbedder, ImageEmbedder, ImageIndex, MultimodalEmbedder, TextIndex};
use autoform::ingest::IngestionService;
use autoform::lifecycle::RequestLifecycle;
use autoform::llm::GeminiClient;
use autoform::pipeline::FormPipeline;
use autoform::retrieval::RetrievalService;
use autoform::store::{self, chunks::ChunkStore, files::FileStore, requests::RequestStore};
use autoform::AgentSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("AUTOFORM_CONFIG") {
        Ok(path) => {
            info!("Loading configuration from {}", path);
            AppConfig::from_file(&path)?
        }
        Err(_) => AppConfig::default(),
    };
    config.validate()?;

    // Stores
    let pool = store::connect(&config.database).await?;
    store::init_schema(&pool).await?;
    let files = FileStore::new(pool.clone());
    let chunks = ChunkStore::new(pool.clone());
    let requests = RequestStore::new(pool.clone());
    let auth = AuthService::new(pool);

    // Indexes
    let text_embedder = Arc::new(GeminiTextEmbedder::new(
        &config.llm.api_base,
        &config.llm.api_key,
        &config.embedding,
        config.llm.timeout,
    )?);
    let image_embedder: Option<Arc<dyn ImageEmbedder>> = match &config.embedding.image_endpoint {
        Some(endpoint) => Some(Arc::new(MultimodalEmbedder::new(
            endpoint,
            config.embedding.image_dimensions,
            config.llm.timeout,
        )?)),
        None => None,
    };
    let text_index = Arc::new(TextIndex::new(&config.index, text_embedder).await?);
    let image_index = Arc::new(ImageIndex::new(&config.index, image_embedder).await?);

    // Document ingestion
    let ocr = Arc::new(TesseractOcr::new(config.documents.tesseract_cmd.clone()));
    let processor = Arc::new(DocumentProcessor::new(config.documents.clone(), ocr));
    let ingest = Arc::new(IngestionService::new(
        files.clone(),
        chunks.clone(),
        processor,
        text_index.clone(),
        image_index.clone(),
    ));

    // Pipeline and lifecycle
    let retrieval = Arc::new(RetrievalService::new(
        text_index,
        image_index,
        chunks,
        files.clone(),
    ));
    let llm = Arc::new(GeminiClient::new(config.llm.clone())?);
    let agents = Arc::new(AgentSet::new(llm, &config.llm));
    let pipeline = Arc::new(FormPipeline::new(
        agents,
        retrieval,
        requests.clone(),
        config.pipeline.clone(),
    ));
    let lifecycle = Arc::new(RequestLifecycle::new(
        requests,
        pipeline,
        Duration::from_secs(config.pipeline.shutdown_grace_secs),
    ));

    // Periodic cleanup of old requests
    let scheduler_stop = CancellationToken::new();
    let scheduler = tokio::spawn(lifecycle.clone().run_cleanup_scheduler(
        config.pipeline.cleanup_interval_hours,
        config.pipeline.cleanup_age_hours,
        scheduler_stop.clone(),
    ));

    let state = AppState {
        lifecycle: lifecycle.clone(),
        files,
        ingest,
        auth,
        uploads: config.uploads.clone(),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    scheduler_stop.cancel();
    let _ = scheduler.await;
    lifecycle.shutdown().await;

    info!("Server stopped");
    Ok(())
}
