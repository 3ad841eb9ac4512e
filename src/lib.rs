//! Form analysis backend
//!
//! Analyses HTML forms submitted by a browser extension and returns a list
//! of concrete fill-in actions. The analysis runs as an asynchronous
//! three-phase pipeline:
//!
//! 1. **Parse** the page into logical questions
//! 2. **Solve** each question with retrieval-augmented context from the
//!    user's uploaded documents
//! 3. **Act**: convert question/answer pairs into executable browser actions
//!
//! Around the pipeline sit a retrieval subsystem (document ingestion,
//! chunking, dual embedding, similarity search) and a request lifecycle
//! subsystem (state machine, cancellation, progress log, cleanup).

pub mod agents;
pub mod api;
pub mod auth;
pub mod config;
pub mod documents;
pub mod error;
pub mod index;
pub mod ingest;
pub mod lifecycle;
pub mod llm;
pub mod pipeline;
pub mod retrieval;
pub mod sanitize;
pub mod store;

// Re-export main types
pub use agents::{AgentSet, ModelClass, Quality, QualityProfile};
pub use config::AppConfig;
pub use documents::{DocumentProcessor, OcrEngine, TesseractOcr};
pub use error::{Error, Result};
pub use ingest::IngestionService;
pub use lifecycle::RequestLifecycle;
pub use llm::{AgentRunner, GeminiClient, LlmClient, PromptPart};
pub use pipeline::{AnalyzeMode, AnalyzePayload, FormPipeline, PipelineJob};
pub use retrieval::RetrievalService;
pub use store::chunks::{ChunkStore, ChunkType, DocumentChunk};
pub use store::files::{FileStatus, FileStore};
pub use store::requests::{FormRequest, RequestStatus, RequestStore};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
