//! Configuration management for the form analysis backend

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Embedding settings (text and image)
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Document processing settings
    #[serde(default)]
    pub documents: DocumentConfig,

    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Upload limits
    #[serde(default)]
    pub uploads: UploadConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,

    /// Bind port
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL
    pub url: String,

    /// Maximum pool connections
    pub max_connections: u32,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the generative API
    pub api_base: String,

    /// API key appended to each request
    pub api_key: String,

    /// Model used for the "small" class
    pub small_model: String,

    /// Model used for the "large" class
    pub large_model: String,

    /// Request timeout in seconds
    pub timeout: u64,

    /// Maximum retries per agent call
    pub max_retries: u32,

    /// Delay between retries in seconds
    pub retry_delay_secs: f64,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Text embedding model name
    pub text_model: String,

    /// Text embedding dimension
    pub text_dimensions: usize,

    /// Multimodal image embedding endpoint; image indexing is disabled when unset
    #[serde(default)]
    pub image_endpoint: Option<String>,

    /// Image embedding dimension
    pub image_dimensions: usize,
}

/// Vector index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Base URL of the vector store HTTP API
    pub url: String,

    /// Text collection name
    pub text_collection: String,

    /// Image collection name
    pub image_collection: String,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// Document processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// Target tokens per text chunk
    pub chunk_size: usize,

    /// Overlap tokens between chunks
    pub chunk_overlap: usize,

    /// Maximum image dimension after downscaling
    pub max_image_dim: u32,

    /// Path to the tesseract binary
    pub tesseract_cmd: String,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Chunks retrieved per solver question
    pub rag_top_k: usize,

    /// Maximum length of stored personal instructions
    pub personal_instructions_max_length: usize,

    /// Age threshold for the request cleanup job, in hours
    pub cleanup_age_hours: u64,

    /// Interval between cleanup runs, in hours
    pub cleanup_interval_hours: u64,

    /// Grace period for in-flight pipelines at shutdown, in seconds
    pub shutdown_grace_secs: u64,
}

/// Upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum upload size in bytes
    pub max_file_size: usize,
}

/// Content types accepted by the upload endpoint
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "image/webp",
    "application/pdf",
];

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:autoform.db".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            api_key: String::new(),
            small_model: "gemini-2.5-flash".to_string(),
            large_model: "gemini-2.5-pro".to_string(),
            timeout: 120,
            max_retries: 2,
            retry_delay_secs: 2.0,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            text_model: "gemini-embedding-001".to_string(),
            text_dimensions: 3072,
            image_endpoint: None,
            image_dimensions: 1408,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            text_collection: "autoform_text".to_string(),
            image_collection: "autoform_images".to_string(),
            timeout: 30,
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_image_dim: 1024,
            tesseract_cmd: "tesseract".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rag_top_k: 10,
            personal_instructions_max_length: 4000,
            cleanup_age_hours: 24,
            cleanup_interval_hours: 24,
            shutdown_grace_secs: 30,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 200 * 1024 * 1024,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            documents: DocumentConfig::default(),
            pipeline: PipelineConfig::default(),
            uploads: UploadConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.api_base.starts_with("http") {
            return Err(anyhow::anyhow!("Invalid LLM API base: {}", self.llm.api_base));
        }

        if self.llm.small_model.is_empty() || self.llm.large_model.is_empty() {
            return Err(anyhow::anyhow!("Model names cannot be empty"));
        }

        if !self.index.url.starts_with("http") {
            return Err(anyhow::anyhow!("Invalid index URL: {}", self.index.url));
        }

        if self.embedding.text_dimensions == 0 {
            return Err(anyhow::anyhow!("Embedding dimension must be greater than 0"));
        }

        if self.documents.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        if self.documents.chunk_overlap >= self.documents.chunk_size {
            return Err(anyhow::anyhow!("Chunk overlap must be smaller than chunk size"));
        }

        if self.pipeline.rag_top_k == 0 {
            return Err(anyhow::anyhow!("rag_top_k must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.small_model, "gemini-2.5-flash");
        assert_eq!(config.pipeline.rag_top_k, 10);
        assert_eq!(config.documents.max_image_dim, 1024);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.llm.api_base = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.documents.chunk_overlap = config.documents.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allowed_content_types() {
        assert!(ALLOWED_CONTENT_TYPES.contains(&"application/pdf"));
        assert!(ALLOWED_CONTENT_TYPES.contains(&"image/png"));
        assert!(!ALLOWED_CONTENT_TYPES.contains(&"text/html"));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.server.port = 9999;
        config.pipeline.rag_top_k = 7;
        config.to_file(&path).unwrap();

        let loaded = AppConfig::from_file(&path).unwrap();
        assert_eq!(loaded.server.port, 9999);
        assert_eq!(loaded.pipeline.rag_top_k, 7);
        assert_eq!(loaded.llm.small_model, config.llm.small_model);
    }
}
