#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

pub const CONFIG_FILE_NAME: &str = "ragchat.toml";

pub const DEFAULT_LLM_URL: &str =
    "https://huggingface.co/bartowski/Qwen_Qwen3-8B-GGUF/resolve/main/Qwen_Qwen3-8B-Q4_K_M.gguf";
pub const DEFAULT_EMBEDDING_MODEL: &str = "bge-m3";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            ollama: OllamaConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

/// Local language model settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// URL to download the GGUF file from, or a path to a local GGUF file
    pub model: String,
    pub threads: u32,
    pub temperature: f32,
    pub max_tokens: u32,
    pub context_window: u32,
    pub batch_size: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4);
        Self {
            model: DEFAULT_LLM_URL.to_string(),
            threads,
            temperature: 0.3,
            max_tokens: 1024,
            context_window: 4096,
            batch_size: 512,
        }
    }
}

/// Ollama server used for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub similarity_cutoff: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_cutoff: 0.3,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid thread count: {0} (must be at least 1)")]
    InvalidThreads(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be between 1 and the context window {1})")]
    InvalidMaxTokens(u32, u32),
    #[error("Invalid context window: {0} (must be between 512 and 131072)")]
    InvalidContextWindow(u32),
    #[error("Invalid LLM batch size: {0} (must be between 1 and the context window)")]
    InvalidLlmBatchSize(u32),
    #[error("Invalid chunk size: {0} (must be between 32 and 8192)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid top-k: {0} (must be at least 1)")]
    InvalidTopK(usize),
    #[error("Invalid similarity cutoff: {0} (must be between 0.0 and 1.0)")]
    InvalidSimilarityCutoff(f32),
    #[error("Invalid value for {0}: {1}")]
    InvalidEnvValue(String, String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Config {
    /// Load configuration for `base_dir`, applying process environment overrides
    #[inline]
    pub fn load<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        Self::load_with_env(base_dir, |key| std::env::var(key).ok())
    }

    /// Load configuration, resolving overrides through `lookup`
    #[inline]
    pub fn load_with_env<P, F>(base_dir: P, lookup: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = base_dir.as_ref().join(CONFIG_FILE_NAME);

        let mut config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).with_context(|| {
                format!("Failed to read config file: {}", config_path.display())
            })?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
        } else {
            debug!("No config file at {}, using defaults", config_path.display());
            Self::default()
        };
        config.base_dir = base_dir.as_ref().to_path_buf();

        config
            .apply_env_overrides(lookup)
            .context("Invalid environment override")?;

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Apply the supported environment variables on top of the current values
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = get("LLM_MODEL") {
            self.llm.model = model.trim().to_string();
        }
        if let Some(model) = get("EMBEDDING_MODEL") {
            self.ollama.model = model.trim().to_string();
        }
        if let Some(value) = get("NUM_THREADS") {
            self.llm.threads = parse_env("NUM_THREADS", &value)?;
        }
        if let Some(value) = get("TEMPERATURE") {
            self.llm.temperature = parse_env("TEMPERATURE", &value)?;
        }
        if let Some(value) = get("MAX_TOKENS") {
            self.llm.max_tokens = parse_env("MAX_TOKENS", &value)?;
        }
        if let Some(value) = get("CONTEXT_WINDOW") {
            self.llm.context_window = parse_env("CONTEXT_WINDOW", &value)?;
        }
        if let Some(value) = get("CHUNK_SIZE") {
            self.chunking.chunk_size = parse_env("CHUNK_SIZE", &value)?;
        }
        if let Some(value) = get("CHUNK_OVERLAP") {
            self.chunking.chunk_overlap = parse_env("CHUNK_OVERLAP", &value)?;
        }
        if let Some(value) = get("SIMILARITY_TOP_K") {
            self.retrieval.top_k = parse_env("SIMILARITY_TOP_K", &value)?;
        }
        if let Some(value) = get("SIMILARITY_CUTOFF") {
            self.retrieval.similarity_cutoff = parse_env("SIMILARITY_CUTOFF", &value)?;
        }
        if let Some(value) = get("OLLAMA_HOST") {
            self.ollama.apply_host_override(value.trim())?;
        }
        if let Some(value) = get("OLLAMA_PORT") {
            self.ollama.port = parse_env("OLLAMA_PORT", &value)?;
        }

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.llm.validate()?;
        self.validate_chunking_config()?;
        self.validate_retrieval_config()?;
        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(32..=8192).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    fn validate_retrieval_config(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::InvalidTopK(self.retrieval.top_k));
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_cutoff) {
            return Err(ConfigError::InvalidSimilarityCutoff(
                self.retrieval.similarity_cutoff,
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Folder holding the source documents
    #[inline]
    pub fn archive_dir(&self) -> PathBuf {
        self.get_base_dir().join("archive")
    }

    /// Folder holding the LanceDB database and the indexed-document registry
    #[inline]
    pub fn vector_store_dir(&self) -> PathBuf {
        self.get_base_dir().join("vector_store")
    }

    /// Folder holding downloaded model files
    #[inline]
    pub fn models_dir(&self) -> PathBuf {
        self.get_base_dir().join("models")
    }

    /// Create the archive and models folders and the vector store parent
    #[inline]
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [self.archive_dir(), self.models_dir()] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        if let Some(parent) = self.vector_store_dir().parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue(key.to_string(), value.to_string()))
}

impl LlmConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.threads == 0 {
            return Err(ConfigError::InvalidThreads(self.threads));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if !(512..=131_072).contains(&self.context_window) {
            return Err(ConfigError::InvalidContextWindow(self.context_window));
        }

        if self.max_tokens == 0 || self.max_tokens > self.context_window {
            return Err(ConfigError::InvalidMaxTokens(
                self.max_tokens,
                self.context_window,
            ));
        }

        if self.batch_size == 0 || self.batch_size > self.context_window {
            return Err(ConfigError::InvalidLlmBatchSize(self.batch_size));
        }

        Ok(())
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    /// Accepts either a bare host name or a full `scheme://host:port` URL,
    /// the form the Ollama CLI itself uses for `OLLAMA_HOST`
    pub fn apply_host_override(&mut self, value: &str) -> Result<(), ConfigError> {
        if !value.contains("://") {
            self.host = value.to_string();
            return Ok(());
        }

        let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl(value.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidUrl(value.to_string()))?;

        self.set_protocol(url.scheme().to_string())?;
        self.host = host.to_string();
        if let Some(port) = url.port() {
            self.set_port(port)?;
        }
        Ok(())
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }
}
