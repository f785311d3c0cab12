
use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::Config;
use crate::embeddings::Embedder;

/// Output dimension of bge-m3, the default embedding model
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1024;

const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EMBED_ENDPOINT: &str = "/api/embed";
const TAGS_ENDPOINT: &str = "/api/tags";

/// Blocking client for the Ollama embedding API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    model: String,
    batch_size: u32,
    expected_dimension: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<TaggedModel>,
}

#[derive(Debug, Deserialize)]
struct TaggedModel {
    name: String,
}

/// Outcome of one failed HTTP exchange
enum Failure {
    Transient(ureq::Error),
    Fatal(anyhow::Error),
}

fn classify(error: ureq::Error) -> Failure {
    match error {
        ureq::Error::StatusCode(status) if status >= 500 => {
            Failure::Transient(ureq::Error::StatusCode(status))
        }
        ureq::Error::StatusCode(status) => Failure::Fatal(anyhow!("Client error: HTTP {}", status)),
        e @ (ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_)) => Failure::Transient(e),
        e => Failure::Fatal(anyhow!("Non-retryable error: {}", e)),
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            model: config.ollama.model.clone(),
            batch_size: config.ollama.batch_size,
            expected_dimension: config.ollama.embedding_dimension,
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Shorten the wait between retries, mostly useful against mock servers
    #[inline]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Reachability plus presence of the configured model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Checking Ollama at {}", self.base_url);
        self.validate_model().context("Model validation failed")?;
        info!("Ollama at {} serves model {}", self.base_url, self.model);
        Ok(())
    }

    /// Fails unless the server lists the configured model, with or without
    /// the implicit `:latest` tag
    #[inline]
    pub fn validate_model(&self) -> Result<()> {
        let available = self.available_models().context("Failed to list models")?;
        let tagged = format!("{}:latest", self.model);

        if available.iter().any(|name| *name == self.model || *name == tagged) {
            debug!("Model {} is available", self.model);
            return Ok(());
        }

        warn!("Model {} not found among {:?}", self.model, available);
        Err(anyhow!(
            "Model '{}' is not available (try `ollama pull {}`). Available models: {:?}",
            self.model,
            self.model,
            available
        ))
    }

    /// Names of the models the server has pulled
    #[inline]
    pub fn available_models(&self) -> Result<Vec<String>> {
        let url = self.endpoint(TAGS_ENDPOINT)?;
        let response: TagsResponse = self.fetch(&url, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;
        Ok(response.models.into_iter().map(|m| m.name).collect())
    }

    /// Embed `texts` in requests of at most `batch_size` inputs
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1) as usize) {
            vectors.extend(
                self.embed_request(batch)
                    .with_context(|| format!("Failed to embed batch of {} texts", batch.len()))?,
            );
        }
        debug!("Embedded {} texts with {}", vectors.len(), self.model);
        Ok(vectors)
    }

    fn embed_request(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self.endpoint(EMBED_ENDPOINT)?;
        let body = serde_json::to_string(&EmbedRequest {
            model: &self.model,
            input: batch,
        })
        .context("Failed to serialize embedding request")?;

        let response: EmbedResponse = self.fetch(&url, || {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        if response.embeddings.len() != batch.len() {
            return Err(anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                batch.len(),
                response.embeddings.len()
            ));
        }

        let dimension = response.embeddings.first().map_or(0, Vec::len);
        if dimension != self.expected_dimension as usize {
            warn!(
                "Model {} returned {} dimensions, configuration expects {}",
                self.model, dimension, self.expected_dimension
            );
        }
        Ok(response.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {}", path))
    }

    /// Run `request` until it succeeds, a fatal error occurs or the attempts
    /// run out, then parse the body as JSON
    fn fetch<T, F>(&self, url: &Url, mut request: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut delay = self.retry_base_delay;
        let mut attempt = 1;

        let body = loop {
            match request() {
                Ok(body) => break body,
                Err(e) => match classify(e) {
                    Failure::Fatal(e) => {
                        warn!("Request to {} failed: {}", url, e);
                        return Err(e);
                    }
                    Failure::Transient(e) if attempt >= self.retry_attempts => {
                        error!("Giving up on {} after {} attempts", url, attempt);
                        return Err(anyhow!("Request error: {}", e));
                    }
                    Failure::Transient(e) => {
                        warn!(
                            "Request to {} failed ({}), attempt {}/{}",
                            url, e, attempt, self.retry_attempts
                        );
                        std::thread::sleep(delay);
                        delay = delay.saturating_mul(2);
                        attempt += 1;
                    }
                },
            }
        };

        serde_json::from_str(&body).with_context(|| format!("Failed to parse response from {}", url))
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.generate_embeddings_batch(texts)
    }

    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }
}
