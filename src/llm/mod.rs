// Language model module
// Locates or downloads the GGUF model, loads it and exposes it as a text generator

pub mod download;
pub mod engine;


use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info};
use url::Url;

pub use download::ModelDownloader;
pub use engine::{GenerationParams, LlamaGenerator};

use crate::config::{Config, LlmConfig};

/// Lower bound applied to the configured thread count
pub const MIN_THREADS: u32 = 1;
pub const SMOKE_TEST_PROMPT: &str = "Hello";
pub const SMOKE_TEST_MAX_TOKENS: u32 = 8;

/// Cross-thread request to stop a completion early.
///
/// A request only registers while a completion is running; otherwise
/// [`StopSignal::request`] returns `false` and leaves the caller to decide.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    running: Arc<AtomicBool>,
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    /// Mark a completion as started, clearing any earlier request
    #[inline]
    pub fn begin(&self) {
        self.requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Ask the running completion to stop. `false` when none is running.
    #[inline]
    pub fn request(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        self.requested.store(true, Ordering::SeqCst);
        true
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Streaming text completion.
///
/// Fragments are passed to `on_fragment` as soon as they are produced; the
/// return value is their concatenation. Implementations stop early, keeping
/// what they have, once `stop` is requested.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        stop: &StopSignal,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String>;

    /// Completion length used when the caller has no preference
    fn default_max_tokens(&self) -> u32;
}

/// Where the model comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Remote(Url),
    Local(PathBuf),
}

impl ModelSource {
    /// Interpret a configured model string: an existing file wins, then an
    /// http(s) URL, then a file name expected under the models directory
    #[inline]
    pub fn parse(source: &str) -> Self {
        let path = Path::new(source);
        if path.is_file() {
            return Self::Local(path.to_path_buf());
        }
        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::Remote(url),
            _ => Self::Local(path.to_path_buf()),
        }
    }
}

/// Final path segment of a model URL or path, without any query string
#[inline]
pub fn model_file_name(source: &str) -> String {
    if let Ok(url) = Url::parse(source) {
        if matches!(url.scheme(), "http" | "https") {
            return url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|name| !name.is_empty())
                .unwrap_or("model.gguf")
                .to_string();
        }
    }

    let without_query = source.split('?').next().unwrap_or(source);
    Path::new(without_query)
        .file_name()
        .map_or_else(|| without_query.to_string(), |n| n.to_string_lossy().into_owned())
}

/// Owns the model file and the loaded generator
pub struct ModelManager {
    config: LlmConfig,
    models_dir: PathBuf,
    downloader: ModelDownloader,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl std::fmt::Debug for ModelManager {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model", &self.config.model)
            .field("models_dir", &self.models_dir)
            .field("loaded", &self.generator.is_some())
            .finish_non_exhaustive()
    }
}

impl ModelManager {
    #[inline]
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.llm.clone(),
            models_dir: config.models_dir(),
            downloader: ModelDownloader::new(),
            generator: None,
        }
    }

    #[inline]
    pub fn with_downloader(mut self, downloader: ModelDownloader) -> Self {
        self.downloader = downloader;
        self
    }

    /// Use an already constructed generator instead of loading a model file
    #[inline]
    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[inline]
    pub fn source(&self) -> ModelSource {
        ModelSource::parse(&self.config.model)
    }

    #[inline]
    pub fn model_name(&self) -> String {
        model_file_name(&self.config.model)
    }

    /// Where the model file lives (or will live once downloaded)
    #[inline]
    pub fn model_path(&self) -> PathBuf {
        match self.source() {
            ModelSource::Local(path) if path.is_absolute() || path.is_file() => path,
            _ => self.models_dir.join(self.model_name()),
        }
    }

    #[inline]
    pub fn is_downloaded(&self) -> bool {
        self.model_path().is_file()
    }

    #[inline]
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            threads: self.config.threads.max(MIN_THREADS),
            batch_size: self.config.batch_size,
            context_window: self.config.context_window,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    #[inline]
    pub fn generator(&self) -> Option<Arc<dyn TextGenerator>> {
        self.generator.clone()
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.generator.is_some()
    }

    /// Make sure the model file exists, load it and run a short smoke test.
    ///
    /// Failures are logged and reported as `false`.
    #[inline]
    pub fn initialize(&mut self) -> bool {
        if self.generator.is_some() {
            debug!("Model already initialized");
            return true;
        }

        let path = match self.ensure_model_file() {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to obtain model file: {:#}", e);
                return false;
            }
        };

        let params = self.generation_params();
        info!(
            "Loading model with {} threads, context window {}, batch size {}",
            params.threads, params.context_window, params.batch_size
        );

        let generator = match LlamaGenerator::load(&path, params) {
            Ok(generator) => generator,
            Err(e) => {
                error!("Failed to load model {}: {:#}", path.display(), e);
                return false;
            }
        };

        if let Err(e) = smoke_test(&generator) {
            error!("Model smoke test failed: {:#}", e);
            return false;
        }

        info!("Model initialized successfully");
        self.generator = Some(Arc::new(generator));
        true
    }

    /// Path of a usable model file, downloading it first if necessary
    #[inline]
    pub fn ensure_model_file(&self) -> Result<PathBuf> {
        let path = self.model_path();
        if path.is_file() {
            debug!("Using model file {}", path.display());
            return Ok(path);
        }

        match self.source() {
            ModelSource::Remote(url) => {
                std::fs::create_dir_all(&self.models_dir).with_context(|| {
                    format!("Failed to create {}", self.models_dir.display())
                })?;
                self.downloader.download(url.as_str(), &path)?;
                Ok(path)
            }
            ModelSource::Local(source) => Err(anyhow!(
                "Model file {} not found and is not a downloadable URL",
                source.display()
            )),
        }
    }
}

/// Generate a handful of tokens to prove the model actually runs
#[inline]
pub fn smoke_test(generator: &dyn TextGenerator) -> Result<()> {
    let output = generator.generate(
        SMOKE_TEST_PROMPT,
        SMOKE_TEST_MAX_TOKENS,
        &StopSignal::default(),
        &mut |_| {},
    )?;
    if output.is_empty() {
        return Err(anyhow!("Model produced no output"));
    }
    debug!("Smoke test output: {:?}", output);
    Ok(())
}
