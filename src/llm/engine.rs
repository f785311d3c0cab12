// In-process GGUF inference through llama.cpp

use anyhow::{Result, anyhow};
use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::{AddBos, LlamaModel, Special, params::LlamaModelParams},
    sampling::LlamaSampler,
};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{StopSignal, TextGenerator};

/// llama.cpp may only be initialised once per process
static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();

fn backend() -> Result<&'static LlamaBackend> {
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }
    let backend =
        LlamaBackend::init().map_err(|e| anyhow!("Failed to initialize backend: {:?}", e))?;
    Ok(BACKEND.get_or_init(|| backend))
}

/// Inference settings fixed at load time
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub threads: u32,
    pub batch_size: u32,
    pub context_window: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Drop NUL and other control characters that break C string handling.
/// PDF extraction in particular can leave them in chunk text.
fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter(|c| *c != '\0' && (*c >= ' ' || matches!(*c, '\t' | '\n' | '\r')))
        .collect()
}

/// A loaded GGUF model running on the CPU
pub struct LlamaGenerator {
    model: LlamaModel,
    params: GenerationParams,
}

impl std::fmt::Debug for LlamaGenerator {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlamaGenerator")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl LlamaGenerator {
    /// Load the model at `path` with every layer on the CPU
    #[inline]
    pub fn load(path: &Path, params: GenerationParams) -> Result<Self> {
        let backend = backend()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(0);

        info!("Loading model from {}", path.display());
        let model = LlamaModel::load_from_file(backend, path, &model_params)
            .map_err(|e| anyhow!("Failed to load model: {:?}", e))?;

        Ok(Self { model, params })
    }

    #[inline]
    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    fn sampler(&self) -> LlamaSampler {
        if self.params.temperature <= 0.0 {
            LlamaSampler::greedy()
        } else {
            LlamaSampler::chain_simple([
                LlamaSampler::temp(self.params.temperature),
                LlamaSampler::dist(rand_seed()),
            ])
        }
    }
}

fn rand_seed() -> u32 {
    // Sub-second clock bits are plenty for sampling diversity
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.subsec_nanos())
}

impl TextGenerator for LlamaGenerator {
    #[inline]
    fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        stop: &StopSignal,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String> {
        let backend = backend()?;
        let prompt = sanitize_prompt(prompt);

        let prompt_tokens = self
            .model
            .str_to_token(&prompt, AddBos::Always)
            .map_err(|e| anyhow!("Failed to tokenize: {:?}", e))?;
        if prompt_tokens.is_empty() {
            return Err(anyhow!("Prompt produced no tokens"));
        }

        let n_ctx = self.params.context_window as usize;
        if prompt_tokens.len() >= n_ctx {
            return Err(anyhow!(
                "Prompt is {} tokens, context window is {}",
                prompt_tokens.len(),
                n_ctx
            ));
        }
        let budget = (max_tokens as usize).min(n_ctx - prompt_tokens.len());

        let threads = self.params.threads.max(super::MIN_THREADS) as i32;
        let batch_size = self.params.batch_size.max(1) as usize;
        let ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(self.params.context_window))
            .with_n_batch(self.params.batch_size)
            .with_n_threads(threads)
            .with_n_threads_batch(threads);

        let mut context = self
            .model
            .new_context(backend, ctx_params)
            .map_err(|e| anyhow!("Failed to create context: {:?}", e))?;

        let mut batch = LlamaBatch::new(batch_size, 1);

        // Feed the prompt in batch-sized slices, requesting logits only for
        // the final token
        let last = prompt_tokens.len() - 1;
        for (slice_index, slice) in prompt_tokens.chunks(batch_size).enumerate() {
            batch.clear();
            for (offset, &token) in slice.iter().enumerate() {
                let position = slice_index * batch_size + offset;
                batch
                    .add(token, position as i32, &[0], position == last)
                    .map_err(|e| anyhow!("Failed to add token to batch: {:?}", e))?;
            }
            context
                .decode(&mut batch)
                .map_err(|e| anyhow!("Decode failed: {:?}", e))?;
        }

        debug!(
            "Generating up to {} tokens after a {} token prompt",
            budget,
            prompt_tokens.len()
        );

        let mut sampler = self.sampler();
        let eos = self.model.token_eos();
        let mut output = String::new();
        let mut pending_bytes: Vec<u8> = Vec::new();
        let mut n_cur = prompt_tokens.len();

        for _ in 0..budget {
            if stop.is_requested() {
                info!("Generation stopped after {} tokens", n_cur - prompt_tokens.len());
                break;
            }
            let token = sampler.sample(&context, -1);
            if token == eos {
                break;
            }

            match self.model.token_to_bytes(token, Special::Plaintext) {
                Ok(bytes) => {
                    pending_bytes.extend_from_slice(&bytes);
                    let fragment = take_complete_utf8(&mut pending_bytes);
                    if !fragment.is_empty() {
                        on_fragment(&fragment);
                        output.push_str(&fragment);
                    }
                }
                Err(e) => warn!("Skipping undecodable token {}: {:?}", token, e),
            }

            batch.clear();
            batch
                .add(token, n_cur as i32, &[0], true)
                .map_err(|e| anyhow!("Failed to add token: {:?}", e))?;
            context
                .decode(&mut batch)
                .map_err(|e| anyhow!("Decode failed: {:?}", e))?;
            n_cur += 1;
        }

        if !pending_bytes.is_empty() {
            let tail = String::from_utf8_lossy(&pending_bytes).into_owned();
            on_fragment(&tail);
            output.push_str(&tail);
        }

        debug!(
            "Generated {} tokens ({} chars)",
            n_cur - prompt_tokens.len(),
            output.len()
        );
        Ok(output)
    }

    #[inline]
    fn default_max_tokens(&self) -> u32 {
        self.params.max_tokens
    }
}

/// Remove and return the decodable prefix of `buffer`, leaving an incomplete
/// trailing sequence for the next token. Invalid bytes are replaced.
pub(crate) fn take_complete_utf8(buffer: &mut Vec<u8>) -> String {
    let mut text = String::new();
    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                text.push_str(valid);
                buffer.clear();
                return text;
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                match e.error_len() {
                    // Incomplete sequence at the end: keep it for later
                    None => {
                        let rest = buffer.split_off(valid_up_to);
                        text.push_str(&String::from_utf8_lossy(buffer));
                        *buffer = rest;
                        return text;
                    }
                    Some(invalid_len) => {
                        let rest = buffer.split_off(valid_up_to + invalid_len);
                        text.push_str(&String::from_utf8_lossy(buffer));
                        *buffer = rest;
                    }
                }
            }
        }
    }
}
