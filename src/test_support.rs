// Deterministic stand-ins for the embedding server and the language model

use anyhow::Result;
use std::sync::Mutex;

use crate::embeddings::Embedder;
use crate::llm::{StopSignal, TextGenerator};

pub(crate) const KEYWORD_DIMENSION: usize = 64;

const STOP_WORDS: [&str; 10] = [
    "what", "which", "does", "that", "this", "with", "from", "have", "there", "about",
];

/// Bag-of-keywords embedder: words of four or more letters are hashed into
/// buckets, so texts sharing keywords score high and unrelated texts score
/// near zero
pub(crate) struct KeywordEmbedder;

fn fnv1a(word: &str) -> u64 {
    word.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

pub(crate) fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0_f32; KEYWORD_DIMENSION];
    let lowered = text.to_lowercase();
    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if word.len() < 4 || STOP_WORDS.contains(&word) {
            continue;
        }
        let bucket = (fnv1a(word) % (KEYWORD_DIMENSION as u64 - 1)) as usize;
        vector[bucket] += 1.0;
    }
    // Reserved bucket keeps keyword-free text away from the zero vector
    if vector.iter().all(|v| *v == 0.0) {
        vector[KEYWORD_DIMENSION - 1] = 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    vector.iter_mut().for_each(|v| *v /= norm);
    vector
}

impl Embedder for KeywordEmbedder {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }
}

/// Embedder that refuses any text containing `poison`
pub(crate) struct FailingEmbedder {
    pub poison: &'static str,
}

impl Embedder for FailingEmbedder {
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.contains(self.poison)) {
            anyhow::bail!("embedding refused");
        }
        KeywordEmbedder.embed_texts(texts)
    }

    fn model_name(&self) -> &str {
        "failing-test"
    }
}

/// Generator that replays a fixed reply word by word and records prompts
pub(crate) struct ScriptedGenerator {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub(crate) fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(
        &self,
        prompt: &str,
        _max_tokens: u32,
        stop: &StopSignal,
        on_fragment: &mut dyn FnMut(&str),
    ) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let mut output = String::new();
        for fragment in self.reply.split_inclusive(' ') {
            if stop.is_requested() {
                break;
            }
            on_fragment(fragment);
            output.push_str(fragment);
        }
        Ok(output)
    }

    fn default_max_tokens(&self) -> u32 {
        64
    }
}
