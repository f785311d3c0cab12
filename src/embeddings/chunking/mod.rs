#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

/// Sentence terminator followed by whitespace; the terminator stays with the
/// preceding sentence
static SENTENCE_BOUNDARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?<=[.!?])\s+").expect("valid regex"));

/// A contiguous piece of a document's text, the unit of embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text, including any overlap carried over from the previous chunk
    pub text: String,
    /// Position of this chunk within its document
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Configuration for document chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in tokens, overlap included
    pub chunk_size: usize,
    /// Tokens repeated from the end of the previous chunk
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    /// Size budget for the fresh text of a chunk, leaving room for the overlap
    fn body_budget(&self) -> usize {
        self.chunk_size.saturating_sub(self.chunk_overlap).max(1)
    }
}

/// Split a document's text into embedding-ready chunks
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextChunk>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let budget = config.body_budget();
    let splits = if estimate_token_count(text) <= budget {
        vec![text.trim().to_string()]
    } else {
        split_by_paragraphs(text, budget)?
    };

    let mut chunks: Vec<TextChunk> = splits
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .enumerate()
        .map(|(chunk_index, text)| TextChunk {
            token_count: estimate_token_count(&text),
            text,
            chunk_index,
        })
        .collect();

    if config.chunk_overlap > 0 {
        add_overlap(&mut chunks, config.chunk_overlap);
    }

    debug!(
        "Chunked text of {} chars into {} chunks (avg {} tokens)",
        text.len(),
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Pack whole paragraphs up to the budget, splitting oversized ones by sentence
fn split_by_paragraphs(content: &str, budget: usize) -> Result<Vec<String>> {
    let mut splits = Vec::new();
    let mut current_split = String::new();
    let mut current_token_count = 0;

    for paragraph in content.split("\n\n") {
        if paragraph.trim().is_empty() {
            continue;
        }

        let paragraph_tokens = estimate_token_count(paragraph);

        let pieces = if paragraph_tokens > budget {
            split_by_sentences(paragraph, budget)?
        } else {
            vec![paragraph.trim().to_string()]
        };

        for piece in pieces {
            let piece_tokens = estimate_token_count(&piece);
            if current_token_count + piece_tokens > budget && !current_split.trim().is_empty() {
                splits.push(current_split.trim().to_string());
                current_split.clear();
                current_token_count = 0;
            }

            current_split.push_str(&piece);
            current_split.push_str("\n\n");
            current_token_count += piece_tokens;
        }
    }

    if !current_split.trim().is_empty() {
        splits.push(current_split.trim().to_string());
    }

    Ok(splits)
}

/// Pack sentences up to the budget; a single oversized sentence falls back to
/// word splitting
fn split_by_sentences(text: &str, budget: usize) -> Result<Vec<String>> {
    let mut splits = Vec::new();
    let mut current_split = String::new();
    let mut current_token_count = 0;

    for sentence in sentences(text)? {
        let sentence_tokens = estimate_token_count(sentence);

        if sentence_tokens > budget {
            if !current_split.trim().is_empty() {
                splits.push(current_split.trim().to_string());
                current_split.clear();
                current_token_count = 0;
            }
            splits.extend(split_by_words(sentence, budget));
            continue;
        }

        if current_token_count + sentence_tokens > budget && !current_split.trim().is_empty() {
            splits.push(current_split.trim().to_string());
            current_split.clear();
            current_token_count = 0;
        }

        current_split.push_str(sentence);
        current_split.push(' ');
        current_token_count += sentence_tokens;
    }

    if !current_split.trim().is_empty() {
        splits.push(current_split.trim().to_string());
    }

    Ok(splits)
}

fn sentences(text: &str) -> Result<Vec<&str>> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        let boundary = boundary.context("Sentence boundary search failed")?;
        let sentence = text[start..boundary.start()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence);
        }
        start = boundary.end();
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }

    Ok(sentences)
}

/// Split text by words as a last resort
fn split_by_words(text: &str, budget: usize) -> Vec<String> {
    let mut splits = Vec::new();
    let mut current_split = String::new();
    let mut words = 0usize;
    let mut punct = 0usize;

    for word in text.split_whitespace() {
        let word_punct = word.chars().filter(|c| c.is_ascii_punctuation()).count();

        // Same formula as estimate_token_count, tracked incrementally
        let projected = ((punct + word_punct) as f64).mul_add(0.1, (words + 1) as f64 / 0.75);
        if projected as usize > budget && !current_split.trim().is_empty() {
            splits.push(current_split.trim().to_string());
            current_split.clear();
            words = 0;
            punct = 0;
        }

        current_split.push_str(word);
        current_split.push(' ');
        words += 1;
        punct += word_punct;
    }

    if !current_split.trim().is_empty() {
        splits.push(current_split.trim().to_string());
    }

    splits
}

/// Prefix every chunk after the first with the tail of its predecessor
fn add_overlap(chunks: &mut [TextChunk], overlap_tokens: usize) {
    for i in (1..chunks.len()).rev() {
        let overlap_text = extract_overlap_text(&chunks[i - 1].text, overlap_tokens);
        if overlap_text.is_empty() {
            continue;
        }
        let current = &mut chunks[i];
        current.text = format!("{} {}", overlap_text, current.text);
        current.token_count = estimate_token_count(&current.text);
    }
}

/// Extract overlap text from the end of a chunk
fn extract_overlap_text(content: &str, overlap_tokens: usize) -> String {
    let words: Vec<&str> = content.split_whitespace().collect();
    let word_count = (overlap_tokens as f64 * 0.75) as usize; // Rough word-to-token ratio

    if word_count == 0 || words.len() <= word_count {
        return String::new();
    }

    words[words.len() - word_count..].join(" ")
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
