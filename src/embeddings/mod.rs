// Embeddings module
// Chunking policy for documents and the Ollama embedding client

pub mod chunking;
pub mod ollama;

pub use chunking::{ChunkingConfig, TextChunk, chunk_text, estimate_token_count};
pub use ollama::OllamaClient;

use anyhow::Result;

/// Text to vector function used for both indexing and querying.
///
/// Implementations are blocking; callers on the async side invoke them
/// directly since only one request is in flight at a time.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order
    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string
    #[inline]
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_texts(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedder returned no vector for query"))
    }

    /// Identifier of the embedding model, shown in system information
    fn model_name(&self) -> &str;
}
