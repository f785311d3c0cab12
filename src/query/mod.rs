// Query engine module
// Retrieves relevant chunks, renders the QA prompt and streams the answer

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::RetrievalConfig;
use crate::llm::{ModelManager, StopSignal, TextGenerator};
use crate::vector_store::{RetrievedChunk, VectorIndex, VectorStoreManager};
use crate::{RagError, Result};

pub const NO_ANSWER: &str =
    "I don't have enough information in the documents to answer that question.";

pub const QA_PROMPT_TEMPLATE: &str = "You are a helpful assistant that answers questions based on the provided documents.\n\
Be concise and accurate in your responses.\n\n\
Context information is below.\n\
---------------------\n\
{context_str}\n\
---------------------\n\
Given the context information, answer the question: {query_str}\n\
If you cannot find the answer in the provided context, say 'I don't have enough information in the documents to answer that question.'\n";

/// Sources listed under an answer
pub const MAX_SOURCES: usize = 3;
/// Characters of chunk text shown per source
pub const SNIPPET_CHARS: usize = 200;

/// Fill the QA template
#[inline]
pub fn render_prompt(context_str: &str, query_str: &str) -> String {
    QA_PROMPT_TEMPLATE
        .replace("{context_str}", context_str)
        .replace("{query_str}", query_str)
}

/// Context block handed to the model: each chunk preceded by its origin
#[inline]
pub fn build_context(nodes: &[RetrievedChunk]) -> String {
    nodes
        .iter()
        .map(|node| match &node.metadata.page_label {
            Some(page) => format!(
                "file_name: {}\npage_label: {}\n\n{}",
                node.metadata.file_name, page, node.text
            ),
            None => format!("file_name: {}\n\n{}", node.metadata.file_name, node.text),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Human readable list of where an answer came from.
///
/// Looks at the first [`MAX_SOURCES`] nodes only and shows each file once.
#[inline]
pub fn format_sources(nodes: &[RetrievedChunk]) -> String {
    let mut output = vec!["\n📚 Sources:".to_string()];
    let mut seen_files = HashSet::new();

    for node in nodes.iter().take(MAX_SOURCES) {
        let file_name = if node.metadata.file_name.is_empty() {
            "Unknown"
        } else {
            node.metadata.file_name.as_str()
        };
        if !seen_files.insert(file_name) {
            continue;
        }

        output.push(format!("\n  📄 {}", file_name));
        output.push(format!("     \"{}\"", snippet(&node.text)));
    }

    if output.len() > 1 {
        output.join("\n")
    } else {
        String::new()
    }
}

fn snippet(text: &str) -> String {
    let mut snippet: String = text.chars().take(SNIPPET_CHARS).collect();
    if text.chars().count() > SNIPPET_CHARS {
        snippet.push_str("...");
    }
    snippet.replace('\n', " ").trim().to_string()
}

/// Answer plus the chunks it was grounded on
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResponse {
    pub answer: String,
    pub source_nodes: Vec<RetrievedChunk>,
    /// Generation was stopped before it finished
    pub interrupted: bool,
}

impl QueryResponse {
    /// The model produced nothing printable
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.answer.trim().is_empty()
    }
}

pub struct QueryEngine {
    retrieval: RetrievalConfig,
    generator: Option<Arc<dyn TextGenerator>>,
    index: Option<VectorIndex>,
    stop: StopSignal,
}

impl std::fmt::Debug for QueryEngine {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("retrieval", &self.retrieval)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl QueryEngine {
    #[inline]
    pub fn new(retrieval: RetrievalConfig) -> Self {
        Self {
            retrieval,
            generator: None,
            index: None,
            stop: StopSignal::default(),
        }
    }

    /// Share `stop` so another task can cut a running answer short
    #[inline]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    #[inline]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Bind the model and the index. Loads either one on demand; returns
    /// `false` (after logging) when one of them is unavailable.
    #[inline]
    pub async fn initialize(
        &mut self,
        model_manager: &mut ModelManager,
        vector_store: &mut VectorStoreManager,
    ) -> bool {
        if model_manager.generator().is_none() {
            info!("Initializing language model");
            if !model_manager.initialize() {
                error!("Failed to initialize language model");
                return false;
            }
        }
        let Some(generator) = model_manager.generator() else {
            error!("Language model is not available");
            return false;
        };

        if !vector_store.is_loaded() {
            match vector_store.load_index().await {
                Ok(true) => {}
                Ok(false) => {
                    error!("No vector index available");
                    return false;
                }
                Err(e) => {
                    error!("Error loading vector index: {}", e);
                    return false;
                }
            }
        }
        let Some(index) = vector_store.index() else {
            error!("No vector index available");
            return false;
        };

        self.generator = Some(generator);
        self.index = Some(index);
        info!("Query engine initialized successfully");
        true
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.generator.is_some() && self.index.is_some()
    }

    /// Answer `text`, passing streamed fragments to `on_fragment`
    #[inline]
    pub async fn query(
        &self,
        text: &str,
        on_fragment: &mut (dyn FnMut(&str) + Send),
    ) -> Result<QueryResponse> {
        let (Some(generator), Some(index)) = (&self.generator, &self.index) else {
            return Err(RagError::NotInitialized);
        };

        let retrieved = index.search(text, self.retrieval.top_k).await?;
        let retrieved_count = retrieved.len();
        let source_nodes: Vec<RetrievedChunk> = retrieved
            .into_iter()
            .filter(|node| node.score >= self.retrieval.similarity_cutoff)
            .collect();
        debug!(
            "Kept {} of {} retrieved chunks above cutoff {}",
            source_nodes.len(),
            retrieved_count,
            self.retrieval.similarity_cutoff
        );

        let prompt = render_prompt(&build_context(&source_nodes), text);
        self.stop.begin();
        let generated = generator.generate(
            &prompt,
            generator.default_max_tokens(),
            &self.stop,
            on_fragment,
        );
        self.stop.finish();
        let answer = generated.map_err(|e| RagError::Query(format!("{:#}", e)))?;

        let interrupted = self.stop.is_requested();
        if interrupted {
            info!("Answer interrupted after {} chars", answer.len());
        }

        Ok(QueryResponse {
            answer,
            source_nodes,
            interrupted,
        })
    }
}
