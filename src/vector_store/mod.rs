// Vector store module
// Persists chunk embeddings in LanceDB and keeps the indexed document registry

pub mod records;
pub mod registry;


use arrow::array::RecordBatchIterator;
use futures::TryStreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub use records::{ChunkMetadata, ChunkRecord, RetrievedChunk};
pub use registry::DocumentRegistry;

use crate::config::Config;
use crate::documents::Document;
use crate::embeddings::{ChunkingConfig, Embedder, chunk_text};
use crate::{RagError, Result};

pub const TABLE_NAME: &str = "documents";

const DELETE_ATTEMPTS: u32 = 3;
const DELETE_BASE_DELAY: Duration = Duration::from_millis(500);
/// Chunks sent to the embedder per request while indexing
const EMBED_BATCH_SIZE: usize = 32;

fn database_error(context: &'static str) -> impl FnOnce(lancedb::Error) -> RagError {
    move |e| RagError::Database(format!("{}: {}", context, e))
}

/// Name recorded in the registry for the `index`-th document of a batch
#[inline]
pub fn registry_name(document: &Document, index: usize) -> String {
    if document.metadata.file_name.is_empty() {
        format!("document_{}", index)
    } else {
        document.metadata.file_name.clone()
    }
}

/// Retrieval handle over an open `documents` table
#[derive(Clone)]
pub struct VectorIndex {
    table: Table,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for VectorIndex {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("table", &self.table.name())
            .field("embedder", &self.embedder.model_name())
            .finish()
    }
}

impl VectorIndex {
    /// The `top_k` chunks closest to `query` by cosine similarity, best first
    #[inline]
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed_query(query)
            .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;

        debug!("Searching index for top {} chunks", top_k);

        let mut stream = self
            .table
            .vector_search(query_vector)
            .map_err(database_error("Failed to create vector search"))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(database_error("Failed to execute search"))?;

        let mut chunks = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(database_error("Failed to read result stream"))?
        {
            chunks.extend(records::batch_to_chunks(&batch)?);
        }

        chunks.sort_by(|a, b| b.score.total_cmp(&a.score));
        chunks.truncate(top_k);

        debug!("Retrieved {} chunks", chunks.len());
        Ok(chunks)
    }
}

/// Owns the on-disk index directory and its registry
pub struct VectorStoreManager {
    store_dir: PathBuf,
    chunking: ChunkingConfig,
    fallback_dimension: usize,
    embedder: Arc<dyn Embedder>,
    registry: DocumentRegistry,
    connection: Option<Connection>,
    table: Option<Table>,
    delete_base_delay: Duration,
    remover: fn(&Path) -> std::io::Result<()>,
}

impl std::fmt::Debug for VectorStoreManager {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreManager")
            .field("store_dir", &self.store_dir)
            .field("chunking", &self.chunking)
            .field("loaded", &self.table.is_some())
            .finish_non_exhaustive()
    }
}

impl VectorStoreManager {
    #[inline]
    pub fn new(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        let store_dir = config.vector_store_dir();
        Self {
            registry: DocumentRegistry::new(&store_dir),
            store_dir,
            chunking: config.chunking.clone(),
            fallback_dimension: config.ollama.embedding_dimension as usize,
            embedder,
            connection: None,
            table: None,
            delete_base_delay: DELETE_BASE_DELAY,
            remover: |path| std::fs::remove_dir_all(path),
        }
    }

    /// Shorten the wait between deletion attempts
    #[inline]
    pub fn with_delete_base_delay(mut self, delay: Duration) -> Self {
        self.delete_base_delay = delay;
        self
    }

    /// Replace the function used to delete the store directory on overwrite
    #[inline]
    pub fn with_remover(mut self, remover: fn(&Path) -> std::io::Result<()>) -> Self {
        self.remover = remover;
        self
    }

    #[inline]
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.store_dir.exists()
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.table.is_some()
    }

    /// Whether an earlier index mutation was interrupted
    #[inline]
    pub fn has_pending_update(&self) -> bool {
        self.registry.is_pending()
    }

    /// Build a fresh index from `documents`.
    ///
    /// Returns `Ok(false)` without touching anything when an index already
    /// exists and `overwrite` is not set.
    #[inline]
    pub async fn create_index(&mut self, documents: &[Document], overwrite: bool) -> Result<bool> {
        if self.exists() && !overwrite {
            info!(
                "Vector store already exists at {}. Use overwrite to recreate it.",
                self.store_dir.display()
            );
            return Ok(false);
        }

        if overwrite && self.exists() {
            info!("Removing existing vector store");
            if !self.remove_store_dir().await {
                error!(
                    "Could not delete {}; recreating the table in place",
                    self.store_dir.display()
                );
            }
        }

        std::fs::create_dir_all(&self.store_dir)?;
        self.registry.begin_mutation()?;

        info!("Creating vector store from {} documents", documents.len());

        let records = self.embed_documents(documents)?;
        let dimension = records
            .first()
            .map_or(self.fallback_dimension, |r| r.vector.len());

        let connection = self.connect().await?;
        drop_table_if_exists(&connection).await?;

        let table = if records.is_empty() {
            connection
                .create_empty_table(TABLE_NAME, records::table_schema(dimension))
                .execute()
                .await
                .map_err(database_error("Failed to create table"))?
        } else {
            let batch = records::records_to_batch(&records, dimension)?;
            let schema = batch.schema();
            let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
            connection
                .create_table(TABLE_NAME, reader)
                .execute()
                .await
                .map_err(database_error("Failed to create table"))?
        };

        let names: BTreeSet<String> = documents
            .iter()
            .enumerate()
            .map(|(i, document)| registry_name(document, i))
            .collect();
        self.registry.save(&names)?;
        self.registry.finish_mutation()?;

        info!(
            "Vector store created with {} chunks from {} documents",
            records.len(),
            names.len()
        );

        self.connection = Some(connection);
        self.table = Some(table);
        Ok(true)
    }

    /// Open an existing index. `Ok(false)` when there is nothing to open.
    #[inline]
    pub async fn load_index(&mut self) -> Result<bool> {
        if !self.exists() {
            debug!("No vector store at {}", self.store_dir.display());
            return Ok(false);
        }
        if !self.registry.exists() {
            warn!(
                "Vector store at {} has no document registry",
                self.store_dir.display()
            );
            return Ok(false);
        }
        if self.registry.is_pending() {
            warn!("An earlier index update did not finish; consider rebuilding the index");
        }

        let connection = self.connect().await?;
        let table_names = connection
            .table_names()
            .execute()
            .await
            .map_err(database_error("Failed to list tables"))?;
        if !table_names.iter().any(|name| name == TABLE_NAME) {
            warn!("Vector store has no {} table", TABLE_NAME);
            return Ok(false);
        }

        let table = connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(database_error("Failed to open table"))?;

        info!("Loaded vector store from {}", self.store_dir.display());
        self.connection = Some(connection);
        self.table = Some(table);
        Ok(true)
    }

    /// Append `documents` to the existing index one at a time.
    ///
    /// Documents that fail are logged and skipped. Returns whether at least
    /// one document was added.
    #[inline]
    pub async fn add_documents(&mut self, documents: &[Document]) -> Result<bool> {
        if !self.exists() {
            warn!("Cannot add documents: no vector store exists");
            return Ok(false);
        }
        if self.table.is_none() && !self.load_index().await? {
            warn!("Cannot add documents: vector store could not be loaded");
            return Ok(false);
        }
        let Some(table) = self.table.clone() else {
            return Ok(false);
        };

        let mut names = match self.registry.try_load() {
            Ok(names) => names,
            Err(e) => {
                error!("Document registry unreadable, rebuild the index: {:#}", e);
                return Ok(false);
            }
        };
        self.registry.begin_mutation()?;

        let dimension = match table.schema().await {
            Ok(schema) => records::schema_dimension(&schema).unwrap_or(self.fallback_dimension),
            Err(e) => {
                warn!("Could not read table schema: {}", e);
                self.fallback_dimension
            }
        };

        let mut added = 0_usize;
        for (i, document) in documents.iter().enumerate() {
            let name = registry_name(document, i);
            match self.append_document(&table, document, dimension).await {
                Ok(chunks) => {
                    debug!("Added {} ({} chunks)", name, chunks);
                    names.insert(name);
                    added += 1;
                }
                Err(e) => error!("Error adding document {}: {}", name, e),
            }
        }

        self.registry.save(&names)?;
        self.registry.finish_mutation()?;

        info!("Added {} of {} documents", added, documents.len());
        Ok(added > 0)
    }

    /// Names of the documents recorded in the registry
    #[inline]
    pub fn get_indexed_documents(&self) -> BTreeSet<String> {
        self.registry.load()
    }

    /// Named documents not yet in the registry. Unnamed documents only get
    /// positional names, which are not stable across batches, so they are
    /// never considered new.
    #[inline]
    pub fn new_documents(&self, documents: &[Document]) -> Vec<Document> {
        let indexed = self.get_indexed_documents();
        documents
            .iter()
            .filter(|document| {
                let name = &document.metadata.file_name;
                !name.is_empty() && !indexed.contains(name)
            })
            .cloned()
            .collect()
    }

    #[inline]
    pub fn index(&self) -> Option<VectorIndex> {
        self.table.as_ref().map(|table| VectorIndex {
            table: table.clone(),
            embedder: Arc::clone(&self.embedder),
        })
    }

    /// Number of chunks stored in the index
    #[inline]
    pub async fn chunk_count(&mut self) -> Result<usize> {
        if self.table.is_none() && !self.load_index().await? {
            return Ok(0);
        }
        let Some(table) = &self.table else {
            return Ok(0);
        };
        table
            .count_rows(None)
            .await
            .map_err(database_error("Failed to count rows"))
    }

    /// Release the connection and table handles
    #[inline]
    pub fn close(&mut self) {
        if self.table.is_some() || self.connection.is_some() {
            debug!("Closing vector store handles");
        }
        self.table = None;
        self.connection = None;
    }

    async fn connect(&self) -> Result<Connection> {
        let uri = self.store_dir.to_string_lossy();
        debug!("Connecting to LanceDB at {}", uri);
        lancedb::connect(&uri)
            .execute()
            .await
            .map_err(database_error("Failed to connect to LanceDB"))
    }

    /// Delete the store directory, retrying with backoff while something
    /// still holds files open
    async fn remove_store_dir(&mut self) -> bool {
        for attempt in 1..=DELETE_ATTEMPTS {
            self.close();

            match (self.remover)(&self.store_dir) {
                Ok(()) => {
                    debug!("Deleted {} on attempt {}", self.store_dir.display(), attempt);
                    return true;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return true,
                Err(e) => {
                    warn!(
                        "Failed to delete vector store (attempt {}/{}): {}",
                        attempt, DELETE_ATTEMPTS, e
                    );
                    if attempt < DELETE_ATTEMPTS {
                        let delay = self.delete_base_delay.saturating_mul(1 << (attempt - 1));
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        false
    }

    async fn append_document(
        &self,
        table: &Table,
        document: &Document,
        dimension: usize,
    ) -> anyhow::Result<usize> {
        let records = self.document_records(document)?;
        if records.is_empty() {
            return Ok(0);
        }

        let batch = records::records_to_batch(&records, dimension)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(batch)), schema);
        table.add(reader).execute().await?;
        Ok(records.len())
    }

    /// Chunk and embed every document behind a progress bar
    fn embed_documents(&self, documents: &[Document]) -> Result<Vec<ChunkRecord>> {
        let mut pending = Vec::new();
        for document in documents {
            let chunks = chunk_text(&document.text, &self.chunking)?;
            pending.extend(chunks.into_iter().map(|chunk| (document, chunk)));
        }

        let bar = progress_bar(pending.len() as u64);
        let mut records = Vec::with_capacity(pending.len());
        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|(_, chunk)| chunk.text.clone()).collect();
            let vectors = self
                .embedder
                .embed_texts(&texts)
                .map_err(|e| RagError::Embedding(format!("{:#}", e)))?;
            if vectors.len() != texts.len() {
                return Err(RagError::Embedding(format!(
                    "Embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    texts.len()
                )));
            }

            records.extend(
                batch
                    .iter()
                    .zip(vectors)
                    .map(|((document, chunk), vector)| {
                        build_record(document, chunk.chunk_index, &chunk.text, vector)
                    }),
            );
            bar.inc(batch.len() as u64);
        }
        bar.finish_and_clear();

        Ok(records)
    }

    fn document_records(&self, document: &Document) -> anyhow::Result<Vec<ChunkRecord>> {
        let chunks = chunk_text(&document.text, &self.chunking)?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_texts(&texts)?;
        if vectors.len() != chunks.len() {
            anyhow::bail!(
                "Embedder returned {} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            );
        }

        Ok(chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| build_record(document, chunk.chunk_index, &chunk.text, vector))
            .collect())
    }
}

fn build_record(
    document: &Document,
    chunk_index: usize,
    text: &str,
    vector: Vec<f32>,
) -> ChunkRecord {
    ChunkRecord {
        id: uuid::Uuid::new_v4().to_string(),
        vector,
        metadata: ChunkMetadata {
            file_name: document.metadata.file_name.clone(),
            file_type: document.metadata.file_type.clone(),
            file_path: document
                .metadata
                .file_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            page_label: document.metadata.page_label.clone(),
        },
        chunk_index: chunk_index as u32,
        text: text.to_string(),
        indexed_at: chrono::Utc::now().to_rfc3339(),
    }
}

async fn drop_table_if_exists(connection: &Connection) -> Result<()> {
    let table_names = connection
        .table_names()
        .execute()
        .await
        .map_err(database_error("Failed to list tables for drop"))?;

    if table_names.iter().any(|name| name == TABLE_NAME) {
        info!("Dropping existing {} table", TABLE_NAME);
        connection
            .drop_table(TABLE_NAME)
            .await
            .map_err(database_error("Failed to drop table"))?;
    }
    Ok(())
}

fn progress_bar(len: u64) -> ProgressBar {
    if console::user_attended_stderr() {
        ProgressBar::new(len).with_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} Embedding chunks")
                .expect("style template is valid"),
        )
    } else {
        ProgressBar::hidden()
    }
}
