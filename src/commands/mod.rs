// Interactive front end
// Menu loop, chat loop and the index maintenance actions behind them

#[cfg(test)]
mod tests;

use anyhow::Result;
use console::{Alignment, pad_str, style};
use dialoguer::{Confirm, Input};
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::documents::{DocumentLoader, SUPPORTED_EXTENSIONS, bytes_to_mb};
use crate::embeddings::Embedder;
use crate::llm::{ModelManager, StopSignal};
use crate::query::{QueryEngine, format_sources};
use crate::vector_store::VectorStoreManager;

const RULE_WIDTH: usize = 60;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Entries of the main menu
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Chat,
    CreateIndex,
    UpdateIndex,
    ListDocuments,
    SystemInfo,
    Exit,
}

impl MenuChoice {
    #[inline]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "1" => Some(Self::Chat),
            "2" => Some(Self::CreateIndex),
            "3" => Some(Self::UpdateIndex),
            "4" => Some(Self::ListDocuments),
            "5" => Some(Self::SystemInfo),
            "6" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// What a line typed at the chat prompt asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    Exit,
    Help,
    List,
    Empty,
    Query(&'a str),
}

impl<'a> ChatCommand<'a> {
    #[inline]
    pub fn parse(input: &'a str) -> Self {
        let trimmed = input.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Self::Empty,
            "exit" | "quit" | "/exit" | "/quit" => Self::Exit,
            "help" | "/help" => Self::Help,
            "list" | "/list" => Self::List,
            _ => Self::Query(trimmed),
        }
    }
}

/// Ctrl-C while a dialoguer prompt is reading
fn is_interrupt(error: &dialoguer::Error) -> bool {
    match error {
        dialoguer::Error::IO(e) => e.kind() == io::ErrorKind::Interrupted,
    }
}

fn rule(ch: char) -> String {
    ch.to_string().repeat(RULE_WIDTH)
}

fn centered(text: &str) -> String {
    pad_str(text, RULE_WIDTH, Alignment::Center, None).into_owned()
}

/// Holds every component for the lifetime of the session
pub struct Assistant {
    config: Config,
    loader: DocumentLoader,
    embedder: Arc<dyn Embedder>,
    vector_store: VectorStoreManager,
    model_manager: ModelManager,
    query_engine: Option<QueryEngine>,
    stop: StopSignal,
}

impl std::fmt::Debug for Assistant {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("base_dir", &self.config.get_base_dir())
            .field("vector_store", &self.vector_store)
            .field("model_manager", &self.model_manager)
            .finish_non_exhaustive()
    }
}

impl Assistant {
    #[inline]
    pub fn new(config: Config, embedder: Arc<dyn Embedder>) -> Self {
        let loader = DocumentLoader::new(config.archive_dir());
        let vector_store = VectorStoreManager::new(&config, Arc::clone(&embedder));
        let model_manager = ModelManager::new(&config);
        info!("Archive directory: {}", config.archive_dir().display());
        Self {
            config,
            loader,
            embedder,
            vector_store,
            model_manager,
            query_engine: None,
            stop: StopSignal::default(),
        }
    }

    /// Signal that cuts the answer being streamed short
    #[inline]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Main menu loop. Action failures are reported and the menu comes back.
    #[inline]
    pub async fn run_menu(&mut self) -> Result<()> {
        self.print_header();

        loop {
            print_menu();
            let input = match Input::<String>::new()
                .with_prompt(">>> Select option (1-6)")
                .allow_empty(true)
                .interact_text()
            {
                Ok(input) => input,
                Err(e) if is_interrupt(&e) => {
                    println!("\n👋 Goodbye!");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let Some(choice) = MenuChoice::parse(&input) else {
                println!("{}", style("⚠️  Invalid choice. Please try again.").yellow());
                continue;
            };

            let result = match choice {
                MenuChoice::Chat => self.chat().await,
                MenuChoice::CreateIndex => self.create_vector_store(true).await,
                MenuChoice::UpdateIndex => self.update_vector_store().await,
                MenuChoice::ListDocuments => self.list_documents(),
                MenuChoice::SystemInfo => self.show_system_info().await,
                MenuChoice::Exit => {
                    println!("\n👋 Goodbye!");
                    self.vector_store.close();
                    return Ok(());
                }
            };

            if let Err(e) = result {
                error!("Menu error: {:#}", e);
                println!("{}", style(format!("❌ System error: {:#}", e)).red());
            }
            if choice != MenuChoice::Chat {
                pause()?;
            }
        }
    }

    /// Chat loop over the indexed documents
    #[inline]
    pub async fn chat(&mut self) -> Result<()> {
        println!("\n💬 Starting chat interface...");

        if !self.vector_store.exists() {
            println!(
                "{}",
                style("❌ No vector store found. Please create one first (option 2).").red()
            );
            return Ok(());
        }

        if !self.ensure_query_engine().await {
            println!("{}", style("❌ Failed to initialize query engine.").red());
            return Ok(());
        }
        let Some(engine) = self.query_engine.as_ref() else {
            return Ok(());
        };

        println!("\n{}", rule('='));
        println!(
            "{}",
            style("💬 CHAT MODE - Type 'exit' to return to menu").bold().cyan()
        );
        println!("💡 Tip: Ask questions about your documents! Type 'help' for commands.");
        println!("{}\n", rule('='));

        loop {
            let input = match Input::<String>::new()
                .with_prompt("You")
                .allow_empty(true)
                .interact_text()
            {
                Ok(input) => input,
                Err(e) if is_interrupt(&e) => {
                    println!();
                    break;
                }
                Err(e) => return Err(e.into()),
            };

            match ChatCommand::parse(&input) {
                ChatCommand::Exit => break,
                ChatCommand::Empty => {}
                ChatCommand::Help => print_chat_help(),
                ChatCommand::List => print_archive(&self.loader, &self.vector_store),
                ChatCommand::Query(question) => {
                    print!("\n{} ", style("🤖 Assistant:").bold().green());
                    let _ = io::stdout().flush();

                    let result = engine
                        .query(question, &mut |fragment| {
                            print!("{}", fragment);
                            let _ = io::stdout().flush();
                        })
                        .await;
                    println!();

                    match result {
                        Ok(response) if response.interrupted => {
                            println!("{}", style("⚠️  Interrupted").yellow());
                            println!();
                        }
                        Ok(response) if response.is_empty() => {
                            println!(
                                "{}",
                                style("⚠️  No response received. Please try again.").yellow()
                            );
                        }
                        Ok(response) => {
                            let sources = format_sources(&response.source_nodes);
                            if !sources.is_empty() {
                                println!("{}", sources);
                            }
                            println!();
                        }
                        Err(e) => {
                            error!("Query failed: {}", e);
                            println!("{}", style(format!("❌ Error: {}", e)).red());
                        }
                    }
                }
            }
        }

        println!("Returning to main menu...");
        Ok(())
    }

    /// Build the index from every archived document, replacing any existing
    /// one. With `confirm` set an existing index is only replaced after the
    /// user agrees.
    #[inline]
    pub async fn create_vector_store(&mut self, confirm: bool) -> Result<()> {
        println!("\n🔨 Creating vector store...");

        if confirm && self.vector_store.exists() {
            let rebuild = Confirm::new()
                .with_prompt("⚠️  Vector store already exists. Rebuild?")
                .default(false)
                .interact()?;
            if !rebuild {
                return Ok(());
            }
        }

        println!("📄 Loading documents from archive...");
        let documents = self.loader.load_all_documents();
        if documents.is_empty() {
            println!("{}", style("❌ No documents found in archive folder.").red());
            println!("📁 Please add documents to: {}", self.loader.archive_dir().display());
            println!("📋 Supported formats: {}", SUPPORTED_EXTENSIONS.join(", "));
            return Ok(());
        }
        println!("✅ Found {} documents", documents.len());

        println!("🔧 Building vector store...");
        self.query_engine = None;
        match self.vector_store.create_index(&documents, true).await {
            Ok(true) => println!("{}", style("✅ Vector store created successfully!").green()),
            Ok(false) => println!("{}", style("❌ Failed to create vector store.").red()),
            Err(e) => {
                error!("Failed to create vector store: {}", e);
                println!(
                    "{}",
                    style(format!("❌ Failed to create vector store: {}", e)).red()
                );
            }
        }
        Ok(())
    }

    /// Index archived documents that are not in the registry yet
    #[inline]
    pub async fn update_vector_store(&mut self) -> Result<()> {
        println!("\n🔄 Updating vector store...");

        if !self.vector_store.exists() {
            println!(
                "{}",
                style("❌ No vector store found. Please create one first (option 2).").red()
            );
            return Ok(());
        }

        if self.vector_store.has_pending_update() {
            warn!("Index registry may be out of sync with the index");
            println!(
                "{}",
                style(
                    "⚠️  A previous index update did not finish. Rebuilding the index (option 2) is advisable."
                )
                .yellow()
            );
        }

        let documents = self.loader.load_all_documents();
        let new_documents = self.vector_store.new_documents(&documents);
        if new_documents.is_empty() {
            println!("✅ No new documents found. Vector store is up to date.");
            return Ok(());
        }
        println!("📄 Found {} new documents", new_documents.len());

        println!("🔧 Adding new documents to vector store...");
        match self.vector_store.add_documents(&new_documents).await {
            Ok(true) => {
                println!("{}", style("✅ Vector store updated successfully!").green());
                self.query_engine = None;
            }
            Ok(false) => println!("{}", style("❌ Failed to update vector store.").red()),
            Err(e) => {
                error!("Failed to update vector store: {}", e);
                println!(
                    "{}",
                    style(format!("❌ Failed to update vector store: {}", e)).red()
                );
            }
        }
        Ok(())
    }

    #[inline]
    pub fn list_documents(&self) -> Result<()> {
        print_archive(&self.loader, &self.vector_store);
        Ok(())
    }

    #[inline]
    pub async fn show_system_info(&mut self) -> Result<()> {
        let llm = &self.config.llm;

        println!("\n{}", style("ℹ️  System Information:").bold().cyan());
        println!("{}", rule('-'));
        let config_file = self.config.config_file_path();
        if config_file.is_file() {
            println!("⚙️  Config file: {}", config_file.display());
        } else {
            println!("⚙️  Config file: {} (not present, using defaults)", config_file.display());
        }
        println!("📁 Archive directory: {}", self.config.archive_dir().display());
        println!("💾 Vector store: {}", self.config.vector_store_dir().display());
        println!("📦 Models directory: {}", self.config.models_dir().display());
        println!("🤖 LLM model: {}", self.model_manager.model_name());
        println!("🔤 Embedding model: {}", self.embedder.model_name());
        match self.config.ollama_url() {
            Ok(url) => println!("🌐 Ollama server: {}", url),
            Err(e) => println!("🌐 Ollama server: {}", e),
        }
        println!("🧵 CPU threads: {}", llm.threads);
        println!("🌡️  Temperature: {}", llm.temperature);
        println!("🪟 Context window: {}", llm.context_window);
        println!("📝 Max tokens: {}", llm.max_tokens);
        println!("📏 Chunk size: {}", self.config.chunking.chunk_size);
        println!("🔗 Chunk overlap: {}", self.config.chunking.chunk_overlap);
        println!(
            "🎯 Retrieval: top {} above {}",
            self.config.retrieval.top_k, self.config.retrieval.similarity_cutoff
        );

        let model_path = self.model_manager.model_path();
        match std::fs::metadata(&model_path) {
            Ok(metadata) if metadata.is_file() => println!(
                "\n{}",
                style(format!(
                    "✅ LLM model downloaded ({:.2} GB)",
                    metadata.len() as f64 / BYTES_PER_GB
                ))
                .green()
            ),
            _ => println!("\n{}", style("⚠️  LLM model not downloaded").yellow()),
        }

        if self.vector_store.exists() {
            println!("{}", style("✅ Vector store exists").green());
            println!(
                "   Documents indexed: {}",
                self.vector_store.get_indexed_documents().len()
            );
            match self.vector_store.chunk_count().await {
                Ok(count) => println!("   Chunks stored: {}", count),
                Err(e) => println!("   Chunks stored: unknown ({})", e),
            }
            if self.vector_store.has_pending_update() {
                println!(
                    "   {}",
                    style("⚠️  Last index update did not finish").yellow()
                );
            }
        } else {
            println!("{}", style("❌ Vector store not created").red());
        }
        Ok(())
    }

    /// Build the query engine on first use
    async fn ensure_query_engine(&mut self) -> bool {
        if self
            .query_engine
            .as_ref()
            .is_some_and(QueryEngine::is_initialized)
        {
            return true;
        }

        println!("🔧 Initializing query engine...");
        let mut engine =
            QueryEngine::new(self.config.retrieval.clone()).with_stop_signal(self.stop.clone());
        if !engine
            .initialize(&mut self.model_manager, &mut self.vector_store)
            .await
        {
            return false;
        }
        self.query_engine = Some(engine);
        true
    }

    fn print_header(&self) {
        println!("\n{}", rule('='));
        println!(
            "{}",
            style(centered("🤖 ragchat: Document Chat Assistant")).bold().cyan()
        );
        println!("{}", rule('='));
        println!(
            "{}",
            centered(&format!("📁 Archive: {}", self.config.archive_dir().display()))
        );
        println!(
            "{}",
            centered(&format!(
                "💾 Vector Store: {}",
                self.config.vector_store_dir().display()
            ))
        );
        println!("{}", rule('='));
    }
}

fn print_menu() {
    println!("\n{}", style("📋 MAIN MENU:").bold());
    println!("1. 💬 Chat with documents");
    println!("2. 🔨 Create/Rebuild vector index");
    println!("3. 🔄 Update index (add new documents)");
    println!("4. 📄 View document archive");
    println!("5. ℹ️  System information");
    println!("6. 🚪 Exit");
    println!("{}", rule('-'));
}

fn print_chat_help() {
    println!("\n{}", style("Commands:").bold());
    println!("  help         Show this message");
    println!("  list         List archived documents");
    println!("  exit, quit   Return to the main menu (Ctrl-C works too)");
    println!("Anything else is sent as a question about your documents.\n");
}

fn print_archive(loader: &DocumentLoader, vector_store: &VectorStoreManager) {
    println!("\n{}", style("📄 Documents in archive:").bold());
    println!("{}", "-".repeat(40));

    let stats = loader.archive_stats();
    if stats.files.is_empty() {
        println!("  ❌ No documents found in archive folder");
        println!("  📁 Add documents to: {}", loader.archive_dir().display());
    } else {
        for file in &stats.files {
            println!("  📄 {} ({:.2} MB)", file.name, bytes_to_mb(file.size_bytes));
        }
        println!("{}", "-".repeat(40));
        println!(
            "  Total: {} documents ({:.2} MB)",
            stats.total_files,
            stats.total_size_mb()
        );
        let by_type = stats
            .by_type
            .iter()
            .map(|(file_type, count)| format!("{} {}", count, file_type))
            .collect::<Vec<_>>()
            .join(", ");
        println!("  By type: {}", by_type);
    }

    if vector_store.exists() {
        let indexed_count = vector_store.get_indexed_documents().len();
        println!("\n  🔍 Indexed documents: {}", indexed_count);
        if indexed_count < stats.total_files {
            println!(
                "  {}",
                style(format!(
                    "⚠️  {} documents not indexed",
                    stats.total_files - indexed_count
                ))
                .yellow()
            );
        }
    } else {
        println!("\n  {}", style("⚠️  No vector store created yet").yellow());
    }
}

fn pause() -> Result<()> {
    match Input::<String>::new()
        .with_prompt("Press Enter to continue")
        .allow_empty(true)
        .show_default(false)
        .interact_text()
    {
        Ok(_) => Ok(()),
        Err(e) if is_interrupt(&e) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
