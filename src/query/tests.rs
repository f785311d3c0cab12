use super::*;
use crate::config::{Config, OllamaConfig};
use crate::documents::{Document, DocumentMetadata};
use crate::test_support::{KEYWORD_DIMENSION, KeywordEmbedder, ScriptedGenerator};
use crate::vector_store::ChunkMetadata;
use std::time::Duration;
use tempfile::TempDir;

fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ollama: OllamaConfig {
            embedding_dimension: KEYWORD_DIMENSION as u32,
            ..OllamaConfig::default()
        },
        ..Config::default()
    };
    (config, temp_dir)
}

fn document(name: &str, text: &str) -> Document {
    Document {
        text: text.to_string(),
        metadata: DocumentMetadata {
            file_name: name.to_string(),
            file_type: ".txt".to_string(),
            encoding: Some("utf-8".to_string()),
            file_path: None,
            page_label: None,
        },
    }
}

fn chunk(file_name: &str, text: &str) -> RetrievedChunk {
    RetrievedChunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            file_name: file_name.to_string(),
            file_type: ".txt".to_string(),
            file_path: None,
            page_label: None,
        },
        chunk_index: 0,
        score: 0.9,
    }
}

/// Store indexed with `documents`, a model manager holding `generator` and an
/// engine initialized against both
async fn engine_over(
    config: &Config,
    documents: &[Document],
    generator: Arc<ScriptedGenerator>,
) -> QueryEngine {
    let mut store = VectorStoreManager::new(config, Arc::new(KeywordEmbedder))
        .with_delete_base_delay(Duration::from_millis(5));
    store
        .create_index(documents, false)
        .await
        .expect("create should succeed");

    let mut models = ModelManager::new(config).with_generator(generator);
    let mut engine = QueryEngine::new(config.retrieval.clone());
    assert!(engine.initialize(&mut models, &mut store).await);
    engine
}

#[tokio::test]
async fn query_before_initialize_is_an_error() {
    let engine = QueryEngine::new(RetrievalConfig::default());

    assert!(!engine.is_initialized());
    let result = engine.query("anything", &mut |_| {}).await;
    assert!(matches!(result, Err(RagError::NotInitialized)));
}

#[tokio::test]
async fn initialize_fails_without_index() {
    let (config, _temp_dir) = create_test_config();
    let mut store = VectorStoreManager::new(&config, Arc::new(KeywordEmbedder));
    let mut models =
        ModelManager::new(&config).with_generator(Arc::new(ScriptedGenerator::new("unused")));
    let mut engine = QueryEngine::new(config.retrieval.clone());

    assert!(!engine.initialize(&mut models, &mut store).await);
    assert!(!engine.is_initialized());
}

#[tokio::test]
async fn initialize_fails_without_model() {
    let (config, _temp_dir) = create_test_config();
    let mut store = VectorStoreManager::new(&config, Arc::new(KeywordEmbedder));
    store
        .create_index(&[document("a.txt", "Alpha content here.")], false)
        .await
        .expect("create should succeed");
    let mut config = config;
    config.llm.model = "absent.gguf".to_string();
    let mut models = ModelManager::new(&config);
    let mut engine = QueryEngine::new(config.retrieval.clone());

    assert!(!engine.initialize(&mut models, &mut store).await);
    assert!(!engine.is_initialized());
}

#[tokio::test]
async fn answers_from_relevant_document() {
    let (config, _temp_dir) = create_test_config();
    let generator = Arc::new(ScriptedGenerator::new("The capital is Lostcity."));
    let engine = engine_over(
        &config,
        &[
            document("freedonia.txt", "The capital of Freedonia is Lostcity."),
            document("bananas.txt", "Bananas need warm weather and plenty of rain."),
        ],
        Arc::clone(&generator),
    )
    .await;

    let mut streamed = String::new();
    let response = engine
        .query("What is the capital of Freedonia?", &mut |f| {
            streamed.push_str(f);
        })
        .await
        .expect("query should succeed");

    assert_eq!(response.answer, "The capital is Lostcity.");
    assert_eq!(streamed, response.answer);
    assert!(!response.is_empty());
    assert!(!response.interrupted);
    assert_eq!(response.source_nodes.len(), 1);
    assert_eq!(response.source_nodes[0].metadata.file_name, "freedonia.txt");

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("file_name: freedonia.txt"));
    assert!(prompts[0].contains("The capital of Freedonia is Lostcity."));
    assert!(!prompts[0].contains("Bananas"));
    assert!(
        prompts[0].contains("answer the question: What is the capital of Freedonia?")
    );

    let sources = format_sources(&response.source_nodes);
    assert!(sources.contains("📄 freedonia.txt"));
}

#[tokio::test]
async fn irrelevant_documents_fall_below_cutoff() {
    let (config, _temp_dir) = create_test_config();
    let generator = Arc::new(ScriptedGenerator::new(NO_ANSWER));
    let engine = engine_over(
        &config,
        &[
            document("bananas.txt", "Bananas need warm weather and plenty of rain."),
            document("cheese.txt", "Cheese making guide: curdle milk, press curds."),
        ],
        Arc::clone(&generator),
    )
    .await;

    let response = engine
        .query("What is the capital of Freedonia?", &mut |_| {})
        .await
        .expect("query should succeed");

    assert!(response.source_nodes.is_empty());
    assert_eq!(response.answer, NO_ANSWER);
    assert!(format_sources(&response.source_nodes).is_empty());

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(!prompts[0].contains("file_name:"));
}

#[tokio::test]
async fn empty_answer_is_reported_not_raised() {
    let (config, _temp_dir) = create_test_config();
    let engine = engine_over(
        &config,
        &[document("a.txt", "Alpha content here.")],
        Arc::new(ScriptedGenerator::new("")),
    )
    .await;

    let response = engine
        .query("alpha content", &mut |_| {})
        .await
        .expect("query should succeed");

    assert!(response.is_empty());
}

#[tokio::test]
async fn stop_request_keeps_partial_answer() {
    let (config, _temp_dir) = create_test_config();
    let generator = Arc::new(ScriptedGenerator::new("The capital is Lostcity."));
    let engine = engine_over(
        &config,
        &[document("freedonia.txt", "The capital of Freedonia is Lostcity.")],
        generator,
    )
    .await;
    let stop = engine.stop_signal();
    assert!(!stop.request());

    let mut streamed = String::new();
    let response = engine
        .query("What is the capital of Freedonia?", &mut |f| {
            streamed.push_str(f);
            stop.request();
        })
        .await
        .expect("an interrupted query still succeeds");

    assert!(response.interrupted);
    assert_eq!(response.answer, "The ");
    assert_eq!(streamed, "The ");
    assert_eq!(response.source_nodes.len(), 1);

    // The next question starts clean
    let response = engine
        .query("What is the capital of Freedonia?", &mut |_| {})
        .await
        .expect("query should succeed");
    assert!(!response.interrupted);
    assert_eq!(response.answer, "The capital is Lostcity.");
}

#[test]
fn prompt_contains_context_and_question() {
    let prompt = render_prompt("CONTEXT BLOCK", "QUESTION TEXT");

    assert!(prompt.contains("---------------------\nCONTEXT BLOCK\n---------------------"));
    assert!(prompt.contains("answer the question: QUESTION TEXT"));
    assert!(prompt.contains(NO_ANSWER));
    assert!(!prompt.contains("{context_str}"));
    assert!(!prompt.contains("{query_str}"));
}

#[test]
fn context_includes_page_labels() {
    let mut paged = chunk("manual.pdf", "Page two text.");
    paged.metadata.page_label = Some("2".to_string());

    let context = build_context(&[chunk("a.txt", "First."), paged]);

    assert_eq!(
        context,
        "file_name: a.txt\n\nFirst.\n\nfile_name: manual.pdf\npage_label: 2\n\nPage two text."
    );
}

#[test]
fn sources_truncate_long_snippets() {
    let long_text = format!("{}\n{}", "a".repeat(150), "b".repeat(100));

    let sources = format_sources(&[chunk("long.txt", &long_text)]);

    let expected_snippet = format!("{} {}...", "a".repeat(150), "b".repeat(49));
    assert_eq!(
        sources,
        format!("\n📚 Sources:\n\n  📄 long.txt\n     \"{}\"", expected_snippet)
    );
}

#[test]
fn sources_keep_short_snippets_whole() {
    let sources = format_sources(&[chunk("short.txt", "  Short\nnote.  ")]);

    assert!(sources.ends_with("\"Short note.\""));
    assert!(!sources.contains("..."));
}

#[test]
fn sources_deduplicate_files() {
    let sources = format_sources(&[
        chunk("same.txt", "First chunk."),
        chunk("same.txt", "Second chunk."),
        chunk("other.txt", "Other chunk."),
    ]);

    assert_eq!(sources.matches("📄 same.txt").count(), 1);
    assert!(sources.contains("First chunk."));
    assert!(!sources.contains("Second chunk."));
    assert!(sources.contains("📄 other.txt"));
}

#[test]
fn sources_consider_first_three_nodes_only() {
    let sources = format_sources(&[
        chunk("one.txt", "1"),
        chunk("two.txt", "2"),
        chunk("three.txt", "3"),
        chunk("four.txt", "4"),
    ]);

    assert!(sources.contains("three.txt"));
    assert!(!sources.contains("four.txt"));
}

#[test]
fn sources_empty_without_nodes() {
    assert_eq!(format_sources(&[]), "");
}
