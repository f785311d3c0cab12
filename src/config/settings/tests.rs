use super::*;
use std::collections::HashMap;
use tempfile::TempDir;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "bge-m3");
    assert_eq!(config.llm.model, DEFAULT_LLM_URL);
    assert!((config.llm.temperature - 0.3).abs() < f32::EPSILON);
    assert_eq!(config.llm.max_tokens, 1024);
    assert_eq!(config.llm.context_window, 4096);
    assert_eq!(config.chunking.chunk_size, 512);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.retrieval.top_k, 5);
    assert!(config.llm.threads >= 1);
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.temperature = 3.5;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.threads = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.llm.max_tokens = 10_000;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::OverlapTooLarge(512, 512))
    ));

    let mut invalid_config = config;
    invalid_config.retrieval.similarity_cutoff = 1.5;
    assert!(invalid_config.validate().is_err());
}

#[test]
fn env_overrides_apply() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let lookup = env_from(&[
        ("LLM_MODEL", "/opt/models/tiny.gguf"),
        ("EMBEDDING_MODEL", "nomic-embed-text"),
        ("NUM_THREADS", "2"),
        ("TEMPERATURE", "0.7"),
        ("MAX_TOKENS", "256"),
        ("CHUNK_SIZE", "256"),
        ("CHUNK_OVERLAP", "20"),
    ]);

    let config = Config::load_with_env(temp_dir.path(), lookup).expect("config should load");

    assert_eq!(config.llm.model, "/opt/models/tiny.gguf");
    assert_eq!(config.ollama.model, "nomic-embed-text");
    assert_eq!(config.llm.threads, 2);
    assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.llm.max_tokens, 256);
    assert_eq!(config.chunking.chunk_size, 256);
    assert_eq!(config.chunking.chunk_overlap, 20);
    assert_eq!(config.get_base_dir(), temp_dir.path());
}

#[test]
fn unparseable_env_value_names_the_variable() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let lookup = env_from(&[("NUM_THREADS", "many")]);

    let err = Config::load_with_env(temp_dir.path(), lookup).expect_err("should reject value");
    let message = format!("{:#}", err);
    assert!(message.contains("NUM_THREADS"), "got: {}", message);
}

#[test]
fn blank_env_values_are_ignored() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let lookup = env_from(&[("LLM_MODEL", "   "), ("CHUNK_SIZE", "")]);

    let config = Config::load_with_env(temp_dir.path(), lookup).expect("config should load");
    assert_eq!(config.llm.model, DEFAULT_LLM_URL);
    assert_eq!(config.chunking.chunk_size, 512);
}

#[test]
fn ollama_host_override_accepts_url() {
    let mut ollama = OllamaConfig::default();
    ollama
        .apply_host_override("https://gpu-box:8443")
        .expect("override should apply");
    assert_eq!(ollama.protocol, "https");
    assert_eq!(ollama.host, "gpu-box");
    assert_eq!(ollama.port, 8443);

    let mut ollama = OllamaConfig::default();
    ollama
        .apply_host_override("embedder.local")
        .expect("override should apply");
    assert_eq!(ollama.host, "embedder.local");
    assert_eq!(ollama.port, 11434);
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config.llm, parsed_config.llm);
    assert_eq!(config.ollama, parsed_config.ollama);
    assert_eq!(config.chunking, parsed_config.chunking);
    assert_eq!(config.retrieval, parsed_config.retrieval);
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
}

#[test]
fn directory_layout() {
    let config = Config {
        base_dir: PathBuf::from("/srv/ragchat"),
        ..Config::default()
    };
    assert_eq!(config.archive_dir(), PathBuf::from("/srv/ragchat/archive"));
    assert_eq!(
        config.vector_store_dir(),
        PathBuf::from("/srv/ragchat/vector_store")
    );
    assert_eq!(config.models_dir(), PathBuf::from("/srv/ragchat/models"));
    assert_eq!(
        config.config_file_path(),
        PathBuf::from("/srv/ragchat/ragchat.toml")
    );
}
