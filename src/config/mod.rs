// Configuration management module
// Settings come from defaults, an optional TOML file and environment overrides

pub mod settings;


pub use settings::{Config, ConfigError, LlmConfig, OllamaConfig, RetrievalConfig};

/// Environment variable that overrides the base directory
pub const HOME_ENV_VAR: &str = "RAGCHAT_HOME";

/// Resolve the base directory: explicit flag, then `RAGCHAT_HOME`, then the
/// current working directory
#[inline]
pub fn resolve_base_dir(
    explicit: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    match std::env::var(HOME_ENV_VAR) {
        Ok(dir) if !dir.trim().is_empty() => Ok(std::path::PathBuf::from(dir)),
        _ => std::env::current_dir().map_err(|_| ConfigError::DirectoryError),
    }
}
