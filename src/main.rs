use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use ragchat::commands::Assistant;
use ragchat::config::{Config, resolve_base_dir};
use ragchat::embeddings::OllamaClient;
use ragchat::llm::StopSignal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragchat")]
#[command(about = "Chat with your documents using a local language model")]
#[command(version)]
struct Cli {
    /// Directory holding archive/, vector_store/, models/ and ragchat.toml
    #[arg(long, global = true, value_name = "PATH")]
    base_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the indexed documents
    Chat {
        /// Rebuild the vector index from the archive before chatting
        #[arg(long)]
        rebuild: bool,
    },
    /// Create or rebuild the vector index from the archive
    Build,
    /// Add archived documents that are not indexed yet
    Update,
    /// List the documents in the archive
    List,
    /// Show configuration and index status
    Info,
}

/// Ctrl-C stops a streaming answer; with nothing streaming it ends the process.
/// Prompts read keys in raw mode and see Ctrl-C themselves.
fn spawn_interrupt_listener(stop: StopSignal) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if stop.request() {
                info!("Stop requested for the running answer");
            } else {
                eprintln!("\n👋 Goodbye!");
                std::process::exit(130);
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let base_dir = resolve_base_dir(cli.base_dir).context("Failed to resolve base directory")?;
    let config = Config::load(&base_dir).context("Failed to load configuration")?;
    config
        .ensure_directories()
        .context("Failed to create working directories")?;

    let client = OllamaClient::new(&config).context("Failed to create Ollama client")?;
    if let Err(e) = client.health_check() {
        warn!("Ollama health check failed: {:#}", e);
        eprintln!(
            "{}",
            style(format!(
                "⚠️  Ollama is not ready at {}:{} ({}). Indexing and chat need it running.",
                config.ollama.host, config.ollama.port, config.ollama.model
            ))
            .yellow()
        );
    }

    let mut assistant = Assistant::new(config, Arc::new(client));
    spawn_interrupt_listener(assistant.stop_signal());

    match cli.command {
        None => assistant.run_menu().await?,
        Some(Commands::Chat { rebuild }) => {
            if rebuild {
                assistant.create_vector_store(false).await?;
            }
            assistant.chat().await?;
        }
        Some(Commands::Build) => assistant.create_vector_store(true).await?,
        Some(Commands::Update) => assistant.update_vector_store().await?,
        Some(Commands::List) => assistant.list_documents()?,
        Some(Commands::Info) => assistant.show_system_info().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn no_subcommand_runs_menu() {
        let cli = Cli::try_parse_from(["ragchat"]).expect("should parse");
        assert!(cli.command.is_none());
        assert!(cli.base_dir.is_none());
    }

    #[test]
    fn chat_with_rebuild() {
        let cli = Cli::try_parse_from(["ragchat", "chat", "--rebuild"]).expect("should parse");
        assert!(matches!(cli.command, Some(Commands::Chat { rebuild: true })));

        let cli = Cli::try_parse_from(["ragchat", "chat"]).expect("should parse");
        assert!(matches!(cli.command, Some(Commands::Chat { rebuild: false })));
    }

    #[test]
    fn one_shot_commands() {
        let parse = |name: &str| {
            Cli::try_parse_from(["ragchat", name])
                .expect("should parse")
                .command
        };

        assert!(matches!(parse("build"), Some(Commands::Build)));
        assert!(matches!(parse("update"), Some(Commands::Update)));
        assert!(matches!(parse("list"), Some(Commands::List)));
        assert!(matches!(parse("info"), Some(Commands::Info)));
    }

    #[test]
    fn base_dir_is_global() {
        let cli = Cli::try_parse_from(["ragchat", "list", "--base-dir", "/tmp/docs"])
            .expect("should parse");
        assert_eq!(cli.base_dir, Some(PathBuf::from("/tmp/docs")));

        let cli = Cli::try_parse_from(["ragchat", "--base-dir", "/srv/rag"]).expect("should parse");
        assert_eq!(cli.base_dir, Some(PathBuf::from("/srv/rag")));
        assert!(cli.command.is_none());
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["ragchat", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["ragchat", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
