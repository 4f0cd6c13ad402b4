//! # docqa CLI
//!
//! The `docqa` binary is a thin consumer of the engine library — it plays
//! the role the desktop UI plays in an embedded deployment: it triggers
//! index rebuilds, submits queries, and renders the streamed answer
//! incrementally.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa index` | Build or incrementally update the vector index |
//! | `docqa ask "<question>"` | Stream an answer to a question |
//! | `docqa models` | List models installed on the Ollama instance |
//! | `docqa status` | Show index and model status |

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;

use docqa::config;
use docqa::engine::Engine;
use docqa::llm;
use docqa::models::QueryMode;

/// docqa — a local-first retrieval-augmented document question answering
/// engine.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; without one, built-in defaults are used (documents in
/// `./documents`, index in `./index_db`, Ollama on localhost).
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "docqa — ask questions about a folder of documents, answered by a local model",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the vector index from the documents directory.
    ///
    /// Loads every recognized file, chunks it, and appends to the existing
    /// index (or creates one). An empty documents directory reuses the
    /// existing index unchanged.
    Index,

    /// Ask a question and stream the answer.
    ///
    /// In the default retrieve mode the answer is grounded in the indexed
    /// documents. Generate and chat modes talk to the model directly and
    /// keep conversation state for the lifetime of the process.
    Ask {
        /// The question to answer.
        question: String,

        /// How to answer: retrieval-augmented, single-shot generate, or
        /// chat.
        #[arg(long, value_enum, default_value_t = Mode::Retrieve)]
        mode: Mode,

        /// Generation model to use instead of the configured one.
        #[arg(long)]
        model: Option<String>,
    },

    /// List the models installed on the Ollama instance.
    Models,

    /// Show index and model status.
    Status,
}

#[derive(Copy, Clone, ValueEnum)]
enum Mode {
    Retrieve,
    Generate,
    Chat,
}

impl From<Mode> for QueryMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Retrieve => QueryMode::Retrieve,
            Mode::Generate => QueryMode::Generate,
            Mode::Chat => QueryMode::Chat,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("docqa=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config_or_default(&cli.config)?;

    match cli.command {
        Commands::Index => {
            let engine = Engine::new(config)?;
            let outcome = engine.rebuild_index().await;
            println!("{}", outcome.message());
        }
        Commands::Ask {
            question,
            mode,
            model,
        } => {
            let engine = Engine::new(config)?;
            if let Some(model) = model {
                engine.switch_model(&model)?;
            }
            let outcome = engine.rebuild_index().await;
            if !outcome.is_ready() {
                eprintln!("{}", outcome.message());
            }

            let mut stream = engine.stream_answer_mode(&question, mode.into());
            let cancel = stream.cancel_token();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                cancel.cancel();
            });

            // each item is the answer-so-far; print only the new suffix
            let mut last = String::new();
            while let Some(answer) = stream.next().await {
                if answer.starts_with(&last) {
                    print!("{}", &answer[last.len()..]);
                } else {
                    // terminal notice replacing the accumulator
                    print!("\n{}", answer);
                }
                std::io::stdout().flush()?;
                last = answer;
            }
            println!();
        }
        Commands::Models => {
            let models = llm::list_models(&config.ollama).await?;
            if models.is_empty() {
                println!("No models installed.");
            } else {
                for model in models {
                    println!("{}", model);
                }
            }
        }
        Commands::Status => {
            let engine = Engine::new(config.clone())?;
            let outcome = engine.rebuild_index().await;
            let status = engine.status().await;
            println!("model:            {}", status.model);
            println!("embedding model:  {}", status.embedding_model);
            println!("documents dir:    {}", config.documents.dir.display());
            println!("index dir:        {}", config.index.dir.display());
            match status.chunk_count {
                Some(count) => println!("indexed chunks:   {}", count),
                None => println!("indexed chunks:   (no index)"),
            }
            println!("last rebuild:     {}", outcome.message());
        }
    }

    Ok(())
}
