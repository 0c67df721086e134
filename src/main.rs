use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docpack_search::config::{Config, EmbeddingBackend};
use docpack_search::docpack::Docpack;
use docpack_search::error::RetrievalResult;
use docpack_search::semantic::{
    BuildOutcome, EmbeddingGateway, IndexBuilder, IndexStore, LazyEmbedder, RetrievalEngine,
};
use docpack_search::telemetry;
use docpack_search::tools::{error_value, ToolExecutor};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

/// Semantic search over docpack file trees
#[derive(Parser, Debug)]
#[command(name = "docpack-search")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Embedding backend: hash or onnx (overrides config)
    #[arg(long, value_name = "BACKEND", global = true)]
    backend: Option<EmbeddingBackend>,

    /// Embedding model name (overrides config)
    #[arg(long, value_name = "MODEL", global = true)]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new docpack
    Init {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Build the embedding index for a docpack's files/
    Index {
        docpack: PathBuf,
        /// Chunk width in characters (overrides config)
        #[arg(long)]
        chunk_size: Option<usize>,
    },
    /// Chunks most similar to a query
    Search {
        docpack: PathBuf,
        query: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Files most similar to a file
    Neighbors {
        docpack: PathBuf,
        file: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Line-level snippets for a query
    Grep {
        docpack: PathBuf,
        query: String,
        #[arg(short)]
        k: Option<usize>,
        /// Context lines around each snippet
        #[arg(long)]
        context: Option<usize>,
    },
    /// Matched files with their full content
    Read {
        docpack: PathBuf,
        query: String,
        #[arg(short)]
        k: Option<usize>,
    },
    /// Manifest, file statistics and index status
    Metadata { docpack: PathBuf },
    /// Run a named tool with JSON arguments
    Tool {
        docpack: PathBuf,
        name: String,
        /// JSON object of arguments
        args: Option<String>,
    },
    /// Generate a template configuration file
    ConfigInit { path: Option<PathBuf> },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

/// Print a query result; structural failures print as `{"error": ...}`.
fn emit<T: Serialize>(result: RetrievalResult<T>) -> Result<ExitCode> {
    match result {
        Ok(value) => {
            print_json(&value)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_structural() => {
            print_json(&error_value(&e))?;
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

struct Session {
    config: Config,
    docpack: Docpack,
    engine: RetrievalEngine,
}

impl Session {
    fn open(config: Config, path: &Path) -> Result<Self> {
        let docpack = Docpack::open(path)?;
        let store = Arc::new(IndexStore::new(
            docpack.index_file(&config.indexer.index_file),
        ));
        let gateway: Arc<dyn EmbeddingGateway> =
            Arc::new(LazyEmbedder::from_config(&config.embedding));
        let engine = RetrievalEngine::new(store, gateway);
        Ok(Self {
            config,
            docpack,
            engine,
        })
    }

    fn top_k(&self, k: Option<usize>) -> usize {
        k.unwrap_or(self.config.retrieval.top_k)
    }
}

fn run_index(session: &Session) -> Result<ExitCode> {
    let builder = IndexBuilder::new(&session.config.indexer)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    spinner.set_message(format!(
        "Indexing {}",
        session.docpack.files_dir().display()
    ));
    spinner.enable_steady_tick(Duration::from_millis(120));

    let outcome = builder.build(
        &session.docpack,
        session.engine.gateway(),
        session.engine.store(),
    );
    spinner.finish_and_clear();
    let outcome = outcome?;

    print_json(&outcome)?;
    Ok(match outcome {
        BuildOutcome::Built { .. } => ExitCode::SUCCESS,
        BuildOutcome::NothingToIndex { .. } => ExitCode::FAILURE,
    })
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    telemetry::init_logging(log_level)?;

    if let Command::ConfigInit { path } = &args.command {
        let path = path
            .clone()
            .unwrap_or_else(|| PathBuf::from("docpack_search.toml"));
        if path.exists() {
            anyhow::bail!(
                "Config file already exists: {}. Remove it first or choose a different path.",
                path.display()
            );
        }
        Config::write_template(&path)?;
        info!(path = %path.display(), "Generated config file");
        return Ok(ExitCode::SUCCESS);
    }

    let (config, source) = Config::load(args.config.as_deref())?;
    let chunk_size = match &args.command {
        Command::Index { chunk_size, .. } => *chunk_size,
        _ => None,
    };
    let config = config.with_overrides(chunk_size, args.backend, args.model.clone());
    config.validate()?;
    if let Some(source) = source {
        info!(path = %source.display(), "Configuration loaded");
    }

    match args.command {
        Command::Init {
            path,
            name,
            description,
        } => {
            let docpack = Docpack::init(&path, name.as_deref(), description.as_deref())?;
            print_json(docpack.manifest())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Index { docpack, .. } => run_index(&Session::open(config, &docpack)?),
        Command::Search { docpack, query, k } => {
            let session = Session::open(config, &docpack)?;
            emit(session.engine.search(&query, session.top_k(k)))
        }
        Command::Neighbors { docpack, file, k } => {
            let session = Session::open(config, &docpack)?;
            emit(session.engine.neighbors(&file, session.top_k(k)))
        }
        Command::Grep {
            docpack,
            query,
            k,
            context,
        } => {
            let session = Session::open(config, &docpack)?;
            let context = context.unwrap_or(session.config.retrieval.context_lines);
            emit(session
                .engine
                .grep(&session.docpack, &query, session.top_k(k), context))
        }
        Command::Read { docpack, query, k } => {
            let session = Session::open(config, &docpack)?;
            emit(session
                .engine
                .search_and_read(&session.docpack, &query, session.top_k(k)))
        }
        Command::Metadata { docpack } => {
            let session = Session::open(config, &docpack)?;
            print_json(&session.docpack.metadata(session.engine.store())?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tool {
            docpack,
            name,
            args: tool_args,
        } => {
            let session = Session::open(config, &docpack)?;
            let tool_args = match tool_args {
                Some(raw) => serde_json::from_str(&raw).context("Tool arguments must be JSON")?,
                None => serde_json::Value::Null,
            };
            let executor = ToolExecutor::new(
                &session.docpack,
                &session.engine,
                session.config.retrieval.clone(),
            );
            let value = executor.execute_named(&name, tool_args);
            print_json(&value)?;
            Ok(if value.get("error").is_some() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::ConfigInit { .. } => Ok(ExitCode::SUCCESS),
    }
}
