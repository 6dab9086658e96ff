//! # fusion-rag CLI (`rag`)
//!
//! The `rag` binary wires the library components together from one TOML
//! file and exposes each of them as a command.
//!
//! ## Usage
//!
//! ```bash
//! rag --config ./config/rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag init` | Create or load the vector store and print its size |
//! | `rag ingest <source>...` | Extract, embed and store files, directories or URLs |
//! | `rag search "<query>"` | Vector search only |
//! | `rag sql "<question>"` | Ask the SQL agent only |
//! | `rag ask "<question>"` | Fused answer from both retrieval paths |
//! | `rag inspect` | Store statistics and the last load report |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `info`). Command results go to stdout.

use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fusion_rag::app;
use fusion_rag::config::{self, Config};
use fusion_rag::ingest::Source;
use fusion_rag::sql::StructuredQuery;

/// fusion-rag: answer questions from documents and the company database.
#[derive(Parser)]
#[command(name = "rag", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config/rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector store, or load the existing one.
    ///
    /// With `--force`, anything already on disk is replaced by an empty
    /// store.
    Init {
        /// Discard the existing index and payload.
        #[arg(long)]
        force: bool,
    },

    /// Ingest files, directories or URLs into the vector store.
    ///
    /// Each source is extracted, embedded and added independently; a
    /// failing source is reported and the rest continue. Directories are
    /// expanded to their top-level supported files.
    Ingest {
        /// File paths, directories, or `http(s)://` URLs.
        #[arg(required = true)]
        sources: Vec<String>,
    },

    /// Search the vector store.
    Search {
        query: String,

        /// Number of documents to return. Defaults to `[fusion].k`.
        #[arg(short)]
        k: Option<usize>,
    },

    /// Ask the SQL agent a question about the company database.
    Sql { question: String },

    /// Answer a question using both the documents and the database.
    Ask {
        question: String,

        /// Number of documents to retrieve. Defaults to `[fusion].k`.
        #[arg(short)]
        k: Option<usize>,

        /// Print the merged context sent to the model.
        #[arg(long)]
        show_context: bool,
    },

    /// Show store statistics and anything the last load had to repair.
    Inspect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { force } => {
            let store = app::open_store(&cfg, force).await?;
            let stats = store.stats();
            println!(
                "Vector store ready at {} ({} dims, {} documents).",
                store.config().root.display(),
                stats.dims,
                stats.live_documents
            );
        }
        Commands::Ingest { sources } => run_ingest(&cfg, &sources).await?,
        Commands::Search { query, k } => {
            let store = app::open_store(&cfg, false).await?;
            let hits = store
                .similarity_search_with_scores(&query, k.unwrap_or(cfg.fusion.k))
                .await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (rank, (doc, distance)) in hits.iter().enumerate() {
                println!(
                    "{}. [{}] distance={:.4} source={}",
                    rank + 1,
                    doc.id,
                    distance,
                    doc.meta_str("source").unwrap_or("-")
                );
                println!("   {}", snippet(&doc.content, 200));
            }
        }
        Commands::Sql { question } => {
            let agent = app::sql_agent(&cfg, app::generator(&cfg)?).await?;
            println!("{}", agent.answer(&question).await?);
        }
        Commands::Ask {
            question,
            k,
            show_context,
        } => {
            let store = app::open_store(&cfg, false).await?;
            let engine = app::fusion_engine(&cfg, &store).await?;
            let answer = engine
                .answer_query_detailed(&question, k.unwrap_or(cfg.fusion.k))
                .await?;
            if show_context {
                println!("--- context ---\n{}\n--- answer ---", answer.context);
            }
            println!("{}", answer.text);
        }
        Commands::Inspect => {
            let store = app::open_store(&cfg, false).await?;
            let stats = store.stats();
            println!("root:           {}", store.config().root.display());
            println!("dims:           {}", stats.dims);
            println!("vectors:        {}", stats.total_vectors);
            println!("documents:      {}", stats.live_documents);
            match store.load_report().and_then(|r| r.as_error()) {
                Some(problem) => println!("load:           degraded ({})", problem),
                None => println!("load:           clean"),
            }
        }
    }

    Ok(())
}

async fn run_ingest(cfg: &Config, raw: &[String]) -> anyhow::Result<()> {
    let sources = raw
        .iter()
        .map(|s| s.parse::<Source>())
        .collect::<Result<Vec<_>, _>>()?;
    let store = app::open_store(cfg, false).await?;
    let pipeline = app::ingestion_pipeline(cfg, store)?;
    let report = pipeline.ingest_many(&sources).await?;

    for set in &report.documents {
        match &set.extracted_to {
            Some(path) => println!(
                "ok    {} ({} documents, text at {})",
                set.source,
                set.len(),
                path.display()
            ),
            None => println!("ok    {} ({} documents)", set.source, set.len()),
        }
    }
    for err in &report.errors {
        println!("error {}", err);
    }
    println!(
        "{} documents added, {} sources failed.",
        report.added(),
        report.errors.len()
    );

    if report.documents.is_empty() && !report.errors.is_empty() {
        bail!("every source failed to ingest");
    }
    Ok(())
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}...", &flat[..byte]),
        None => flat,
    }
}
