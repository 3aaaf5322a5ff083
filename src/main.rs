//! # ragline CLI (`rgl`)
//!
//! The `rgl` binary drives the full pipeline: database initialization,
//! document ingestion, status reporting, question answering, and the HTTP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! rgl --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rgl init` | Create the SQLite database and run schema migrations |
//! | `rgl ingest --all` | Ingest every document the source lists |
//! | `rgl ingest <key>` | Ingest one document by source key |
//! | `rgl status` | Show every registered document and its status |
//! | `rgl query "<question>"` | Answer a question from the indexed corpus |
//! | `rgl serve` | Start the JSON HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! rgl init --config ./config/ragline.toml
//!
//! # Index a docs directory (configured under [source.filesystem])
//! rgl ingest --all
//!
//! # Re-index one file after editing it
//! rgl ingest guides/setup.md
//!
//! # Ask a question
//! rgl query "how do I rotate the API key?"
//!
//! # Serve the HTTP API
//! rgl serve
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use ragline::answer::{NoContextPolicy, QueryOrchestrator};
use ragline::config::{self, Config};
use ragline::db;
use ragline::embedding::create_embedder;
use ragline::extract::ExtractorRegistry;
use ragline::generate::{create_generator, GenerateOptions};
use ragline::ingest::{IngestOutcome, IngestPipeline};
use ragline::migrate;
use ragline::retrieve::Retriever;
use ragline::server;
use ragline::source::create_source;
use ragline::status;
use ragline::store::{collection_schema, create_store, SearchFilter, VectorStore};

/// ragline CLI — retrieval-augmented answering over local documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragline.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rgl",
    about = "ragline — retrieval-augmented answering over your own documents",
    version,
    long_about = "ragline ingests documents from a configured source, chunks and embeds them \
    into a local vector index, and answers questions grounded in — and cited against — the \
    indexed content, via a CLI and a JSON HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// vector_collections, vector_points). Idempotent — running it multiple
    /// times is safe.
    Init,

    /// Ingest documents from the configured source.
    ///
    /// Fetches, extracts, chunks, embeds, and indexes each document.
    /// Unchanged documents (same content hash) are skipped without any
    /// model calls.
    Ingest {
        /// Source key of a single document to ingest (e.g. `guides/setup.md`).
        source_key: Option<String>,

        /// Ingest every document the source lists.
        #[arg(long)]
        all: bool,

        /// List what would be ingested without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show every registered document and its indexing status.
    Status,

    /// Answer a question from the indexed corpus.
    Query {
        /// The question to answer.
        query: String,

        /// Maximum number of fragments to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict retrieval to one source key.
        #[arg(long)]
        source: Option<String>,
    },

    /// Start the JSON HTTP server.
    ///
    /// Binds to the address configured in `[server].bind` and serves the
    /// query and ingestion endpoints.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            source_key,
            all,
            dry_run,
        } => {
            run_ingest(&cfg, source_key, all, dry_run).await?;
        }
        Commands::Status => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            status::run_status(&pool).await?;
        }
        Commands::Query {
            query,
            top_k,
            source,
        } => {
            run_query(&cfg, &query, top_k, source).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn build_pipeline(cfg: &Config) -> Result<(Arc<IngestPipeline>, sqlx::SqlitePool)> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = create_embedder(&cfg.embedding)?;
    let store = create_store(cfg, &pool)?;
    store.ensure_collection(&collection_schema(cfg)?).await?;

    let pipeline = Arc::new(IngestPipeline::new(
        pool.clone(),
        create_source(&cfg.source)?,
        Arc::new(ExtractorRegistry::with_defaults()),
        embedder,
        store,
        cfg.store.collection.clone(),
        cfg.chunking.clone(),
        cfg.embedding.batch_size,
    ));
    Ok((pipeline, pool))
}

async fn run_ingest(
    cfg: &Config,
    source_key: Option<String>,
    all: bool,
    dry_run: bool,
) -> Result<()> {
    if source_key.is_none() && !all {
        anyhow::bail!("specify a source key or pass --all");
    }

    if dry_run {
        let source = create_source(&cfg.source)?;
        let entries = source.list().await?;
        let selected: Vec<_> = match &source_key {
            Some(key) => entries
                .into_iter()
                .filter(|e| &e.source_key == key)
                .collect(),
            None => entries,
        };
        for entry in &selected {
            println!("would ingest: {}", entry.source_key);
        }
        println!("{} documents (dry run, nothing written)", selected.len());
        return Ok(());
    }

    let (pipeline, _pool) = build_pipeline(cfg).await?;

    let keys: Vec<String> = match source_key {
        Some(key) => vec![key],
        None => pipeline
            .source()
            .list()
            .await?
            .into_iter()
            .map(|e| e.source_key)
            .collect(),
    };

    let mut tasks: JoinSet<(String, Result<IngestOutcome>)> = JoinSet::new();
    for key in keys {
        let pipeline = Arc::clone(&pipeline);
        tasks.spawn(async move {
            let outcome = pipeline.ingest(&key).await;
            (key, outcome)
        });
    }

    let mut indexed = 0usize;
    let mut unchanged = 0usize;
    let mut failed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (key, outcome) = joined?;
        match outcome? {
            IngestOutcome::Indexed { chunks } => {
                indexed += 1;
                println!("indexed    {key} ({chunks} chunks)");
            }
            IngestOutcome::Unchanged => {
                unchanged += 1;
                println!("unchanged  {key}");
            }
            IngestOutcome::Busy => {
                println!("busy       {key} (already being ingested)");
            }
            IngestOutcome::Failed { step, error } => {
                failed += 1;
                println!("failed     {key} at {}: {error}", step.as_str());
            }
        }
    }

    println!();
    println!("{indexed} indexed, {unchanged} unchanged, {failed} failed");
    if failed > 0 {
        anyhow::bail!("{failed} documents failed to ingest");
    }
    Ok(())
}

async fn run_query(
    cfg: &Config,
    query: &str,
    top_k: Option<usize>,
    source: Option<String>,
) -> Result<()> {
    let pool = db::connect(cfg).await?;
    migrate::run_migrations(&pool).await?;

    let embedder = create_embedder(&cfg.embedding)?;
    let generator = create_generator(&cfg.generation)?;
    let store = create_store(cfg, &pool)?;
    store.ensure_collection(&collection_schema(cfg)?).await?;

    let retriever = Retriever::new(
        embedder,
        store,
        cfg.store.collection.clone(),
        cfg.retrieval.min_score,
    );
    let policy = NoContextPolicy::parse(&cfg.prompt.no_context_policy)
        .ok_or_else(|| anyhow::anyhow!("Unknown no_context_policy"))?;
    let orchestrator = QueryOrchestrator::new(
        retriever,
        generator,
        policy,
        cfg.prompt.context_budget_chars,
        GenerateOptions::from_config(&cfg.generation),
    );

    let filter = SearchFilter {
        document_id: None,
        source_key: source,
    };
    let response = orchestrator
        .answer(query, top_k.unwrap_or(cfg.retrieval.top_k), &filter)
        .await?;

    println!("{}", response.answer);
    if !response.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, src) in response.sources.iter().enumerate() {
            println!(
                "  [{}] {}#{} (score {:.3})",
                i + 1,
                src.source_key,
                src.chunk_index,
                src.score
            );
        }
    }
    Ok(())
}
