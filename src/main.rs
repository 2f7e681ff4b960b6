//! # `ragf` CLI
//!
//! Per-document question answering over a local document library.
//!
//! ## Usage
//!
//! ```bash
//! ragf --config ./config/ragf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragf list` | List supported documents |
//! | `ragf categories` | List first-level folders with document counts |
//! | `ragf index <file>` | Build or reuse one document's index |
//! | `ragf index-category <key>` | Build or reuse a category's shared index |
//! | `ragf preindex` | Index many documents, optionally one shard of them |
//! | `ragf ask "<question>" --file F` | Answer a question from one document or category |
//! | `ragf chat [file]` | Interactive questions against one document |
//!
//! Exits with 2 when the document, category or arguments are invalid, and
//! with 1 for any other failure (including a pre-index run with failures).
//!
//! ## Examples
//!
//! ```bash
//! # Index every PDF, 20 per worker, this worker takes batch 3
//! ragf preindex --batch-size 20 --batch-index 3
//!
//! # Index all supported files from position 100 onwards, rebuilding
//! ragf preindex --all --force --offset 100
//!
//! # Ask with excerpts
//! ragf ask "What is the service interval?" --file manuals/pump.pdf --snippets
//! ```

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rag_files::batch::{self, BatchRequest};
use rag_files::chat;
use rag_files::config::{self, Config};
use rag_files::embedding;
use rag_files::error::RagError;
use rag_files::indexer::{IndexHandle, IndexManager};
use rag_files::llm;
use rag_files::loader::FileLoader;
use rag_files::query::{self, QueryOptions};

/// Per-document retrieval-augmented question answering.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults; `DOCS_DIR`, `DB_DIR` and
/// `COLLECTION_NAME` override the paths either way.
#[derive(Parser)]
#[command(
    name = "ragf",
    about = "Per-document retrieval-augmented question answering over a local document library",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported documents under the documents root.
    List,

    /// List categories (first-level folders) and their document counts.
    Categories,

    /// Build or reuse the index for one document.
    Index {
        /// Document path relative to the documents root.
        file: String,

        /// Delete and rebuild even if the index is current.
        #[arg(long)]
        force: bool,
    },

    /// Build or reuse the shared index for a category.
    IndexCategory {
        /// Category key (first-level folder name).
        key: String,

        #[arg(long)]
        force: bool,
    },

    /// Index many documents, continuing past failures.
    ///
    /// Offset/limit takes precedence over batch-size/batch-index when both
    /// are given. Exits non-zero if any document failed.
    Preindex {
        /// Include every supported format, not only PDFs.
        #[arg(long)]
        all: bool,

        #[arg(long)]
        force: bool,

        /// 0-based start position in the sorted file list.
        #[arg(long, allow_negative_numbers = true)]
        offset: Option<i64>,

        /// Maximum number of files to process.
        #[arg(long, allow_negative_numbers = true)]
        limit: Option<i64>,

        /// Files per batch.
        #[arg(long, allow_negative_numbers = true)]
        batch_size: Option<i64>,

        /// 1-based batch to process.
        #[arg(long, allow_negative_numbers = true)]
        batch_index: Option<i64>,
    },

    /// Answer a question from one document or one category.
    Ask {
        question: String,

        #[arg(long, conflicts_with = "category")]
        file: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// Chunks to retrieve (1-10). Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Also print one excerpt per source.
        #[arg(long)]
        snippets: bool,
    },

    /// Chat with one document. Prompts for a choice when no file is given.
    Chat { file: Option<String> },
}

/// Exit status for unknown documents and invalid arguments.
const EXIT_CLIENT_ERROR: i32 = 2;
/// Exit status for build, provider and I/O failures.
const EXIT_FAILURE: i32 = 1;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let client_error = e
            .downcast_ref::<RagError>()
            .is_some_and(RagError::is_client_error);
        std::process::exit(if client_error { EXIT_CLIENT_ERROR } else { EXIT_FAILURE });
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::List => run_list(&cfg)?,
        Commands::Categories => run_categories(&cfg)?,
        Commands::Index { file, force } => {
            let manager = build_manager(&cfg)?;
            let handle = manager.ensure_file_index(&file, force).await?;
            print_handle(&handle);
        }
        Commands::IndexCategory { key, force } => {
            let manager = build_manager(&cfg)?;
            let handle = manager.ensure_category_index(&key, force).await?;
            print_handle(&handle);
        }
        Commands::Preindex {
            all,
            force,
            offset,
            limit,
            batch_size,
            batch_index,
        } => {
            let req = BatchRequest {
                offset,
                limit,
                batch_size,
                batch_index,
            };
            let ok = run_preindex(&cfg, !all, force, &req).await?;
            if !ok {
                std::process::exit(EXIT_FAILURE);
            }
        }
        Commands::Ask {
            question,
            file,
            category,
            top_k,
            snippets,
        } => {
            let mut options = QueryOptions::from_config(&cfg.retrieval);
            options.include_snippets = snippets;
            if let Some(k) = top_k {
                options.top_k = k;
            }
            run_ask(&cfg, &question, file, category, &options).await?;
        }
        Commands::Chat { file } => run_chat(&cfg, file).await?,
    }

    Ok(())
}

fn build_manager(cfg: &Config) -> anyhow::Result<IndexManager> {
    let embedder = embedding::create_embedder(&cfg.embedding)?;
    Ok(IndexManager::new(cfg, embedder, Arc::new(FileLoader)))
}

fn list_files(cfg: &Config) -> anyhow::Result<Vec<String>> {
    rag_files::catalog::supported_files(&cfg.paths.docs_dir, cfg.paths.follow_symlinks)
}

fn run_list(cfg: &Config) -> anyhow::Result<()> {
    let files = list_files(cfg)?;
    if files.is_empty() {
        println!("No supported documents (.pdf, .txt, .md) in {}", cfg.paths.docs_dir.display());
        return Ok(());
    }
    for (i, f) in files.iter().enumerate() {
        println!("{:>4}. {}", i + 1, f);
    }
    Ok(())
}

fn run_categories(cfg: &Config) -> anyhow::Result<()> {
    let categories = rag_files::catalog::categories(&list_files(cfg)?);
    if categories.is_empty() {
        println!("No categories.");
        return Ok(());
    }
    println!("{:<30} {:<30} {:>6}", "KEY", "LABEL", "FILES");
    for c in categories {
        println!("{:<30} {:<30} {:>6}", c.key, c.label, c.total);
    }
    Ok(())
}

fn print_handle(handle: &IndexHandle) {
    println!("{}", handle.key);
    println!("  identifier: {}", handle.identifier);
    println!("  collection: {}", handle.collection);
    println!("  directory:  {}", handle.dir.display());
    println!("  chunks:     {}", handle.meta.chunk_count);
    println!("  model:      {}", handle.meta.model);
    println!(
        "  status:     {}",
        if handle.rebuilt { "built" } else { "up to date" }
    );
}

/// Returns `false` when any selected document failed.
async fn run_preindex(
    cfg: &Config,
    pdf_only: bool,
    force: bool,
    req: &BatchRequest,
) -> anyhow::Result<bool> {
    let manager = build_manager(cfg)?;
    let report = batch::run_preindex(&manager, pdf_only, force, req).await?;

    if report.selected.is_empty() {
        println!("preindex: nothing to do ({})", report.description);
        return Ok(true);
    }

    println!("preindex ({})", report.description);
    println!("  selected: {}", report.selected.len());
    println!(
        "  done: {} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        println!("  failures:");
        for (file, msg) in &report.failed {
            println!("    - {} => {}", file, msg);
        }
    }
    Ok(report.is_success())
}

async fn run_ask(
    cfg: &Config,
    question: &str,
    file: Option<String>,
    category: Option<String>,
    options: &QueryOptions,
) -> anyhow::Result<()> {
    let manager = build_manager(cfg)?;
    let handle = match (file, category) {
        (Some(file), _) => manager.ensure_file_index(&file, false).await?,
        (None, Some(category)) => manager.ensure_category_index(&category, false).await?,
        (None, None) => bail!("Specify --file or --category"),
    };

    let model = llm::create_llm(&cfg.llm)?;
    let result = query::answer(
        handle.store.as_ref(),
        manager.embedder().as_ref(),
        model.as_ref(),
        question,
        options,
    )
    .await?;

    println!("{}", result.answer);
    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for s in &result.sources {
            println!("  - {}", s);
        }
    }
    if let Some(snippets) = &result.snippets {
        println!();
        println!("Snippets:");
        for s in snippets {
            println!("  [{}] {}", s.source, s.snippet);
        }
    }
    Ok(())
}

async fn run_chat(cfg: &Config, file: Option<String>) -> anyhow::Result<()> {
    let manager = build_manager(cfg)?;
    let model = llm::create_llm(&cfg.llm)?;

    let stdin = std::io::stdin();
    let mut input = stdin.lock();

    let file = match file {
        Some(f) => f,
        None => {
            let files = manager.list_files()?;
            if files.is_empty() {
                println!("No supported documents (.pdf, .txt, .md)");
                return Ok(());
            }
            for (i, f) in files.iter().enumerate() {
                println!("  {}. {}", i + 1, f);
            }
            print!("Document number or name: ");
            std::io::stdout().flush()?;
            let mut choice = String::new();
            input.read_line(&mut choice)?;
            match chat::resolve_choice(&choice, &files) {
                Some(f) => f,
                None => bail!("Invalid choice: {}", choice.trim()),
            }
        }
    };

    let options = QueryOptions::from_config(&cfg.retrieval);
    chat::run_chat(&manager, model.as_ref(), options, &file, input, std::io::stdout()).await
}
