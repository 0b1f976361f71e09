//! Quarry CLI - Testing tool for the retrieval pipeline.
//!
//! Loads a JSONL corpus into the in-memory lexical index and provides
//! interactive commands for exercising search, expansion, and context
//! assembly.

use std::io::BufRead;
use std::io::Write;
use std::io::{self};
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;

use quarry_retrieval::ContextOptions;
use quarry_retrieval::DocumentRecord;
use quarry_retrieval::HttpTextGenerator;
use quarry_retrieval::LexicalSearcher;
use quarry_retrieval::PipelineBuilder;
use quarry_retrieval::QueryExpander;
use quarry_retrieval::QueryHints;
use quarry_retrieval::RetrievalConfig;
use quarry_retrieval::SparseBackend;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(about = "Testing tool for the retrieval pipeline")]
struct Cli {
    /// JSONL corpus file; one document per line: {"id", "text", "metadata"}
    #[arg(default_value = "corpus.jsonl")]
    corpus: PathBuf,

    /// Path to config file (default: {cwd}/.quarry/retrieval.toml or ~/.quarry/retrieval.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single command and exit (instead of REPL mode)
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Show corpus and index statistics
    Stats,

    /// BM25 lexical search
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: i32,
    },

    /// Generate query variants via the expansion strategies
    Expand {
        /// Query to expand
        query: String,
    },

    /// Assemble a full context bundle for a query
    Context {
        /// Search query
        query: String,
        /// Maximum documents
        #[arg(short, long, default_value = "10")]
        limit: i32,
        /// Print the bundle as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quarry_retrieval=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load config from specified file or default locations
    let config = if let Some(config_path) = &cli.config {
        if !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        RetrievalConfig::from_file(config_path)?
    } else {
        let cwd = std::env::current_dir()?;
        RetrievalConfig::load(&cwd)?
    };

    for warning in config.validate() {
        eprintln!("Config warning: {warning}");
    }

    // Show which config is being used
    if let Some(config_path) = &cli.config {
        eprintln!("Using config: {}", config_path.display());
    }

    match cli.command {
        Some(cmd) => run_command(cmd, &cli.corpus, &config).await?,
        None => run_repl(&cli.corpus, &config, cli.config.as_ref()).await?,
    }

    Ok(())
}

async fn run_command(cmd: Command, corpus: &Path, config: &RetrievalConfig) -> anyhow::Result<()> {
    match cmd {
        Command::Stats => cmd_stats(corpus, config).await?,
        Command::Search { query, limit } => cmd_search(corpus, config, &query, limit).await?,
        Command::Expand { query } => cmd_expand(config, &query).await?,
        Command::Context { query, limit, json } => {
            cmd_context(corpus, config, &query, limit, json).await?
        }
        Command::Config => cmd_config(config)?,
    }
    Ok(())
}

async fn run_repl(
    corpus: &Path,
    config: &RetrievalConfig,
    config_path: Option<&PathBuf>,
) -> anyhow::Result<()> {
    println!("Quarry CLI v0.1");
    println!("Corpus: {}", corpus.display());
    if let Some(path) = config_path {
        println!("Config: {}", path.display());
    } else {
        println!("Config: .quarry/retrieval.toml (or ~/.quarry/retrieval.toml)");
    }
    println!("\nCommands: stats, search <query>, expand <query>, context <query>, config, quit");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let cmd = parts.first().unwrap_or(&"");

        let result = match *cmd {
            "quit" | "exit" | "q" => break,
            "stats" => cmd_stats(corpus, config).await,
            "search" => {
                let query = parts[1..].join(" ");
                if query.is_empty() {
                    println!("Usage: search <query>");
                    continue;
                }
                cmd_search(corpus, config, &query, 10).await
            }
            "expand" => {
                let query = parts[1..].join(" ");
                if query.is_empty() {
                    println!("Usage: expand <query>");
                    continue;
                }
                cmd_expand(config, &query).await
            }
            "context" => {
                let query = parts[1..].join(" ");
                if query.is_empty() {
                    println!("Usage: context <query>");
                    continue;
                }
                cmd_context(corpus, config, &query, 10, false).await
            }
            "config" => cmd_config(config),
            "help" | "?" => {
                println!("Commands:");
                println!("  stats           - Show corpus and index statistics");
                println!("  search <query>  - BM25 lexical search");
                println!("  expand <query>  - Generate query variants");
                println!("  context <query> - Assemble a full context bundle");
                println!("  config          - Show configuration");
                println!("  quit            - Exit");
                continue;
            }
            _ => {
                println!(
                    "Unknown command: {}. Type 'help' for available commands.",
                    cmd
                );
                continue;
            }
        };

        if let Err(e) = result {
            println!("Error: {e}");
        }
    }

    Ok(())
}

/// Read one document per line; malformed lines are skipped with a note.
fn load_corpus(path: &Path) -> anyhow::Result<Vec<DocumentRecord>> {
    if !path.exists() {
        anyhow::bail!("Corpus file not found: {}", path.display());
    }

    let file = std::fs::File::open(path)?;
    let reader = io::BufReader::new(file);

    let mut documents = Vec::new();
    let mut skipped = 0usize;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DocumentRecord>(line) {
            Ok(record) => documents.push(record),
            Err(error) => {
                eprintln!("Skipping corpus line {}: {error}", number + 1);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        eprintln!("Skipped {skipped} malformed corpus line(s)");
    }

    Ok(documents)
}

async fn indexed_searcher(
    corpus: &Path,
    config: &RetrievalConfig,
) -> anyhow::Result<LexicalSearcher> {
    let documents = load_corpus(corpus)?;
    let searcher = LexicalSearcher::new(&config.lexical);
    searcher.reindex(&documents).await;
    Ok(searcher)
}

async fn cmd_stats(corpus: &Path, config: &RetrievalConfig) -> anyhow::Result<()> {
    let searcher = indexed_searcher(corpus, config).await?;
    let stats = searcher.stats().await;

    println!("Corpus: {}", corpus.display());
    println!("Documents: {}", stats.documents);
    println!("Terms: {}", stats.terms);
    println!("Avg doc length: {:.1} tokens", stats.avg_doc_len);

    Ok(())
}

async fn cmd_search(
    corpus: &Path,
    config: &RetrievalConfig,
    query: &str,
    limit: i32,
) -> anyhow::Result<()> {
    let searcher = indexed_searcher(corpus, config).await?;
    let hits = searcher.search(query, limit.max(0) as usize, None).await;

    println!("[BM25] Found {} results:\n", hits.len());

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. {} (score: {:.3})", i + 1, hit.doc_id, hit.score);
        // Show first 2 lines of content
        for line in hit.content.lines().take(2) {
            println!("   {}", line.trim());
        }
        println!();
    }

    Ok(())
}

async fn cmd_expand(config: &RetrievalConfig, query: &str) -> anyhow::Result<()> {
    if config.generation.api_base.is_none() {
        println!("[Expand] Generation backend not configured (set generation.api_base)");
        return Ok(());
    }

    let generator = Arc::new(HttpTextGenerator::from_config(&config.generation));
    let expander = QueryExpander::new(generator, &config.expansion)
        .with_generation_params(config.generation.params());
    let variants = expander.expand_default(query).await;

    println!("[Expand] {} variant(s):\n", variants.len());

    for (i, variant) in variants.iter().enumerate() {
        let strategy = variant
            .strategy
            .map(|s| s.label())
            .unwrap_or("original");
        println!(
            "{}. [{} {:.2}] {}",
            i + 1,
            strategy,
            variant.confidence,
            variant.text
        );
    }

    Ok(())
}

async fn cmd_context(
    corpus: &Path,
    config: &RetrievalConfig,
    query: &str,
    limit: i32,
    json: bool,
) -> anyhow::Result<()> {
    let searcher = Arc::new(indexed_searcher(corpus, config).await?);

    let mut pipeline = PipelineBuilder::new(config.clone())
        .with_sparse(searcher as Arc<dyn SparseBackend>);
    if config.generation.api_base.is_some() {
        pipeline = pipeline.with_generator(Arc::new(HttpTextGenerator::from_config(
            &config.generation,
        )));
    }
    let builder = pipeline.build().await;

    let options = ContextOptions {
        top_k: Some(limit.max(0) as usize),
        ..ContextOptions::default()
    };
    let bundle = builder
        .build_context(query, &QueryHints::default(), &options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&bundle)?);
        return Ok(());
    }

    println!(
        "[Context] {} in {} ms",
        bundle.meta.result_summary, bundle.meta.duration_ms
    );
    if bundle.meta.fallback_used {
        println!("[Context] hybrid path degraded, served by direct fallback");
    }
    if bundle.meta.reranking_applied {
        println!("[Context] re-ranking applied");
    }
    println!();

    for (i, document) in bundle.documents.iter().enumerate() {
        println!(
            "{}. {} (relevance: {:.3}, source: {})",
            i + 1,
            document.id,
            document.relevance,
            document.source
        );
        if document.title != document.id {
            println!("   {}", document.title);
        }
        for line in document.snippet.lines().take(2) {
            println!("   {}", line.trim());
        }
        println!();
    }

    Ok(())
}

fn cmd_config(config: &RetrievalConfig) -> anyhow::Result<()> {
    println!("Search:");
    println!("  dense_top_k: {}", config.search.dense_top_k);
    println!("  sparse_top_k: {}", config.search.sparse_top_k);
    println!("  fused_top_k: {}", config.search.fused_top_k);
    println!("  rrf_k: {}", config.search.rrf_k);
    println!("  dense_weight: {}", config.search.dense_weight);
    println!("  sparse_weight: {}", config.search.sparse_weight);
    println!("  enable_sparse: {}", config.search.enable_sparse);
    println!("  enable_fusion: {}", config.search.enable_fusion);
    println!(
        "  enable_query_expansion: {}",
        config.search.enable_query_expansion
    );
    println!();
    println!("Lexical:");
    println!("  k1: {}", config.lexical.k1);
    println!("  b: {}", config.lexical.b);
    println!("  min_token_len: {}", config.lexical.min_token_len);
    println!();
    println!("Expansion:");
    println!("  num_variants: {}", config.expansion.num_variants);
    println!("  timeout_secs: {}", config.expansion.timeout_secs);
    println!();
    println!("Rerank:");
    println!("  enable_reranking: {}", config.rerank.enable_reranking);
    println!("  rerank_top_k: {}", config.rerank.rerank_top_k);
    println!("  rerank_initial_k: {}", config.rerank.rerank_initial_k);
    println!();
    println!(
        "Generation: {}",
        if config.generation.api_base.is_some() {
            "configured"
        } else {
            "not configured"
        }
    );

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &warnings {
            println!("  {warning}");
        }
    }

    Ok(())
}
