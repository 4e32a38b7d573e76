use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use persona_rag::{
    ChunkingStrategy, EmbeddingBackend, EmbeddingProvider, IndexArtifact, IndexReport, Indexer, RagConfig, RagError,
    Retriever, build_embedding_provider, write_degraded_index,
};

/// persona-rag - Build and query a persona knowledge index
#[derive(Parser, Debug)]
#[command(name = "persona-rag", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk and embed knowledge files into an index
    Ingest(IngestArgs),
    /// Run a similarity query against an index
    Query(QueryArgs),
    /// Print the manifest of an index
    Inspect(InspectArgs),
}

/// Embedding backend selection shared by every subcommand.
#[derive(Args, Debug, Default)]
struct EmbeddingArgs {
    /// Embedding provider (hashing, openai, gemini, fastembed)
    #[arg(long)]
    provider: Option<EmbeddingBackend>,

    /// Embedding model name
    #[arg(long)]
    model: Option<String>,

    /// Embedding dimensions, where the provider supports it
    #[arg(long)]
    dimensions: Option<usize>,
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Directory containing knowledge files
    #[arg(short, long)]
    dir: PathBuf,

    /// File name pattern to index
    #[arg(short, long, default_value = "*.md")]
    pattern: String,

    /// Index directory to write (defaults to RAG_INDEX_PATH)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Table name inside the index directory
    #[arg(long)]
    table: Option<String>,

    /// Maximum chunk size in bytes
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between consecutive chunks in bytes
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Chunking strategy (recursive, markdown)
    #[arg(long)]
    chunking: Option<ChunkingStrategy>,

    /// Chunks embedded concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Query text
    text: String,

    /// Index directory (defaults to RAG_INDEX_PATH)
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Table name inside the index directory
    #[arg(long)]
    table: Option<String>,

    /// Maximum number of results
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Minimum similarity score
    #[arg(short, long, allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Index directory (defaults to RAG_INDEX_PATH)
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Table name inside the index directory
    #[arg(long)]
    table: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info",
        1 => "info,persona_rag=debug",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let base = RagConfig::from_env().context("invalid RAG_* environment")?;
    match cli.command {
        Command::Ingest(args) => ingest(base, args).await,
        Command::Query(args) => query(base, args).await,
        Command::Inspect(args) => inspect(base, args),
    }
}

fn apply_embedding(config: &mut RagConfig, args: &EmbeddingArgs) {
    if let Some(backend) = args.provider {
        config.embedding.backend = backend;
    }
    if let Some(model) = &args.model {
        config.embedding.model = Some(model.clone());
    }
    if let Some(dims) = args.dimensions {
        config.embedding.dimensions = Some(dims);
    }
}

fn ingest_config(mut config: RagConfig, args: &IngestArgs) -> anyhow::Result<RagConfig> {
    if let Some(output) = &args.output {
        config.index_path = output.clone();
    }
    if let Some(table) = &args.table {
        config.table = table.clone();
    }
    if let Some(size) = args.chunk_size {
        config.chunk_size = size;
    }
    if let Some(overlap) = args.chunk_overlap {
        config.chunk_overlap = overlap;
    }
    if let Some(chunking) = args.chunking {
        config.chunking = chunking;
    }
    if let Some(concurrency) = args.concurrency {
        config.embed_concurrency = concurrency;
    }
    apply_embedding(&mut config, &args.embedding);
    config.validate()?;
    Ok(config)
}

fn query_config(mut config: RagConfig, args: &QueryArgs) -> anyhow::Result<RagConfig> {
    if let Some(index) = &args.index {
        config.index_path = index.clone();
    }
    if let Some(table) = &args.table {
        config.table = table.clone();
    }
    if let Some(k) = args.top_k {
        config.top_k = k;
    }
    if let Some(threshold) = args.threshold {
        config.similarity_threshold = threshold;
    }
    apply_embedding(&mut config, &args.embedding);
    config.validate()?;
    Ok(config)
}

fn provider_for(config: &RagConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    build_embedding_provider(&config.embedding)
        .with_context(|| format!("cannot build '{}' embedding provider", config.embedding.backend))
}

async fn ingest(base: RagConfig, args: IngestArgs) -> anyhow::Result<()> {
    let config = ingest_config(base, &args)?;
    let provider = build_embedding_provider(&config.embedding);
    let report = build_index(&config, &args, provider).await?;

    if report.degraded {
        tracing::warn!(
            files_skipped = report.files_skipped,
            chunks_skipped = report.chunks_skipped,
            timed_out = report.timed_out,
            "index is degraded"
        );
    }
    println!(
        "Indexed {} chunks from {} documents into {} ({} files skipped, {} chunks skipped)",
        report.chunks_indexed,
        report.documents_indexed,
        report.path.display(),
        report.files_skipped,
        report.chunks_skipped,
    );
    Ok(())
}

/// Run the build, shipping an empty degraded index when the provider itself
/// is unavailable. Configuration errors stay fatal.
async fn build_index(
    config: &RagConfig,
    args: &IngestArgs,
    provider: persona_rag::Result<Arc<dyn EmbeddingProvider>>,
) -> anyhow::Result<IndexReport> {
    let provider = match provider {
        Ok(provider) => provider,
        Err(cause @ RagError::EmbeddingUnavailable { .. }) => {
            return Ok(write_degraded_index(config, &args.dir, &args.pattern, &config.index_path, &cause)?);
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("cannot build '{}' embedding provider", config.embedding.backend)));
        }
    };
    Ok(Indexer::new(config, provider).build(&args.dir, &args.pattern, &config.index_path).await?)
}

async fn query(base: RagConfig, args: QueryArgs) -> anyhow::Result<()> {
    let config = query_config(base, &args)?;
    let provider = provider_for(&config)?;
    let retriever = Retriever::open(&config, provider)?;

    let results = retriever.retrieve_default(&args.text).await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
    }
    for (i, result) in results.iter().enumerate() {
        println!("[{}] {:.3}  {}", i + 1, result.score, result.chunk.id);
        println!("{}\n", result.chunk.text);
    }
    Ok(())
}

fn inspect(mut config: RagConfig, args: InspectArgs) -> anyhow::Result<()> {
    if let Some(index) = args.index {
        config.index_path = index;
    }
    if let Some(table) = args.table {
        config.table = table;
    }
    let path = config.table_path();
    match IndexArtifact::read(&path)? {
        Some(artifact) => println!("{}", serde_json::to_string_pretty(&artifact.manifest)?),
        None => println!("{}: empty index", path.display()),
    }
    Ok(())
}
