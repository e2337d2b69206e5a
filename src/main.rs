use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use strata_core::{OutputFormat, SearchConfig, SearchHit, SearchResponse, StrataConfig};
use strata_lens::store::{EntityStore, SnapshotStore, StoreStats};
use strata_lens::{build_provider, EmbeddingCache, IndexPipeline, IndexStats, SearchEngine};

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Three-tier semantic code index",
    long_about = "Strata indexes a codebase as files, the classes/interfaces/enums they declare,\n\
                   and the methods of those members, then answers natural-language queries by\n\
                   embedding similarity at every tier.\n\n\
                   Examples:\n  \
                     strata init                        Create a strata.toml config file\n  \
                     strata index --path .              Index (or resume indexing) a project\n  \
                     strata search 'validate email'     Search all three tiers\n  \
                     strata similar src/auth.py         Find code resembling a file\n  \
                     strata terms retry backoff         Search several terms at once\n  \
                     strata stats                       Show index size"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project root (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Path to configuration file (default: <path>/strata.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable debug logging (overridden by STRATA_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Index the project's files, members and methods
    #[command(long_about = "Index the project's files, members and methods.\n\n\
        Files whose path and content are unchanged since the last run are reused,\n\
        as are members and methods whose summaries are unchanged.\n\n\
        Examples:\n  strata index\n  strata index --path ../service --no-resume")]
    Index {
        /// Re-embed every entity instead of reusing stored ones
        #[arg(long)]
        no_resume: bool,
    },
    /// Search the index with a natural-language query
    #[command(long_about = "Search the index with a natural-language query.\n\n\
        Examples:\n  strata search 'parse config file'\n  strata search 'retry logic' --methods-only --limit 5\n  \
        strata search 'token refresh' --context 'OAuth client'")]
    Search {
        /// Query text
        query: String,

        /// Extra context embedded alongside the query
        #[arg(long)]
        context: Option<String>,

        #[command(flatten)]
        filter: SearchArgs,
    },
    /// Find entities similar to a code snippet (file path, or '-' for stdin)
    Similar {
        /// File containing the snippet, or '-' to read stdin
        source: String,

        #[command(flatten)]
        filter: SearchArgs,
    },
    /// Search with several terms embedded together
    Terms {
        /// Search terms
        #[arg(required = true)]
        terms: Vec<String>,

        #[command(flatten)]
        filter: SearchArgs,
    },
    /// Show stored entity counts and cache statistics
    Stats,
    /// Delete the index and the embedding cache file
    Reset,
    /// Create a default strata.toml in the project root
    Init,
}

#[derive(clap::Args)]
struct SearchArgs {
    /// Only search files
    #[arg(long, conflicts_with_all = ["members_only", "methods_only"])]
    files_only: bool,

    /// Only search members (classes, interfaces, enums)
    #[arg(long, conflicts_with = "methods_only")]
    members_only: bool,

    /// Only search methods
    #[arg(long)]
    methods_only: bool,

    /// Maximum results per tier
    #[arg(long)]
    limit: Option<usize>,

    /// Minimum cosine similarity
    #[arg(long)]
    threshold: Option<f64>,
}

impl SearchArgs {
    fn apply(&self, base: &SearchConfig) -> SearchConfig {
        let mut config = base.clone();
        if self.files_only || self.members_only || self.methods_only {
            config.use_files = self.files_only;
            config.use_members = self.members_only;
            config.use_methods = self.methods_only;
        }
        if let Some(limit) = self.limit {
            config.max_results_per_type = limit;
        }
        if let Some(threshold) = self.threshold {
            config.similarity_threshold = threshold;
        }
        config
    }
}

const CONFIG_FILE: &str = "strata.toml";

const DEFAULT_CONFIG: &str = r#"# Strata configuration

[search]
# similarity_threshold = 0.25
# max_results_per_type = 10
# use_files = true
# use_members = true
# use_methods = true

[indexing]
# resume = true
# concurrency = 4
# max_file_bytes = 1048576
# extensions = ["py", "rs", "ts", "tsx", "js", "jsx", "java", "go", "cs", "cpp"]
# excluded_dirs = ["venv", "env", "node_modules", "__pycache__", "build", "dist", "target", "vendor"]

[embedding]
# provider = "openai"            # openai | voyage | hashing
# model = "text-embedding-3-large"
# dimensions = 3072
# cache_path = ".strata/embeddings.db"

[extractor]
# kind = "syntax"                # syntax | llm
# model = "gpt-4o-mini"

[store]
# path = ".strata"
"#;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<StrataConfig> {
    let config = match &cli.config {
        Some(path) => StrataConfig::from_file(path)
            .wrap_err_with(|| format!("loading {}", path.display()))?,
        None => {
            let default_path = cli.path.join(CONFIG_FILE);
            if default_path.exists() {
                StrataConfig::from_file(&default_path)
                    .wrap_err_with(|| format!("loading {}", default_path.display()))?
            } else {
                StrataConfig::default()
            }
        }
    };
    Ok(config)
}

fn store_dir(root: &Path, config: &StrataConfig) -> PathBuf {
    root.join(&config.store.path)
}

fn open_embedder(root: &Path, config: &StrataConfig) -> Result<Arc<EmbeddingCache>> {
    let provider = build_provider(&config.embedding)?;
    let cache = match &config.embedding.cache_path {
        Some(path) => EmbeddingCache::persistent(provider, &root.join(path))?,
        None => EmbeddingCache::in_memory(provider),
    };
    Ok(Arc::new(cache))
}

fn spinner(message: &str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

fn read_snippet(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .into_diagnostic()
            .wrap_err("reading snippet from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(source)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {source}"))
    }
}

fn hit_location(hit: &SearchHit) -> String {
    match &hit.parent_name {
        Some(parent) => format!("{} ({}::{})", hit.path, parent, hit.name),
        None => hit.path.clone(),
    }
}

fn print_response(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("# {}\n", response.query);
            if response.total() == 0 {
                println!("No results found.");
            }
            for (title, hits) in [
                ("Files", &response.file_hits),
                ("Members", &response.member_hits),
                ("Methods", &response.method_hits),
            ] {
                if hits.is_empty() {
                    continue;
                }
                println!("## {title}\n");
                for hit in hits {
                    println!(
                        "- **{}** `{}` (score: {:.4})  \n  {}",
                        hit.name,
                        hit_location(hit),
                        hit.score,
                        hit.summary.lines().next().unwrap_or_default()
                    );
                }
                println!();
            }
        }
        OutputFormat::Text => {
            if response.total() == 0 {
                println!("No results found for \"{}\".", response.query);
                return Ok(());
            }
            println!("Results for \"{}\" ({:.1} ms):", response.query, response.elapsed_ms);
            for (i, hit) in response.all_hits().into_iter().enumerate() {
                println!(
                    "{:>3}. [{}] {}  {} (score: {:.4})",
                    i + 1,
                    hit.kind,
                    hit.name,
                    hit_location(hit),
                    hit.score
                );
                if let Some(line) = hit.summary.lines().find(|l| !l.trim().is_empty()) {
                    println!("     {}", line.trim());
                }
            }
        }
    }
    Ok(())
}

fn print_index_stats(stats: &IndexStats, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(stats).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("| Tier | Processed | Skipped |\n|---|---|---|");
            println!("| Files | {} | {} |", stats.files_processed, stats.files_skipped);
            println!("| Members | {} | {} |", stats.members_processed, stats.members_skipped);
            println!("| Methods | {} | {} |", stats.methods_processed, stats.methods_skipped);
            println!(
                "\n{} embeddings, {} failures, {} ms",
                stats.embeddings_generated, stats.failures, stats.elapsed_ms
            );
        }
        OutputFormat::Text => {
            println!(
                "Files:   {} indexed, {} unchanged",
                stats.files_processed, stats.files_skipped
            );
            println!(
                "Members: {} indexed, {} unchanged",
                stats.members_processed, stats.members_skipped
            );
            println!(
                "Methods: {} indexed, {} unchanged",
                stats.methods_processed, stats.methods_skipped
            );
            println!(
                "{} embeddings generated, {} failures in {} ms",
                stats.embeddings_generated, stats.failures, stats.elapsed_ms
            );
        }
    }
    Ok(())
}

fn print_store_stats(stats: &StoreStats, format: OutputFormat) -> Result<()> {
    let location = stats
        .location
        .as_deref()
        .map_or_else(|| "(in memory)".to_string(), |p| p.display().to_string());
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(stats).into_diagnostic()?);
        }
        OutputFormat::Markdown => {
            println!("| Collection | Records |\n|---|---|");
            println!("| files | {} |", stats.files);
            println!("| members | {} |", stats.members);
            println!("| methods | {} |", stats.methods);
            println!("\nStored in `{location}`");
        }
        OutputFormat::Text => {
            println!("Index:   {location}");
            println!("Files:   {}", stats.files);
            println!("Members: {}", stats.members);
            println!("Methods: {}", stats.methods);
        }
    }
    Ok(())
}

async fn run_search(
    cli: &Cli,
    config: &StrataConfig,
    query: Query<'_>,
    filter: &SearchArgs,
) -> Result<()> {
    let embedder = open_embedder(&cli.path, config)?;
    let store = Arc::new(SnapshotStore::open(&store_dir(&cli.path, config))?);
    if store.stats().files == 0 {
        tracing::warn!("index is empty, run `strata index` first");
    }
    let engine = SearchEngine::new(store, embedder);
    let search_config = filter.apply(&config.search);

    let response = match query {
        Query::Text { query, context: None } => engine.search_text(query, &search_config).await,
        Query::Text {
            query,
            context: Some(context),
        } => {
            engine
                .search_with_context(query, context, &search_config)
                .await
        }
        Query::Snippet(snippet) => engine.search_similar_code(&snippet, &search_config).await,
        Query::Terms(terms) => engine.search_terms(terms, &search_config).await,
    };
    print_response(&response, cli.format)
}

enum Query<'a> {
    Text {
        query: &'a str,
        context: Option<&'a str>,
    },
    Snippet(String),
    Terms(&'a [String]),
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(miette::MietteHandlerOpts::new().terminal_links(true).build())
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Index { no_resume } => {
            let embedder = open_embedder(&cli.path, &config)?;
            let extractor = strata_extract::build_extractor(&config.extractor)?;
            let store = Arc::new(SnapshotStore::open(&store_dir(&cli.path, &config))?);
            let pipeline = IndexPipeline::new(store, embedder, extractor, config.indexing.clone())
                .with_resume(config.indexing.resume && !no_resume);

            let pb = spinner(&format!("Indexing {} ...", cli.path.display()));
            let report = pipeline.index_project(&cli.path).await.inspect_err(|_| {
                if let Some(pb) = &pb {
                    pb.finish_with_message("Failed");
                }
            })?;
            if let Some(pb) = pb {
                pb.finish_and_clear();
            }
            print_index_stats(&report.stats, cli.format)?;
        }
        Command::Search {
            query,
            context,
            filter,
        } => {
            let query = Query::Text {
                query,
                context: context.as_deref(),
            };
            run_search(&cli, &config, query, filter).await?;
        }
        Command::Similar { source, filter } => {
            let snippet = read_snippet(source)?;
            run_search(&cli, &config, Query::Snippet(snippet), filter).await?;
        }
        Command::Terms { terms, filter } => {
            run_search(&cli, &config, Query::Terms(terms), filter).await?;
        }
        Command::Stats => {
            let store = SnapshotStore::open(&store_dir(&cli.path, &config))?;
            print_store_stats(&store.stats(), cli.format)?;
            if cli.format == OutputFormat::Text {
                if let Some(path) = &config.embedding.cache_path {
                    let cache = strata_lens::cache::SqliteCache::open(&cli.path.join(path))?;
                    let entries = strata_lens::cache::VectorCache::len(&cache)?;
                    println!("Cache:   {entries} vectors in {}", path.display());
                }
            }
        }
        Command::Reset => {
            let dir = store_dir(&cli.path, &config);
            if SnapshotStore::remove(&dir)? {
                println!("Removed {}", dir.display());
            } else {
                println!("No index at {}", dir.display());
            }
            if let Some(path) = &config.embedding.cache_path {
                let cache_file = cli.path.join(path);
                if cache_file.exists() {
                    std::fs::remove_file(&cache_file)
                        .into_diagnostic()
                        .wrap_err_with(|| format!("removing {}", cache_file.display()))?;
                    println!("Removed {}", cache_file.display());
                }
            }
        }
        Command::Init => {
            let path = cli.path.join(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{} already exists", path.display());
            }
            std::fs::write(&path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {} with default configuration", path.display());
        }
    }

    Ok(())
}
