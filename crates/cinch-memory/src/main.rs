//! Inspect and compress agent transcripts from the command line.
//!
//! Transcripts are JSON arrays of chat messages in the OpenAI format. The
//! LLM summarizer is used when `OPENROUTER_KEY` is set and `--no-llm` is not
//! given; otherwise compression runs with template summaries.
//!
//! # Examples
//!
//! ```sh
//! # How full is the context?
//! cinch-memory usage --transcript run.json --tools tools.json --ceiling 128000
//!
//! # Compress to 60k tokens, archiving to a JSON store
//! cinch-memory compress --transcript run.json --target 60000 \
//!   --archive .agents/archive.json --out run.compressed.json
//!
//! # Look something up in the archive
//! cinch-memory recall --archive .agents/archive.json "retry backoff"
//!
//! # Budget split, then rescaled for a smaller model
//! cinch-memory budget --total 200000 --rescale 128000
//! ```

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use cinch_memory::prelude::*;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Context budget and memory compression for agent transcripts.
#[derive(Parser)]
#[command(name = "cinch-memory")]
struct Cli {
    /// Log progress at info level (RUST_LOG overrides).
    #[arg(long, short, global = true)]
    verbose: bool,

    /// JSON config file; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print context usage and whether compression is needed.
    Usage {
        /// Transcript file (JSON array of messages).
        #[arg(long)]
        transcript: PathBuf,

        /// Tool definitions sent with the transcript (JSON array).
        #[arg(long)]
        tools: Option<PathBuf>,

        /// Model context ceiling in tokens.
        #[arg(long)]
        ceiling: Option<usize>,

        /// Compression threshold, percent of the ceiling.
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Run one compression pass.
    Compress {
        #[arg(long)]
        transcript: PathBuf,

        /// Target token budget for the output.
        #[arg(long)]
        target: Option<usize>,

        /// Archive store file. Without it the archive lives in memory only.
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Write the compressed transcript here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Trailing turns kept verbatim.
        #[arg(long)]
        min_recent: Option<usize>,

        /// Model used for summaries.
        #[arg(long)]
        model: Option<String>,

        /// Never call an LLM; use template summaries.
        #[arg(long)]
        no_llm: bool,
    },

    /// Search an archive and print the retrieved context.
    Recall {
        #[arg(long)]
        archive: PathBuf,

        /// Keywords or file paths to look for.
        query: String,

        /// Number of entries to return.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print the budget allocation for a ceiling.
    Budget {
        #[arg(long)]
        total: usize,

        /// Also print the allocation rescaled to this total.
        #[arg(long)]
        rescale: Option<usize>,
    },
}

// ── Helpers ────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {what} '{}': {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("failed to parse {what} '{}': {e}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    match path {
        Some(path) => EngineConfig::load(path).map_err(|e| format!("{}: {e}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// LLM summarizer when a key is available and not disabled.
fn build_summarizer(model: &str, no_llm: bool) -> Result<Option<LlmSummarizer>, String> {
    if no_llm {
        return Ok(None);
    }
    let Ok(api_key) = std::env::var("OPENROUTER_KEY") else {
        debug!("OPENROUTER_KEY not set; using template summaries");
        return Ok(None);
    };
    let client = OpenRouterClient::new(api_key)
        .map_err(|e| format!("failed to create API client: {e}"))?;
    Ok(Some(LlmSummarizer::new(client).with_model(model)))
}

// ── Subcommands ────────────────────────────────────────────────────

fn run_usage(
    config: EngineConfig,
    transcript: &Path,
    tools: Option<&Path>,
    ceiling: Option<usize>,
    threshold: Option<f64>,
) -> Result<String, String> {
    let turns: Vec<Message> = read_json(transcript, "transcript")?;
    let tool_defs: Vec<ToolDef> = match tools {
        Some(path) => read_json(path, "tools file")?,
        None => Vec::new(),
    };
    let config = EngineConfig {
        context_window: ceiling.unwrap_or(config.context_window),
        compression_threshold_percent: threshold.unwrap_or(config.compression_threshold_percent),
        ..config
    };
    config.validate().map_err(|e| e.to_string())?;

    let mut tracker = config.usage_tracker();
    tracker.record_usage(&turns, &tool_defs);
    let verdict = if tracker.needs_compression() {
        "compression needed"
    } else {
        "within budget"
    };
    Ok(format!("{}\n{verdict}\n", tracker.summary()))
}

struct CompressArgs {
    transcript: PathBuf,
    target: Option<usize>,
    archive: Option<PathBuf>,
    out: Option<PathBuf>,
    min_recent: Option<usize>,
    model: Option<String>,
    no_llm: bool,
}

async fn run_compress(
    config: EngineConfig,
    args: CompressArgs,
    verbose: bool,
) -> Result<String, String> {
    let turns: Vec<Message> = read_json(&args.transcript, "transcript")?;

    let mut pass = config.compression_config(args.target);
    if let Some(n) = args.min_recent {
        pass.min_recent_messages = n;
    }

    let store = match &args.archive {
        Some(path) => JsonArchiveStore::open(path)
            .await
            .map_err(|e| format!("failed to open archive: {e}"))?,
        None => JsonArchiveStore::ephemeral(),
    };

    let mut engine = CompressionEngine::new(Box::new(store))
        .with_estimator(Arc::new(config.estimator()))
        .with_cache_capacity(config.summary_cache_capacity)
        .with_recall_limit(config.retrieval_top_k);
    engine = if verbose {
        engine.with_event_handler(Box::new(LoggingHandler))
    } else {
        engine.with_event_handler(Box::new(NoopHandler))
    };
    let model = args.model.as_deref().unwrap_or(&config.summary_model);
    if let Some(summarizer) = build_summarizer(model, args.no_llm)? {
        engine = engine.with_summarizer(Box::new(summarizer));
    }

    let outcome = engine
        .compress(&turns, &pass)
        .await
        .map_err(|e| e.to_string())?;

    eprintln!("{}", outcome.notice());
    if !outcome.strategies_applied.is_empty() {
        eprintln!("  strategies: {}", outcome.strategies_applied.join(", "));
    }
    for warning in &outcome.warnings {
        eprintln!("  Warning: {warning}");
    }

    let json = serde_json::to_string_pretty(&outcome.turns)
        .map_err(|e| format!("failed to serialize transcript: {e}"))?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, json)
                .map_err(|e| format!("failed to write '{}': {e}", path.display()))?;
            Ok(String::new())
        }
        None => Ok(format!("{json}\n")),
    }
}

async fn run_recall(
    config: EngineConfig,
    archive: &Path,
    query: &str,
    limit: Option<usize>,
) -> Result<String, String> {
    let store = JsonArchiveStore::open(archive)
        .await
        .map_err(|e| format!("failed to open archive: {e}"))?;
    let engine = CompressionEngine::new(Box::new(store))
        .with_recall_limit(limit.unwrap_or(config.retrieval_top_k));
    Ok(match engine.retrieve(query).await {
        Some(context) => format!("{context}\n"),
        None => "no matching archive entries\n".to_string(),
    })
}

fn run_budget(config: EngineConfig, total: usize, rescale: Option<usize>) -> Result<String, String> {
    let allocator = config.allocator().map_err(|e| e.to_string())?;
    let budget = allocator.allocate(total);
    let mut out = budget.to_table();
    if let Some(new_total) = rescale {
        out.push_str(&format!("\nrescaled to {new_total}:\n"));
        out.push_str(&budget.rescale(new_total).to_table());
    }
    Ok(out)
}

async fn run(cli: Cli) -> Result<String, String> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Usage {
            transcript,
            tools,
            ceiling,
            threshold,
        } => run_usage(config, &transcript, tools.as_deref(), ceiling, threshold),
        Command::Compress {
            transcript,
            target,
            archive,
            out,
            min_recent,
            model,
            no_llm,
        } => {
            let args = CompressArgs {
                transcript,
                target,
                archive,
                out,
                min_recent,
                model,
                no_llm,
            };
            run_compress(config, args, cli.verbose).await
        }
        Command::Recall {
            archive,
            query,
            limit,
        } => run_recall(config, &archive, &query, limit).await,
        Command::Budget { total, rescale } => run_budget(config, total, rescale),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(output) => print!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
