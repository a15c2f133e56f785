use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use review_ingest::config::Config;
use review_ingest::error::IngestError;
use review_ingest::llm::{create_llm, LLMProvider, LLM};
use review_ingest::processing::{AcquisitionStage, ExtractionStage, Pipeline, RunContext};
use review_ingest::YtDlpFetcher;

#[derive(Parser, Debug)]
#[command(
    name = "review-ingest",
    version,
    author = "TigreRoll",
    about = "Incrementally ingest review videos: download captions, extract structured reviews"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Only include videos uploaded strictly after this date (YYYY-MM-DD)
    #[arg(long, global = true, value_name = "DATE")]
    after: Option<String>,

    /// Channel listing to crawl
    #[arg(long, global = true, value_name = "URL")]
    channel: Option<String>,

    /// Production dataset used for dedupe
    #[arg(long, global = true, value_name = "FILE")]
    reports: Option<PathBuf>,

    /// Caption and metadata cache directory
    #[arg(long, global = true, value_name = "DIR")]
    subs_dir: Option<PathBuf>,

    /// Download ledger file
    #[arg(long, global = true, value_name = "FILE")]
    archive: Option<PathBuf>,

    /// Output directory
    #[arg(long, visible_alias = "out-dir", global = true, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Generation backend (openai, lmstudio, gemini)
    #[arg(long, global = true)]
    provider: Option<LLMProvider>,

    /// Model identifier for the generation backend
    #[arg(long, global = true)]
    model: Option<String>,

    /// Stop the crawl after this many playlist entries
    #[arg(long, global = true)]
    playlist_end: Option<u32>,

    /// Seconds to sleep between requests
    #[arg(long, global = true)]
    sleep_requests: Option<f64>,

    /// Minimum seconds to sleep before each download
    #[arg(long, global = true)]
    min_sleep_interval: Option<f64>,

    /// Maximum seconds to sleep before each download
    #[arg(long, global = true)]
    max_sleep_interval: Option<f64>,

    /// Abort the crawl on the first per-video error
    #[arg(long, global = true)]
    abort_on_error: bool,

    /// Re-download files that already exist in the cache
    #[arg(long, global = true)]
    allow_overwrites: bool,

    /// Keep crawling past the cutoff instead of stopping there
    #[arg(long, global = true)]
    no_break_on_date: bool,

    /// Only retry captions for cached metadata; skip the crawl and extraction
    #[arg(long, global = true)]
    cache_only: bool,

    /// Process at most this many candidates
    #[arg(long, visible_alias = "limit", global = true)]
    max_videos: Option<usize>,

    /// Print the first N extracted reviews
    #[arg(long, global = true, value_name = "N")]
    print_first: Option<usize>,

    /// Write stub records without calling the backend
    #[arg(long, global = true)]
    dry_run: bool,

    /// Same as --dry-run
    #[arg(long, visible_alias = "no-backend", global = true)]
    no_openai: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to review-ingest.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Seed the ledger, reconcile the cache, and crawl for new captions
    Download,
    /// Extract reviews from cached captions
    Parse,
    /// Download then parse (default)
    Run,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(after) = &self.after {
            config.source.cutoff = Some(after.clone());
        }
        if let Some(channel) = &self.channel {
            config.source.channel_url = channel.clone();
        }
        if let Some(path) = &self.reports {
            config.paths.reports = path.clone();
        }
        if let Some(dir) = &self.subs_dir {
            config.paths.subs_dir = dir.clone();
        }
        if let Some(path) = &self.archive {
            config.paths.archive = path.clone();
        }
        if let Some(dir) = &self.out {
            config.paths.out_dir = dir.clone();
        }
        if let Some(provider) = &self.provider {
            if *provider != config.llm.provider {
                config.llm.api_key = None;
            }
            config.llm.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }

        let acquisition = &mut config.acquisition;
        acquisition.playlist_end = self.playlist_end.or(acquisition.playlist_end);
        acquisition.sleep_requests = self.sleep_requests.or(acquisition.sleep_requests);
        acquisition.min_sleep_interval = self.min_sleep_interval.or(acquisition.min_sleep_interval);
        acquisition.max_sleep_interval = self.max_sleep_interval.or(acquisition.max_sleep_interval);
        if self.abort_on_error {
            acquisition.ignore_errors = false;
        }
        if self.allow_overwrites {
            acquisition.allow_overwrites = true;
        }
        if self.no_break_on_date {
            acquisition.break_on_date = false;
        }
        if self.cache_only {
            acquisition.cache_only = true;
        }

        let extraction = &mut config.extraction;
        extraction.max_videos = self.max_videos.or(extraction.max_videos);
        extraction.print_first = self.print_first.or(extraction.print_first);
        if self.dry_run || self.no_openai {
            extraction.dry_run = true;
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("review_ingest=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("review_ingest=info,warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_backend(config: &Config) -> Result<Option<Arc<dyn LLM>>> {
    if config.extraction.dry_run {
        return Ok(None);
    }
    config.require_backend_credential()?;
    let llm = create_llm(&config.llm).map_err(|e| IngestError::Backend(e.to_string()))?;
    info!("🤖 Using {:?} backend with model {}", llm.provider_type(), config.llm.model);
    Ok(Some(Arc::from(llm)))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);
    config.load_credentials();
    config.validate()?;

    let command = cli.command.unwrap_or(Commands::Run);
    let acquire = matches!(command, Commands::Download | Commands::Run);
    let extract = match command {
        Commands::Download => false,
        Commands::Parse => true,
        Commands::Run => !config.acquisition.cache_only,
    };

    info!("🚀 Review Ingest starting...");
    info!("{}", config.summary());

    let mut pipeline = Pipeline::new();
    if acquire {
        let fetcher = YtDlpFetcher::new(config.acquisition.tool.clone());
        pipeline = pipeline.with_stage(Box::new(AcquisitionStage::new(Arc::new(fetcher))));
    }
    if extract {
        let llm = build_backend(&config)?;
        pipeline = pipeline.with_stage(Box::new(ExtractionStage::new(llm)));
    }

    let mut ctx = RunContext::prepare(config).await?;
    pipeline.run(&mut ctx).await?;

    if let Some(reason) = &ctx.report.halted {
        info!("🛑 Stopped early ({})", reason);
    }
    Ok(())
}
