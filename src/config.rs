use crate::acquisition::{AcquisitionSettings, Pacing, DEFAULT_SOURCE};
use crate::captions::vtt::{DEFAULT_EXCERPT_CHARS, EXCERPT_RESERVE};
use crate::error::{IngestError, Result};
use crate::llm::{LLMConfig, LLMProvider};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CHANNEL_URL: &str = "https://www.youtube.com/@TheReportOfTheWeek/videos";
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Configuration for the review ingestion pipeline
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// What to crawl and from when
    pub source: SourceConfig,

    /// Cache, ledger, dataset, and output locations
    pub paths: PathsConfig,

    /// Acquisition tool controls
    pub acquisition: AcquisitionConfig,

    /// Candidate selection and extraction controls
    pub extraction: ExtractionConfig,

    /// Generation backend settings
    pub llm: LLMConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Ledger source tag
    pub platform: String,

    /// Channel listing crawled for new uploads
    pub channel_url: String,

    /// Exclusive lower bound on upload date, `YYYY-MM-DD`
    pub cutoff: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub subs_dir: PathBuf,
    pub archive: PathBuf,
    /// Production dataset used for dedupe
    pub reports: PathBuf,
    pub out_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Executable invoked for crawling and caption fetches
    pub tool: String,
    pub playlist_end: Option<u32>,
    pub sleep_requests: Option<f64>,
    pub min_sleep_interval: Option<f64>,
    pub max_sleep_interval: Option<f64>,
    /// Keep crawling past per-video errors
    pub ignore_errors: bool,
    pub allow_overwrites: bool,
    /// Stop the crawl once uploads cross the cutoff
    pub break_on_date: bool,
    /// Reconcile the cache and skip the crawl and extraction
    pub cache_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Transcript character budget sent to the backend
    pub excerpt_chars: usize,
    /// Stop discovery after this many candidates
    pub max_videos: Option<usize>,
    /// Print this many accepted records after the run
    pub print_first: Option<usize>,
    /// Write stub records without calling the backend
    pub dry_run: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            platform: DEFAULT_SOURCE.to_string(),
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            cutoff: None,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            subs_dir: PathBuf::from("tmp/subs"),
            archive: PathBuf::from("tmp/download-archive.txt"),
            reports: PathBuf::from("data/reports.json"),
            out_dir: PathBuf::from("out"),
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            tool: "yt-dlp".to_string(),
            playlist_end: None,
            sleep_requests: None,
            min_sleep_interval: None,
            max_sleep_interval: None,
            ignore_errors: true,
            allow_overwrites: false,
            break_on_date: true,
            cache_only: false,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            max_videos: None,
            print_first: None,
            dry_run: false,
        }
    }
}

impl Config {
    /// Load configuration from the first readable config file, then apply the environment
    pub fn load() -> Result<Self> {
        let config_paths = ["review-ingest.toml", "config/review-ingest.toml"];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(mut config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        config.apply_env();
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from an explicit file; unlike [`Config::load`], failures are errors
    pub fn load_from(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&config_str).map_err(|e| {
            IngestError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(model) = var("OPENAI_MODEL") {
            if self.llm.provider == LLMProvider::OpenAI {
                self.llm.model = model;
            }
        }
        self.load_credentials();

        if let Some(cutoff) = var("REVIEW_INGEST_AFTER") {
            self.source.cutoff = Some(cutoff);
        }
        if let Some(channel) = var("REVIEW_INGEST_CHANNEL") {
            self.source.channel_url = channel;
        }
        if let Some(dir) = var("REVIEW_INGEST_SUBS_DIR") {
            self.paths.subs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("REVIEW_INGEST_OUT_DIR") {
            self.paths.out_dir = PathBuf::from(dir);
        }
    }

    /// Pick up the API key for the configured provider; call again after switching providers
    pub fn load_credentials(&mut self) {
        let key_var = match self.llm.provider {
            LLMProvider::OpenAI => "OPENAI_API_KEY",
            LLMProvider::Gemini => "GEMINI_API_KEY",
            LLMProvider::LMStudio => return,
        };
        if let Some(key) = std::env::var(key_var).ok().filter(|v| !v.trim().is_empty()) {
            self.llm.api_key = Some(key);
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)
            .map_err(|e| IngestError::Config(format!("Cannot serialize config: {}", e)))?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// The cutoff date; required for every run
    pub fn cutoff(&self) -> Result<NaiveDate> {
        let raw = self
            .source
            .cutoff
            .as_deref()
            .ok_or_else(|| IngestError::Config("Missing required --after YYYY-MM-DD".to_string()))?;
        parse_iso_date(raw, "--after")
    }

    /// Check every setting that can be checked without touching the filesystem
    pub fn validate(&self) -> Result<()> {
        self.cutoff()?;

        if self.source.channel_url.trim().is_empty() {
            return Err(IngestError::Config("channel URL must not be empty".to_string()));
        }
        if self.source.platform.trim().is_empty() || self.source.platform.contains(' ') {
            return Err(IngestError::Config(
                "source platform must be a single non-empty word".to_string(),
            ));
        }

        let pacing = [
            ("sleep_requests", self.acquisition.sleep_requests),
            ("min_sleep_interval", self.acquisition.min_sleep_interval),
            ("max_sleep_interval", self.acquisition.max_sleep_interval),
        ];
        for (name, value) in pacing {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(IngestError::Config(format!(
                        "{} must be a finite, non-negative number (got {})",
                        name, v
                    )));
                }
            }
        }
        if let (Some(min), Some(max)) = (
            self.acquisition.min_sleep_interval,
            self.acquisition.max_sleep_interval,
        ) {
            if min > max {
                return Err(IngestError::Config(
                    "min_sleep_interval must not exceed max_sleep_interval".to_string(),
                ));
            }
        }

        if self.extraction.excerpt_chars <= EXCERPT_RESERVE {
            return Err(IngestError::Config(format!(
                "excerpt_chars must be greater than {}",
                EXCERPT_RESERVE
            )));
        }
        if self.extraction.max_videos == Some(0) {
            return Err(IngestError::Config("max_videos must be greater than 0".to_string()));
        }

        tracing::debug!("✅ Configuration validation passed");
        Ok(())
    }

    /// The backend credential, when the configured provider needs one
    pub fn require_backend_credential(&self) -> Result<()> {
        let missing = self.llm.api_key.as_deref().map_or(true, str::is_empty);
        match self.llm.provider {
            LLMProvider::OpenAI if missing => {
                Err(IngestError::MissingCredential("OPENAI_API_KEY".to_string()))
            }
            LLMProvider::Gemini if missing => {
                Err(IngestError::MissingCredential("GEMINI_API_KEY".to_string()))
            }
            _ => Ok(()),
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            sleep_requests: self.acquisition.sleep_requests,
            min_sleep_interval: self.acquisition.min_sleep_interval,
            max_sleep_interval: self.acquisition.max_sleep_interval,
        }
    }

    pub fn acquisition_settings(&self) -> Result<AcquisitionSettings> {
        Ok(AcquisitionSettings {
            source: self.source.platform.clone(),
            source_url: self.source.channel_url.clone(),
            cutoff: self.cutoff()?,
            pacing: self.pacing(),
            playlist_end: self.acquisition.playlist_end,
            break_on_date: self.acquisition.break_on_date,
            ignore_errors: self.acquisition.ignore_errors,
            allow_overwrites: self.acquisition.allow_overwrites,
        })
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Review Ingest Configuration:\n\
            - Channel: {}\n\
            - After (strict): {}\n\
            - Subtitles dir: {}\n\
            - Ledger: {}\n\
            - Reports file: {}\n\
            - Output dir: {}\n\
            - Backend: {:?} ({})\n\
            - Dry run: {}",
            self.source.channel_url,
            self.source.cutoff.as_deref().unwrap_or("<unset>"),
            self.paths.subs_dir.display(),
            self.paths.archive.display(),
            self.paths.reports.display(),
            self.paths.out_dir.display(),
            self.llm.provider,
            self.llm.model,
            self.extraction.dry_run
        )
    }
}

/// Parse a real `YYYY-MM-DD` calendar date
pub fn parse_iso_date(raw: &str, flag: &str) -> Result<NaiveDate> {
    let invalid = || IngestError::InvalidDate {
        flag: flag.to_string(),
        value: raw.to_string(),
    };
    let shaped = raw.len() == 10
        && raw.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !shaped {
        return Err(invalid());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| invalid())
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_cutoff(mut self, cutoff: impl Into<String>) -> Self {
        self.config.source.cutoff = Some(cutoff.into());
        self
    }

    pub fn with_channel(mut self, url: impl Into<String>) -> Self {
        self.config.source.channel_url = url.into();
        self
    }

    /// Point every path at a single working directory
    pub fn with_root(mut self, root: &Path) -> Self {
        self.config.paths = PathsConfig {
            subs_dir: root.join("subs"),
            archive: root.join("download-archive.txt"),
            reports: root.join("reports.json"),
            out_dir: root.join("out"),
        };
        self
    }

    pub fn with_subs_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.subs_dir = dir;
        self
    }

    pub fn with_reports(mut self, path: PathBuf) -> Self {
        self.config.paths.reports = path;
        self
    }

    pub fn with_out_dir(mut self, dir: PathBuf) -> Self {
        self.config.paths.out_dir = dir;
        self
    }

    pub fn with_provider(mut self, provider: LLMProvider) -> Self {
        self.config.llm.provider = provider;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.llm.model = model.into();
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.llm.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_videos(mut self, limit: usize) -> Self {
        self.config.extraction.max_videos = Some(limit);
        self
    }

    pub fn dry_run(mut self, enable: bool) -> Self {
        self.config.extraction.dry_run = enable;
        self
    }

    pub fn cache_only(mut self, enable: bool) -> Self {
        self.config.acquisition.cache_only = enable;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
