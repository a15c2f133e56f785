//! Run orchestration: acquisition and extraction as two stages of one pipeline

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::acquisition::cache::id_from_info_path;
use crate::acquisition::{
    AcquisitionController, AcquisitionReport, CaptionCache, DownloadLedger, VideoFetcher,
};
use crate::captions::{build_excerpt, select_track, vtt_to_text};
use crate::config::Config;
use crate::error::{IngestError, Result};
use crate::extraction::{ExtractionOutcome, StructuredExtractor};
use crate::llm::LLM;
use crate::records::{Candidate, FailureRecord, NonReviewRecord, ProductionDataset, ReviewRecord};
use crate::state::{ItemStage, StateStats, StateTracker, Terminal};

pub const REVIEWS_FILE: &str = "missing.json";
pub const PARTIAL_REVIEWS_FILE: &str = "missing.partial.json";
pub const NON_REVIEWS_FILE: &str = "non_reviews.json";
pub const FAILURES_FILE: &str = "failures.json";
pub const RUN_STATS_FILE: &str = "run_stats.json";

/// Counts from scanning cached metadata for extraction candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub info_json_files: usize,
    pub skipped_unreadable: usize,
    pub skipped_non_video: usize,
    pub skipped_already_in_reports: usize,
    pub skipped_before_cutoff: usize,
    pub skipped_missing_captions: usize,
    pub candidates: usize,
    pub limit: Option<usize>,
}

/// Everything a run produced, written to `run_stats.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub cutoff: NaiveDate,
    pub dry_run: bool,
    pub acquisition: Option<AcquisitionReport>,
    pub discovery: Option<DiscoveryStats>,
    pub items: StateStats,
    pub reviews: usize,
    pub non_reviews: usize,
    pub failures: usize,
    /// Why the pipeline stopped before its last stage, if it did
    pub halted: Option<String>,
}

impl RunReport {
    pub fn new(cutoff: NaiveDate, dry_run: bool) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            cutoff,
            dry_run,
            acquisition: None,
            discovery: None,
            items: StateStats::default(),
            reviews: 0,
            non_reviews: 0,
            failures: 0,
            halted: None,
        }
    }
}

/// Shared state threaded through the stages of one run
pub struct RunContext {
    pub config: Config,
    pub cutoff: NaiveDate,
    pub dataset: ProductionDataset,
    pub tracker: StateTracker,
    pub report: RunReport,
    pub reviews: Vec<ReviewRecord>,
}

impl RunContext {
    /// Validate the config and load the production dataset
    pub async fn prepare(config: Config) -> Result<Self> {
        config.validate()?;
        let cutoff = config.cutoff()?;
        let dataset = ProductionDataset::load(&config.paths.reports).await?;
        info!(
            "📚 Production dataset {}: {} videos",
            config.paths.reports.display(),
            dataset.len()
        );

        Ok(Self {
            report: RunReport::new(cutoff, config.extraction.dry_run),
            cutoff,
            dataset,
            tracker: StateTracker::new(),
            reviews: Vec::new(),
            config,
        })
    }

    /// First upload date in scope
    pub fn date_after(&self) -> NaiveDate {
        self.cutoff.succ_opt().unwrap_or(self.cutoff)
    }

    pub fn halt(&mut self, reason: impl Into<String>) {
        self.report.halted = Some(reason.into());
    }

    pub fn is_halted(&self) -> bool {
        self.report.halted.is_some()
    }
}

/// One phase of the run; stages talk only through the on-disk cache and ledger
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut RunContext) -> Result<()>;
}

/// Ordered stages sharing one [`RunContext`]
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: Box<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order, then write run statistics
    pub async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let start_time = Instant::now();

        for stage in &self.stages {
            if ctx.is_halted() {
                debug!("Skipping stage {}", stage.name());
                continue;
            }
            info!("▶️ Stage: {}", stage.name());
            stage.run(ctx).await?;
        }

        ctx.report.items = ctx.tracker.statistics();
        ctx.report.finished_at = Some(Utc::now());
        ArtifactWriter::new(&ctx.config.paths.out_dir)
            .write_run_stats(&ctx.report)
            .await?;

        info!(
            "🎉 Run completed in {:.2}s",
            start_time.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Seeds the ledger, reconciles the cache, and crawls the source
pub struct AcquisitionStage {
    fetcher: Arc<dyn VideoFetcher>,
}

impl AcquisitionStage {
    pub fn new(fetcher: Arc<dyn VideoFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Stage for AcquisitionStage {
    fn name(&self) -> &'static str {
        "acquisition"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let paths = &ctx.config.paths;
        let cache = CaptionCache::new(&paths.subs_dir);
        let ledger = DownloadLedger::open(&paths.archive).await?;
        let settings = ctx.config.acquisition_settings()?;

        let mut controller =
            AcquisitionController::new(self.fetcher.clone(), cache, ledger, settings);
        let cache_only = ctx.config.acquisition.cache_only;
        let report = controller.run(&ctx.dataset, cache_only).await?;

        if report.paused() {
            warn!("⏸️ Acquisition paused on a rate limit; continuing with what is cached");
        }
        info!(
            "📒 Ledger holds {} entries ({} newly seeded)",
            report.ledger_entries, report.ledger_seeded
        );
        ctx.report.acquisition = Some(report);

        if cache_only {
            ctx.halt("cache-only");
        }
        Ok(())
    }
}

/// Turns cached captions into review records
pub struct ExtractionStage {
    llm: Option<Arc<dyn LLM>>,
}

impl ExtractionStage {
    /// `None` writes stub records without calling a backend
    pub fn new(llm: Option<Arc<dyn LLM>>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Stage for ExtractionStage {
    fn name(&self) -> &'static str {
        "extraction"
    }

    async fn run(&self, ctx: &mut RunContext) -> Result<()> {
        let llm = match (&self.llm, ctx.config.extraction.dry_run) {
            (_, true) => None,
            (Some(llm), false) => Some(llm.clone()),
            (None, false) => {
                return Err(IngestError::Backend(
                    "no generation backend configured (use --dry-run for stub output)".to_string(),
                ))
            }
        };

        let cache = CaptionCache::new(&ctx.config.paths.subs_dir);
        let Discovery {
            candidates,
            mut failures,
            stats,
        } = discover_candidates(ctx, &cache).await?;
        log_discovery(ctx, &stats, candidates.len());
        ctx.report.discovery = Some(stats);

        let writer = ArtifactWriter::new(&ctx.config.paths.out_dir);
        writer.initialize().await?;
        let mut non_reviews: Vec<NonReviewRecord> = Vec::new();

        let path = match llm {
            None => {
                for candidate in &candidates {
                    ctx.tracker
                        .advance(&candidate.video_code, ItemStage::Extracted(Terminal::Review))?;
                    ctx.reviews.push(ReviewRecord::stub(candidate));
                }
                let path = writer.write_reviews(&ctx.reviews).await?;
                info!("📝 Wrote stub output (no backend) to {}", path.display());
                path
            }
            Some(llm) => {
                let extractor = StructuredExtractor::new(llm);
                let processed =
                    extract_all(ctx, &extractor, &candidates, &mut non_reviews, &mut failures).await;
                if let Err(e) = processed {
                    let path = writer.write_partial(&ctx.reviews).await?;
                    warn!(
                        "💾 Aborting; flushed {} accumulated reviews to {}",
                        ctx.reviews.len(),
                        path.display()
                    );
                    return Err(e);
                }
                writer.write_reviews(&ctx.reviews).await?
            }
        };

        if let Some(n) = ctx.config.extraction.print_first.filter(|n| *n > 0) {
            let sample = &ctx.reviews[..n.min(ctx.reviews.len())];
            println!("\nSample extracted reviews:");
            println!("{}", serde_json::to_string_pretty(sample)?);
        }

        if let Some(side) = writer.write_non_reviews(&non_reviews).await? {
            info!("🚫 Wrote {} non-reviews to {}", non_reviews.len(), side.display());
        }
        if let Some(side) = writer.write_failures(&failures).await? {
            warn!("❌ Wrote {} failures to {}", failures.len(), side.display());
        }

        ctx.report.reviews = ctx.reviews.len();
        ctx.report.non_reviews = non_reviews.len();
        ctx.report.failures = failures.len();
        info!("✅ Wrote {} review items to {}", ctx.reviews.len(), path.display());
        Ok(())
    }
}

async fn extract_all(
    ctx: &mut RunContext,
    extractor: &StructuredExtractor,
    candidates: &[Candidate],
    non_reviews: &mut Vec<NonReviewRecord>,
    failures: &mut Vec<FailureRecord>,
) -> Result<()> {
    for (index, candidate) in candidates.iter().enumerate() {
        info!(
            "[{}/{}] Parsing {} - {}",
            index + 1,
            candidates.len(),
            candidate.video_code,
            candidate.video_title
        );

        match extractor.process(candidate).await? {
            ExtractionOutcome::Review(record) => {
                ctx.tracker
                    .advance(&candidate.video_code, ItemStage::Extracted(Terminal::Review))?;
                ctx.reviews.push(record);
            }
            ExtractionOutcome::NonReview(record) => {
                ctx.tracker.advance(
                    &candidate.video_code,
                    ItemStage::Extracted(Terminal::NonReview),
                )?;
                debug!("Skipping {}: {}", record.video_code, record.skip_reason);
                non_reviews.push(record);
            }
            ExtractionOutcome::Failed(record) => {
                ctx.tracker
                    .advance(&candidate.video_code, ItemStage::Extracted(Terminal::Failed))?;
                failures.push(record);
            }
        }
    }
    Ok(())
}

/// What a scan of the cache produced
#[derive(Debug, Default)]
pub struct Discovery {
    pub candidates: Vec<Candidate>,
    /// Items that failed before extraction (bad metadata, missing or unreadable captions)
    pub failures: Vec<FailureRecord>,
    pub stats: DiscoveryStats,
}

/// Record a pre-extraction failure and move the item to its terminal state
fn fail_item(
    ctx: &mut RunContext,
    discovery: &mut Discovery,
    video_code: &str,
    video_title: &str,
    error: String,
) -> Result<()> {
    warn!("❌ Failed {}: {}", video_code, error);
    ctx.tracker.discover(video_code);
    ctx.tracker
        .advance(video_code, ItemStage::Extracted(Terminal::Failed))?;
    discovery.failures.push(FailureRecord {
        video_code: video_code.to_string(),
        video_title: video_title.to_string(),
        error,
    });
    Ok(())
}

/// Scan cached metadata for videos to extract, in file-name order
pub async fn discover_candidates(ctx: &mut RunContext, cache: &CaptionCache) -> Result<Discovery> {
    let info_files = cache.info_files();
    let date_after = ctx.date_after();
    let limit = ctx.config.extraction.max_videos;
    let excerpt_chars = ctx.config.extraction.excerpt_chars;

    let mut discovery = Discovery {
        stats: DiscoveryStats {
            info_json_files: info_files.len(),
            limit,
            ..Default::default()
        },
        ..Default::default()
    };

    for info_path in info_files {
        let info = match cache.read_info(&info_path).await {
            Ok(info) => info,
            Err(e) => {
                discovery.stats.skipped_unreadable += 1;
                let stem = id_from_info_path(&info_path)
                    .map(str::to_string)
                    .unwrap_or_else(|| info_path.display().to_string());
                if !ctx.dataset.contains(&stem) {
                    let error = format!("unreadable metadata: {}", e);
                    fail_item(ctx, &mut discovery, &stem, "", error)?;
                }
                continue;
            }
        };

        let Some(id) = info.id() else {
            discovery.stats.skipped_non_video += 1;
            continue;
        };
        if ctx.dataset.contains(id) {
            discovery.stats.skipped_already_in_reports += 1;
            continue;
        }
        let Some(video) = info.into_descriptor() else {
            discovery.stats.skipped_non_video += 1;
            continue;
        };
        if video.upload_date < date_after {
            discovery.stats.skipped_before_cutoff += 1;
            continue;
        }

        ctx.tracker.discover(&video.id);

        let tracks = cache.caption_tracks(&video.id);
        let Some(track) = select_track(&tracks) else {
            discovery.stats.skipped_missing_captions += 1;
            let error = "no caption track".to_string();
            fail_item(ctx, &mut discovery, &video.id, &video.title, error)?;
            continue;
        };
        ctx.tracker.advance(&video.id, ItemStage::CaptionAvailable)?;

        let raw = match tokio::fs::read(&track.path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                discovery.stats.skipped_missing_captions += 1;
                let error = format!("unreadable caption {}: {}", track.path.display(), e);
                fail_item(ctx, &mut discovery, &video.id, &video.title, error)?;
                continue;
            }
        };
        let transcript_text = vtt_to_text(&raw);
        let transcript_excerpt = build_excerpt(&transcript_text, excerpt_chars);
        ctx.tracker
            .advance(&video.id, ItemStage::TranscriptNormalized)?;

        discovery
            .candidates
            .push(Candidate::new(video, transcript_text, transcript_excerpt));
        discovery.stats.candidates += 1;

        if limit.map_or(false, |max| discovery.candidates.len() >= max) {
            break;
        }
    }

    Ok(discovery)
}

fn log_discovery(ctx: &RunContext, stats: &DiscoveryStats, count: usize) {
    let paths = &ctx.config.paths;
    info!("🔍 Parse discovery summary:");
    info!("- Subtitles dir: {}", paths.subs_dir.display());
    info!("- Reports file: {}", paths.reports.display());
    info!(
        "- After (strict): {} (includes >= {})",
        ctx.cutoff,
        ctx.date_after()
    );
    info!("- Found infojson: {}", stats.info_json_files);
    info!("- Skipped (already in reports): {}", stats.skipped_already_in_reports);
    info!("- Skipped (before cutoff): {}", stats.skipped_before_cutoff);
    info!("- Skipped (missing .vtt): {}", stats.skipped_missing_captions);
    info!("- Skipped (non-video/missing upload_date): {}", stats.skipped_non_video);
    info!("- Skipped (unreadable metadata): {}", stats.skipped_unreadable);
    match stats.limit {
        Some(limit) => info!("- Will process: {} (limited to {})", count, limit),
        None => info!("- Will process: {}", count),
    }
}

/// Writes pretty-printed JSON artifacts into the output directory
pub struct ArtifactWriter {
    out_dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.out_dir).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        self.initialize().await?;
        let path = self.out_dir.join(name);
        let mut content = serde_json::to_string_pretty(value)?;
        content.push('\n');
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    /// The canonical batch; written once per run
    pub async fn write_reviews(&self, reviews: &[ReviewRecord]) -> Result<PathBuf> {
        self.write_json(REVIEWS_FILE, reviews).await
    }

    /// Accumulated reviews from an aborted run, kept apart from the canonical batch
    pub async fn write_partial(&self, reviews: &[ReviewRecord]) -> Result<PathBuf> {
        self.write_json(PARTIAL_REVIEWS_FILE, reviews).await
    }

    pub async fn write_non_reviews(&self, items: &[NonReviewRecord]) -> Result<Option<PathBuf>> {
        if items.is_empty() {
            return Ok(None);
        }
        self.write_json(NON_REVIEWS_FILE, items).await.map(Some)
    }

    pub async fn write_failures(&self, items: &[FailureRecord]) -> Result<Option<PathBuf>> {
        if items.is_empty() {
            return Ok(None);
        }
        self.write_json(FAILURES_FILE, items).await.map(Some)
    }

    pub async fn write_run_stats(&self, report: &RunReport) -> Result<PathBuf> {
        self.write_json(RUN_STATS_FILE, report).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use tempfile::TempDir;

    const VTT: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:02.000\nhello there\n\n00:00:02.000 --> 00:00:03.000\nhello there\nrating 7\n";

    async fn write(dir: &Path, name: &str, content: &str) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        tokio::fs::write(dir.join(name), content).await.unwrap();
    }

    async fn context(root: &TempDir, limit: Option<usize>) -> RunContext {
        let mut builder = ConfigBuilder::new()
            .with_cutoff("2024-01-01")
            .with_root(root.path())
            .dry_run(true);
        if let Some(limit) = limit {
            builder = builder.with_max_videos(limit);
        }
        RunContext::prepare(builder.build()).await.unwrap()
    }

    async fn fixture(root: &TempDir) {
        let subs = root.path().join("subs");
        write(&subs, "aaaaaaaaaaa.info.json", r#"{"id": "aaaaaaaaaaa", "title": "A", "upload_date": "20240102"}"#).await;
        write(&subs, "aaaaaaaaaaa.en.vtt", VTT).await;
        write(&subs, "bbbbbbbbbbb.info.json", r#"{"id": "bbbbbbbbbbb", "title": "B", "upload_date": "20240101"}"#).await;
        write(&subs, "ccccccccccc.info.json", r#"{"id": "ccccccccccc", "title": "C", "upload_date": "20240301"}"#).await;
        write(&subs, "ddddddddddd.info.json", r#"{"id": "ddddddddddd", "title": "D", "upload_date": "20240302"}"#).await;
        write(&subs, "ddddddddddd.en.auto.vtt", VTT).await;
        write(&subs, "eeeeeeeeeee.info.json", r#"{"id": "eeeeeeeeeee", "title": "E", "upload_date": "20240303"}"#).await;
        write(&subs, "eeeeeeeeeee.en.vtt", VTT).await;
        write(&subs, "UCchannel000000000000000.info.json", r#"{"id": "UCchannel000000000000000", "title": "Channel"}"#).await;
        write(&subs, "zzzzzzzzzzz.info.json", "{oops").await;
        write(root.path(), "reports.json", r#"[{"videoCode": "eeeeeeeeeee", "dateReleased": "2024-03-03"}]"#).await;
    }

    #[tokio::test]
    async fn test_discovery_filters_and_stats() {
        let root = TempDir::new().unwrap();
        fixture(&root).await;
        let mut ctx = context(&root, None).await;
        let cache = CaptionCache::new(root.path().join("subs"));

        let Discovery {
            candidates,
            failures,
            stats,
        } = discover_candidates(&mut ctx, &cache).await.unwrap();
        let codes: Vec<&str> = candidates.iter().map(|c| c.video_code.as_str()).collect();

        assert_eq!(codes, vec!["aaaaaaaaaaa", "ddddddddddd"]);
        assert_eq!(
            stats,
            DiscoveryStats {
                info_json_files: 7,
                skipped_unreadable: 1,
                skipped_non_video: 1,
                skipped_already_in_reports: 1,
                skipped_before_cutoff: 1,
                skipped_missing_captions: 1,
                candidates: 2,
                limit: None,
            }
        );
        assert_eq!(candidates[0].transcript_text, "hello there\nrating 7");
        assert_eq!(
            ctx.tracker.get("ccccccccccc").unwrap().stage,
            ItemStage::Extracted(Terminal::Failed)
        );
        let failed: Vec<(&str, &str)> = failures
            .iter()
            .map(|f| (f.video_code.as_str(), f.error.as_str()))
            .collect();
        assert_eq!(failed[0], ("ccccccccccc", "no caption track"));
        assert_eq!(failed[1].0, "zzzzzzzzzzz");
        assert!(failed[1].1.starts_with("unreadable metadata"));
        assert_eq!(failures.len(), 2);
        assert_eq!(
            ctx.tracker.get("aaaaaaaaaaa").unwrap().stage,
            ItemStage::TranscriptNormalized
        );
    }

    #[tokio::test]
    async fn test_discovery_limit() {
        let root = TempDir::new().unwrap();
        fixture(&root).await;
        let mut ctx = context(&root, Some(1)).await;
        let cache = CaptionCache::new(root.path().join("subs"));

        let discovery = discover_candidates(&mut ctx, &cache).await.unwrap();
        assert_eq!(discovery.candidates.len(), 1);
        assert_eq!(discovery.stats.limit, Some(1));
    }

    #[tokio::test]
    async fn test_non_utf8_captions_decode_lossily() {
        let root = TempDir::new().unwrap();
        let subs = root.path().join("subs");
        write(&subs, "aaaaaaaaaaa.info.json", r#"{"id": "aaaaaaaaaaa", "title": "Cafe", "upload_date": "20240102"}"#).await;
        let mut vtt = b"WEBVTT\n\n00:00:01.000 --> 00:00:02.000\ncaf".to_vec();
        vtt.extend_from_slice(&[0xe9]);
        vtt.extend_from_slice(b" au lait\n");
        tokio::fs::write(subs.join("aaaaaaaaaaa.en.vtt"), vtt).await.unwrap();

        let mut ctx = context(&root, None).await;
        let cache = CaptionCache::new(&subs);
        let discovery = discover_candidates(&mut ctx, &cache).await.unwrap();

        assert_eq!(discovery.candidates.len(), 1);
        assert_eq!(discovery.candidates[0].transcript_text, "caf\u{FFFD} au lait");
        assert_eq!(discovery.stats.skipped_missing_captions, 0);
        assert!(discovery.failures.is_empty());
        assert_eq!(
            ctx.tracker.get("aaaaaaaaaaa").unwrap().stage,
            ItemStage::TranscriptNormalized
        );
    }

    #[tokio::test]
    async fn test_dry_run_writes_stubs_and_stats() {
        let root = TempDir::new().unwrap();
        fixture(&root).await;
        let mut ctx = context(&root, None).await;

        let pipeline = Pipeline::new().with_stage(Box::new(ExtractionStage::new(None)));
        pipeline.run(&mut ctx).await.unwrap();

        let out = root.path().join("out");
        let reviews: Vec<ReviewRecord> =
            serde_json::from_str(&tokio::fs::read_to_string(out.join(REVIEWS_FILE)).await.unwrap())
                .unwrap();
        assert_eq!(reviews.len(), 2);
        assert!(reviews.iter().all(|r| r.product.is_empty() && r.rating.is_none()));
        assert_eq!(reviews[0].date_released, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());

        assert!(!out.join(NON_REVIEWS_FILE).exists());
        let failures: Vec<FailureRecord> =
            serde_json::from_str(&tokio::fs::read_to_string(out.join(FAILURES_FILE)).await.unwrap())
                .unwrap();
        let failed: Vec<&str> = failures.iter().map(|f| f.video_code.as_str()).collect();
        assert_eq!(failed, vec!["ccccccccccc", "zzzzzzzzzzz"]);
        assert_eq!(failures[0].video_title, "C");

        let stats: serde_json::Value =
            serde_json::from_str(&tokio::fs::read_to_string(out.join(RUN_STATS_FILE)).await.unwrap())
                .unwrap();
        assert_eq!(stats["discovery"]["candidates"], 2);
        assert_eq!(stats["dry_run"], true);
        assert_eq!(stats["reviews"], 2);
        assert_eq!(stats["failures"], 2);
        assert_eq!(stats["items"]["reviews"], 2);
        assert_eq!(stats["items"]["failed"], 2);
        assert_eq!(stats["items"]["in_progress"], 0);
    }

    #[tokio::test]
    async fn test_missing_backend_outside_dry_run_is_an_error() {
        let root = TempDir::new().unwrap();
        fixture(&root).await;
        let mut ctx = context(&root, None).await;
        ctx.config.extraction.dry_run = false;

        let pipeline = Pipeline::new().with_stage(Box::new(ExtractionStage::new(None)));
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, IngestError::Backend(_)));
        assert!(!root.path().join("out").join(REVIEWS_FILE).exists());
    }

    /// Accepts the first call, then rejects the credential
    struct RevokedAfterFirst {
        calls: std::sync::Mutex<usize>,
    }

    #[async_trait]
    impl LLM for RevokedAfterFirst {
        async fn chat(&self, _request: crate::llm::ChatRequest) -> anyhow::Result<crate::llm::LLMResponse> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls > 1 {
                return Err(IngestError::Backend("OpenAI rejected the credential (401)".to_string()).into());
            }
            Ok(crate::llm::LLMResponse {
                content: r#"{"isReview": true, "product": "Nuggets", "manufacturer": "KFC", "category": "Running On Empty", "rating": 6, "skipReason": ""}"#.to_string(),
                tokens_used: None,
            })
        }

        fn provider_type(&self) -> crate::llm::LLMProvider {
            crate::llm::LLMProvider::OpenAI
        }
    }

    #[tokio::test]
    async fn test_abort_flushes_partial_reviews() {
        let root = TempDir::new().unwrap();
        fixture(&root).await;
        let mut ctx = context(&root, None).await;
        ctx.config.extraction.dry_run = false;

        let llm = Arc::new(RevokedAfterFirst {
            calls: std::sync::Mutex::new(0),
        });
        let stage = ExtractionStage::new(Some(llm.clone() as Arc<dyn LLM>));
        let pipeline = Pipeline::new().with_stage(Box::new(stage));
        let err = pipeline.run(&mut ctx).await.unwrap_err();
        assert!(matches!(err, IngestError::Backend(_)));
        assert_eq!(*llm.calls.lock().unwrap(), 2);

        let out = root.path().join("out");
        assert!(!out.join(REVIEWS_FILE).exists());
        let partial: Vec<ReviewRecord> = serde_json::from_str(
            &tokio::fs::read_to_string(out.join(PARTIAL_REVIEWS_FILE)).await.unwrap(),
        )
        .unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(partial[0].video_code, "aaaaaaaaaaa");
        assert_eq!(partial[0].product, "Nuggets");
    }

    #[tokio::test]
    async fn test_halted_pipeline_skips_later_stages() {
        let root = TempDir::new().unwrap();
        fixture(&root).await;
        let mut ctx = context(&root, None).await;
        ctx.halt("cache-only");

        let pipeline = Pipeline::new().with_stage(Box::new(ExtractionStage::new(None)));
        assert_eq!(pipeline.stage_names(), vec!["extraction"]);
        pipeline.run(&mut ctx).await.unwrap();

        let out = root.path().join("out");
        assert!(!out.join(REVIEWS_FILE).exists());
        assert!(out.join(RUN_STATS_FILE).exists());
    }

    #[tokio::test]
    async fn test_side_files_only_when_non_empty() {
        let root = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(&root.path().join("out"));

        assert!(writer.write_failures(&[]).await.unwrap().is_none());
        let path = writer
            .write_failures(&[FailureRecord {
                video_code: "x".to_string(),
                video_title: "X".to_string(),
                error: "boom".to_string(),
            }])
            .await
            .unwrap()
            .unwrap();
        let content = tokio::fs::read_to_string(path).await.unwrap();
        assert!(content.ends_with("]\n"));
        assert!(content.contains("\"videoCode\": \"x\""));
    }
}
