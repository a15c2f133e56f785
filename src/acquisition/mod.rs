//! Acquisition stage: keeps the caption cache and the dedupe ledger current.
//!
//! A run seeds the ledger from the production dataset and the cache, retries
//! captions for videos whose metadata is already cached, then crawls the
//! source for anything newer than the cutoff.

pub mod cache;
pub mod fetcher;
pub mod ledger;

pub use cache::{is_video_id, CaptionCache};
pub use fetcher::{
    CaptionRequest, CrawlRequest, FetchOutcome, FetchRequest, Pacing, VideoFetcher, YtDlpFetcher,
};
pub use ledger::{DownloadLedger, LedgerEntry, DEFAULT_SOURCE};

use crate::error::{IngestError, Result};
use crate::records::ProductionDataset;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Inputs for one acquisition run
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Ledger source tag (`youtube`)
    pub source: String,
    /// Channel listing the tool crawls
    pub source_url: String,
    /// Exclusive lower bound on upload date
    pub cutoff: NaiveDate,
    pub pacing: Pacing,
    pub playlist_end: Option<u32>,
    pub break_on_date: bool,
    pub ignore_errors: bool,
    pub allow_overwrites: bool,
}

impl AcquisitionSettings {
    /// First upload date that is in scope (the day after the cutoff)
    pub fn date_after(&self) -> NaiveDate {
        self.cutoff.succ_opt().unwrap_or(self.cutoff)
    }
}

/// A cached metadata file whose captions are still missing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryCandidate {
    pub id: String,
    pub info_path: PathBuf,
}

/// What the cache scan found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub total_info_files: usize,
    pub video_info_files: usize,
    pub caption_files: usize,
    pub unreadable_info_files: usize,
    pub candidates: usize,
    pub retried: usize,
    pub failed: usize,
    pub rate_limited: bool,
}

/// Result of a whole acquisition run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionReport {
    pub ledger_seeded: usize,
    pub ledger_entries: usize,
    pub reconcile: ReconcileSummary,
    pub crawl: Option<CrawlStatus>,
}

impl AcquisitionReport {
    /// True when acquisition stopped early on a throttling signal
    pub fn paused(&self) -> bool {
        self.reconcile.rate_limited || self.crawl == Some(CrawlStatus::RateLimited)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrawlStatus {
    Completed,
    CutoffReached,
    RateLimited,
}

/// Drives the acquisition tool against the cache and ledger handles it is given
pub struct AcquisitionController<F: VideoFetcher> {
    fetcher: F,
    cache: CaptionCache,
    ledger: DownloadLedger,
    settings: AcquisitionSettings,
}

impl<F: VideoFetcher> AcquisitionController<F> {
    pub fn new(
        fetcher: F,
        cache: CaptionCache,
        ledger: DownloadLedger,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            fetcher,
            cache,
            ledger,
            settings,
        }
    }

    pub fn ledger(&self) -> &DownloadLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &CaptionCache {
        &self.cache
    }

    pub fn into_ledger(self) -> DownloadLedger {
        self.ledger
    }

    /// Union of production ids and cached ids, merged into the ledger file
    pub async fn seed_ledger(&mut self, dataset: &ProductionDataset) -> Result<usize> {
        let mut ids: Vec<String> = dataset.video_codes.iter().cloned().collect();
        ids.extend(self.cache.cached_ids());
        let source = self.settings.source.clone();
        self.ledger.seed(&source, ids).await
    }

    /// Scan cached metadata for videos in scope whose captions never arrived
    pub async fn retry_candidates(&self) -> Result<(Vec<RetryCandidate>, ReconcileSummary)> {
        let info_files = self.cache.info_files();
        let caption_ids = self.cache.caption_ids();
        let date_after = self.settings.date_after();

        let mut summary = ReconcileSummary {
            total_info_files: info_files.len(),
            caption_files: caption_ids.len(),
            ..Default::default()
        };
        let mut candidates = Vec::new();

        for info_path in info_files {
            let Some(id) = cache::id_from_info_path(&info_path) else {
                continue;
            };
            if !is_video_id(id) {
                continue;
            }
            summary.video_info_files += 1;
            if caption_ids.contains(id) {
                continue;
            }

            let info = match self.cache.read_info(&info_path).await {
                Ok(info) => info,
                Err(e) => {
                    warn!("Skipping unreadable metadata {}: {}", info_path.display(), e);
                    summary.unreadable_info_files += 1;
                    continue;
                }
            };
            match info.upload_date() {
                Some(date) if date >= date_after => {}
                _ => continue,
            }

            candidates.push(RetryCandidate {
                id: id.to_string(),
                info_path,
            });
        }

        summary.candidates = candidates.len();
        Ok((candidates, summary))
    }

    /// Fetch captions for every retry candidate, one at a time
    pub async fn reconcile(&mut self) -> Result<ReconcileSummary> {
        let (candidates, mut summary) = self.retry_candidates().await?;
        if candidates.is_empty() {
            debug!("No cached metadata is missing captions");
            return Ok(summary);
        }

        info!(
            "🔁 Retrying missing subtitles from cached metadata ({} videos)...",
            candidates.len()
        );

        for (index, candidate) in candidates.iter().enumerate() {
            info!("[retry {}/{}] {}", index + 1, candidates.len(), candidate.id);

            let request = FetchRequest::Captions(CaptionRequest {
                video_id: candidate.id.clone(),
                info_path: candidate.info_path.clone(),
                output_template: self.cache.output_template(),
                pacing: self.settings.pacing.clone(),
            });

            match self.fetcher.fetch(&request).await? {
                FetchOutcome::Completed | FetchOutcome::CutoffReached => {
                    summary.retried += 1;
                    if !self.cache.caption_tracks(&candidate.id).is_empty() {
                        let entry = LedgerEntry::new(self.settings.source.clone(), candidate.id.clone());
                        self.ledger.record(&entry).await?;
                    }
                }
                FetchOutcome::RateLimited => {
                    warn!("⏸️ Detected rate-limit while retrying {}; pausing reconciliation", candidate.id);
                    summary.rate_limited = true;
                    break;
                }
                FetchOutcome::Failed { code } => {
                    warn!(
                        "❌ {} failed for {} (exit {:?}); continuing",
                        self.fetcher.tool_name(),
                        candidate.id,
                        code
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Crawl the source for uploads strictly after the cutoff
    pub async fn crawl(&mut self) -> Result<CrawlStatus> {
        let date_after = self.settings.date_after();
        info!(
            "⬇️ Downloading captions after {} (strictly after => --dateafter {})",
            self.settings.cutoff,
            crate::records::to_compact_date(date_after)
        );

        let request = FetchRequest::Crawl(CrawlRequest {
            source_url: self.settings.source_url.clone(),
            date_after,
            archive_path: self.ledger.path().to_path_buf(),
            output_template: self.cache.output_template(),
            break_on_date: self.settings.break_on_date,
            ignore_errors: self.settings.ignore_errors,
            allow_overwrites: self.settings.allow_overwrites,
            playlist_end: self.settings.playlist_end,
            pacing: self.settings.pacing.clone(),
        });

        let outcome = self.fetcher.fetch(&request).await?;
        // The tool appends to the archive as it goes
        self.ledger.reload().await?;

        match outcome {
            FetchOutcome::Completed => Ok(CrawlStatus::Completed),
            FetchOutcome::CutoffReached => {
                info!("🛑 Reached the cutoff date; stopping crawl");
                Ok(CrawlStatus::CutoffReached)
            }
            FetchOutcome::RateLimited => {
                warn!("⏸️ Detected rate-limit. Exiting without error so you can retry later (ledger preserves progress).");
                Ok(CrawlStatus::RateLimited)
            }
            FetchOutcome::Failed { code } => Err(IngestError::Acquisition {
                tool: self.fetcher.tool_name().to_string(),
                code: code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
            }),
        }
    }

    /// Seed, reconcile, and (unless `cache_only`) crawl
    pub async fn run(
        &mut self,
        dataset: &ProductionDataset,
        cache_only: bool,
    ) -> Result<AcquisitionReport> {
        self.cache.initialize().await?;

        let ledger_seeded = self.seed_ledger(dataset).await?;
        let reconcile = self.reconcile().await?;

        let mut report = AcquisitionReport {
            ledger_seeded,
            ledger_entries: self.ledger.len(),
            reconcile,
            crawl: None,
        };

        if cache_only {
            log_cache_only_summary(&report.reconcile);
            return Ok(report);
        }
        if report.reconcile.rate_limited {
            return Ok(report);
        }

        report.crawl = Some(self.crawl().await?);
        report.ledger_entries = self.ledger.len();
        Ok(report)
    }
}

fn log_cache_only_summary(summary: &ReconcileSummary) {
    info!("cache-only mode complete.");
    info!(
        "- Found {} *.info.json files ({} video infojson).",
        summary.total_info_files, summary.video_info_files
    );
    info!("- Found {} videos with *.vtt files.", summary.caption_files);
    info!(
        "- Missing subtitles to retry (after cutoff): {}.",
        summary.candidates
    );
    if summary.candidates == 0 {
        info!("Nothing to do. To crawl the channel for new videos, rerun without --cache-only.");
    } else {
        info!("Retried {} videos ({} failed).", summary.retried, summary.failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records requests and answers with a fixed outcome
    struct ScriptedFetcher {
        outcome: FetchOutcome,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn new(outcome: FetchOutcome) -> Self {
            Self {
                outcome,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VideoFetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
            let label = match request {
                FetchRequest::Crawl(_) => "crawl".to_string(),
                FetchRequest::Captions(c) => format!("captions:{}", c.video_id),
            };
            self.requests.lock().unwrap().push(label);
            Ok(self.outcome.clone())
        }

        fn tool_name(&self) -> &str {
            "scripted"
        }
    }

    fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            source: DEFAULT_SOURCE.to_string(),
            source_url: "https://example.invalid/videos".to_string(),
            cutoff: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            pacing: Pacing::default(),
            playlist_end: None,
            break_on_date: true,
            ignore_errors: true,
            allow_overwrites: false,
        }
    }

    async fn controller(
        dir: &TempDir,
        outcome: FetchOutcome,
    ) -> AcquisitionController<ScriptedFetcher> {
        let cache = CaptionCache::new(dir.path().join("subs"));
        cache.initialize().await.unwrap();
        let ledger = DownloadLedger::open(dir.path().join("archive.txt")).await.unwrap();
        AcquisitionController::new(ScriptedFetcher::new(outcome), cache, ledger, settings())
    }

    async fn write_info(dir: &TempDir, id: &str, upload_date: &str) {
        let body = format!(
            r#"{{"id": "{}", "title": "Video {}", "upload_date": "{}"}}"#,
            id, id, upload_date
        );
        tokio::fs::write(dir.path().join("subs").join(format!("{}.info.json", id)), body)
            .await
            .unwrap();
    }

    #[test]
    fn test_date_after_is_next_day() {
        assert_eq!(
            settings().date_after(),
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
    }

    #[tokio::test]
    async fn test_retry_candidate_filters() {
        let dir = TempDir::new().unwrap();
        let ctl = controller(&dir, FetchOutcome::Completed).await;

        write_info(&dir, "aaaaaaaaaaa", "20240102").await; // in scope, no captions
        write_info(&dir, "bbbbbbbbbbb", "20240101").await; // on the cutoff day
        write_info(&dir, "ccccccccccc", "20240305").await; // captions present
        tokio::fs::write(dir.path().join("subs/ccccccccccc.en.vtt"), "WEBVTT")
            .await
            .unwrap();
        write_info(&dir, "UCchannelidxxxxxxxxxxxx", "20240305").await; // side file
        tokio::fs::write(dir.path().join("subs/ddddddddddd.info.json"), "{not json")
            .await
            .unwrap();

        let (candidates, summary) = ctl.retry_candidates().await.unwrap();
        let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids, vec!["aaaaaaaaaaa"]);
        assert_eq!(summary.total_info_files, 5);
        assert_eq!(summary.video_info_files, 4);
        assert_eq!(summary.unreadable_info_files, 1);
        assert_eq!(summary.candidates, 1);
    }

    #[tokio::test]
    async fn test_candidates_exclude_captioned_ledger_entry() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, FetchOutcome::Completed).await;

        let mut dataset = ProductionDataset::default();
        dataset.video_codes.insert("abc123".to_string());
        write_info(&dir, "abc123", "20240301").await;
        tokio::fs::write(dir.path().join("subs/abc123.en.vtt"), "WEBVTT")
            .await
            .unwrap();

        ctl.seed_ledger(&dataset).await.unwrap();
        let (candidates, _) = ctl.retry_candidates().await.unwrap();
        assert!(candidates.iter().all(|c| c.id != "abc123"));
        assert!(ctl.ledger().contains(&LedgerEntry::new(DEFAULT_SOURCE, "abc123")));
    }

    #[tokio::test]
    async fn test_reconcile_failures_are_per_item() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, FetchOutcome::Failed { code: Some(1) }).await;
        write_info(&dir, "aaaaaaaaaaa", "20240102").await;
        write_info(&dir, "bbbbbbbbbbb", "20240103").await;

        let summary = ctl.reconcile().await.unwrap();
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(ctl.fetcher.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rate_limit_pauses_run() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, FetchOutcome::RateLimited).await;
        write_info(&dir, "aaaaaaaaaaa", "20240102").await;
        write_info(&dir, "bbbbbbbbbbb", "20240103").await;

        let report = ctl.run(&ProductionDataset::default(), false).await.unwrap();
        assert!(report.paused());
        assert!(report.crawl.is_none());
        assert_eq!(*ctl.fetcher.requests.lock().unwrap(), vec!["captions:aaaaaaaaaaa"]);
    }

    #[tokio::test]
    async fn test_crawl_outcomes() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, FetchOutcome::CutoffReached).await;
        assert_eq!(ctl.crawl().await.unwrap(), CrawlStatus::CutoffReached);

        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, FetchOutcome::Failed { code: Some(2) }).await;
        let err = ctl.crawl().await.unwrap_err();
        assert_eq!(err.to_string(), "scripted exited with code 2");
    }

    #[tokio::test]
    async fn test_cache_only_skips_crawl() {
        let dir = TempDir::new().unwrap();
        let mut ctl = controller(&dir, FetchOutcome::Completed).await;
        let report = ctl.run(&ProductionDataset::default(), true).await.unwrap();
        assert!(report.crawl.is_none());
        assert!(ctl.fetcher.requests.lock().unwrap().is_empty());
    }
}
