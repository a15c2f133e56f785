use crate::error::{IngestError, Result};
use crate::records::to_compact_date;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Exit code the acquisition tool uses when a break filter stops the crawl
pub const BREAK_ON_DATE_EXIT_CODE: i32 = 101;

/// Bytes of combined tool output kept for rate-limit detection
pub const OUTPUT_TAIL_CAPACITY: usize = 200_000;

/// Phrases the tool prints when the platform throttles the session.
/// These drift between tool releases; extend the list as new ones show up.
pub const KNOWN_RATE_LIMIT_PHRASES: &[&str] = &[
    "rate-limited by YouTube",
    "This content isn't available, try again later",
];

/// Optional request pacing passed through to the tool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pacing {
    pub sleep_requests: Option<f64>,
    pub min_sleep_interval: Option<f64>,
    pub max_sleep_interval: Option<f64>,
}

impl Pacing {
    fn push_args(&self, args: &mut Vec<String>) {
        let flags = [
            ("--sleep-requests", self.sleep_requests),
            ("--min-sleep-interval", self.min_sleep_interval),
            ("--max-sleep-interval", self.max_sleep_interval),
        ];
        for (flag, value) in flags {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                args.push(flag.to_string());
                args.push(v.to_string());
            }
        }
    }
}

/// A full crawl of the source for videos uploaded on or after `date_after`
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub source_url: String,
    pub date_after: NaiveDate,
    pub archive_path: PathBuf,
    pub output_template: PathBuf,
    pub break_on_date: bool,
    pub ignore_errors: bool,
    pub allow_overwrites: bool,
    pub playlist_end: Option<u32>,
    pub pacing: Pacing,
}

/// Fetch captions for one video, reusing its cached metadata
#[derive(Debug, Clone)]
pub struct CaptionRequest {
    pub video_id: String,
    pub info_path: PathBuf,
    pub output_template: PathBuf,
    pub pacing: Pacing,
}

#[derive(Debug, Clone)]
pub enum FetchRequest {
    Crawl(CrawlRequest),
    Captions(CaptionRequest),
}

/// How one invocation of the acquisition tool ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Ran to completion
    Completed,
    /// Stopped on purpose at the cutoff boundary
    CutoffReached,
    /// Platform throttled us; progress is in the ledger, retry later
    RateLimited,
    /// Any other unsuccessful exit
    Failed { code: Option<i32> },
}

impl FetchOutcome {
    /// Soft stops end acquisition without an error
    pub fn is_soft_stop(&self) -> bool {
        matches!(self, FetchOutcome::CutoffReached | FetchOutcome::RateLimited)
    }
}

/// The external collaborator that downloads metadata and captions
#[async_trait]
pub trait VideoFetcher: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome>;

    fn tool_name(&self) -> &str;
}

#[async_trait]
impl<T: VideoFetcher + ?Sized> VideoFetcher for std::sync::Arc<T> {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        (**self).fetch(request).await
    }

    fn tool_name(&self) -> &str {
        (**self).tool_name()
    }
}

/// Tail of the tool's combined output, bounded to a fixed size
#[derive(Debug, Clone)]
pub struct OutputTail {
    buffer: String,
    capacity: usize,
}

impl OutputTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: String::new(),
            capacity,
        }
    }

    pub fn push_line(&mut self, line: &str) {
        self.buffer.push_str(line);
        self.buffer.push('\n');

        if self.buffer.len() > self.capacity {
            let mut cut = self.buffer.len() - self.capacity;
            while !self.buffer.is_char_boundary(cut) {
                cut += 1;
            }
            self.buffer.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Last-resort adapter: the tool has no structured throttling signal
pub fn detect_rate_limit(output: &str) -> bool {
    KNOWN_RATE_LIMIT_PHRASES
        .iter()
        .any(|phrase| output.contains(phrase))
}

/// Map an exit code and captured output to a typed outcome
pub fn classify_exit(code: Option<i32>, cutoff_sentinel: bool, output: &str) -> FetchOutcome {
    match code {
        Some(0) => FetchOutcome::Completed,
        Some(BREAK_ON_DATE_EXIT_CODE) if cutoff_sentinel => FetchOutcome::CutoffReached,
        _ if detect_rate_limit(output) => FetchOutcome::RateLimited,
        code => FetchOutcome::Failed { code },
    }
}

/// Arguments for a full crawl
pub fn crawl_args(request: &CrawlRequest) -> Vec<String> {
    let date_after = to_compact_date(request.date_after);
    let mut args: Vec<String> = vec![
        request.source_url.clone(),
        "--skip-download".into(),
        "--write-info-json".into(),
        "--no-write-playlist-metafiles".into(),
        "--write-subs".into(),
        "--write-auto-subs".into(),
        "--sub-lang".into(),
        "en".into(),
        "--sub-format".into(),
        "vtt".into(),
        "--dateafter".into(),
        date_after.clone(),
    ];

    if request.break_on_date {
        args.push("--break-match-filters".into());
        args.push(format!("upload_date >= {}", date_after));
    }
    if request.ignore_errors {
        args.push("--ignore-errors".into());
    }
    if !request.allow_overwrites {
        args.push("--no-overwrites".into());
    }

    args.push("--download-archive".into());
    args.push(request.archive_path.to_string_lossy().into_owned());
    args.push("--output".into());
    args.push(request.output_template.to_string_lossy().into_owned());

    if let Some(end) = request.playlist_end.filter(|n| *n > 0) {
        args.push("--playlist-end".into());
        args.push(end.to_string());
    }
    request.pacing.push_args(&mut args);
    args
}

/// Arguments for a captions-only fetch from cached metadata
pub fn caption_args(request: &CaptionRequest) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "--skip-download".into(),
        "--write-subs".into(),
        "--write-auto-subs".into(),
        "--sub-lang".into(),
        "en".into(),
        "--sub-format".into(),
        "vtt".into(),
        "--no-overwrites".into(),
        "--load-info-json".into(),
        request.info_path.to_string_lossy().into_owned(),
        "--output".into(),
        request.output_template.to_string_lossy().into_owned(),
    ];
    request.pacing.push_args(&mut args);
    args
}

/// Drives the `yt-dlp` executable
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the tool, forwarding its output to the terminal while keeping a bounded tail
    async fn run(&self, args: &[String], cutoff_sentinel: bool) -> Result<FetchOutcome> {
        debug!("Running {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| IngestError::ToolSpawn {
                tool: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            IngestError::Config(format!("{} stdout was not captured", self.program))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            IngestError::Config(format!("{} stderr was not captured", self.program))
        })?;
        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let mut stdout_line = Vec::new();
        let mut stderr_line = Vec::new();

        let mut terminal_out = Forwarder::new(tokio::io::stdout());
        let mut terminal_err = Forwarder::new(tokio::io::stderr());
        let mut tail = OutputTail::new(OUTPUT_TAIL_CAPACITY);
        let mut stdout_open = true;
        let mut stderr_open = true;

        // Drain both pipes to EOF before waiting, so the child never blocks on a full pipe
        while stdout_open || stderr_open {
            tokio::select! {
                read = stdout.read_until(b'\n', &mut stdout_line), if stdout_open => {
                    stdout_open = self
                        .consume(read, &mut stdout_line, &mut terminal_out, &mut tail, &mut child)
                        .await;
                }
                read = stderr.read_until(b'\n', &mut stderr_line), if stderr_open => {
                    stderr_open = self
                        .consume(read, &mut stderr_line, &mut terminal_err, &mut tail, &mut child)
                        .await;
                }
            }
        }
        terminal_out.flush().await;
        terminal_err.flush().await;

        let status = child.wait().await?;
        let outcome = classify_exit(status.code(), cutoff_sentinel, tail.as_str());
        debug!("{} finished with {} -> {:?}", self.program, status, outcome);
        Ok(outcome)
    }

    /// Handle one `read_until` result; returns whether the stream is still open
    async fn consume<W: AsyncWrite + Unpin>(
        &self,
        read: std::io::Result<usize>,
        line: &mut Vec<u8>,
        terminal: &mut Forwarder<W>,
        tail: &mut OutputTail,
        child: &mut Child,
    ) -> bool {
        let open = match read {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => {
                // An unread pipe would stall the child forever
                warn!("Error reading {} output, stopping it: {}", self.program, e);
                if let Err(e) = child.start_kill() {
                    debug!("Kill failed: {}", e);
                }
                false
            }
        };

        if !line.is_empty() {
            terminal.write(line).await;
            let text = String::from_utf8_lossy(line);
            tail.push_line(text.trim_end_matches(['\n', '\r']));
            line.clear();
        }
        open
    }
}

/// Copies tool output to the terminal; a broken terminal only stops the copy
struct Forwarder<W> {
    sink: W,
    enabled: bool,
}

impl<W: AsyncWrite + Unpin> Forwarder<W> {
    fn new(sink: W) -> Self {
        Self {
            sink,
            enabled: true,
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        if !self.enabled {
            return;
        }
        if let Err(e) = self.sink.write_all(bytes).await {
            debug!("Terminal write failed, no longer forwarding: {}", e);
            self.enabled = false;
        }
    }

    async fn flush(&mut self) {
        if self.enabled {
            if let Err(e) = self.sink.flush().await {
                debug!("Terminal flush failed: {}", e);
            }
        }
    }
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl VideoFetcher for YtDlpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome> {
        match request {
            FetchRequest::Crawl(crawl) => {
                info!(
                    "🌐 Crawling {} for uploads on/after {}",
                    crawl.source_url, crawl.date_after
                );
                self.run(&crawl_args(crawl), crawl.break_on_date).await
            }
            FetchRequest::Captions(captions) => {
                self.run(&caption_args(captions), false).await
            }
        }
    }

    fn tool_name(&self) -> &str {
        &self.program
    }
}
