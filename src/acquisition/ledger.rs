use crate::error::Result;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Source tag the acquisition tool writes for this platform
pub const DEFAULT_SOURCE: &str = "youtube";

/// One `<source> <id>` ledger line
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LedgerEntry {
    pub source: String,
    pub id: String,
}

impl LedgerEntry {
    pub fn new(source: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            id: id.into(),
        }
    }

    pub fn parse(line: &str) -> Option<Self> {
        let (source, id) = line.trim().split_once(' ')?;
        let id = id.trim();
        if source.is_empty() || id.is_empty() {
            return None;
        }
        Some(Self::new(source, id))
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.source, self.id)
    }
}

/// Append-only dedupe record of remote ids that are already handled.
///
/// The file doubles as the acquisition tool's download archive, so the tool
/// appends to it while crawling; [`DownloadLedger::reload`] picks those lines up.
/// Lines are kept verbatim so the ledger never loses anything it was given.
#[derive(Debug, Clone)]
pub struct DownloadLedger {
    path: PathBuf,
    lines: BTreeSet<String>,
}

impl DownloadLedger {
    /// Open the ledger at `path`; a missing file is an empty ledger
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let lines = Self::read_lines(&path).await?;
        debug!("📒 Ledger {} holds {} entries", path.display(), lines.len());
        Ok(Self { path, lines })
    }

    async fn read_lines(path: &Path) -> Result<BTreeSet<String>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Merge `ids` into the ledger and rewrite the file sorted and deduplicated.
    ///
    /// Returns the number of entries that were not present before.
    pub async fn seed<I>(&mut self, source: &str, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        // Pick up anything written since open, so a rewrite never drops lines
        let on_disk = Self::read_lines(&self.path).await?;
        self.lines.extend(on_disk);

        let before = self.lines.len();
        self.lines.extend(
            ids.into_iter()
                .map(|id| LedgerEntry::new(source, id).to_string()),
        );
        let added = self.lines.len() - before;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut content = self.lines.iter().cloned().collect::<Vec<_>>().join("\n");
        content.push('\n');
        // Replace in one step so a crash never leaves a truncated ledger
        let staging = self.staging_path();
        fs::write(&staging, content).await?;
        fs::rename(&staging, &self.path).await?;

        info!(
            "📒 Seeded ledger {} ({} entries, {} new)",
            self.path.display(),
            self.lines.len(),
            added
        );
        Ok(added)
    }

    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ledger".to_string());
        self.path.with_file_name(format!("{}.tmp", name))
    }

    /// Append one entry immediately, so progress survives a crash
    pub async fn record(&mut self, entry: &LedgerEntry) -> Result<bool> {
        let line = entry.to_string();
        if self.lines.contains(&line) {
            return Ok(false);
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;

        self.lines.insert(line);
        debug!("📒 Recorded {}", entry);
        Ok(true)
    }

    /// Re-read the file after an external writer appended to it
    pub async fn reload(&mut self) -> Result<()> {
        let on_disk = Self::read_lines(&self.path).await?;
        self.lines.extend(on_disk);
        Ok(())
    }

    pub fn contains(&self, entry: &LedgerEntry) -> bool {
        self.lines.contains(&entry.to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
