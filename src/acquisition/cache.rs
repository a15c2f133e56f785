use crate::captions::CaptionTrack;
use crate::error::Result;
use crate::records::RawVideoInfo;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, info};
use walkdir::WalkDir;

const INFO_SUFFIX: &str = ".info.json";
const CAPTION_SUFFIX: &str = ".vtt";

fn cached_file_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Files are written as `<id>.<ext>`; real ids are 11 chars but side files vary
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z0-9_-]{6,})\.").unwrap())
}

fn video_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap())
}

/// True when `id` has the shape of a single video id (not a channel/playlist side file)
pub fn is_video_id(id: &str) -> bool {
    video_id_pattern().is_match(id)
}

/// Local directory of `<id>.info.json` metadata and `<id>.<lang>[.auto].vtt` captions
#[derive(Debug, Clone)]
pub struct CaptionCache {
    dir: PathBuf,
}

impl CaptionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create the cache directory if needed
    pub async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        info!("📁 Caption cache directory initialized: {}", self.dir.display());
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Output template handed to the acquisition tool
    pub fn output_template(&self) -> PathBuf {
        self.dir.join("%(id)s.%(ext)s")
    }

    pub fn info_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}{}", id, INFO_SUFFIX))
    }

    /// File names directly inside the cache, sorted; a missing directory is empty
    fn file_names(&self) -> Vec<String> {
        if !self.dir.exists() {
            return Vec::new();
        }

        let mut names: Vec<String> = WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Ids that already have metadata or captions cached
    pub fn cached_ids(&self) -> BTreeSet<String> {
        self.file_names()
            .iter()
            .filter(|name| name.ends_with(CAPTION_SUFFIX) || name.ends_with(INFO_SUFFIX))
            .filter_map(|name| cached_file_id_pattern().captures(name))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Ids with at least one caption file
    pub fn caption_ids(&self) -> BTreeSet<String> {
        self.file_names()
            .iter()
            .filter(|name| name.ends_with(CAPTION_SUFFIX))
            .filter_map(|name| cached_file_id_pattern().captures(name))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// All metadata files, in file-name order
    pub fn info_files(&self) -> Vec<PathBuf> {
        self.file_names()
            .into_iter()
            .filter(|name| name.ends_with(INFO_SUFFIX))
            .map(|name| self.dir.join(name))
            .collect()
    }

    /// Caption tracks cached for one video id
    pub fn caption_tracks(&self, id: &str) -> Vec<CaptionTrack> {
        let prefix = format!("{}.", id);
        let tracks: Vec<CaptionTrack> = self
            .file_names()
            .into_iter()
            .filter(|name| name.starts_with(&prefix) && name.ends_with(CAPTION_SUFFIX))
            .filter_map(|name| CaptionTrack::from_path(&self.dir.join(name)))
            .collect();
        debug!("🎞️ {} caption tracks cached for {}", tracks.len(), id);
        tracks
    }

    /// Read one metadata file
    pub async fn read_info(&self, path: &Path) -> Result<RawVideoInfo> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Id encoded in a metadata file name (`<id>.info.json`)
pub fn id_from_info_path(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()?.strip_suffix(INFO_SUFFIX)
}
