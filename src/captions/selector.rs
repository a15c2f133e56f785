use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// One caption file for a video (language + manual/auto variant)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    pub path: PathBuf,
    pub file_name: String,
    pub is_auto: bool,
    pub is_english: bool,
}

impl CaptionTrack {
    /// Classify a caption file by its name
    pub fn from_path(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let is_auto = file_name.contains(".auto.");
        let is_english = is_english_tagged(&file_name);

        Some(Self {
            path: path.to_path_buf(),
            file_name,
            is_auto,
            is_english,
        })
    }

    fn preference_key(&self) -> (bool, bool, usize, &str) {
        (
            self.is_auto,
            !self.is_english,
            self.file_name.len(),
            self.file_name.as_str(),
        )
    }
}

/// `.en.vtt`, `.en-US.vtt`, `.en.auto.vtt` and friends
fn is_english_tagged(file_name: &str) -> bool {
    file_name.contains(".en.") || file_name.contains(".en-")
}

impl Ord for CaptionTrack {
    /// Manual before auto, English before other languages, shorter name first.
    /// The name itself breaks any remaining tie so the order is total.
    fn cmp(&self, other: &Self) -> Ordering {
        self.preference_key().cmp(&other.preference_key())
    }
}

impl PartialOrd for CaptionTrack {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Pick the preferred caption track, if any
pub fn select_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    tracks.iter().min()
}
