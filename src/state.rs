use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// How an item left the pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Terminal {
    /// Appended to the output batch
    Review,
    /// Written to the non-review side channel
    NonReview,
    /// Written to the failure side channel
    Failed,
}

/// Processing stages for one video
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ItemStage {
    /// Metadata seen in the cache or on the source
    Discovered,

    /// Captions requested from the acquisition tool
    Fetch,

    /// A caption track exists locally
    CaptionAvailable,

    /// Selected track converted to transcript text
    TranscriptNormalized,

    /// Extraction finished
    Extracted(Terminal),
}

impl ItemStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStage::Extracted(_))
    }

    /// Whether `next` may follow `self`. Any non-terminal stage may fail.
    pub fn can_advance_to(&self, next: ItemStage) -> bool {
        use ItemStage::*;
        matches!(
            (self, next),
            (Discovered, Fetch)
                | (Discovered, CaptionAvailable)
                | (Fetch, CaptionAvailable)
                | (CaptionAvailable, TranscriptNormalized)
                | (TranscriptNormalized, Extracted(_))
                | (Discovered | Fetch | CaptionAvailable, Extracted(Terminal::Failed))
        )
    }
}

impl fmt::Display for ItemStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStage::Extracted(terminal) => write!(f, "Extracted({:?})", terminal),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Stage history of one video within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemState {
    pub video_code: String,
    pub stage: ItemStage,
    pub history: Vec<ItemStage>,
}

impl ItemState {
    pub fn new(video_code: impl Into<String>) -> Self {
        Self {
            video_code: video_code.into(),
            stage: ItemStage::Discovered,
            history: vec![ItemStage::Discovered],
        }
    }

    pub fn advance(&mut self, next: ItemStage) -> Result<()> {
        if !self.stage.can_advance_to(next) {
            return Err(IngestError::InvalidTransition {
                video_code: self.video_code.clone(),
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        self.stage = next;
        self.history.push(next);
        Ok(())
    }
}

/// In-memory record of every item touched during a run, in discovery order
#[derive(Debug, Clone, Default)]
pub struct StateTracker {
    order: Vec<String>,
    states: HashMap<String, ItemState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a video; re-discovering a known video keeps its state
    pub fn discover(&mut self, video_code: &str) {
        if !self.states.contains_key(video_code) {
            self.order.push(video_code.to_string());
            self.states
                .insert(video_code.to_string(), ItemState::new(video_code));
        }
    }

    pub fn advance(&mut self, video_code: &str, next: ItemStage) -> Result<()> {
        let state = self
            .states
            .get_mut(video_code)
            .ok_or_else(|| IngestError::InvalidTransition {
                video_code: video_code.to_string(),
                from: "Unknown".to_string(),
                to: next.to_string(),
            })?;
        state.advance(next)?;
        debug!("🔀 {} -> {}", video_code, next);
        Ok(())
    }

    pub fn get(&self, video_code: &str) -> Option<&ItemState> {
        self.states.get(video_code)
    }

    /// States in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &ItemState> {
        self.order.iter().filter_map(|code| self.states.get(code))
    }

    pub fn statistics(&self) -> StateStats {
        let mut stats = StateStats {
            total: self.states.len(),
            ..Default::default()
        };
        for state in self.states.values() {
            match state.stage {
                ItemStage::Extracted(Terminal::Review) => stats.reviews += 1,
                ItemStage::Extracted(Terminal::NonReview) => stats.non_reviews += 1,
                ItemStage::Extracted(Terminal::Failed) => stats.failed += 1,
                _ => stats.in_progress += 1,
            }
        }
        stats
    }
}

/// Per-run item counts by terminal state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStats {
    pub total: usize,
    pub reviews: usize,
    pub non_reviews: usize,
    pub failed: usize,
    pub in_progress: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_cached_captions() {
        let mut state = ItemState::new("abc");
        state.advance(ItemStage::CaptionAvailable).unwrap();
        state.advance(ItemStage::TranscriptNormalized).unwrap();
        state.advance(ItemStage::Extracted(Terminal::Review)).unwrap();
        assert!(state.stage.is_terminal());
        assert_eq!(state.history.len(), 4);
    }

    #[test]
    fn test_fetch_path() {
        let mut state = ItemState::new("abc");
        state.advance(ItemStage::Fetch).unwrap();
        state.advance(ItemStage::CaptionAvailable).unwrap();
        assert_eq!(state.stage, ItemStage::CaptionAvailable);
    }

    #[test]
    fn test_early_failure_is_terminal() {
        let mut missing = ItemState::new("nocaptions1");
        missing.advance(ItemStage::Extracted(Terminal::Failed)).unwrap();
        assert!(missing.stage.is_terminal());

        let mut unreadable = ItemState::new("badcaption1");
        unreadable.advance(ItemStage::CaptionAvailable).unwrap();
        unreadable.advance(ItemStage::Extracted(Terminal::Failed)).unwrap();
        assert!(unreadable.advance(ItemStage::TranscriptNormalized).is_err());

        let mut early = ItemState::new("early000001");
        assert!(early.advance(ItemStage::Extracted(Terminal::NonReview)).is_err());
    }

    #[test]
    fn test_rejects_skipped_and_terminal_transitions() {
        let mut state = ItemState::new("abc");
        let err = state
            .advance(ItemStage::Extracted(Terminal::Review))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid transition for abc: Discovered -> Extracted(Review)"
        );

        state.advance(ItemStage::CaptionAvailable).unwrap();
        state.advance(ItemStage::TranscriptNormalized).unwrap();
        state.advance(ItemStage::Extracted(Terminal::Failed)).unwrap();
        assert!(state.advance(ItemStage::Extracted(Terminal::Review)).is_err());
        assert!(state.advance(ItemStage::Discovered).is_err());
    }

    #[test]
    fn test_tracker_statistics_and_order() {
        let mut tracker = StateTracker::new();
        for (code, terminal) in [
            ("b", Some(Terminal::Review)),
            ("a", Some(Terminal::NonReview)),
            ("c", Some(Terminal::Failed)),
            ("d", None),
        ] {
            tracker.discover(code);
            if let Some(terminal) = terminal {
                tracker.advance(code, ItemStage::CaptionAvailable).unwrap();
                tracker.advance(code, ItemStage::TranscriptNormalized).unwrap();
                tracker.advance(code, ItemStage::Extracted(terminal)).unwrap();
            }
        }
        tracker.discover("b");

        let stats = tracker.statistics();
        assert_eq!(
            stats,
            StateStats {
                total: 4,
                reviews: 1,
                non_reviews: 1,
                failed: 1,
                in_progress: 1,
            }
        );
        let order: Vec<&str> = tracker.iter().map(|s| s.video_code.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c", "d"]);
        assert!(tracker.advance("zzz", ItemStage::Fetch).is_err());
    }
}
