pub mod selector;
pub mod vtt;

pub use selector::{select_track, CaptionTrack};
pub use vtt::{build_excerpt, vtt_to_text, CaptionNormalizer, ELISION_MARKER};
