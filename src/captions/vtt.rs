use regex::Regex;
use std::sync::OnceLock;

/// Marker inserted where the middle of a transcript is dropped
pub const ELISION_MARKER: &str = "\n...\n";

/// Characters held back from the budget for the marker and slack
pub const EXCERPT_RESERVE: usize = 50;

/// Default character budget for the generation input
pub const DEFAULT_EXCERPT_CHARS: usize = 32_000;

/// Converts WebVTT caption markup into a plain, deduplicated transcript
#[derive(Debug, Clone)]
pub struct CaptionNormalizer {
    header: Regex,
    header_metadata: Regex,
    cue_index: Regex,
    timestamp_range: Regex,
    block_marker: Regex,
    positioning: Regex,
    inline_tag: Regex,
}

impl CaptionNormalizer {
    /// Create a normalizer with the WebVTT line patterns compiled
    pub fn new() -> Self {
        Self {
            header: Regex::new(r"^WEBVTT(\s|$)").unwrap(),
            header_metadata: Regex::new(r"^(Kind|Language):").unwrap(),
            cue_index: Regex::new(r"^\d+$").unwrap(),
            // Covers both HH:MM:SS.mmm and MM:SS.mmm on either side of the arrow
            timestamp_range: Regex::new(
                r"^(\d{2,}:)?\d{2}:\d{2}\.\d{3}\s+-->\s+(\d{2,}:)?\d{2}:\d{2}\.\d{3}",
            )
            .unwrap(),
            block_marker: Regex::new(r"^(NOTE|STYLE|REGION)\b").unwrap(),
            positioning: Regex::new(r"^(position|align|size|line):").unwrap(),
            inline_tag: Regex::new(r"<[^>]*>").unwrap(),
        }
    }

    /// Normalize raw caption text into newline-joined transcript lines
    pub fn normalize(&self, raw: &str) -> String {
        let mut lines: Vec<String> = Vec::new();
        let mut in_header = true;

        for line in raw.lines() {
            let cleaned = self.clean_line(line);
            if cleaned.is_empty() {
                continue;
            }

            if self.timestamp_range.is_match(&cleaned) {
                in_header = false;
                continue;
            }

            if self.header.is_match(&cleaned)
                || (in_header && self.header_metadata.is_match(&cleaned))
                || self.cue_index.is_match(&cleaned)
                || self.block_marker.is_match(&cleaned)
                || self.positioning.is_match(&cleaned)
            {
                continue;
            }

            // Consecutive cues repeat the previous line; only adjacent repeats collapse
            if lines.last().map_or(false, |last| *last == cleaned) {
                continue;
            }
            lines.push(cleaned);
        }

        lines.join("\n")
    }

    /// Strip inline cue tags and decode the entities caption tracks commonly carry
    fn clean_line(&self, line: &str) -> String {
        let without_tags = self.inline_tag.replace_all(line.trim(), "");
        let decoded = without_tags
            .replace("&nbsp;", " ")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'")
            .replace("&amp;", "&");

        decoded.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl Default for CaptionNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_normalizer() -> &'static CaptionNormalizer {
    static NORMALIZER: OnceLock<CaptionNormalizer> = OnceLock::new();
    NORMALIZER.get_or_init(CaptionNormalizer::new)
}

/// Convert a WebVTT document to plain transcript text
pub fn vtt_to_text(raw: &str) -> String {
    shared_normalizer().normalize(raw)
}

/// Fit a transcript into `max_chars` by keeping its head and tail around an elision marker.
///
/// The introduction usually names the product and the conclusion usually states the
/// rating, so the middle is what gets dropped. Lengths are counted in characters.
pub fn build_excerpt(full_text: &str, max_chars: usize) -> String {
    let total_chars = full_text.chars().count();
    if total_chars <= max_chars {
        return full_text.to_string();
    }

    let half = max_chars.saturating_sub(EXCERPT_RESERVE) / 2;
    let head_end = byte_offset(full_text, half);
    let tail_start = byte_offset(full_text, total_chars - half);

    format!(
        "{}{}{}",
        &full_text[..head_end],
        ELISION_MARKER,
        &full_text[tail_start..]
    )
}

fn byte_offset(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}
