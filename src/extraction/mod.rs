//! Structured extraction of review fields from a video's title and transcript

pub mod heuristics;
pub mod schema;

pub use heuristics::{infer_category, infer_manufacturer};
pub use schema::{parse_lenient, ExtractionResult};

use crate::error::{IngestError, Result};
use crate::llm::{ChatMessage, ChatRequest, LLM};
use crate::records::{Candidate, FailureRecord, NonReviewRecord, ReviewRecord};
use std::sync::Arc;
use tracing::{debug, warn};

/// Response budget for each attempt; the attempt count follows this list
pub const ATTEMPT_TOKEN_BUDGETS: [u32; 3] = [400, 800, 1200];

const RETRY_SUFFIX: &str =
    "IMPORTANT: Output MUST be a single, complete JSON object. Do not truncate.";

const INSTRUCTIONS: &str = "\
You extract structured fields from YouTube subtitles for 'TheReportOfTheWeek' review videos.
Return ONLY JSON that matches the schema (no markdown, no backticks).

Not all videos are reviews.
- If this video is NOT primarily a food/drink/energy drink review, set isReview=false, set product/manufacturer/category to empty strings, rating=null, and set skipReason to a short reason.
- Only set isReview=true when a specific product is being reviewed and a rating is (usually) given.

Category guidance:
- Food reviews: 'Running On Empty'
- Drink reviews: 'Drink Review'
- Energy drinks: 'Energy Crisis'
He commonly says the segment name in the video; prefer what he says if present.

Manufacturer guidance:
- You may use common knowledge (no web browsing) to fill in obvious manufacturers/brands/restaurants (e.g., Big Mac -> McDonald's, KFC bowl -> KFC).
- Only do this when you are highly confident; otherwise return empty string for manufacturer.

If manufacturer or category is unclear, return empty string for that field.
If rating is unclear or missing, return null for rating (do not guess).";

/// Terminal result of extracting one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    Review(ReviewRecord),
    NonReview(NonReviewRecord),
    Failed(FailureRecord),
}

/// System instructions for an attempt (1-based)
pub fn instructions_for_attempt(attempt: usize) -> String {
    if attempt <= 1 {
        INSTRUCTIONS.to_string()
    } else {
        format!("{}\n\n{}", INSTRUCTIONS, RETRY_SUFFIX)
    }
}

/// User message carrying the title and the transcript excerpt
pub fn build_input(title: &str, excerpt: &str) -> String {
    format!("Video title: {}\n\nSubtitles excerpt:\n{}", title, excerpt)
}

/// Sends transcripts to a schema-constrained backend and validates the answer
pub struct StructuredExtractor {
    llm: Arc<dyn LLM>,
}

impl StructuredExtractor {
    pub fn new(llm: Arc<dyn LLM>) -> Self {
        Self { llm }
    }

    /// Ask the backend for fields, retrying malformed or failed responses
    pub async fn extract(&self, title: &str, excerpt: &str) -> Result<ExtractionResult> {
        let input = build_input(title, excerpt);
        let mut last_error = String::from("no attempts made");

        for (index, &budget) in ATTEMPT_TOKEN_BUDGETS.iter().enumerate() {
            let attempt = index + 1;
            let request = ChatRequest::new(vec![
                ChatMessage::system(instructions_for_attempt(attempt)),
                ChatMessage::user(input.clone()),
            ])
            .with_max_tokens(budget)
            .with_schema(schema::response_format());

            let content = match self.llm.chat(request).await {
                Ok(response) => response.content,
                Err(e) => {
                    let e = match e.downcast::<IngestError>() {
                        Ok(fatal) if !fatal.is_recoverable() => return Err(fatal),
                        Ok(err) => err.to_string(),
                        Err(other) => other.to_string(),
                    };
                    debug!("Attempt {} failed: {}", attempt, e);
                    last_error = e;
                    continue;
                }
            };

            if content.trim().is_empty() {
                debug!("Attempt {} returned empty text", attempt);
                last_error = "Backend returned empty text".to_string();
                continue;
            }

            match parse_lenient(&content) {
                Ok(value) => return Ok(ExtractionResult::from_value(&value)),
                Err(e) => {
                    debug!("Attempt {} returned malformed JSON: {}", attempt, e);
                    last_error = e;
                }
            }
        }

        Err(IngestError::Extraction(last_error))
    }

    /// Extract one candidate and route it to its terminal outcome.
    ///
    /// Exhausted attempts become a `Failed` outcome; unrecoverable backend
    /// errors are returned so the run can stop.
    pub async fn process(&self, candidate: &Candidate) -> Result<ExtractionOutcome> {
        match self
            .extract(&candidate.video_title, &candidate.transcript_excerpt)
            .await
        {
            Ok(result) => Ok(route(candidate, result)),
            Err(e) if e.is_recoverable() => {
                warn!("❌ Failed {}: {}", candidate.video_code, e);
                Ok(ExtractionOutcome::Failed(FailureRecord {
                    video_code: candidate.video_code.clone(),
                    video_title: candidate.video_title.clone(),
                    error: e.to_string(),
                }))
            }
            Err(e) => Err(e),
        }
    }
}

/// Turn a normalized result into a record, filling blanks heuristically
pub fn route(candidate: &Candidate, result: ExtractionResult) -> ExtractionOutcome {
    if !result.is_review {
        return ExtractionOutcome::NonReview(NonReviewRecord {
            video_title: candidate.video_title.clone(),
            video_code: candidate.video_code.clone(),
            date_released: candidate.date_released,
            skip_reason: if result.skip_reason.is_empty() {
                "non-review".to_string()
            } else {
                result.skip_reason
            },
        });
    }

    let category = if result.category.is_empty() {
        infer_category(&candidate.video_title, &candidate.transcript_text).to_string()
    } else {
        result.category
    };
    let manufacturer = if result.manufacturer.is_empty() {
        infer_manufacturer(
            &candidate.video_title,
            &result.product,
            &candidate.transcript_text,
        )
        .to_string()
    } else {
        result.manufacturer
    };

    ExtractionOutcome::Review(ReviewRecord {
        product: result.product,
        manufacturer,
        category,
        video_title: candidate.video_title.clone(),
        video_code: candidate.video_code.clone(),
        date_released: candidate.date_released,
        rating: result.rating,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMProvider, LLMResponse};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    /// Replays canned responses and records the requests it saw
    struct ScriptedLLM {
        replies: Mutex<Vec<anyhow::Result<String>>>,
        seen: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedLLM {
        fn new(replies: Vec<anyhow::Result<String>>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LLM for ScriptedLLM {
        async fn chat(&self, request: ChatRequest) -> anyhow::Result<LLMResponse> {
            self.seen.lock().unwrap().push(request);
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")));
            reply.map(|content| LLMResponse {
                content,
                tokens_used: None,
            })
        }

        fn provider_type(&self) -> LLMProvider {
            LLMProvider::LMStudio
        }
    }

    fn candidate(title: &str, transcript: &str) -> Candidate {
        Candidate {
            video_code: "abcdefghijk".to_string(),
            video_title: title.to_string(),
            date_released: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            transcript_text: transcript.to_string(),
            transcript_excerpt: transcript.to_string(),
        }
    }

    const VALID: &str = r#"{"isReview": true, "product": "Famous Bowl", "manufacturer": "", "category": "", "rating": "7.5", "skipReason": ""}"#;

    #[tokio::test]
    async fn test_third_attempt_succeeds() {
        let llm = ScriptedLLM::new(vec![
            Ok(r#"{"isReview": true, "product": "Fam"#.to_string()),
            Ok("not json at all".to_string()),
            Ok(VALID.to_string()),
        ]);
        let extractor = StructuredExtractor::new(llm.clone());

        let result = extractor.extract("KFC Famous Bowl", "the kfc bowl").await.unwrap();
        assert_eq!(result.product, "Famous Bowl");
        assert_eq!(result.rating, Some(7.5));

        let seen = llm.seen.lock().unwrap();
        let budgets: Vec<Option<u32>> = seen.iter().map(|r| r.max_tokens).collect();
        assert_eq!(budgets, vec![Some(400), Some(800), Some(1200)]);
        assert!(!seen[0].messages[0].content.contains(RETRY_SUFFIX));
        assert!(seen[1].messages[0].content.ends_with(RETRY_SUFFIX));
        assert!(seen.iter().all(|r| r.response_format.is_some()));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_fail_item() {
        let llm = ScriptedLLM::new(vec![
            Err(anyhow::anyhow!("timeout")),
            Ok(String::new()),
            Ok("{ broken".to_string()),
        ]);
        let extractor = StructuredExtractor::new(llm);

        match extractor.process(&candidate("Title", "text")).await.unwrap() {
            ExtractionOutcome::Failed(failure) => {
                assert_eq!(failure.video_code, "abcdefghijk");
                assert!(failure.error.starts_with("Extraction failed after retries"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_credential_stops_without_retrying() {
        let llm = ScriptedLLM::new(vec![
            Err(IngestError::Backend("OpenAI rejected the credential (401 Unauthorized)".to_string()).into()),
            Ok(VALID.to_string()),
        ]);
        let extractor = StructuredExtractor::new(llm.clone());

        let err = extractor
            .process(&candidate("Title", "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Backend(_)));
        assert_eq!(llm.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_object_json_is_retried() {
        let llm = ScriptedLLM::new(vec![
            Ok("[1, 2, 3]".to_string()),
            Ok("null".to_string()),
            Ok(VALID.to_string()),
        ]);
        let extractor = StructuredExtractor::new(llm.clone());

        let result = extractor.extract("Title", "text").await.unwrap();
        assert!(result.is_review);
        assert_eq!(llm.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_blank_fields_filled_by_heuristics() {
        let llm = ScriptedLLM::new(vec![Ok(VALID.to_string())]);
        let extractor = StructuredExtractor::new(llm);

        let outcome = extractor
            .process(&candidate("Famous Bowl Review", "today the kfc bowl"))
            .await
            .unwrap();
        let ExtractionOutcome::Review(record) = outcome else {
            panic!("expected review");
        };
        assert_eq!(record.manufacturer, "KFC");
        assert_eq!(record.category, "Running On Empty");
        assert_eq!(record.rating, Some(7.5));
    }

    #[test]
    fn test_energy_crisis_inferred_when_backend_is_blank() {
        let result = ExtractionResult {
            is_review: true,
            product: "XYZ".to_string(),
            ..Default::default()
        };
        let outcome = route(
            &candidate("Energy Crisis: XYZ Drink Review", "this is energy crisis"),
            result,
        );
        let ExtractionOutcome::Review(record) = outcome else {
            panic!("expected review");
        };
        assert_eq!(record.category, "Energy Crisis");
        assert_eq!(record.manufacturer, "");
    }

    #[test]
    fn test_backend_values_win_over_heuristics() {
        let result = ExtractionResult {
            is_review: true,
            product: "Whopper".to_string(),
            manufacturer: "Burger King".to_string(),
            category: "Running On Empty".to_string(),
            rating: Some(6.0),
            skip_reason: String::new(),
        };
        let outcome = route(&candidate("Drink Review?", "kfc"), result);
        let ExtractionOutcome::Review(record) = outcome else {
            panic!("expected review");
        };
        assert_eq!(record.manufacturer, "Burger King");
        assert_eq!(record.category, "Running On Empty");
    }

    #[test]
    fn test_non_review_routing() {
        let result = ExtractionResult {
            is_review: false,
            skip_reason: "channel update".to_string(),
            ..Default::default()
        };
        match route(&candidate("Update", ""), result) {
            ExtractionOutcome::NonReview(record) => assert_eq!(record.skip_reason, "channel update"),
            other => panic!("expected non-review, got {:?}", other),
        }
    }

    #[test]
    fn test_input_layout() {
        assert_eq!(
            build_input("T", "line1\nline2"),
            "Video title: T\n\nSubtitles excerpt:\nline1\nline2"
        );
    }
}
