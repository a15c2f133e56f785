//! Record types shared by the acquisition and extraction stages

use crate::error::{IngestError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Video metadata as written by the acquisition tool (`<id>.info.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    pub id: String,
    pub title: String,
    pub upload_date: NaiveDate,
}

/// Raw metadata file contents; only the fields the pipeline reads
#[derive(Debug, Clone, Deserialize)]
pub struct RawVideoInfo {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<serde_json::Value>,
    #[serde(default)]
    pub upload_date: Option<serde_json::Value>,
}

impl RawVideoInfo {
    pub fn id(&self) -> Option<&str> {
        self.id.as_ref().and_then(|v| v.as_str()).filter(|s| !s.is_empty())
    }

    pub fn title(&self) -> &str {
        self.title.as_ref().and_then(|v| v.as_str()).unwrap_or("")
    }

    /// Upload date, when present as an eight-digit `YYYYMMDD` string naming a real day
    pub fn upload_date(&self) -> Option<NaiveDate> {
        let raw = self.upload_date.as_ref()?.as_str()?;
        parse_compact_date(raw)
    }

    pub fn into_descriptor(self) -> Option<VideoDescriptor> {
        let id = self.id()?.to_string();
        let upload_date = self.upload_date()?;
        Some(VideoDescriptor {
            title: self.title().to_string(),
            id,
            upload_date,
        })
    }
}

/// Parse the acquisition tool's `YYYYMMDD` date form
pub fn parse_compact_date(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 8 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// Format a date in the acquisition tool's `YYYYMMDD` form
pub fn to_compact_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// A finished review, ready for the downstream merge step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub product: String,
    pub manufacturer: String,
    pub category: String,
    pub video_title: String,
    pub video_code: String,
    pub date_released: NaiveDate,
    pub rating: Option<f64>,
}

impl ReviewRecord {
    /// Placeholder written in no-backend mode
    pub fn stub(candidate: &Candidate) -> Self {
        Self {
            product: String::new(),
            manufacturer: String::new(),
            category: String::new(),
            video_title: candidate.video_title.clone(),
            video_code: candidate.video_code.clone(),
            date_released: candidate.date_released,
            rating: None,
        }
    }
}

/// Side-channel entry for a video the backend judged not to be a review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonReviewRecord {
    pub video_title: String,
    pub video_code: String,
    pub date_released: NaiveDate,
    pub skip_reason: String,
}

/// Side-channel entry for a video whose extraction failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub video_code: String,
    pub video_title: String,
    pub error: String,
}

/// A video selected for extraction, with its transcript already prepared
#[derive(Debug, Clone)]
pub struct Candidate {
    pub video_code: String,
    pub video_title: String,
    pub date_released: NaiveDate,
    pub transcript_text: String,
    pub transcript_excerpt: String,
}

impl Candidate {
    pub fn new(video: VideoDescriptor, transcript_text: String, transcript_excerpt: String) -> Self {
        Self {
            video_code: video.id,
            video_title: video.title,
            date_released: video.upload_date,
            transcript_text,
            transcript_excerpt,
        }
    }
}

/// Video codes already present in the production dataset
#[derive(Debug, Clone, Default)]
pub struct ProductionDataset {
    pub video_codes: HashSet<String>,
}

impl ProductionDataset {
    /// Read the dataset; a missing file is an empty dataset.
    ///
    /// Accepts a bare array of reports or an object with a `reports` array.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let json: serde_json::Value = serde_json::from_str(&raw)?;
        let reports = match &json {
            serde_json::Value::Array(items) => items.as_slice(),
            serde_json::Value::Object(map) => match map.get("reports") {
                Some(serde_json::Value::Array(items)) => items.as_slice(),
                _ => &[],
            },
            _ => {
                return Err(IngestError::Dataset {
                    path: path.to_path_buf(),
                    reason: "expected a JSON array or an object with `reports`".to_string(),
                })
            }
        };

        let mut dataset = Self::default();
        for report in reports {
            if let Some(code) = report.get("videoCode").and_then(|v| v.as_str()) {
                if !code.is_empty() {
                    dataset.video_codes.insert(code.to_string());
                }
            }
        }

        Ok(dataset)
    }

    pub fn contains(&self, video_code: &str) -> bool {
        self.video_codes.contains(video_code)
    }

    pub fn len(&self) -> usize {
        self.video_codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.video_codes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_compact_date() {
        assert_eq!(
            parse_compact_date("20240131"),
            NaiveDate::from_ymd_opt(2024, 1, 31)
        );
        assert_eq!(parse_compact_date("20240231"), None);
        assert_eq!(parse_compact_date("2024-01-31"), None);
        assert_eq!(parse_compact_date(""), None);
        assert_eq!(
            to_compact_date(NaiveDate::from_ymd_opt(2019, 3, 7).unwrap()),
            "20190307"
        );
    }

    #[test]
    fn test_review_record_wire_shape() {
        let record = ReviewRecord {
            product: "Big Mac".to_string(),
            manufacturer: "McDonald's".to_string(),
            category: "Running On Empty".to_string(),
            video_title: "Big Mac Review".to_string(),
            video_code: "abcdefghijk".to_string(),
            date_released: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            rating: Some(7.5),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["videoCode"], "abcdefghijk");
        assert_eq!(json["dateReleased"], "2024-05-01");
        assert_eq!(json["rating"], 7.5);
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_raw_info_tolerates_wrong_types() {
        let info: RawVideoInfo =
            serde_json::from_str(r#"{"id": 42, "title": null, "upload_date": "20240101"}"#).unwrap();
        assert!(info.id().is_none());
        assert_eq!(info.title(), "");
        assert!(info.into_descriptor().is_none());
    }

    #[tokio::test]
    async fn test_dataset_shapes() {
        let dir = TempDir::new().unwrap();

        let missing = ProductionDataset::load(&dir.path().join("nope.json")).await.unwrap();
        assert!(missing.is_empty());

        let array_path = dir.path().join("array.json");
        tokio::fs::write(
            &array_path,
            r#"[{"videoCode": "aaa", "dateReleased": "2020-01-02"}, {"videoCode": ""}, {"dateReleased": "2021-06-01"}]"#,
        )
        .await
        .unwrap();
        let dataset = ProductionDataset::load(&array_path).await.unwrap();
        assert_eq!(dataset.len(), 1);
        assert!(dataset.contains("aaa"));

        let object_path = dir.path().join("object.json");
        tokio::fs::write(&object_path, r#"{"reports": [{"videoCode": "bbb"}]}"#)
            .await
            .unwrap();
        let dataset = ProductionDataset::load(&object_path).await.unwrap();
        assert!(dataset.contains("bbb"));
    }
}
