/// Review Ingest
///
/// Incremental ingestion of review videos from a channel: acquires caption
/// tracks and metadata through an external tool, normalizes transcripts, and
/// extracts structured review records with a schema-constrained LLM.

pub mod acquisition;
pub mod captions;
pub mod config;
pub mod error;
pub mod extraction;
pub mod llm;
pub mod processing;
pub mod records;
pub mod state;

// Re-export main types for easy access
pub use crate::acquisition::{AcquisitionController, CaptionCache, DownloadLedger, VideoFetcher, YtDlpFetcher};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{IngestError, Result};
pub use crate::extraction::{ExtractionOutcome, StructuredExtractor};
pub use crate::llm::{LLMConfig, LLMProvider, LLM};
pub use crate::processing::{AcquisitionStage, ExtractionStage, Pipeline, RunContext, Stage};
pub use crate::records::{ReviewRecord, VideoDescriptor};
pub use crate::state::{ItemStage, StateTracker};
