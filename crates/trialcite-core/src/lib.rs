use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod chunk;
pub mod config_file;
pub mod index;
pub mod layout;
pub mod matching;
pub mod rate_limit;
pub mod revalidation;
pub mod search;
pub mod validation;
pub mod validator;

// Re-export for convenience
pub use backend::{BackendError, PageTextSource, PdfBackend};
pub use chunk::{chunk, chunk_with_progress};
pub use index::{ChunkIndex, INDEX_VERSION};
pub use layout::{BoundingBox, get_text_items_in_range};
pub use revalidation::{
    RevalidationError, RevalidationProgress, RevalidationRecommendation, RevalidationResult,
    RevalidationScheduler, RevalidationStatus, get_revalidation_recommendations,
};
pub use search::{CitationSearchEngine, SearchHint, SearchMethod, SearchOutcome};
pub use validation::{MatchType, ServiceError, ValidationService};
pub use validator::CitationValidator;

/// One lexical run on a page with its bounding box in page coordinates.
///
/// `char_start`/`char_end` are page-relative offsets (in characters) into the
/// page's chunk text. Items coming straight from an extractor may not carry
/// them; lookups reconstruct them by walking the items in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub font_name: String,
    #[serde(default)]
    pub font_size: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub char_end: Option<usize>,
}

impl TextItem {
    /// Create an item without character offsets.
    pub fn new(text: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            text: text.into(),
            x,
            y,
            width,
            height,
            font_name: String::new(),
            font_size: height,
            char_start: None,
            char_end: None,
        }
    }
}

/// One page of concatenated text positioned on the document-wide character axis.
///
/// `char_end - char_start` always equals the character length of `text`.
/// Consecutive chunks leave a one-character gap that stands for the page break.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageChunk {
    /// 1-based page number.
    pub page: u32,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub text_items: Vec<TextItem>,
}

impl PageChunk {
    pub fn len(&self) -> usize {
        self.char_end - self.char_start
    }

    pub fn is_empty(&self) -> bool {
        self.char_end == self.char_start
    }
}

/// Verdict returned by the external validation service, stored on a citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub is_valid: bool,
    /// Service confidence on its own 0–100 scale.
    pub confidence: f64,
    pub match_type: MatchType,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<String>,
}

/// A claim that `source_text` appears at `coordinates` on `page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCitation {
    pub id: String,
    pub page: u32,
    pub coordinates: BoundingBox,
    pub source_text: String,
    pub context: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<ValidationVerdict>,
}

impl SourceCitation {
    pub fn is_validated(&self) -> bool {
        self.validated == Some(true)
    }

    /// Issues recorded by the last successful validation, if any.
    pub fn issues(&self) -> &[String] {
        self.validation_result
            .as_ref()
            .map(|v| v.issues.as_slice())
            .unwrap_or(&[])
    }
}

/// An extracted field value and the citations that support it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    pub id: String,
    pub field_name: String,
    pub value: String,
    #[serde(default)]
    pub citations: Vec<SourceCitation>,
}

impl Extraction {
    /// The first citation is the one shown to reviewers.
    pub fn primary_citation(&self) -> Option<&SourceCitation> {
        self.citations.first()
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::ser::Error),
    #[error("could not determine config directory")]
    NoConfigDir,
}

/// Configuration for search, validation and revalidation.
#[derive(Clone)]
pub struct Config {
    /// Queries shorter than this (in characters, after trimming) are rejected.
    pub min_query_len: usize,
    /// Characters of context kept on each side of a chunk-path match.
    pub context_chars: usize,
    /// Minimum similarity (0–1) for a fuzzy candidate.
    pub fuzzy_threshold: f64,
    pub fuzzy_max_results: usize,
    /// Text items of context kept on each side of a fuzzy match.
    pub fuzzy_context_items: usize,
    /// Pages re-extracted by the on-demand path when no chunk index exists.
    pub on_demand_max_pages: usize,
    pub on_demand_max_results: usize,
    /// Characters around an on-demand match within which items count as spanning it.
    pub spanning_window: usize,
    pub validation_endpoint: Option<String>,
    pub validation_api_key: Option<String>,
    pub validation_timeout_secs: u64,
    /// Minimum spacing between validation requests. `0` disables pacing.
    pub request_interval_ms: u64,
    /// Confidence deltas at or below this are treated as noise.
    pub change_threshold: f64,
    /// Validated primary citations below this confidence are flagged for revalidation.
    pub low_confidence_threshold: f64,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("min_query_len", &self.min_query_len)
            .field("context_chars", &self.context_chars)
            .field("fuzzy_threshold", &self.fuzzy_threshold)
            .field("fuzzy_max_results", &self.fuzzy_max_results)
            .field("fuzzy_context_items", &self.fuzzy_context_items)
            .field("on_demand_max_pages", &self.on_demand_max_pages)
            .field("on_demand_max_results", &self.on_demand_max_results)
            .field("spanning_window", &self.spanning_window)
            .field("validation_endpoint", &self.validation_endpoint)
            .field(
                "validation_api_key",
                &self.validation_api_key.as_ref().map(|_| "***"),
            )
            .field("validation_timeout_secs", &self.validation_timeout_secs)
            .field("request_interval_ms", &self.request_interval_ms)
            .field("change_threshold", &self.change_threshold)
            .field("low_confidence_threshold", &self.low_confidence_threshold)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_query_len: 3,
            context_chars: 100,
            fuzzy_threshold: 0.7,
            fuzzy_max_results: 5,
            fuzzy_context_items: 5,
            on_demand_max_pages: 5,
            on_demand_max_results: 3,
            spanning_window: 50,
            validation_endpoint: None,
            validation_api_key: None,
            validation_timeout_secs: 30,
            request_interval_ms: 500,
            change_threshold: 0.05,
            low_confidence_threshold: 0.6,
        }
    }
}

impl Config {
    pub fn validation_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn request_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_masks_api_key() {
        let config = Config {
            validation_api_key: Some("secret-key".into()),
            ..Config::default()
        };
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("secret-key"));
    }

    #[test]
    fn text_item_deserializes_without_offsets() {
        let json = r#"{"text":"alpha","x":1.0,"y":2.0,"width":3.0,"height":4.0}"#;
        let item: TextItem = serde_json::from_str(json).unwrap();
        assert_eq!(item.text, "alpha");
        assert!(item.char_start.is_none());
        assert!(item.font_name.is_empty());
    }

    #[test]
    fn citation_issues_empty_when_unvalidated() {
        let citation = SourceCitation {
            id: "c1".into(),
            page: 1,
            coordinates: BoundingBox::PLACEHOLDER,
            source_text: "x".into(),
            context: "x".into(),
            confidence: 0.5,
            validated: None,
            validation_result: None,
        };
        assert!(citation.issues().is_empty());
        assert!(!citation.is_validated());
    }
}
