//! Contract with the external semantic validation service.

pub mod http;
pub mod mock;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use http::HttpValidationService;
pub use mock::{MockResponse, MockValidationService};

/// How the service judged the relationship between extracted and source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchType {
    Exact,
    Paraphrase,
    Semantic,
    Related,
    NoMatch,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    pub extracted_text: String,
    pub source_text: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub is_valid: bool,
    /// 0–100.
    pub confidence: f64,
    pub match_type: MatchType,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub issues: Option<Vec<String>>,
    #[serde(default)]
    pub suggestions: Option<String>,
}

/// Why a validation call produced no verdict.
///
/// Every variant means "could not validate", never "validation failed".
#[derive(Error, Debug, Clone)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("rate limited (429)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("service returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// An external service that judges whether source text supports an extracted value.
pub trait ValidationService: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    fn validate<'a>(
        &'a self,
        request: &'a ValidationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ValidationResponse, ServiceError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parses_service_json() {
        let json = r#"{
            "isValid": true,
            "confidence": 87,
            "matchType": "paraphrase",
            "reasoning": "same number, reworded",
            "issues": ["rounding differs"]
        }"#;
        let resp: ValidationResponse = serde_json::from_str(json).unwrap();
        assert!(resp.is_valid);
        assert_eq!(resp.confidence, 87.0);
        assert_eq!(resp.match_type, MatchType::Paraphrase);
        assert_eq!(resp.issues.unwrap(), vec!["rounding differs"]);
        assert!(resp.suggestions.is_none());
    }

    #[test]
    fn unknown_match_type_is_tolerated() {
        let json = r#"{"isValid":false,"confidence":10,"matchType":"contradiction"}"#;
        let resp: ValidationResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.match_type, MatchType::Unknown);
        assert!(resp.reasoning.is_empty());
    }

    #[test]
    fn no_match_uses_kebab_case() {
        let resp: ValidationResponse =
            serde_json::from_str(r#"{"isValid":false,"confidence":0,"matchType":"no-match"}"#)
                .unwrap();
        assert_eq!(resp.match_type, MatchType::NoMatch);
    }

    #[test]
    fn request_serializes_camel_case() {
        let req = ValidationRequest {
            extracted_text: "a".into(),
            source_text: "b".into(),
            context: "c".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["extractedText"], "a");
        assert_eq!(value["sourceText"], "b");
    }
}
