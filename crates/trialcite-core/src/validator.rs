//! CitationValidator: enrich citations with the external service's verdict.

use std::sync::Arc;
use std::time::Duration;

use crate::rate_limit::RequestPacer;
use crate::validation::{ServiceError, ValidationRequest, ValidationResponse, ValidationService};
use crate::{Config, SourceCitation, ValidationVerdict};

/// Wait before the single retry after a 429 that carried no Retry-After.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);

/// Sends citations to a [`ValidationService`] one at a time.
///
/// Service failures never escape: a citation that could not be validated is
/// returned unchanged apart from `validated = Some(false)`.
pub struct CitationValidator {
    service: Arc<dyn ValidationService>,
    pacer: Option<RequestPacer>,
    timeout: Duration,
}

impl CitationValidator {
    pub fn new(service: Arc<dyn ValidationService>, config: &Config) -> Self {
        Self {
            service,
            pacer: RequestPacer::new(config.request_interval()),
            timeout: config.validation_timeout(),
        }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Validate one citation against the extracted text.
    pub async fn validate(&self, extracted_text: &str, citation: &SourceCitation) -> SourceCitation {
        let request = ValidationRequest {
            extracted_text: extracted_text.to_string(),
            source_text: citation.source_text.clone(),
            context: citation.context.clone(),
        };

        match self.call_with_retry(&request).await {
            Ok(resp) => apply_verdict(citation, resp),
            Err(e) => {
                tracing::warn!(
                    citation = %citation.id,
                    service = self.service.name(),
                    error = %e,
                    "validation unavailable, leaving citation unvalidated"
                );
                SourceCitation {
                    validated: Some(false),
                    ..citation.clone()
                }
            }
        }
    }

    /// Validate citations strictly in order, preserving that order.
    pub async fn validate_sequence(
        &self,
        extracted_text: &str,
        citations: &[SourceCitation],
    ) -> Vec<SourceCitation> {
        let mut out = Vec::with_capacity(citations.len());
        for citation in citations {
            out.push(self.validate(extracted_text, citation).await);
        }
        out
    }

    /// Validate citations sequentially, then sort descending by confidence.
    pub async fn validate_all(
        &self,
        extracted_text: &str,
        citations: &[SourceCitation],
    ) -> Vec<SourceCitation> {
        let mut out = self.validate_sequence(extracted_text, citations).await;
        sort_by_confidence(&mut out);
        out
    }

    async fn call_with_retry(
        &self,
        request: &ValidationRequest,
    ) -> Result<ValidationResponse, ServiceError> {
        self.pace().await;
        match self.call(request).await {
            Err(ServiceError::RateLimited { retry_after }) => {
                if let Some(ref pacer) = self.pacer {
                    pacer.on_rate_limited();
                }
                let wait = retry_after.unwrap_or(DEFAULT_RETRY_WAIT).min(self.timeout);
                tracing::debug!(wait_ms = wait.as_millis() as u64, "validation rate limited, retrying once");
                tokio::time::sleep(wait).await;
                self.pace().await;
                self.call(request).await
            }
            other => other,
        }
    }

    async fn call(&self, request: &ValidationRequest) -> Result<ValidationResponse, ServiceError> {
        match tokio::time::timeout(self.timeout, self.service.validate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Http(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    async fn pace(&self) {
        if let Some(ref pacer) = self.pacer {
            pacer.acquire().await;
        }
    }
}

/// Copy a service verdict onto a citation, rescaling confidence to [0, 1].
fn apply_verdict(citation: &SourceCitation, resp: ValidationResponse) -> SourceCitation {
    let confidence = resp.confidence.clamp(0.0, 100.0);
    SourceCitation {
        confidence: confidence / 100.0,
        validated: Some(true),
        validation_result: Some(ValidationVerdict {
            is_valid: resp.is_valid,
            confidence,
            match_type: resp.match_type,
            reasoning: resp.reasoning,
            issues: resp.issues.unwrap_or_default(),
            suggestions: resp.suggestions,
        }),
        ..citation.clone()
    }
}

/// Stable sort, highest confidence first.
pub fn sort_by_confidence(citations: &mut [SourceCitation]) {
    citations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
}
