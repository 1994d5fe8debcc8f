//! Scripted validation service for tests and offline runs.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{MatchType, ServiceError, ValidationRequest, ValidationResponse, ValidationService};

/// A configurable reply for [`MockValidationService`].
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Answer with this confidence (0–100).
    Verdict {
        is_valid: bool,
        confidence: f64,
        match_type: MatchType,
        issues: Vec<String>,
    },
    /// Answer 429.
    RateLimited { retry_after: Option<Duration> },
    /// Fail the call.
    Error(String),
}

impl MockResponse {
    /// A valid exact-match verdict with the given confidence.
    pub fn valid(confidence: f64) -> Self {
        MockResponse::Verdict {
            is_valid: true,
            confidence,
            match_type: MatchType::Exact,
            issues: Vec::new(),
        }
    }

    /// An invalid verdict carrying the given issues.
    pub fn invalid(confidence: f64, issues: &[&str]) -> Self {
        MockResponse::Verdict {
            is_valid: false,
            confidence,
            match_type: MatchType::NoMatch,
            issues: issues.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Hand-rolled [`ValidationService`] that replays scripted responses.
///
/// Returns a fixed response for every call, or a sequence consumed one per
/// call with the last one repeated once exhausted. Requests are recorded so
/// tests can check what was sent.
pub struct MockValidationService {
    responses: Mutex<Vec<MockResponse>>,
    fallback: MockResponse,
    delay: Option<Duration>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ValidationRequest>>,
}

impl MockValidationService {
    /// A mock that always returns `response`.
    pub fn new(response: MockResponse) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            fallback: response,
            delay: None,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A mock that returns `responses` in order, repeating the last one.
    /// An empty sequence behaves like a service that always errors.
    pub fn with_sequence(mut responses: Vec<MockResponse>) -> Self {
        let fallback = responses
            .last()
            .cloned()
            .unwrap_or_else(|| MockResponse::Error("no scripted response".into()));
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            fallback,
            delay: None,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Simulated latency per call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ValidationRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_response(&self) -> MockResponse {
        let popped = self.responses.lock().ok().and_then(|mut seq| seq.pop());
        popped.unwrap_or_else(|| self.fallback.clone())
    }
}

impl ValidationService for MockValidationService {
    fn name(&self) -> &str {
        "mock"
    }

    fn validate<'a>(
        &'a self,
        request: &'a ValidationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ValidationResponse, ServiceError>> + Send + 'a>> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request.clone());
        }
        let response = self.next_response();
        let delay = self.delay;

        Box::pin(async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }

            match response {
                MockResponse::Verdict {
                    is_valid,
                    confidence,
                    match_type,
                    issues,
                } => Ok(ValidationResponse {
                    is_valid,
                    confidence,
                    match_type,
                    reasoning: "scripted".into(),
                    issues: (!issues.is_empty()).then_some(issues),
                    suggestions: None,
                }),
                MockResponse::RateLimited { retry_after } => {
                    Err(ServiceError::RateLimited { retry_after })
                }
                MockResponse::Error(msg) => Err(ServiceError::Http(msg)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ValidationRequest {
        ValidationRequest {
            extracted_text: "120 patients".into(),
            source_text: "120 patients were randomized".into(),
            context: String::new(),
        }
    }

    #[tokio::test]
    async fn sequence_repeats_last() {
        let mock = MockValidationService::with_sequence(vec![
            MockResponse::Error("boom".into()),
            MockResponse::valid(80.0),
        ]);
        let req = request();
        assert!(mock.validate(&req).await.is_err());
        assert_eq!(mock.validate(&req).await.unwrap().confidence, 80.0);
        assert_eq!(mock.validate(&req).await.unwrap().confidence, 80.0);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests().len(), 3);
    }

    #[tokio::test]
    async fn invalid_carries_issues() {
        let mock = MockValidationService::new(MockResponse::invalid(20.0, &["wrong arm"]));
        let resp = mock.validate(&request()).await.unwrap();
        assert!(!resp.is_valid);
        assert_eq!(resp.issues, Some(vec!["wrong arm".to_string()]));
    }

    #[tokio::test]
    async fn empty_sequence_errors() {
        let mock = MockValidationService::with_sequence(Vec::new());
        assert!(mock.validate(&request()).await.is_err());
    }
}
