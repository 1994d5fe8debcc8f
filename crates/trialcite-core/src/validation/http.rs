use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::{ServiceError, ValidationRequest, ValidationResponse, ValidationService};
use crate::rate_limit::parse_retry_after;

/// Validation service reached over HTTP: JSON request body, JSON response.
pub struct HttpValidationService {
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpValidationService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs(30),
            client,
        }
    }

    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        self.api_key = key;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ValidationService for HttpValidationService {
    fn name(&self) -> &str {
        "http"
    }

    fn validate<'a>(
        &'a self,
        request: &'a ValidationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ValidationResponse, ServiceError>> + Send + 'a>> {
        Box::pin(async move {
            let mut req = self
                .client
                .post(&self.endpoint)
                .timeout(self.timeout)
                .json(request);
            if let Some(ref key) = self.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| ServiceError::Http(e.to_string()))?;

            let status = resp.status();
            if status.as_u16() == 429 {
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                return Err(ServiceError::RateLimited { retry_after });
            }
            if !status.is_success() {
                return Err(ServiceError::Status(status.as_u16()));
            }

            let body = resp
                .text()
                .await
                .map_err(|e| ServiceError::Http(e.to_string()))?;
            parse_response(&body)
        })
    }
}

/// Parse and sanity-check a response body.
pub(crate) fn parse_response(body: &str) -> Result<ValidationResponse, ServiceError> {
    let resp: ValidationResponse =
        serde_json::from_str(body).map_err(|e| ServiceError::Malformed(e.to_string()))?;
    if !resp.confidence.is_finite() {
        return Err(ServiceError::Malformed(format!(
            "non-finite confidence {}",
            resp.confidence
        )));
    }
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_body() {
        let resp = parse_response(
            r#"{"isValid":true,"confidence":92,"matchType":"exact","reasoning":"verbatim"}"#,
        )
        .unwrap();
        assert_eq!(resp.confidence, 92.0);
    }

    #[test]
    fn missing_fields_are_malformed() {
        let err = parse_response(r#"{"confidence":92}"#).unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = parse_response("<html>Bad gateway</html>").unwrap_err();
        assert!(matches!(err, ServiceError::Malformed(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_http_error() {
        let service = HttpValidationService::new("http://127.0.0.1:9/validate")
            .with_timeout(Duration::from_secs(2));
        let request = ValidationRequest {
            extracted_text: "x".into(),
            source_text: "x".into(),
            context: "x".into(),
        };
        let err = service.validate(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Http(_)));
    }
}
