//! Integration tests for [`RevalidationScheduler`] driven by the mock service.
//!
//! Pacing is disabled so no test waits on the limiter.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trialcite_core::validation::{MockResponse, MockValidationService};
use trialcite_core::{
    BoundingBox, CitationValidator, Config, Extraction, RevalidationScheduler, RevalidationStatus,
    SourceCitation,
};

fn config_unpaced() -> Config {
    Config {
        request_interval_ms: 0,
        ..Config::default()
    }
}

fn scheduler(mock: Arc<MockValidationService>) -> RevalidationScheduler {
    let config = config_unpaced();
    RevalidationScheduler::new(CitationValidator::new(mock, &config), &config)
}

fn citation(id: &str, confidence: f64) -> SourceCitation {
    SourceCitation {
        id: id.into(),
        page: 4,
        coordinates: BoundingBox::PLACEHOLDER,
        source_text: "median age was 61 years".into(),
        context: "...at baseline the median age was 61 years (range 34-82)...".into(),
        confidence,
        validated: Some(true),
        validation_result: None,
    }
}

fn extraction(id: &str, citations: Vec<SourceCitation>) -> Extraction {
    Extraction {
        id: id.into(),
        field_name: "median_age".into(),
        value: "61 years".into(),
        citations,
    }
}

#[tokio::test]
async fn small_drift_is_unchanged() {
    let mock = Arc::new(MockValidationService::new(MockResponse::valid(54.0)));
    let input = vec![extraction("e1", vec![citation("c1", 0.50)])];

    let result = scheduler(mock)
        .batch_revalidate(&input, |_| {}, &CancellationToken::new())
        .await;

    assert_eq!(result.unchanged, 1);
    assert_eq!(result.updated, 0);
    assert_eq!(result.avg_confidence_change, 0.0);
    assert!(result.updated_extractions.is_empty());
}

#[tokio::test]
async fn drift_past_threshold_is_changed() {
    let mock = Arc::new(MockValidationService::new(MockResponse::valid(57.0)));
    let input = vec![extraction("e1", vec![citation("c1", 0.50)])];

    let result = scheduler(mock)
        .batch_revalidate(&input, |_| {}, &CancellationToken::new())
        .await;

    assert_eq!(result.updated, 1);
    assert!((result.avg_confidence_change - 0.07).abs() < 1e-9);
    let updated = &result.updated_extractions[0];
    assert_eq!(updated.id, "e1");
    assert!((updated.citations[0].confidence - 0.57).abs() < 1e-9);
}

#[tokio::test]
async fn average_only_counts_changed_citations() {
    // c1: 0.50 -> 0.80 (changed), c2: 0.90 -> 0.92 (noise), c3: 0.70 -> 0.40 (changed)
    let mock = Arc::new(MockValidationService::with_sequence(vec![
        MockResponse::valid(80.0),
        MockResponse::valid(92.0),
        MockResponse::valid(40.0),
    ]));
    let input = vec![extraction(
        "e1",
        vec![citation("c1", 0.50), citation("c2", 0.90), citation("c3", 0.70)],
    )];

    let result = scheduler(mock.clone())
        .batch_revalidate(&input, |_| {}, &CancellationToken::new())
        .await;

    assert_eq!(mock.call_count(), 3);
    assert_eq!(result.updated, 1);
    assert!(result.avg_confidence_change.abs() < 1e-9);

    // replacement set is sorted descending
    let ids: Vec<_> = result.updated_extractions[0]
        .citations
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["c2", "c1", "c3"]);
}

#[tokio::test]
async fn service_error_leaves_citations_unvalidated() {
    let mock = Arc::new(MockValidationService::new(MockResponse::Error(
        "connection refused".into(),
    )));
    let input = vec![extraction("e1", vec![citation("c1", 0.50)])];

    let result = scheduler(mock)
        .batch_revalidate(&input, |_| {}, &CancellationToken::new())
        .await;

    // a failed call keeps the old confidence, so nothing moved
    assert_eq!(result.errors, 0);
    assert_eq!(result.unchanged, 1);
}

#[tokio::test]
async fn validator_error_marks_citation_false() {
    let mock = Arc::new(MockValidationService::new(MockResponse::Error("503".into())));
    let validator = CitationValidator::new(mock, &config_unpaced());
    let out = validator.validate("61 years", &citation("c1", 0.5)).await;
    assert_eq!(out.validated, Some(false));
    assert_eq!(out.confidence, 0.5);
}

#[tokio::test]
async fn progress_ends_with_completed() {
    let mock = Arc::new(MockValidationService::new(MockResponse::valid(90.0)));
    let input = vec![
        extraction("e1", vec![citation("c1", 0.5)]),
        extraction("e2", vec![citation("c2", 0.9)]),
    ];
    let mut statuses = Vec::new();

    let result = scheduler(mock)
        .batch_revalidate(&input, |p| statuses.push(p.status), &CancellationToken::new())
        .await;

    assert_eq!(
        statuses,
        vec![
            RevalidationStatus::Running,
            RevalidationStatus::Running,
            RevalidationStatus::Completed,
        ]
    );
    assert_eq!(result.updated, 1);
    assert_eq!(result.unchanged, 1);
}

#[tokio::test]
async fn cancel_mid_batch_keeps_partial_result() {
    let mock = Arc::new(
        MockValidationService::new(MockResponse::valid(90.0)).with_delay(Duration::from_millis(200)),
    );
    let input: Vec<_> = (0..5)
        .map(|i| extraction(&format!("e{i}"), vec![citation("c", 0.5)]))
        .collect();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        canceller.cancel();
    });

    let result = scheduler(mock)
        .batch_revalidate(&input, |_| {}, &cancel)
        .await;

    assert!(result.cancelled);
    assert!(result.updated >= 1);
    assert!(result.updated < 5);
    assert_eq!(result.updated_extractions.len(), result.updated);
}
