//! Batch revalidation of existing citations and the policy for when to run it.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::validator::{CitationValidator, sort_by_confidence};
use crate::{Config, Extraction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevalidationStatus {
    Running,
    Error,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidationProgress {
    /// 1-based position of the extraction being processed.
    pub current: usize,
    pub total: usize,
    pub percentage: usize,
    pub current_field: String,
    pub status: RevalidationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidationResult {
    pub total: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub errors: usize,
    /// Mean signed confidence change over the citations that changed.
    pub avg_confidence_change: f64,
    pub updated_extractions: Vec<Extraction>,
    /// The batch stopped early; counts cover the extractions processed.
    pub cancelled: bool,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevalidationError {
    #[error("extraction {0} has an empty value")]
    EmptyValue(String),
    #[error("revalidation cancelled")]
    Cancelled,
}

/// Outcome of revalidating one extraction.
enum Revalidated {
    Unchanged,
    Updated {
        extraction: Extraction,
        deltas: Vec<f64>,
    },
}

/// Drives a [`CitationValidator`] over many extractions, one at a time.
pub struct RevalidationScheduler {
    validator: CitationValidator,
    change_threshold: f64,
}

impl RevalidationScheduler {
    pub fn new(validator: CitationValidator, config: &Config) -> Self {
        Self {
            validator,
            change_threshold: config.change_threshold,
        }
    }

    /// Revalidate every extraction that carries at least one citation.
    ///
    /// Per-extraction failures are counted and reported through `on_progress`
    /// without stopping the batch. Cancelling `cancel` stops before the next
    /// extraction (or abandons the one in flight) and returns what was done.
    pub async fn batch_revalidate(
        &self,
        extractions: &[Extraction],
        mut on_progress: impl FnMut(&RevalidationProgress),
        cancel: &CancellationToken,
    ) -> RevalidationResult {
        let eligible: Vec<&Extraction> = extractions
            .iter()
            .filter(|e| !e.citations.is_empty())
            .collect();
        let total = eligible.len();
        let mut result = RevalidationResult {
            total,
            ..RevalidationResult::default()
        };
        let mut changed_deltas: Vec<f64> = Vec::new();

        tracing::info!(total, service = self.validator.service_name(), "starting revalidation");

        for (i, extraction) in eligible.iter().enumerate() {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let current = i + 1;
            on_progress(&progress(current, total, extraction, RevalidationStatus::Running, None));

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(RevalidationError::Cancelled),
                r = self.revalidate_one(extraction) => r,
            };

            match outcome {
                Ok(Revalidated::Unchanged) => result.unchanged += 1,
                Ok(Revalidated::Updated { extraction, deltas }) => {
                    result.updated += 1;
                    changed_deltas.extend(deltas);
                    result.updated_extractions.push(extraction);
                }
                Err(RevalidationError::Cancelled) => {
                    result.cancelled = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(extraction = %extraction.id, error = %e, "revalidation failed");
                    result.errors += 1;
                    on_progress(&progress(
                        current,
                        total,
                        extraction,
                        RevalidationStatus::Error,
                        Some(e.to_string()),
                    ));
                }
            }
        }

        if !changed_deltas.is_empty() {
            result.avg_confidence_change =
                changed_deltas.iter().sum::<f64>() / changed_deltas.len() as f64;
        }

        let done = result.updated + result.unchanged + result.errors;
        on_progress(&RevalidationProgress {
            current: done,
            total,
            percentage: percentage(done, total),
            current_field: String::new(),
            status: RevalidationStatus::Completed,
            error: None,
        });

        tracing::info!(
            updated = result.updated,
            unchanged = result.unchanged,
            errors = result.errors,
            cancelled = result.cancelled,
            "revalidation finished"
        );
        result
    }

    async fn revalidate_one(&self, extraction: &Extraction) -> Result<Revalidated, RevalidationError> {
        if extraction.value.trim().is_empty() {
            return Err(RevalidationError::EmptyValue(extraction.id.clone()));
        }

        let fresh = self
            .validator
            .validate_sequence(&extraction.value, &extraction.citations)
            .await;

        let deltas: Vec<f64> = extraction
            .citations
            .iter()
            .zip(&fresh)
            .map(|(old, new)| new.confidence - old.confidence)
            .filter(|d| d.abs() > self.change_threshold)
            .collect();

        if deltas.is_empty() {
            tracing::debug!(extraction = %extraction.id, "citations unchanged");
            return Ok(Revalidated::Unchanged);
        }

        let mut citations = fresh;
        sort_by_confidence(&mut citations);
        Ok(Revalidated::Updated {
            extraction: Extraction {
                citations,
                ..extraction.clone()
            },
            deltas,
        })
    }
}

fn percentage(current: usize, total: usize) -> usize {
    if total == 0 {
        100
    } else {
        current * 100 / total
    }
}

fn progress(
    current: usize,
    total: usize,
    extraction: &Extraction,
    status: RevalidationStatus,
    error: Option<String>,
) -> RevalidationProgress {
    RevalidationProgress {
        current,
        total,
        percentage: percentage(current, total),
        current_field: extraction.field_name.clone(),
        status,
        error,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevalidationRecommendation {
    pub should_revalidate: bool,
    pub reasons: Vec<String>,
    /// Flagged extractions, each listed once, in input order.
    pub extractions: Vec<Extraction>,
}

/// Decide whether a revalidation pass is worthwhile and over which extractions.
///
/// An extraction is flagged when its primary citation is unvalidated, when
/// its validated primary citation is below `low_confidence_threshold`, or when
/// any of its citations carries validation issues.
pub fn get_revalidation_recommendations(
    extractions: &[Extraction],
    low_confidence_threshold: f64,
) -> RevalidationRecommendation {
    let mut unvalidated = 0usize;
    let mut low_confidence = 0usize;
    let mut with_issues = 0usize;
    let mut flagged: Vec<Extraction> = Vec::new();

    for extraction in extractions {
        let Some(primary) = extraction.primary_citation() else {
            continue;
        };

        let mut flag = false;
        if !primary.is_validated() {
            unvalidated += 1;
            flag = true;
        } else if primary.confidence < low_confidence_threshold {
            low_confidence += 1;
            flag = true;
        }
        if extraction.citations.iter().any(|c| !c.issues().is_empty()) {
            with_issues += 1;
            flag = true;
        }

        if flag && !flagged.iter().any(|f| f.id == extraction.id) {
            flagged.push(extraction.clone());
        }
    }

    let mut reasons = Vec::new();
    if unvalidated > 0 {
        reasons.push(format!(
            "{unvalidated} extraction(s) have an unvalidated primary citation"
        ));
    }
    if low_confidence > 0 {
        reasons.push(format!(
            "{low_confidence} extraction(s) have a primary citation below {:.0}% confidence",
            low_confidence_threshold * 100.0
        ));
    }
    if with_issues > 0 {
        reasons.push(format!(
            "{with_issues} extraction(s) have citations with validation issues"
        ));
    }

    RevalidationRecommendation {
        should_revalidate: !flagged.is_empty(),
        reasons,
        extractions: flagged,
    }
}
