//! CitationSearchEngine: locate an extracted value in the source document.
//!
//! Preference order:
//! 1. Exact normalized match over the persisted chunk index (confidence 1.0)
//! 2. Fuzzy match over the indexed text items
//! 3. Without an index: exact then fuzzy match over pages re-extracted on demand
//!
//! Every hit is turned back into a bounding box from the text items it covers.

use serde::{Deserialize, Serialize};

use crate::backend::PageTextSource;
use crate::chunk::lay_out_page;
use crate::index::ChunkIndex;
use crate::layout::{BoundingBox, get_text_items_in_range};
use crate::matching::{NormalizedText, char_slice, find_all, normalize, normalize_with_map, similarity};
use crate::{Config, PageChunk, SourceCitation, TextItem};

/// Which strategy produced the citations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchMethod {
    ExactMatch,
    FuzzyMatch,
    NotFound,
}

/// Optional narrowing of a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHint {
    /// Restrict the search to these 1-based pages. Empty means all pages.
    pub pages: Vec<u32>,
    /// Cap on returned citations, applied on top of the built-in caps.
    pub max_results: Option<usize>,
}

impl SearchHint {
    pub fn pages(pages: impl IntoIterator<Item = u32>) -> Self {
        Self {
            pages: pages.into_iter().collect(),
            max_results: None,
        }
    }

    fn allows(&self, page: u32) -> bool {
        self.pages.is_empty() || self.pages.contains(&page)
    }

    fn cap(&self, limit: usize) -> usize {
        self.max_results.map_or(limit, |m| m.min(limit))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOutcome {
    pub citations: Vec<SourceCitation>,
    pub method: SearchMethod,
    /// Confidence of the best citation, 0 when nothing was found.
    pub confidence: f64,
}

impl SearchOutcome {
    pub fn not_found() -> Self {
        Self {
            citations: Vec::new(),
            method: SearchMethod::NotFound,
            confidence: 0.0,
        }
    }

    fn from_citations(citations: Vec<SourceCitation>, method: SearchMethod) -> Self {
        if citations.is_empty() {
            return Self::not_found();
        }
        let confidence = citations
            .iter()
            .map(|c| c.confidence)
            .fold(0.0, f64::max);
        Self {
            citations,
            method,
            confidence,
        }
    }

    pub fn is_found(&self) -> bool {
        self.method != SearchMethod::NotFound
    }
}

/// A window of consecutive items on one page that scored above threshold.
#[derive(Debug, Clone, Copy)]
struct FuzzyCandidate {
    page: u32,
    first: usize,
    last: usize,
    score: f64,
}

impl FuzzyCandidate {
    fn overlaps(&self, other: &FuzzyCandidate) -> bool {
        self.page == other.page && self.first <= other.last && other.first <= self.last
    }
}

pub struct CitationSearchEngine {
    config: Config,
}

impl CitationSearchEngine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Search for `query`, using the chunk index when one is available and
    /// falling back to on-demand extraction from `source` otherwise.
    pub fn search(
        &self,
        query: &str,
        index: Option<&ChunkIndex>,
        source: Option<&dyn PageTextSource>,
        hint: &SearchHint,
    ) -> SearchOutcome {
        let Some(norm_query) = self.prepare_query(query) else {
            tracing::debug!(query, "query too short, skipping search");
            return SearchOutcome::not_found();
        };

        let outcome = match (index, source) {
            (Some(index), _) => self.search_index(&norm_query, index, hint),
            (None, Some(source)) => self.search_on_demand(&norm_query, source, hint),
            (None, None) => {
                tracing::warn!("no chunk index and no page source, nothing to search");
                SearchOutcome::not_found()
            }
        };

        tracing::debug!(
            method = ?outcome.method,
            hits = outcome.citations.len(),
            confidence = outcome.confidence,
            "search complete"
        );
        outcome
    }

    /// Normalized query, or `None` when the query is too short to search for.
    fn prepare_query(&self, query: &str) -> Option<String> {
        if query.trim().chars().count() < self.config.min_query_len {
            return None;
        }
        let norm = normalize(query);
        (!norm.is_empty()).then_some(norm)
    }

    fn search_index(&self, norm_query: &str, index: &ChunkIndex, hint: &SearchHint) -> SearchOutcome {
        let chunks: Vec<&PageChunk> = index
            .page_chunks
            .iter()
            .filter(|c| hint.allows(c.page))
            .collect();

        let mut exact = self.exact_in_chunks(norm_query, &chunks);
        if !exact.is_empty() {
            if let Some(max) = hint.max_results {
                exact.truncate(max);
            }
            return SearchOutcome::from_citations(exact, SearchMethod::ExactMatch);
        }

        let pages: Vec<(u32, &[TextItem])> = chunks
            .iter()
            .map(|c| (c.page, c.text_items.as_slice()))
            .collect();
        let fuzzy = self.fuzzy_in_pages(norm_query, &pages, hint.cap(self.config.fuzzy_max_results));
        SearchOutcome::from_citations(fuzzy, SearchMethod::FuzzyMatch)
    }

    /// Every exact normalized occurrence in the given chunks, in document order.
    fn exact_in_chunks(&self, norm_query: &str, chunks: &[&PageChunk]) -> Vec<SourceCitation> {
        let mut citations = Vec::new();
        for chunk in chunks {
            let norm = normalize_with_map(&chunk.text);
            let hits = find_all(&norm.text, norm_query);
            tracing::trace!(page = chunk.page, hits = hits.len(), "chunk scan complete");

            for (ns, ne) in hits {
                let Some((start, end)) = norm.source_range(ns, ne) else {
                    continue;
                };
                let items = get_text_items_in_range(&chunk.text_items, start, end);
                citations.push(SourceCitation {
                    id: format!("cite-p{}-c{}", chunk.page, chunk.char_start + start),
                    page: chunk.page,
                    coordinates: BoundingBox::union(items).unwrap_or(BoundingBox::PLACEHOLDER),
                    source_text: char_slice(&chunk.text, start, end).to_string(),
                    context: context_around(&chunk.text, start, end, self.config.context_chars),
                    confidence: 1.0,
                    validated: None,
                    validation_result: None,
                });
            }
        }
        citations
    }

    /// Re-extract a bounded number of pages and search them directly.
    fn search_on_demand(
        &self,
        norm_query: &str,
        source: &dyn PageTextSource,
        hint: &SearchHint,
    ) -> SearchOutcome {
        let page_count = match source.page_count() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "page source unavailable");
                return SearchOutcome::not_found();
            }
        };

        let pages: Vec<u32> = (1..=page_count as u32)
            .filter(|p| hint.allows(*p))
            .take(self.config.on_demand_max_pages)
            .collect();

        let mut laid_out: Vec<(u32, Vec<TextItem>)> = Vec::with_capacity(pages.len());
        let mut exact = Vec::new();
        for page in pages {
            let items = match source.page_items(page) {
                Ok(items) => items,
                Err(e) => {
                    tracing::warn!(page, error = %e, "failed to extract page, skipping");
                    continue;
                }
            };
            let (text, items) = lay_out_page(&items);
            let norm = normalize_with_map(&text);
            exact.extend(self.exact_spanning(norm_query, page, &text, &norm, &items));
            laid_out.push((page, items));
        }

        if !exact.is_empty() {
            exact.truncate(hint.cap(self.config.on_demand_max_results));
            return SearchOutcome::from_citations(exact, SearchMethod::ExactMatch);
        }

        let pages: Vec<(u32, &[TextItem])> = laid_out
            .iter()
            .map(|(page, items)| (*page, items.as_slice()))
            .collect();
        let fuzzy = self.fuzzy_in_pages(norm_query, &pages, hint.cap(self.config.fuzzy_max_results));
        SearchOutcome::from_citations(fuzzy, SearchMethod::FuzzyMatch)
    }

    /// Exact hits on one re-extracted page. Items within the spanning window
    /// (in normalized characters) of either match boundary all count toward
    /// the box.
    fn exact_spanning(
        &self,
        norm_query: &str,
        page: u32,
        text: &str,
        norm: &NormalizedText,
        items: &[TextItem],
    ) -> Vec<SourceCitation> {
        let window = self.config.spanning_window;
        find_all(&norm.text, norm_query)
            .into_iter()
            .filter_map(|(ns, ne)| {
                let (start, end) = norm.source_range(ns, ne)?;
                let (lo, hi) = norm
                    .source_range(ns.saturating_sub(window), (ne + window).min(norm.len()))
                    .unwrap_or((start, end));
                let spanning = get_text_items_in_range(items, lo, hi);
                Some(SourceCitation {
                    id: format!("cite-p{}-o{}", page, start),
                    page,
                    coordinates: BoundingBox::union(spanning).unwrap_or(BoundingBox::PLACEHOLDER),
                    source_text: char_slice(text, start, end).to_string(),
                    context: context_around(text, start, end, self.config.context_chars),
                    confidence: 1.0,
                    validated: None,
                    validation_result: None,
                })
            })
            .collect()
    }

    /// Score windows of consecutive items against the query and keep the
    /// best non-overlapping ones.
    fn fuzzy_in_pages(
        &self,
        norm_query: &str,
        pages: &[(u32, &[TextItem])],
        cap: usize,
    ) -> Vec<SourceCitation> {
        let mut candidates: Vec<FuzzyCandidate> = pages
            .iter()
            .flat_map(|(page, items)| self.fuzzy_candidates(norm_query, *page, items))
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.page.cmp(&b.page))
                .then(a.first.cmp(&b.first))
        });

        let mut chosen: Vec<FuzzyCandidate> = Vec::new();
        for candidate in candidates {
            if chosen.len() >= cap {
                break;
            }
            if chosen.iter().any(|c| c.overlaps(&candidate)) {
                continue;
            }
            chosen.push(candidate);
        }

        chosen
            .into_iter()
            .filter_map(|c| {
                let (_, items) = pages.iter().find(|(page, _)| *page == c.page)?;
                Some(self.fuzzy_citation(&c, items))
            })
            .collect()
    }

    /// Windows start at each item and grow until they reach the query's
    /// normalized length.
    fn fuzzy_candidates(&self, norm_query: &str, page: u32, items: &[TextItem]) -> Vec<FuzzyCandidate> {
        let query_len = norm_query.chars().count();
        let normed: Vec<String> = items.iter().map(|i| normalize(&i.text)).collect();
        let mut out = Vec::new();

        for first in 0..normed.len() {
            if normed[first].is_empty() {
                continue;
            }
            let mut window = String::new();
            let mut window_len = 0usize;
            let mut last = first;
            for (j, n) in normed.iter().enumerate().skip(first) {
                if n.is_empty() {
                    continue;
                }
                if !window.is_empty() {
                    window.push(' ');
                    window_len += 1;
                }
                window.push_str(n);
                window_len += n.chars().count();
                last = j;
                if window_len >= query_len {
                    break;
                }
            }

            let score = similarity(norm_query, &window);
            if score >= self.config.fuzzy_threshold {
                out.push(FuzzyCandidate {
                    page,
                    first,
                    last,
                    score,
                });
            }
        }
        out
    }

    fn fuzzy_citation(&self, candidate: &FuzzyCandidate, items: &[TextItem]) -> SourceCitation {
        let matched = &items[candidate.first..=candidate.last];
        let radius = self.config.fuzzy_context_items;
        let lo = candidate.first.saturating_sub(radius);
        let hi = (candidate.last + 1 + radius).min(items.len());

        let mut context = String::new();
        if lo > 0 {
            context.push_str("...");
        }
        context.push_str(&join_items(&items[lo..hi]));
        if hi < items.len() {
            context.push_str("...");
        }

        SourceCitation {
            id: format!("cite-p{}-i{}", candidate.page, candidate.first),
            page: candidate.page,
            coordinates: BoundingBox::union(matched).unwrap_or(BoundingBox::PLACEHOLDER),
            source_text: join_items(matched),
            context,
            confidence: candidate.score,
            validated: None,
            validation_result: None,
        }
    }
}

fn join_items(items: &[TextItem]) -> String {
    items
        .iter()
        .flat_map(|i| i.text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// `radius` characters either side of `[start, end)`, with "..." marking a cut.
fn context_around(text: &str, start: usize, end: usize, radius: usize) -> String {
    let len = text.chars().count();
    let lo = start.saturating_sub(radius);
    let hi = end.saturating_add(radius).min(len);

    let mut out = String::new();
    if lo > 0 {
        out.push_str("...");
    }
    out.push_str(char_slice(text, lo, hi));
    if hi < len {
        out.push_str("...");
    }
    out
}
