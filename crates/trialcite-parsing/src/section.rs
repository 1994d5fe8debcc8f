use serde::{Deserialize, Serialize};
use trialcite_core::PageChunk;
use trialcite_core::layout::item_spans;
use trialcite_core::matching::char_slice;

use crate::catalogue::{SectionType, rules};

/// Separator placed between pages before scanning, so no heading pattern
/// can claim a match across a page break.
const PAGE_SEPARATOR: &str = "\n\n";

/// Same-type headings closer than this (in characters) are one heading.
const DUPLICATE_WINDOW: usize = 100;

const BASE_CONFIDENCE: f64 = 0.7;
const SIGNAL_BONUS: f64 = 0.1;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// A classified span `[char_start, char_end)` on the document's global character axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedSection {
    pub name: String,
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub page_start: u32,
    pub page_end: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_text: Option<String>,
}

impl DetectedSection {
    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.char_start && offset < self.char_end
    }
}

#[derive(Debug, Clone)]
struct HeadingMatch {
    section_type: SectionType,
    char_start: usize,
    char_end: usize,
    page: u32,
    heading: String,
}

/// One text line of the scanned document.
struct Line {
    /// Byte offset of the line in [`ScanText::text`].
    byte_start: usize,
    /// Global character offset of the line's first character.
    char_start: usize,
    page: u32,
}

/// The document rebuilt line by line: one line per text item, pages joined
/// with [`PAGE_SEPARATOR`]. Heading patterns are anchored to these lines.
struct ScanText {
    text: String,
    lines: Vec<Line>,
}

impl ScanText {
    fn new(chunks: &[PageChunk]) -> Self {
        let mut text = String::new();
        let mut lines = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i > 0 {
                text.push_str(PAGE_SEPARATOR);
            }
            let spans = if chunk.text_items.is_empty() {
                vec![(0, chunk.len())]
            } else {
                item_spans(&chunk.text_items)
            };
            let mut first = true;
            for (start, end) in spans {
                let line = char_slice(&chunk.text, start, end);
                if line.is_empty() {
                    continue;
                }
                if !first {
                    text.push('\n');
                }
                first = false;
                lines.push(Line {
                    byte_start: text.len(),
                    char_start: chunk.char_start + start,
                    page: chunk.page,
                });
                text.push_str(line);
            }
        }
        Self { text, lines }
    }

    /// Global character offset and page of a byte offset into the scan text.
    fn locate(&self, byte: usize) -> Option<(usize, u32)> {
        let idx = self
            .lines
            .partition_point(|l| l.byte_start <= byte)
            .checked_sub(1)?;
        let line = &self.lines[idx];
        let prefix = self.text.get(line.byte_start..byte)?;
        Some((line.char_start + prefix.chars().count(), line.page))
    }
}

/// Page of the chunk containing `offset`; separator offsets belong to the
/// page before them.
fn page_at(chunks: &[PageChunk], offset: usize) -> u32 {
    let idx = chunks
        .partition_point(|c| c.char_start <= offset)
        .saturating_sub(1);
    chunks.get(idx).map(|c| c.page).unwrap_or(1)
}

/// Detect the sections of a chunked document.
///
/// Every heading pattern is scanned over the whole text, one text item per
/// line, and only a line consisting of the heading alone counts. Prose that
/// merely starts with a catalogue word is never a heading. Matches are ordered
/// by position; a match that starts inside an earlier, higher-priority heading
/// is dropped, as is one following a same-type match within
/// [`DUPLICATE_WINDOW`] characters. Each surviving heading opens a section that
/// runs to the next heading (or document end).
///
/// If nothing is found, three synthetic sections covering the whole document
/// are returned instead. An empty document has no sections.
pub fn detect_sections(chunks: &[PageChunk]) -> Vec<DetectedSection> {
    let Some(first) = chunks.first() else {
        return Vec::new();
    };
    let doc_end = chunks.last().map(|c| c.char_end).unwrap_or(0);
    let scan = ScanText::new(chunks);

    let mut matches: Vec<HeadingMatch> = Vec::new();
    for rule in rules() {
        for re in &rule.patterns {
            for caps in re.captures_iter(&scan.text) {
                let Some(h) = caps.name("h") else {
                    continue;
                };
                let Some((char_start, page)) = scan.locate(h.start()) else {
                    continue;
                };
                if rule.section_type.first_page_only() && page != first.page {
                    continue;
                }
                matches.push(HeadingMatch {
                    section_type: rule.section_type,
                    char_start,
                    char_end: char_start + h.as_str().chars().count(),
                    page,
                    heading: h.as_str().trim().to_string(),
                });
            }
        }
    }
    matches.sort_by_key(|m| (m.char_start, m.section_type));

    let mut kept: Vec<HeadingMatch> = Vec::new();
    for m in matches {
        if kept.iter().any(|k| m.char_start < k.char_end) {
            continue;
        }
        let near_duplicate = kept
            .iter()
            .rev()
            .find(|k| k.section_type == m.section_type)
            .is_some_and(|k| m.char_start - k.char_start <= DUPLICATE_WINDOW);
        if near_duplicate {
            continue;
        }
        kept.push(m);
    }

    if kept.is_empty() {
        tracing::warn!(pages = chunks.len(), "no section headings found, using positional fallback");
        return fallback_sections(chunks);
    }

    let total_pages = chunks.len() as f64;
    let mut canonical_rank = 0usize;
    let sections: Vec<DetectedSection> = kept
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let char_end = kept.get(i + 1).map_or(doc_end, |next| next.char_start);

            let mut confidence = BASE_CONFIDENCE;
            if m.heading.contains(':') || m.heading.contains('.') {
                confidence += SIGNAL_BONUS;
            }
            // Rank among canonical types only: a title or appendix heading
            // does not shift the expected position of the sections around it.
            if let Some(expected) = m.section_type.canonical_position() {
                if expected == canonical_rank {
                    confidence += SIGNAL_BONUS;
                }
                canonical_rank += 1;
            }
            let relative = m.page.saturating_sub(1) as f64 / total_pages;
            if m.section_type.rule().in_band(relative) {
                confidence += SIGNAL_BONUS;
            }

            DetectedSection {
                name: m.section_type.name().to_string(),
                section_type: m.section_type,
                page_start: m.page,
                page_end: page_at(chunks, char_end.saturating_sub(1).max(m.char_start)),
                char_start: m.char_start,
                char_end,
                confidence: confidence.min(1.0),
                heading_text: Some(m.heading.clone()),
            }
        })
        .collect();

    tracing::debug!(sections = sections.len(), "sections detected");
    sections
}

/// Introduction over the first 20% of pages, methods and results over the
/// next 60%, discussion over the rest.
fn fallback_sections(chunks: &[PageChunk]) -> Vec<DetectedSection> {
    let n = chunks.len();
    let doc_end = chunks.last().map(|c| c.char_end).unwrap_or(0);
    let first_split = ((n as f64 * 0.2).round() as usize).clamp(1, n);
    let second_split = ((n as f64 * 0.8).round() as usize).clamp(first_split, n);

    let boundary = |page_idx: usize| chunks.get(page_idx).map_or(doc_end, |c| c.char_start);
    let spans = [
        ("Introduction", SectionType::Introduction, 0, first_split),
        ("Methods and Results", SectionType::Methods, first_split, second_split),
        ("Discussion", SectionType::Discussion, second_split, n),
    ];

    spans
        .into_iter()
        .map(|(name, section_type, from, to)| {
            let char_start = boundary(from);
            let char_end = boundary(to);
            let page_start = chunks.get(from).map_or(chunks[n - 1].page, |c| c.page);
            let page_end = if to > from {
                chunks[to - 1].page
            } else {
                page_start
            };
            DetectedSection {
                name: name.to_string(),
                section_type,
                page_start,
                page_end,
                char_start,
                char_end,
                confidence: FALLBACK_CONFIDENCE,
                heading_text: None,
            }
        })
        .collect()
}

/// The section containing a global character offset.
pub fn section_at(sections: &[DetectedSection], offset: usize) -> Option<&DetectedSection> {
    sections.iter().find(|s| s.contains(offset))
}

/// Every page covered by sections of the given type, ascending, for use as
/// a search hint.
pub fn pages_for(sections: &[DetectedSection], section_type: SectionType) -> Vec<u32> {
    let mut pages: Vec<u32> = sections
        .iter()
        .filter(|s| s.section_type == section_type)
        .flat_map(|s| s.page_start..=s.page_end)
        .collect();
    pages.sort_unstable();
    pages.dedup();
    pages
}
