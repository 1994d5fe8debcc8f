use std::io::Write;

use owo_colors::OwoColorize;
use trialcite_core::{
    ChunkIndex, RevalidationRecommendation, RevalidationResult, SearchMethod, SearchOutcome,
    SourceCitation,
};
use trialcite_parsing::DetectedSection;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Shorten to `max` characters, marking the cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

pub fn print_index_summary(
    w: &mut dyn Write,
    index: &ChunkIndex,
    path: &std::path::Path,
    color: ColorMode,
) -> std::io::Result<()> {
    let empty = index.page_chunks.iter().filter(|c| c.is_empty()).count();
    let items: usize = index.page_chunks.iter().map(|c| c.text_items.len()).sum();
    writeln!(
        w,
        "Indexed {} pages ({} characters, {} text items)",
        index.total_pages,
        index.total_chars(),
        items
    )?;
    if empty > 0 {
        let msg = format!("{} page(s) had no extractable text", empty);
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    writeln!(w, "Saved to {}", path.display())?;
    Ok(())
}

pub fn print_sections(
    w: &mut dyn Write,
    sections: &[DetectedSection],
    color: ColorMode,
) -> std::io::Result<()> {
    if sections.is_empty() {
        writeln!(w, "No sections (empty document)")?;
        return Ok(());
    }
    for s in sections {
        let pages = if s.page_start == s.page_end {
            format!("p. {}", s.page_start)
        } else {
            format!("pp. {}-{}", s.page_start, s.page_end)
        };
        let heading = s
            .heading_text
            .as_deref()
            .map(|h| format!(" \"{}\"", truncate(h, 40)))
            .unwrap_or_default();
        let confidence = format!("{:.0}%", s.confidence * 100.0);
        if color.enabled() {
            writeln!(
                w,
                "{:<20} {:<10} {:>5}{}",
                s.name.bold(),
                pages,
                confidence.dimmed(),
                heading
            )?;
        } else {
            writeln!(w, "{:<20} {:<10} {:>5}{}", s.name, pages, confidence, heading)?;
        }
    }
    Ok(())
}

fn print_citation(
    w: &mut dyn Write,
    n: usize,
    c: &SourceCitation,
    color: ColorMode,
) -> std::io::Result<()> {
    let b = &c.coordinates;
    writeln!(
        w,
        "[{}] page {} at ({:.1}, {:.1}) {:.1}x{:.1}  confidence {:.2}",
        n, c.page, b.x, b.y, b.width, b.height, c.confidence
    )?;
    if color.enabled() {
        writeln!(w, "    {}", truncate(&c.source_text, 100).green())?;
        writeln!(w, "    {}", truncate(&c.context, 240).dimmed())?;
    } else {
        writeln!(w, "    {}", truncate(&c.source_text, 100))?;
        writeln!(w, "    {}", truncate(&c.context, 240))?;
    }
    if let Some(ref v) = c.validation_result {
        writeln!(
            w,
            "    validation: {} ({:?}, {:.0}/100) {}",
            if v.is_valid { "valid" } else { "invalid" },
            v.match_type,
            v.confidence,
            v.reasoning
        )?;
        for issue in &v.issues {
            writeln!(w, "    - {}", issue)?;
        }
    }
    Ok(())
}

pub fn print_search_outcome(
    w: &mut dyn Write,
    query: &str,
    outcome: &SearchOutcome,
    color: ColorMode,
) -> std::io::Result<()> {
    let label = match outcome.method {
        SearchMethod::ExactMatch => "EXACT MATCH",
        SearchMethod::FuzzyMatch => "FUZZY MATCH",
        SearchMethod::NotFound => "NOT FOUND",
    };
    let header = format!("\"{}\" -> {}", truncate(query, 60), label);
    if color.enabled() {
        let styled = match outcome.method {
            SearchMethod::ExactMatch => header.green().to_string(),
            SearchMethod::FuzzyMatch => header.yellow().to_string(),
            SearchMethod::NotFound => header.red().to_string(),
        };
        writeln!(w, "{}", styled)?;
    } else {
        writeln!(w, "{}", header)?;
    }

    for (i, c) in outcome.citations.iter().enumerate() {
        print_citation(w, i + 1, c, color)?;
    }
    Ok(())
}

pub fn print_revalidation_summary(
    w: &mut dyn Write,
    result: &RevalidationResult,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    if result.cancelled {
        let msg = "Revalidation cancelled; results cover the extractions processed so far.";
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    writeln!(w, "Extractions with citations: {}", result.total)?;
    if color.enabled() {
        writeln!(w, "  {} {}", "Updated:".green(), result.updated)?;
        writeln!(w, "  {} {}", "Unchanged:".dimmed(), result.unchanged)?;
        if result.errors > 0 {
            writeln!(w, "  {} {}", "Errors:".red(), result.errors)?;
        }
    } else {
        writeln!(w, "  Updated: {}", result.updated)?;
        writeln!(w, "  Unchanged: {}", result.unchanged)?;
        if result.errors > 0 {
            writeln!(w, "  Errors: {}", result.errors)?;
        }
    }
    if result.updated > 0 {
        writeln!(
            w,
            "  Average confidence change: {:+.1} points",
            result.avg_confidence_change * 100.0
        )?;
    }
    Ok(())
}

pub fn print_recommendation(
    w: &mut dyn Write,
    rec: &RevalidationRecommendation,
    color: ColorMode,
) -> std::io::Result<()> {
    if !rec.should_revalidate {
        if color.enabled() {
            writeln!(w, "{}", "No revalidation needed.".green())?;
        } else {
            writeln!(w, "No revalidation needed.")?;
        }
        return Ok(());
    }

    if color.enabled() {
        writeln!(w, "{}", "Revalidation recommended:".yellow().bold())?;
    } else {
        writeln!(w, "Revalidation recommended:")?;
    }
    for reason in &rec.reasons {
        writeln!(w, "  - {}", reason)?;
    }
    writeln!(w)?;
    for e in &rec.extractions {
        writeln!(w, "  {} ({}): {}", e.field_name, e.id, truncate(&e.value, 60))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialcite_core::{BoundingBox, Extraction};

    fn render(f: impl FnOnce(&mut Vec<u8>) -> std::io::Result<()>) -> String {
        let mut buf = Vec::new();
        f(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("héllo", 3), "hél...");
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn not_found_without_color() {
        let out = render(|w| {
            print_search_outcome(w, "missing value", &SearchOutcome::not_found(), ColorMode(false))
        });
        assert_eq!(out, "\"missing value\" -> NOT FOUND\n");
    }

    #[test]
    fn citation_lines_include_page_and_box() {
        let outcome = SearchOutcome {
            citations: vec![SourceCitation {
                id: "cite-p2-c10".into(),
                page: 2,
                coordinates: BoundingBox::PLACEHOLDER,
                source_text: "120 patients".into(),
                context: "...a total of 120 patients...".into(),
                confidence: 1.0,
                validated: None,
                validation_result: None,
            }],
            method: SearchMethod::ExactMatch,
            confidence: 1.0,
        };
        let out = render(|w| print_search_outcome(w, "120 patients", &outcome, ColorMode(false)));
        assert!(out.contains("[1] page 2 at (0.0, 0.0) 100.0x20.0  confidence 1.00"));
        assert!(out.contains("...a total of 120 patients..."));
    }

    #[test]
    fn recommendation_lists_extractions() {
        let rec = RevalidationRecommendation {
            should_revalidate: true,
            reasons: vec!["1 extraction(s) have an unvalidated primary citation".into()],
            extractions: vec![Extraction {
                id: "e1".into(),
                field_name: "sample_size".into(),
                value: "120".into(),
                citations: Vec::new(),
            }],
        };
        let out = render(|w| print_recommendation(w, &rec, ColorMode(false)));
        assert!(out.starts_with("Revalidation recommended:\n"));
        assert!(out.contains("sample_size (e1): 120"));
    }
}
