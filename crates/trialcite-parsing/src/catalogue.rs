use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of section types, in priority order.
///
/// When two headings start at the same place, or one heading sits inside
/// another, the type listed first wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Title,
    Abstract,
    Introduction,
    Methods,
    Results,
    Discussion,
    Conclusion,
    References,
    Appendix,
}

impl SectionType {
    pub const ALL: [SectionType; 9] = [
        SectionType::Title,
        SectionType::Abstract,
        SectionType::Introduction,
        SectionType::Methods,
        SectionType::Results,
        SectionType::Discussion,
        SectionType::Conclusion,
        SectionType::References,
        SectionType::Appendix,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::Abstract => "Abstract",
            Self::Introduction => "Introduction",
            Self::Methods => "Methods",
            Self::Results => "Results",
            Self::Discussion => "Discussion",
            Self::Conclusion => "Conclusion",
            Self::References => "References",
            Self::Appendix => "Appendix",
        }
    }

    /// Parse a lowercase type name as used on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Index in the standard paper ordering. Title and appendix have none.
    pub fn canonical_position(&self) -> Option<usize> {
        match self {
            Self::Abstract => Some(0),
            Self::Introduction => Some(1),
            Self::Methods => Some(2),
            Self::Results => Some(3),
            Self::Discussion => Some(4),
            Self::Conclusion => Some(5),
            Self::References => Some(6),
            Self::Title | Self::Appendix => None,
        }
    }

    /// Headings of this type are only accepted on the first page.
    pub fn first_page_only(&self) -> bool {
        matches!(self, Self::Title)
    }

    pub fn rule(&self) -> &'static SectionRule {
        // RULES is built from ALL, so every type has an entry at its own index
        &rules()[*self as usize]
    }
}

/// Heading patterns and expected location for one section type.
#[derive(Debug)]
pub struct SectionRule {
    pub section_type: SectionType,
    /// Each pattern captures the heading itself in group `h`.
    pub patterns: Vec<Regex>,
    /// Expected relative page position `[lo, hi]`, as a fraction of the page count.
    pub band: (f64, f64),
}

impl SectionRule {
    pub fn in_band(&self, relative_position: f64) -> bool {
        relative_position >= self.band.0 && relative_position <= self.band.1
    }
}

/// Build a heading matcher for the given alternatives.
///
/// A heading must fill a whole line: an optional section number ("2.", "II"),
/// one of the alternatives, then an optional colon or period. Alternatives are
/// written in Title Case or UPPER CASE and matching is case-sensitive.
fn heading(alternatives: &str) -> Regex {
    Regex::new(&format!(
        r"(?m)^(?P<h>(?:(?:\d{{1,2}}(?:\.\d{{1,2}})?|[IVX]{{1,4}})\.?[ ]+)?(?:{alternatives})[:.]?)$"
    ))
    .unwrap()
}

static RULES: Lazy<Vec<SectionRule>> = Lazy::new(|| {
    SectionType::ALL
        .into_iter()
        .map(|section_type| {
            let (patterns, band) = match section_type {
                SectionType::Title => (
                    vec![
                        heading(r"Original (?:Article|Research|Investigation)|Research Article|Clinical Trial Report"),
                        heading(r"ORIGINAL (?:ARTICLE|RESEARCH|INVESTIGATION)|RESEARCH ARTICLE|TITLE"),
                    ],
                    (0.0, 0.1),
                ),
                SectionType::Abstract => (
                    vec![heading(r"Abstract"), heading(r"ABSTRACT|SUMMARY")],
                    (0.0, 0.1),
                ),
                SectionType::Introduction => (
                    vec![
                        heading(r"Introduction|Background"),
                        heading(r"INTRODUCTION|BACKGROUND"),
                    ],
                    (0.0, 0.3),
                ),
                SectionType::Methods => (
                    vec![
                        heading(r"(?:Materials|Patients|Participants|Subjects) and Methods|Methods|Methodology|Study Design"),
                        heading(r"(?:MATERIALS|PATIENTS|PARTICIPANTS|SUBJECTS) AND METHODS|METHODS|METHODOLOGY|STUDY DESIGN"),
                    ],
                    (0.2, 0.5),
                ),
                SectionType::Results => (
                    vec![
                        heading(r"Results(?: and Discussion)?|Findings"),
                        heading(r"RESULTS(?: AND DISCUSSION)?|FINDINGS"),
                    ],
                    (0.4, 0.7),
                ),
                SectionType::Discussion => (
                    vec![heading(r"Discussion"), heading(r"DISCUSSION")],
                    (0.6, 0.9),
                ),
                SectionType::Conclusion => (
                    vec![
                        heading(r"Conclusions?|Interpretation"),
                        heading(r"CONCLUSIONS?|INTERPRETATION"),
                    ],
                    (0.7, 1.0),
                ),
                SectionType::References => (
                    vec![
                        heading(r"References|Bibliography|Literature Cited"),
                        heading(r"REFERENCES|BIBLIOGRAPHY|LITERATURE CITED"),
                    ],
                    (0.8, 1.0),
                ),
                SectionType::Appendix => (
                    vec![
                        heading(r"Appendix|Supplementary (?:Material|Appendix)"),
                        heading(r"APPENDIX|SUPPLEMENTARY (?:MATERIAL|APPENDIX)"),
                    ],
                    (0.85, 1.0),
                ),
            };
            SectionRule {
                section_type,
                patterns,
                band,
            }
        })
        .collect()
});

/// The full catalogue, in priority order.
pub fn rules() -> &'static [SectionRule] {
    &RULES
}
