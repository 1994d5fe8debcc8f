//! Document-structure detection for chunked trial publications.
//!
//! Sections are found by scanning the chunk texts for heading patterns from a
//! fixed catalogue and scored with position heuristics. The result is used to
//! turn "look in the methods" into a page hint for citation search.

pub mod catalogue;
pub mod section;

pub use catalogue::{SectionRule, SectionType, rules};
pub use section::{DetectedSection, detect_sections, pages_for, section_at};
// Re-export the chunk type sections are computed from
pub use trialcite_core::PageChunk;
