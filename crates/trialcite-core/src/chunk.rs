//! Document chunking: one [`PageChunk`] per page on a shared character axis.
//!
//! Each page's item texts are joined with single spaces, whitespace runs are
//! collapsed and the result trimmed. Pages are laid out back to back with one
//! reserved separator character between them.

use crate::{PageChunk, TextItem};

/// Chunk every page of a document.
pub fn chunk(pages: &[Vec<TextItem>]) -> Vec<PageChunk> {
    chunk_with_progress(pages, |_, _| {})
}

/// Chunk every page, invoking `on_page(done, total)` after each page.
pub fn chunk_with_progress(
    pages: &[Vec<TextItem>],
    mut on_page: impl FnMut(usize, usize),
) -> Vec<PageChunk> {
    let total = pages.len();
    let (chunks, _) = pages.iter().enumerate().fold(
        (Vec::with_capacity(total), 0usize),
        |(mut chunks, offset), (i, items)| {
            let (text, text_items) = lay_out_page(items);
            let len = text.chars().count();
            chunks.push(PageChunk {
                page: (i + 1) as u32,
                text,
                char_start: offset,
                char_end: offset + len,
                text_items,
            });
            on_page(i + 1, total);
            // +1 reserves the page-break separator
            (chunks, offset + len + 1)
        },
    );

    tracing::debug!(pages = total, "document chunked");
    chunks
}

/// Build one page's text and return its items with page-relative offsets.
///
/// Whitespace-only items get a zero-width span at the current position so they
/// never overlap a match.
pub(crate) fn lay_out_page(items: &[TextItem]) -> (String, Vec<TextItem>) {
    let mut text = String::new();
    let mut len = 0usize;
    let mut laid_out = Vec::with_capacity(items.len());

    for item in items {
        let mut start = None;
        for word in item.text.split_whitespace() {
            if len > 0 {
                text.push(' ');
                len += 1;
            }
            start.get_or_insert(len);
            text.push_str(word);
            len += word.chars().count();
        }

        let mut item = item.clone();
        item.char_start = Some(start.unwrap_or(len));
        item.char_end = Some(len);
        laid_out.push(item);
    }

    (text, laid_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> TextItem {
        TextItem::new(text, 0.0, 0.0, 10.0, 10.0)
    }

    fn sample_pages() -> Vec<Vec<TextItem>> {
        vec![
            vec![item("Randomized  trial"), item(" of drug X ")],
            vec![],
            vec![item("Results:"), item("\t"), item("45% responded")],
        ]
    }

    #[test]
    fn page_text_is_joined_and_collapsed() {
        let chunks = chunk(&sample_pages());
        assert_eq!(chunks[0].text, "Randomized trial of drug X");
        assert_eq!(chunks[2].text, "Results: 45% responded");
    }

    #[test]
    fn lengths_match_offsets() {
        for c in chunk(&sample_pages()) {
            assert_eq!(c.char_end - c.char_start, c.text.chars().count());
        }
    }

    #[test]
    fn chunks_are_increasing_with_page_gap() {
        let chunks = chunk(&sample_pages());
        assert_eq!(chunks[0].char_start, 0);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].char_start, pair[0].char_end + 1);
            assert!(pair[1].char_start > pair[0].char_start);
        }
    }

    #[test]
    fn empty_page_yields_empty_chunk() {
        let chunks = chunk(&sample_pages());
        assert_eq!(chunks[1].page, 2);
        assert!(chunks[1].text.is_empty());
        assert_eq!(chunks[1].char_start, chunks[1].char_end);
    }

    #[test]
    fn chunking_is_idempotent() {
        let pages = sample_pages();
        assert_eq!(chunk(&pages), chunk(&pages));
    }

    #[test]
    fn items_receive_page_relative_offsets() {
        let chunks = chunk(&sample_pages());
        let items = &chunks[0].text_items;
        assert_eq!((items[0].char_start, items[0].char_end), (Some(0), Some(16)));
        assert_eq!((items[1].char_start, items[1].char_end), (Some(17), Some(26)));

        let tab = &chunks[2].text_items[1];
        assert_eq!(tab.char_start, tab.char_end);
    }

    #[test]
    fn multibyte_text_counts_characters() {
        let chunks = chunk(&[vec![item("β-blocker µg")], vec![item("next")]]);
        assert_eq!(chunks[0].char_end, 12);
        assert_eq!(chunks[1].char_start, 13);
    }

    #[test]
    fn progress_reports_every_page() {
        let mut seen = Vec::new();
        chunk_with_progress(&sample_pages(), |done, total| seen.push((done, total)));
        assert_eq!(seen, vec![(1, 3), (2, 3), (3, 3)]);
    }
}
