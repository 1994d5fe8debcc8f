//! Mapping character ranges back to text items and page boxes.

use serde::{Deserialize, Serialize};

use crate::TextItem;

/// Axis-aligned box in the extractor's page coordinate space.
///
/// Origin and axis direction are whatever the extractor used; nothing here
/// reinterprets them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Box reported when a match cannot be tied to any text item.
    pub const PLACEHOLDER: BoundingBox = BoundingBox {
        x: 0.0,
        y: 0.0,
        width: 100.0,
        height: 20.0,
    };

    pub fn of(item: &TextItem) -> Self {
        Self {
            x: item.x,
            y: item.y,
            width: item.width,
            height: item.height,
        }
    }

    /// Smallest box covering every item, or `None` for no items.
    pub fn union<'a>(items: impl IntoIterator<Item = &'a TextItem>) -> Option<Self> {
        let mut iter = items.into_iter();
        let first = iter.next()?;
        let (mut min_x, mut min_y) = (first.x, first.y);
        let (mut max_x, mut max_y) = (first.x + first.width, first.y + first.height);
        for item in iter {
            min_x = min_x.min(item.x);
            min_y = min_y.min(item.y);
            max_x = max_x.max(item.x + item.width);
            max_y = max_y.max(item.y + item.height);
        }
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }
}

/// Page-relative `[start, end)` character span of every item.
///
/// Uses the offsets stored on the items when all of them carry one. Otherwise
/// (indexes written before offsets were stored) spans are reconstructed by
/// walking the items in order, each followed by one separator character.
pub fn item_spans(items: &[TextItem]) -> Vec<(usize, usize)> {
    let stored: Option<Vec<(usize, usize)>> = items
        .iter()
        .map(|i| Some((i.char_start?, i.char_end?)))
        .collect();
    if let Some(spans) = stored {
        return spans;
    }

    tracing::trace!(items = items.len(), "reconstructing item offsets");
    let mut offset = 0usize;
    items
        .iter()
        .map(|item| {
            let start = offset;
            let end = start + item.text.chars().count();
            offset = end + 1;
            (start, end)
        })
        .collect()
}

/// Items whose character span overlaps `[start, end)`.
pub fn get_text_items_in_range(items: &[TextItem], start: usize, end: usize) -> Vec<&TextItem> {
    get_text_items_near_range(items, start, end, 0)
}

/// Items whose character span overlaps `[start, end)` widened by `window`
/// characters on each side.
pub fn get_text_items_near_range(
    items: &[TextItem],
    start: usize,
    end: usize,
    window: usize,
) -> Vec<&TextItem> {
    let lo = start.saturating_sub(window);
    let hi = end.saturating_add(window);
    items
        .iter()
        .zip(item_spans(items))
        .filter(|(_, (s, e))| s < e && *s < hi && *e > lo)
        .map(|(item, _)| item)
        .collect()
}
