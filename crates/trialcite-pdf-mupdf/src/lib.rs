use std::path::{Path, PathBuf};

use mupdf::{Document, Page, TextPageFlags};

use trialcite_core::{BackendError, PageTextSource, PdfBackend, TextItem};

/// MuPDF-based text-coordinate extractor.
///
/// This crate is the sole AGPL island: it isolates the mupdf dependency so
/// that nothing else in the workspace transitively depends on it.
///
/// Each text line becomes one [`TextItem`] whose box is the line's bounds in
/// MuPDF page space (origin top-left, y growing downwards). Running headers
/// and footers can optionally be dropped by page-height fraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct MupdfBackend {
    /// Fraction of page height from the bottom to exclude as footer.
    footer_exclusion_ratio: Option<f32>,
    /// Fraction of page height from the top to exclude as header.
    header_exclusion_ratio: Option<f32>,
}

impl MupdfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the footer exclusion ratio. Pass `0.0` to disable.
    pub fn with_footer_exclusion(mut self, ratio: f32) -> Self {
        self.footer_exclusion_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    /// Set the header exclusion ratio. Pass `0.0` to disable.
    pub fn with_header_exclusion(mut self, ratio: f32) -> Self {
        self.header_exclusion_ratio = (ratio > 0.0).then_some(ratio);
        self
    }

    fn open(path: &Path) -> Result<Document, BackendError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| BackendError::OpenError("invalid path encoding".into()))?;
        Document::open(path_str).map_err(|e| BackendError::OpenError(e.to_string()))
    }

    fn page_items(&self, page: &Page) -> Result<Vec<TextItem>, BackendError> {
        let text_page = page
            .to_text_page(TextPageFlags::empty())
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;

        let page_bounds = page
            .bounds()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        let page_height = page_bounds.y1 - page_bounds.y0;
        let header_threshold = self
            .header_exclusion_ratio
            .map(|r| page_bounds.y0 + page_height * r);
        let footer_threshold = self
            .footer_exclusion_ratio
            .map(|r| page_bounds.y1 - page_height * r);

        let mut items = Vec::new();
        for block in text_page.blocks() {
            let block_bounds = block.bounds();
            if header_threshold.is_some_and(|t| block_bounds.y1 <= t) {
                continue;
            }
            if footer_threshold.is_some_and(|t| block_bounds.y0 >= t) {
                continue;
            }

            for line in block.lines() {
                let text: String = line
                    .chars()
                    .map(|c| c.char().unwrap_or('\u{FFFD}'))
                    .collect();
                if text.trim().is_empty() {
                    continue;
                }
                let r = line.bounds();
                let height = (r.y1 - r.y0) as f64;
                items.push(TextItem {
                    text,
                    x: r.x0 as f64,
                    y: r.y0 as f64,
                    width: (r.x1 - r.x0) as f64,
                    height,
                    font_name: String::new(),
                    font_size: height,
                    char_start: None,
                    char_end: None,
                });
            }
        }
        Ok(items)
    }
}

impl PdfBackend for MupdfBackend {
    fn extract_pages(&self, path: &Path) -> Result<Vec<Vec<TextItem>>, BackendError> {
        let document = Self::open(path)?;
        let mut pages = Vec::new();
        for page_result in document
            .pages()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?
        {
            let page = page_result.map_err(|e| BackendError::ExtractionError(e.to_string()))?;
            let items = self.page_items(&page)?;
            tracing::trace!(page = pages.len() + 1, items = items.len(), "page extracted");
            pages.push(items);
        }
        tracing::debug!(path = %path.display(), pages = pages.len(), "pdf extracted");
        Ok(pages)
    }
}

/// Page-at-a-time access to a PDF for searches without a chunk index.
///
/// The document is reopened per call; the on-demand search path reads only a
/// handful of pages.
#[derive(Debug, Clone)]
pub struct MupdfPageSource {
    path: PathBuf,
    backend: MupdfBackend,
}

impl MupdfPageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            backend: MupdfBackend::new(),
        }
    }

    pub fn with_backend(mut self, backend: MupdfBackend) -> Self {
        self.backend = backend;
        self
    }
}

impl PageTextSource for MupdfPageSource {
    fn page_count(&self) -> Result<usize, BackendError> {
        let document = MupdfBackend::open(&self.path)?;
        let count = document
            .page_count()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        Ok(count.max(0) as usize)
    }

    fn page_items(&self, page: u32) -> Result<Vec<TextItem>, BackendError> {
        let document = MupdfBackend::open(&self.path)?;
        let count = document
            .page_count()
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?
            .max(0) as usize;
        if page == 0 || page as usize > count {
            return Err(BackendError::PageOutOfRange { page, count });
        }
        let loaded = document
            .load_page(page as i32 - 1)
            .map_err(|e| BackendError::ExtractionError(e.to_string()))?;
        self.backend.page_items(&loaded)
    }
}
