use std::path::Path;

use thiserror::Error;

use crate::TextItem;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to open PDF: {0}")]
    OpenError(String),
    #[error("failed to extract text: {0}")]
    ExtractionError(String),
    #[error("page {page} out of range (document has {count} pages)")]
    PageOutOfRange { page: u32, count: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for PDF text-coordinate extraction backends.
///
/// Implementors produce one `Vec<TextItem>` per page, in reading order, with
/// boxes in the backend's page coordinate space. Chunking lives in
/// [`crate::chunk`].
pub trait PdfBackend: Send + Sync {
    /// Extract the text items of every page of a PDF file.
    fn extract_pages(&self, path: &Path) -> Result<Vec<Vec<TextItem>>, BackendError>;
}

/// Page-at-a-time text source used when no chunk index is available.
pub trait PageTextSource: Send + Sync {
    fn page_count(&self) -> Result<usize, BackendError>;

    /// Text items of a 1-based page.
    fn page_items(&self, page: u32) -> Result<Vec<TextItem>, BackendError>;
}

/// Already-extracted pages held in memory.
impl PageTextSource for Vec<Vec<TextItem>> {
    fn page_count(&self) -> Result<usize, BackendError> {
        Ok(self.len())
    }

    fn page_items(&self, page: u32) -> Result<Vec<TextItem>, BackendError> {
        let index = (page as usize).checked_sub(1);
        index
            .and_then(|i| self.get(i))
            .cloned()
            .ok_or(BackendError::PageOutOfRange {
                page,
                count: self.len(),
            })
    }
}
