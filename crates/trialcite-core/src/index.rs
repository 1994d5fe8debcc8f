//! Persisted chunk index, written once at ingest and reused for the document's lifetime.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CoreError, PageChunk, TextItem, chunk};

/// Bump when the on-disk layout or chunking rules change.
pub const INDEX_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkIndex {
    pub version: u32,
    pub processed_at: DateTime<Utc>,
    pub total_pages: usize,
    /// SHA-256 (hex) of the source PDF bytes the index was built from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_sha256: Option<String>,
    pub page_chunks: Vec<PageChunk>,
}

impl ChunkIndex {
    /// Chunk `pages` and wrap the result in a fresh index.
    pub fn build(pages: &[Vec<TextItem>], source_sha256: Option<String>) -> Self {
        Self::from_chunks(chunk::chunk(pages), source_sha256)
    }

    pub fn from_chunks(page_chunks: Vec<PageChunk>, source_sha256: Option<String>) -> Self {
        Self {
            version: INDEX_VERSION,
            processed_at: Utc::now(),
            total_pages: page_chunks.len(),
            source_sha256,
            page_chunks,
        }
    }

    /// Whether this index was built from the source with the given hash.
    ///
    /// Indexes without a recorded hash are never considered fresh.
    pub fn is_fresh_for(&self, sha256: &str) -> bool {
        self.source_sha256
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(sha256))
    }

    /// The chunk whose span contains the global offset, if any.
    ///
    /// Offsets falling on a page-break separator belong to no chunk.
    pub fn chunk_at(&self, offset: usize) -> Option<&PageChunk> {
        let idx = self
            .page_chunks
            .partition_point(|c| c.char_start <= offset)
            .checked_sub(1)?;
        let c = &self.page_chunks[idx];
        (offset < c.char_end).then_some(c)
    }

    /// End of the global character axis.
    pub fn total_chars(&self) -> usize {
        self.page_chunks.last().map(|c| c.char_end).unwrap_or(0)
    }

    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), pages = self.total_pages, "saved chunk index");
        Ok(())
    }

    /// Load an index from disk.
    ///
    /// Returns `None` when the file is missing, unparseable, or written by a
    /// different index version. Callers fall back to on-demand extraction.
    pub fn load(path: &Path) -> Option<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no chunk index on disk");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read chunk index");
                return None;
            }
        };

        let index: ChunkIndex = match serde_json::from_str(&content) {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt chunk index, ignoring");
                return None;
            }
        };

        if index.version != INDEX_VERSION {
            tracing::warn!(
                path = %path.display(),
                found = index.version,
                expected = INDEX_VERSION,
                "chunk index version mismatch, ignoring"
            );
            return None;
        }

        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages() -> Vec<Vec<TextItem>> {
        vec![
            vec![TextItem::new("Abstract text", 10.0, 10.0, 100.0, 12.0)],
            vec![TextItem::new("Methods text", 10.0, 10.0, 100.0, 12.0)],
        ]
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let index = ChunkIndex::build(&pages(), Some("ABC123".into()));
        index.save(&path).unwrap();

        let loaded = ChunkIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.total_pages, 2);
        assert!(loaded.is_fresh_for("abc123"));
        assert!(!loaded.is_fresh_for("def456"));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ChunkIndex::load(&dir.path().join("absent.json")).is_none());
    }

    #[test]
    fn corrupt_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ChunkIndex::load(&path).is_none());
    }

    #[test]
    fn other_version_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut index = ChunkIndex::build(&pages(), None);
        index.version = INDEX_VERSION + 1;
        index.save(&path).unwrap();
        assert!(ChunkIndex::load(&path).is_none());
    }

    #[test]
    fn chunk_at_skips_separators() {
        let index = ChunkIndex::build(&pages(), None);
        // "Abstract text" occupies [0, 13), separator at 13, page 2 starts at 14
        assert_eq!(index.chunk_at(0).unwrap().page, 1);
        assert_eq!(index.chunk_at(12).unwrap().page, 1);
        assert!(index.chunk_at(13).is_none());
        assert_eq!(index.chunk_at(14).unwrap().page, 2);
        assert!(index.chunk_at(index.total_chars()).is_none());
    }

    #[test]
    fn unhashed_index_is_never_fresh() {
        let index = ChunkIndex::build(&pages(), None);
        assert!(!index.is_fresh_for("abc"));
    }
}
