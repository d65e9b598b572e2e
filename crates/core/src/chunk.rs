//! Chunk data model: a bounded-token span of a parsed document plus the
//! coordinates needed to re-extract it without re-parsing the whole file.

use serde::{Deserialize, Serialize};

/// Format-specific address that makes a chunk independently re-readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionCoords {
  /// Prose document: a heading path, e.g. `["Chapter 1", "Overview"]`.
  HeadingPath { path: Vec<String> },
  /// PDF-like paginated document.
  Page { page_number: u32 },
  /// Spreadsheet: a sheet name plus a cell range, e.g. `"A1:C40"`.
  SheetCell { sheet_name: String, cell_range: String },
  /// Presentation: a slide number, optionally including speaker notes.
  SlideNotes { slide_number: u32, include_notes: bool },
}

/// `ChunkParams` bounds chunk size. `maxTokens`/`minTokens` use an
/// approximation of char-count / 4, applied consistently everywhere a token
/// count is needed so thresholds stay comparable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkParams {
  pub max_tokens: usize,
  pub min_tokens: usize,
}

impl Default for ChunkParams {
  fn default() -> Self {
    Self {
      max_tokens: 500,
      min_tokens: 1,
    }
  }
}

/// char-count / 4, the token approximation used everywhere in this codebase.
pub fn approx_tokens(text: &str) -> usize {
  (text.chars().count() / 4).max(if text.is_empty() { 0 } else { 1 })
}

/// `{ownerHash, chunkIndex, content, startOffset, endOffset, tokenCount,
/// extractionParams, semanticMetadata}`. For a given `owner_hash` the
/// `chunk_index` set is `{0..total_chunks-1}`, contiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
  pub owner_hash: String,
  pub chunk_index: usize,
  pub total_chunks: usize,
  pub content: String,
  pub start_offset: usize,
  pub end_offset: usize,
  pub token_count: usize,
  pub extraction: ExtractionCoords,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub semantic: Option<SemanticMetadata>,
}

/// Output of semantic enrichment, attached to a chunk once computed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticMetadata {
  pub key_phrases: Vec<String>,
  pub topics: Vec<String>,
  pub readability_score: f64,
  pub multiword_ratio: f64,
}

impl Chunk {
  pub fn new(
    owner_hash: impl Into<String>,
    chunk_index: usize,
    total_chunks: usize,
    content: String,
    start_offset: usize,
    end_offset: usize,
    extraction: ExtractionCoords,
  ) -> Self {
    let token_count = approx_tokens(&content);
    Self {
      owner_hash: owner_hash.into(),
      chunk_index,
      total_chunks,
      content,
      start_offset,
      end_offset,
      token_count,
      extraction,
      semantic: None,
    }
  }
}

/// Verify the chunkIndex invariant: for a given owner hash the indices form
/// a contiguous `{0..total-1}` set.
pub fn indices_contiguous(chunks: &[Chunk]) -> bool {
  if chunks.is_empty() {
    return true;
  }
  let total = chunks[0].total_chunks;
  if chunks.len() != total {
    return false;
  }
  let mut seen = vec![false; total];
  for c in chunks {
    if c.total_chunks != total || c.chunk_index >= total || seen[c.chunk_index] {
      return false;
    }
    seen[c.chunk_index] = true;
  }
  seen.into_iter().all(|s| s)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn approx_tokens_nonempty_is_at_least_one() {
    assert_eq!(approx_tokens("a"), 1);
    assert_eq!(approx_tokens(""), 0);
    assert_eq!(approx_tokens(&"a".repeat(400)), 100);
  }

  #[test]
  fn contiguous_indices_pass() {
    let chunks = (0..3)
      .map(|i| Chunk::new("h", i, 3, "x".into(), 0, 1, ExtractionCoords::Page { page_number: 1 }))
      .collect::<Vec<_>>();
    assert!(indices_contiguous(&chunks));
  }

  #[test]
  fn gap_fails() {
    let mut chunks = (0..3)
      .map(|i| Chunk::new("h", i, 3, "x".into(), 0, 1, ExtractionCoords::Page { page_number: 1 }))
      .collect::<Vec<_>>();
    chunks[1].chunk_index = 2;
    assert!(!indices_contiguous(&chunks));
  }
}
