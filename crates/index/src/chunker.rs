//! Splits parsed documents into bounded-token chunks with format-aware
//! boundaries (slides, sheets, headings, pages), each carrying the
//! extraction coordinates needed to re-read it without re-parsing siblings.

use crate::parser::{DocumentStructure, HeadingNode, ParsedDocument};
use fmcore::{Chunk, ChunkParams, ExtractionCoords, approx_tokens};
use std::ops::Range;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
  pub params: ChunkParams,
}

impl Default for ChunkerConfig {
  fn default() -> Self {
    Self {
      params: ChunkParams::default(),
    }
  }
}

/// Format-aware chunker. Splits a parsed document into `Chunk`s whose
/// `chunkIndex` set is contiguous `{0..totalChunks-1}` for the owner hash.
pub struct Chunker {
  config: ChunkerConfig,
}

impl Default for Chunker {
  fn default() -> Self {
    Self::new(ChunkerConfig::default())
  }
}

struct Region {
  range: Range<usize>,
  extraction: ExtractionCoords,
}

impl Chunker {
  pub fn new(config: ChunkerConfig) -> Self {
    Self { config }
  }

  pub fn chunk(&self, doc: &ParsedDocument, owner_hash: &str) -> Vec<Chunk> {
    let regions = self.regions(doc);
    let mut spans = Vec::new();

    for region in &regions {
      let text = &doc.text[region.range.clone()];
      for (rel_start, rel_end) in self.split_region(text) {
        spans.push((region.range.start + rel_start, region.range.start + rel_end, region.extraction.clone()));
      }
    }

    let total = spans.len();
    spans
      .into_iter()
      .enumerate()
      .map(|(index, (start, end, extraction))| {
        let content = doc.text[start..end].to_string();
        Chunk::new(owner_hash, index, total, content, start, end, extraction)
      })
      .collect()
  }

  /// Partition the document into format-specific regions, each with its own
  /// extraction coordinates.
  fn regions(&self, doc: &ParsedDocument) -> Vec<Region> {
    match &doc.structure {
      DocumentStructure::Flat => vec![Region {
        range: 0..doc.text.len(),
        extraction: ExtractionCoords::HeadingPath { path: Vec::new() },
      }],
      DocumentStructure::Headings(headings) => self.heading_regions(doc, headings),
      DocumentStructure::Pages(pages) => pages
        .iter()
        .map(|p| Region {
          range: p.start_offset..p.end_offset,
          extraction: ExtractionCoords::Page { page_number: p.page_number },
        })
        .collect(),
      DocumentStructure::Sheets(sheets) => sheets
        .iter()
        .map(|s| Region {
          range: s.start_offset..s.end_offset,
          extraction: ExtractionCoords::SheetCell {
            sheet_name: s.sheet_name.clone(),
            cell_range: s.cell_range.clone(),
          },
        })
        .collect(),
      DocumentStructure::Slides(slides) => slides
        .iter()
        .map(|s| Region {
          range: s.start_offset..s.end_offset,
          extraction: ExtractionCoords::SlideNotes {
            slide_number: s.slide_number,
            include_notes: s.include_notes,
          },
        })
        .collect(),
    }
  }

  fn heading_regions(&self, doc: &ParsedDocument, headings: &[HeadingNode]) -> Vec<Region> {
    if headings.is_empty() {
      return vec![Region {
        range: 0..doc.text.len(),
        extraction: ExtractionCoords::HeadingPath { path: Vec::new() },
      }];
    }

    let mut regions = Vec::with_capacity(headings.len());
    let mut stack: Vec<&HeadingNode> = Vec::new();

    for (i, heading) in headings.iter().enumerate() {
      while stack.last().is_some_and(|h| h.level >= heading.level) {
        stack.pop();
      }
      stack.push(heading);
      let path: Vec<String> = stack.iter().map(|h| h.title.clone()).collect();

      let end = headings.get(i + 1).map(|next| next.start_offset).unwrap_or(doc.text.len());
      regions.push(Region {
        range: heading.start_offset..end,
        extraction: ExtractionCoords::HeadingPath { path },
      });
    }

    // Leading text before the first heading, if any, gets an empty path.
    if headings[0].start_offset > 0 {
      regions.insert(
        0,
        Region {
          range: 0..headings[0].start_offset,
          extraction: ExtractionCoords::HeadingPath { path: Vec::new() },
        },
      );
    }

    regions
  }

  /// Split one region's text into token-bounded spans on paragraph
  /// boundaries, returning offsets relative to the region's own text.
  fn split_region(&self, text: &str) -> Vec<(usize, usize)> {
    if text.is_empty() {
      return Vec::new();
    }

    let max_tokens = self.config.params.max_tokens;
    let paragraphs = split_paragraphs(text);

    let mut spans = Vec::new();
    let mut current_start = 0usize;
    let mut current_end = 0usize;
    let mut current_tokens = 0usize;

    for (start, end) in paragraphs {
      let para_tokens = approx_tokens(&text[start..end]);

      if current_tokens > 0 && current_tokens + para_tokens > max_tokens {
        spans.push((current_start, current_end));
        current_start = start;
        current_tokens = 0;
      }

      current_end = end;
      current_tokens += para_tokens;

      if current_tokens >= max_tokens {
        spans.push((current_start, current_end));
        current_start = end;
        current_tokens = 0;
      }
    }

    if current_tokens > 0 {
      spans.push((current_start, current_end));
    }

    if spans.is_empty() {
      spans.push((0, text.len()));
    }

    spans
  }
}

/// Split text on blank-line (`\n\n`) boundaries, returning byte ranges.
fn split_paragraphs(text: &str) -> Vec<(usize, usize)> {
  let mut spans = Vec::new();
  let mut start = 0usize;
  let bytes = text.as_bytes();
  let mut i = 0usize;

  while i + 1 < bytes.len() {
    if bytes[i] == b'\n' && bytes[i + 1] == b'\n' {
      if i + 2 > start {
        spans.push((start, i + 2));
      }
      start = i + 2;
      i += 2;
    } else {
      i += 1;
    }
  }

  if start < text.len() {
    spans.push((start, text.len()));
  }

  spans
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::DocumentStructure;

  fn flat(text: &str) -> ParsedDocument {
    ParsedDocument {
      text: text.to_string(),
      structure: DocumentStructure::Flat,
    }
  }

  #[test]
  fn chunks_short_flat_text_as_one_chunk() {
    let doc = flat("short document");
    let chunks = Chunker::default().chunk(&doc, "hash1");
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_index, 0);
    assert_eq!(chunks[0].total_chunks, 1);
    assert_eq!(chunks[0].content, "short document");
    assert!(matches!(chunks[0].extraction, ExtractionCoords::HeadingPath { .. }));
  }

  #[test]
  fn chunk_indices_are_contiguous() {
    let paragraphs = (0..20).map(|i| format!("Paragraph number {i} with some filler words to pad it out.")).collect::<Vec<_>>().join("\n\n");
    let doc = flat(&paragraphs);
    let chunker = Chunker::new(ChunkerConfig {
      params: ChunkParams {
        max_tokens: 30,
        min_tokens: 1,
      },
    });
    let chunks = chunker.chunk(&doc, "hash2");
    assert!(chunks.len() > 1);
    assert!(fmcore::indices_contiguous(&chunks));
  }

  #[test]
  fn heading_structure_produces_heading_paths() {
    let text = "# Chapter 1\n\nIntro.\n\n## Overview\n\nDetail text here.\n";
    let doc = ParsedDocument {
      text: text.to_string(),
      structure: DocumentStructure::Headings(vec![
        HeadingNode {
          level: 1,
          title: "Chapter 1".to_string(),
          start_offset: 0,
        },
        HeadingNode {
          level: 2,
          title: "Overview".to_string(),
          start_offset: text.find("## Overview").unwrap(),
        },
      ]),
    };

    let chunks = Chunker::default().chunk(&doc, "hash3");
    assert!(chunks.iter().any(|c| matches!(
      &c.extraction,
      ExtractionCoords::HeadingPath { path } if path == &vec!["Chapter 1".to_string()]
    )));
    assert!(chunks.iter().any(|c| matches!(
      &c.extraction,
      ExtractionCoords::HeadingPath { path } if path == &vec!["Chapter 1".to_string(), "Overview".to_string()]
    )));
  }

  #[test]
  fn empty_document_yields_zero_chunks() {
    let doc = flat("");
    let chunks = Chunker::default().chunk(&doc, "hash4");
    assert_eq!(chunks.len(), 0);
  }

  #[test]
  fn reextraction_recovers_chunk_content() {
    let doc = flat("first paragraph text\n\nsecond paragraph text");
    let chunks = Chunker::default().chunk(&doc, "hash5");
    for chunk in &chunks {
      assert_eq!(&doc.text[chunk.start_offset..chunk.end_offset], chunk.content);
    }
  }
}
