//! External collaborator boundary: `parse(path) -> {text, structure}`.
//!
//! Concrete PDF/DOCX/XLSX/PPTX extraction is out of scope for this codebase
//! (see the system's Non-goals) — only the pure-function contract and the
//! structure types the Chunker consumes are defined here. Plain text and
//! Markdown need no external parser, so they are read directly.

use std::fs;
use std::path::Path;
use thiserror::Error;

/// Recognised document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentType {
  PlainText,
  Markdown,
  Pdf,
  Docx,
  Xlsx,
  Pptx,
}

impl DocumentType {
  pub fn from_extension(ext: &str) -> Option<Self> {
    match ext.to_ascii_lowercase().as_str() {
      "txt" => Some(Self::PlainText),
      "md" | "markdown" => Some(Self::Markdown),
      "pdf" => Some(Self::Pdf),
      "docx" => Some(Self::Docx),
      "xlsx" | "xls" => Some(Self::Xlsx),
      "pptx" => Some(Self::Pptx),
      _ => None,
    }
  }
}

/// Detect document type from a file path's extension.
pub fn detect_document_type(path: &Path) -> Option<DocumentType> {
  let ext = path.extension()?.to_str()?;
  DocumentType::from_extension(ext)
}

pub fn is_indexable(path: &Path) -> bool {
  detect_document_type(path).is_some()
}

pub fn supported_extensions() -> &'static [&'static str] {
  &["txt", "md", "markdown", "pdf", "docx", "xlsx", "xls", "pptx"]
}

/// A heading discovered in prose, with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadingNode {
  pub level: u8,
  pub title: String,
  pub start_offset: usize,
}

/// A PDF-like page span.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpan {
  pub page_number: u32,
  pub start_offset: usize,
  pub end_offset: usize,
}

/// A spreadsheet sheet span.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetSpan {
  pub sheet_name: String,
  pub cell_range: String,
  pub start_offset: usize,
  pub end_offset: usize,
}

/// A presentation slide span.
#[derive(Debug, Clone, PartialEq)]
pub struct SlideSpan {
  pub slide_number: u32,
  pub include_notes: bool,
  pub start_offset: usize,
  pub end_offset: usize,
}

/// Format-specific structure over the parsed text, consumed by the Chunker
/// to produce format-aware boundaries and extraction coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStructure {
  Headings(Vec<HeadingNode>),
  Pages(Vec<PageSpan>),
  Sheets(Vec<SheetSpan>),
  Slides(Vec<SlideSpan>),
  /// No recognised internal structure; treat the whole text as one region.
  Flat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
  pub text: String,
  pub structure: DocumentStructure,
}

#[derive(Error, Debug)]
pub enum ParseError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
  #[error("unsupported document type: {0:?}")]
  Unsupported(DocumentType),
  #[error("not a recognised document: {0}")]
  Unrecognised(String),
}

/// Parse a file into text + structure. Text and Markdown are read directly;
/// PDF/DOCX/XLSX/PPTX are external-collaborator formats whose extraction
/// this codebase does not implement (see Non-goals) — callers that need
/// them must plug in a parser that returns the same `ParsedDocument` shape.
pub fn parse(path: &Path) -> Result<ParsedDocument, ParseError> {
  let doc_type = detect_document_type(path).ok_or_else(|| ParseError::Unrecognised(path.display().to_string()))?;

  match doc_type {
    DocumentType::PlainText => {
      let text = fs::read_to_string(path)?;
      Ok(ParsedDocument {
        text,
        structure: DocumentStructure::Flat,
      })
    }
    DocumentType::Markdown => {
      let text = fs::read_to_string(path)?;
      let headings = extract_markdown_headings(&text);
      Ok(ParsedDocument {
        text,
        structure: DocumentStructure::Headings(headings),
      })
    }
    DocumentType::Pdf | DocumentType::Docx | DocumentType::Xlsx | DocumentType::Pptx => {
      Err(ParseError::Unsupported(doc_type))
    }
  }
}

fn extract_markdown_headings(text: &str) -> Vec<HeadingNode> {
  let mut headings = Vec::new();
  let mut offset = 0usize;

  for line in text.lines() {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level > 0 && level <= 6 && trimmed.as_bytes().get(level) == Some(&b' ') {
      let title = trimmed[level..].trim().to_string();
      headings.push(HeadingNode {
        level: level as u8,
        title,
        start_offset: offset,
      });
    }
    offset += line.len() + 1; // +1 for the stripped '\n'
  }

  headings
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn detects_known_extensions() {
    assert_eq!(detect_document_type(Path::new("a.txt")), Some(DocumentType::PlainText));
    assert_eq!(detect_document_type(Path::new("a.md")), Some(DocumentType::Markdown));
    assert_eq!(detect_document_type(Path::new("a.pdf")), Some(DocumentType::Pdf));
    assert_eq!(detect_document_type(Path::new("a.png")), None);
  }

  #[test]
  fn is_indexable_matches_detection() {
    assert!(is_indexable(Path::new("notes.md")));
    assert!(!is_indexable(Path::new("image.png")));
  }

  #[test]
  fn parses_plain_text() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "hello world").unwrap();

    let parsed = parse(&path).unwrap();
    assert_eq!(parsed.text, "hello world");
    assert_eq!(parsed.structure, DocumentStructure::Flat);
  }

  #[test]
  fn parses_markdown_headings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.md");
    fs::write(&path, "# Chapter 1\n\nIntro text.\n\n## Overview\n\nMore text.\n").unwrap();

    let parsed = parse(&path).unwrap();
    let DocumentStructure::Headings(headings) = parsed.structure else {
      panic!("expected headings");
    };
    assert_eq!(headings.len(), 2);
    assert_eq!(headings[0].title, "Chapter 1");
    assert_eq!(headings[0].level, 1);
    assert_eq!(headings[1].title, "Overview");
    assert_eq!(headings[1].level, 2);
  }

  #[test]
  fn unsupported_formats_return_typed_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.pdf");
    fs::write(&path, b"%PDF-1.4").unwrap();

    let err = parse(&path).unwrap_err();
    assert!(matches!(err, ParseError::Unsupported(DocumentType::Pdf)));
  }

  #[test]
  fn unrecognised_extension_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.bin");
    fs::write(&path, b"\x00\x01").unwrap();

    assert!(parse(&path).is_err());
  }
}
