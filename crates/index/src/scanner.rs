//! Sweep 1 of the Folder Lifecycle Manager's scan phase: walk the folder,
//! compute fingerprints, and hand back the indexable files found.

use crate::parser::{DocumentType, detect_document_type};
use fmcore::Fingerprint;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Walk error: {0}")]
  Walk(#[from] ignore::Error),
}

/// One indexable file found during a scan.
#[derive(Debug, Clone)]
pub struct ScannedFile {
  pub path: PathBuf,
  pub document_type: DocumentType,
  pub fingerprint: Fingerprint,
}

#[derive(Debug)]
pub struct ScanResult {
  pub files: Vec<ScannedFile>,
  pub skipped_count: u32,
  pub total_bytes: u64,
  pub scan_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanProgress {
  pub scanned: u32,
  pub path: PathBuf,
}

/// Folder→db sweep: walks the filesystem respecting ignore rules and emits
/// a fingerprinted `ScannedFile` per indexable document.
pub struct Scanner {
  max_file_size: u64,
  follow_links: bool,
}

impl Default for Scanner {
  fn default() -> Self {
    Self::new()
  }
}

impl Scanner {
  pub fn new() -> Self {
    Self {
      max_file_size: 50 * 1024 * 1024, // 50MB
      follow_links: false,
    }
  }

  pub fn with_max_file_size(mut self, size: u64) -> Self {
    self.max_file_size = size;
    self
  }

  /// Scan directory in parallel, respecting .gitignore and per-folder excludes.
  pub fn scan<F>(&self, root: &Path, progress: F) -> ScanResult
  where
    F: Fn(ScanProgress) + Send + Sync,
  {
    let start = Instant::now();
    let scanned = AtomicU32::new(0);
    let skipped = AtomicU32::new(0);
    let total_bytes = AtomicU64::new(0);

    let walker = WalkBuilder::new(root)
      .follow_links(self.follow_links)
      .hidden(false)
      .git_ignore(true)
      .git_global(true)
      .git_exclude(true)
      .add_custom_ignore_filename(".folder-mcp-ignore")
      .build();

    let files: Vec<ScannedFile> = walker
      .filter_map(|e| e.ok())
      .par_bridge()
      .filter_map(|entry| {
        let path = entry.path();

        if entry.file_type().is_none_or(|ft| ft.is_dir()) {
          return None;
        }
        if path.components().any(|c| c.as_os_str() == ".folder-mcp-cache") {
          return None;
        }

        let count = scanned.fetch_add(1, Ordering::Relaxed);
        if count.is_multiple_of(100) {
          progress(ScanProgress {
            scanned: count,
            path: path.to_path_buf(),
          });
        }

        let document_type = detect_document_type(path)?;

        let metadata = entry.metadata().ok()?;
        if metadata.len() == 0 || metadata.len() > self.max_file_size {
          skipped.fetch_add(1, Ordering::Relaxed);
          return None;
        }

        let fingerprint = self.fingerprint_file(path, root).ok()?;
        total_bytes.fetch_add(metadata.len(), Ordering::Relaxed);

        Some(ScannedFile {
          path: path.to_path_buf(),
          document_type,
          fingerprint,
        })
      })
      .collect();

    ScanResult {
      files,
      skipped_count: skipped.load(Ordering::Relaxed),
      total_bytes: total_bytes.load(Ordering::Relaxed),
      scan_duration: start.elapsed(),
    }
  }

  /// Scan a single file (used by the watcher's incremental path).
  pub fn scan_file(&self, path: &Path, root: &Path) -> Option<ScannedFile> {
    let document_type = detect_document_type(path)?;
    let metadata = path.metadata().ok()?;
    if metadata.len() == 0 || metadata.len() > self.max_file_size {
      return None;
    }
    let fingerprint = self.fingerprint_file(path, root).ok()?;
    Some(ScannedFile {
      path: path.to_path_buf(),
      document_type,
      fingerprint,
    })
  }

  fn fingerprint_file(&self, path: &Path, root: &Path) -> Result<Fingerprint, ScanError> {
    let content = fs::read(path)?;
    let metadata = path.metadata()?;
    let mtime = metadata
      .modified()?
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_secs() as i64)
      .unwrap_or(0);
    let relative_path = fmcore::normalise_relative_path(path.strip_prefix(root).unwrap_or(path));
    Ok(Fingerprint::new(relative_path, &content, mtime))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn scan_finds_indexable_files_only() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.md"), "# hello").unwrap();
    fs::write(dir.path().join("image.png"), [0u8; 4]).unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.files[0].document_type, DocumentType::Markdown);
  }

  #[test]
  fn scan_respects_gitignore() {
    let dir = TempDir::new().unwrap();
    fs::create_dir(dir.path().join(".git")).unwrap();
    fs::write(dir.path().join(".gitignore"), "ignored/\n").unwrap();
    fs::write(dir.path().join("a.md"), "content").unwrap();
    fs::create_dir(dir.path().join("ignored")).unwrap();
    fs::write(dir.path().join("ignored/b.md"), "content").unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert!(result.files[0].fingerprint.relative_path.contains("a.md"));
  }

  #[test]
  fn scan_skips_empty_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("normal.md"), "content").unwrap();
    fs::write(dir.path().join("empty.md"), "").unwrap();

    let scanner = Scanner::new();
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.skipped_count, 1);
  }

  #[test]
  fn scan_skips_oversized_files() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("small.md"), "x").unwrap();
    fs::write(dir.path().join("large.md"), "x".repeat(2048)).unwrap();

    let scanner = Scanner::new().with_max_file_size(1024);
    let result = scanner.scan(dir.path(), |_| {});

    assert_eq!(result.files.len(), 1);
    assert_eq!(result.skipped_count, 1);
  }

  #[test]
  fn fingerprint_is_content_derived() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.txt");
    fs::write(&path, "hello").unwrap();

    let scanner = Scanner::new();
    let scanned = scanner.scan_file(&path, dir.path()).unwrap();
    assert_eq!(scanned.fingerprint.relative_path, "a.txt");
    assert!(!scanned.fingerprint.content_hash.is_empty());
  }
}
