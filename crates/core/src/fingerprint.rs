//! Content-hash based file identity.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// `{relativePath, contentHash, size, mtime}` — the unit of change detection.
/// Two files with equal `content_hash` share every derived artefact (chunks,
/// embeddings); `mtime` alone never counts as "changed".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub relative_path: String,
  pub content_hash: String,
  pub size: u64,
  pub mtime: i64,
}

/// Hash file content. Collision-resistant and stable across mtime changes.
pub fn hash_content(bytes: &[u8]) -> String {
  let mut hasher = Sha256::new();
  hasher.update(bytes);
  hex::encode(hasher.finalize())
}

impl Fingerprint {
  pub fn new(relative_path: impl Into<String>, content: &[u8], mtime: i64) -> Self {
    Self {
      relative_path: relative_path.into(),
      content_hash: hash_content(content),
      size: content.len() as u64,
      mtime,
    }
  }
}

/// Normalise a path for stable cross-platform identity: forward slashes,
/// no leading `./`.
pub fn normalise_relative_path(path: &Path) -> String {
  let s = path.to_string_lossy().replace('\\', "/");
  s.strip_prefix("./").unwrap_or(&s).to_string()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_content_derived_not_mtime() {
    let fp1 = Fingerprint::new("a.md", b"hello world", 100);
    let fp2 = Fingerprint::new("a.md", b"hello world", 200);
    assert_eq!(fp1.content_hash, fp2.content_hash);
  }

  #[test]
  fn different_content_differs() {
    let fp1 = Fingerprint::new("a.md", b"hello", 0);
    let fp2 = Fingerprint::new("a.md", b"world", 0);
    assert_ne!(fp1.content_hash, fp2.content_hash);
  }

  #[test]
  fn normalises_backslashes() {
    assert_eq!(normalise_relative_path(Path::new("./a\\b\\c.md")), "a/b/c.md");
  }
}
