//! In-memory vector index with cosine similarity search, backed by a custom
//! binary blob (vectors) plus a JSON mapping table (internal id → owner
//! hash/chunk index/folder/model). Brute-force search; rebuilt wholesale on
//! folder removal or explicit rebuild rather than incrementally repacked.

use fmcore::{cosine_similarity, normalise_similarity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("mapping length {mappings} does not match vector count {vectors}")]
  LengthMismatch { mappings: usize, vectors: usize },
  #[error("vector dimension mismatch: expected {expected}, got {actual}")]
  DimensionMismatch { expected: usize, actual: usize },
}

/// One entry's addressing metadata — everything needed to locate the chunk
/// that produced a given vector, without storing the vector's payload here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMapping {
  pub internal_id: u64,
  pub owner_hash: String,
  pub chunk_index: usize,
  pub folder_path: String,
  pub model_id: String,
}

/// One embedding to add to the index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
  pub owner_hash: String,
  pub chunk_index: usize,
  pub folder_path: String,
  pub model_id: String,
  pub vector: Vec<f32>,
}

/// A search hit: the mapping plus the raw (unclamped) cosine similarity.
#[derive(Debug, Clone)]
pub struct SearchHit {
  pub mapping: IndexMapping,
  pub score: f32,
}

impl SearchHit {
  /// Score clamped to `[0, 1]` for client-facing surfaces (REST/duplex).
  pub fn normalised_score(&self) -> f32 {
    normalise_similarity(self.score)
  }
}

/// Optional scope restricting a search to one folder and/or model.
#[derive(Debug, Clone, Default)]
pub struct SearchScope {
  pub folder_path: Option<String>,
  pub model_id: Option<String>,
}

const GROUP_WINDOW: usize = 1;
const MAX_HITS_PER_DOCUMENT: usize = 3;

/// Flat, brute-force cosine index. `build`/`search`/`remove` mutate an
/// in-memory `Vec<f32>` of vectors paired 1:1 with a `Vec<IndexMapping>`;
/// persistence writes both out as a binary blob + JSON sidecar.
#[derive(Debug, Default)]
pub struct VectorIndex {
  dimension: Option<usize>,
  vectors: Vec<Vec<f32>>,
  mappings: Vec<IndexMapping>,
  next_id: u64,
}

impl VectorIndex {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.vectors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.vectors.is_empty()
  }

  /// Replace the index wholesale with the given entries (used for cold-start
  /// rebuild from the Chunk & Embedding Store, or explicit rebuild).
  pub fn build(&mut self, entries: Vec<IndexEntry>) -> Result<(), VectorIndexError> {
    self.vectors.clear();
    self.mappings.clear();
    self.dimension = None;
    self.next_id = 0;
    for entry in entries {
      self.add(entry)?;
    }
    Ok(())
  }

  /// Add a single entry, assigning it the next internal id.
  pub fn add(&mut self, entry: IndexEntry) -> Result<u64, VectorIndexError> {
    if let Some(dim) = self.dimension {
      if entry.vector.len() != dim {
        return Err(VectorIndexError::DimensionMismatch {
          expected: dim,
          actual: entry.vector.len(),
        });
      }
    } else {
      self.dimension = Some(entry.vector.len());
    }

    let internal_id = self.next_id;
    self.next_id += 1;

    self.mappings.push(IndexMapping {
      internal_id,
      owner_hash: entry.owner_hash,
      chunk_index: entry.chunk_index,
      folder_path: entry.folder_path,
      model_id: entry.model_id,
    });
    self.vectors.push(entry.vector);

    Ok(internal_id)
  }

  /// Remove every entry for `owner_hash`, or (when `file_path` addressing is
  /// used upstream) whatever the caller has already resolved to an owner
  /// hash. Returns the number of entries removed.
  pub fn remove_by_owner(&mut self, owner_hash: &str) -> usize {
    let before = self.mappings.len();
    let keep: Vec<bool> = self.mappings.iter().map(|m| m.owner_hash != owner_hash).collect();
    let mut kept_vectors = Vec::with_capacity(self.vectors.len());
    let mut kept_mappings = Vec::with_capacity(self.mappings.len());
    for (i, k) in keep.into_iter().enumerate() {
      if k {
        kept_vectors.push(self.vectors[i].clone());
        kept_mappings.push(self.mappings[i].clone());
      }
    }
    self.vectors = kept_vectors;
    self.mappings = kept_mappings;
    before - self.mappings.len()
  }

  /// Remove every entry under `folder_path` (folder removal, §4.8).
  pub fn remove_by_folder(&mut self, folder_path: &str) -> usize {
    let before = self.mappings.len();
    let keep: Vec<bool> = self.mappings.iter().map(|m| m.folder_path != folder_path).collect();
    let mut kept_vectors = Vec::with_capacity(self.vectors.len());
    let mut kept_mappings = Vec::with_capacity(self.mappings.len());
    for (i, k) in keep.into_iter().enumerate() {
      if k {
        kept_vectors.push(self.vectors[i].clone());
        kept_mappings.push(self.mappings[i].clone());
      }
    }
    self.vectors = kept_vectors;
    self.mappings = kept_mappings;
    before - self.mappings.len()
  }

  /// Top-k cosine search across the whole index.
  pub fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Vec<SearchHit> {
    self.search_scoped(query, &SearchScope::default(), top_k, threshold)
  }

  /// Top-k cosine search restricted to a folder and/or model.
  pub fn search_scoped(&self, query: &[f32], scope: &SearchScope, top_k: usize, threshold: f32) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = self
      .vectors
      .iter()
      .zip(self.mappings.iter())
      .filter(|(_, m)| scope.folder_path.as_deref().is_none_or(|f| m.folder_path == f))
      .filter(|(_, m)| scope.model_id.as_deref().is_none_or(|model| m.model_id == model))
      .map(|(vec, mapping)| SearchHit {
        mapping: mapping.clone(),
        score: cosine_similarity(query, vec),
      })
      .filter(|hit| hit.score >= threshold)
      .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(top_k);
    hits
  }

  /// Group hits by source document (`owner_hash`), deduplicating hits within
  /// `±1` chunkIndex of each other (keeping the higher score), capping each
  /// document's contribution to [`MAX_HITS_PER_DOCUMENT`], then sorting
  /// groups by their max score.
  pub fn group_by_document(hits: Vec<SearchHit>) -> Vec<Vec<SearchHit>> {
    let mut by_owner: HashMap<String, Vec<SearchHit>> = HashMap::new();
    for hit in hits {
      by_owner.entry(hit.mapping.owner_hash.clone()).or_default().push(hit);
    }

    let mut groups: Vec<Vec<SearchHit>> = by_owner
      .into_values()
      .map(|mut group| {
        group.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let deduped = dedup_adjacent(group);
        deduped.into_iter().take(MAX_HITS_PER_DOCUMENT).collect::<Vec<_>>()
      })
      .collect();

    groups.sort_by(|a, b| {
      let max_a = a.iter().map(|h| h.score).fold(f32::MIN, f32::max);
      let max_b = b.iter().map(|h| h.score).fold(f32::MIN, f32::max);
      max_b.partial_cmp(&max_a).unwrap_or(std::cmp::Ordering::Equal)
    });

    groups
  }

  /// Write the index as `<dir>/index.bin` (raw little-endian f32 vectors,
  /// length-prefixed per entry) plus `<dir>/mappings.json`. Atomic via
  /// write-temp-then-rename.
  pub fn persist(&self, dir: &Path) -> Result<(), VectorIndexError> {
    fs::create_dir_all(dir)?;

    let bin_path = dir.join("index.bin");
    let bin_tmp = dir.join("index.bin.tmp");
    {
      let mut file = fs::File::create(&bin_tmp)?;
      file.write_all(&(self.vectors.len() as u64).to_le_bytes())?;
      for vector in &self.vectors {
        file.write_all(&(vector.len() as u32).to_le_bytes())?;
        for value in vector {
          file.write_all(&value.to_le_bytes())?;
        }
      }
      file.sync_all()?;
    }
    fs::rename(&bin_tmp, &bin_path)?;

    let mappings_path = dir.join("mappings.json");
    let mappings_tmp = dir.join("mappings.json.tmp");
    fs::write(&mappings_tmp, serde_json::to_vec_pretty(&self.mappings)?)?;
    fs::rename(&mappings_tmp, &mappings_path)?;

    Ok(())
  }

  /// Load `<dir>/index.bin` + `<dir>/mappings.json`. If the binary is
  /// missing but a mapping file and a caller-supplied vector snapshot exist,
  /// callers should instead rebuild via [`VectorIndex::build`] and
  /// [`VectorIndex::persist`] to re-emit the binary atomically.
  pub fn load(dir: &Path) -> Result<Self, VectorIndexError> {
    let mappings_path = dir.join("mappings.json");
    let mappings: Vec<IndexMapping> = serde_json::from_slice(&fs::read(&mappings_path)?)?;

    let bin_path = dir.join("index.bin");
    let mut file = fs::File::open(&bin_path)?;
    let mut count_buf = [0u8; 8];
    file.read_exact(&mut count_buf)?;
    let count = u64::from_le_bytes(count_buf) as usize;

    if count != mappings.len() {
      return Err(VectorIndexError::LengthMismatch {
        mappings: mappings.len(),
        vectors: count,
      });
    }

    let mut vectors = Vec::with_capacity(count);
    let mut dimension = None;
    for _ in 0..count {
      let mut len_buf = [0u8; 4];
      file.read_exact(&mut len_buf)?;
      let len = u32::from_le_bytes(len_buf) as usize;
      let mut vector = Vec::with_capacity(len);
      let mut value_buf = [0u8; 4];
      for _ in 0..len {
        file.read_exact(&mut value_buf)?;
        vector.push(f32::from_le_bytes(value_buf));
      }
      dimension.get_or_insert(len);
      vectors.push(vector);
    }

    let next_id = mappings.iter().map(|m| m.internal_id).max().map(|m| m + 1).unwrap_or(0);

    Ok(Self {
      dimension,
      vectors,
      mappings,
      next_id,
    })
  }

  pub fn binary_path(dir: &Path) -> PathBuf {
    dir.join("index.bin")
  }

  pub fn mappings_path(dir: &Path) -> PathBuf {
    dir.join("mappings.json")
  }
}

/// Drop hits whose `chunkIndex` lies within `±1` of an already-kept hit from
/// the same owner (the group is already owner-homogeneous), keeping the
/// higher-scored of the pair. `group` must already be sorted by descending
/// score.
fn dedup_adjacent(group: Vec<SearchHit>) -> Vec<SearchHit> {
  let mut kept: Vec<SearchHit> = Vec::new();
  'outer: for hit in group {
    for existing in &kept {
      if hit.mapping.chunk_index.abs_diff(existing.mapping.chunk_index) <= GROUP_WINDOW {
        continue 'outer;
      }
    }
    kept.push(hit);
  }
  kept
}

/// Expand a hit's content with the last paragraph of the previous chunk and
/// the first paragraph of the next, given the full document text and the
/// chunk's own offsets. Paragraphs are `\n\n`-delimited blocks.
pub fn expand_context(document_text: &str, chunk_start: usize, chunk_end: usize) -> (Option<String>, Option<String>) {
  let before = &document_text[..chunk_start.min(document_text.len())];
  let after = &document_text[chunk_end.min(document_text.len())..];

  let prev_paragraph = before.rsplit("\n\n").find(|p| !p.trim().is_empty()).map(|p| p.trim().to_string());
  let next_paragraph = after.split("\n\n").find(|p| !p.trim().is_empty()).map(|p| p.trim().to_string());

  (prev_paragraph, next_paragraph)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn entry(owner: &str, chunk_index: usize, folder: &str, model: &str, vector: Vec<f32>) -> IndexEntry {
    IndexEntry {
      owner_hash: owner.to_string(),
      chunk_index,
      folder_path: folder.to_string(),
      model_id: model.to_string(),
      vector,
    }
  }

  #[test]
  fn search_returns_closest_vectors_first() {
    let mut index = VectorIndex::new();
    index
      .build(vec![
        entry("a", 0, "/f", "m", vec![1.0, 0.0]),
        entry("b", 0, "/f", "m", vec![0.0, 1.0]),
        entry("c", 0, "/f", "m", vec![0.9, 0.1]),
      ])
      .unwrap();

    let hits = index.search(&[1.0, 0.0], 2, 0.0);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].mapping.owner_hash, "a");
    assert_eq!(hits[1].mapping.owner_hash, "c");
  }

  #[test]
  fn threshold_filters_weak_matches() {
    let mut index = VectorIndex::new();
    index.build(vec![entry("a", 0, "/f", "m", vec![1.0, 0.0]), entry("b", 0, "/f", "m", vec![0.0, 1.0])]).unwrap();

    let hits = index.search(&[1.0, 0.0], 10, 0.5);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].mapping.owner_hash, "a");
  }

  #[test]
  fn search_scoped_by_folder() {
    let mut index = VectorIndex::new();
    index
      .build(vec![
        entry("a", 0, "/folder1", "m", vec![1.0, 0.0]),
        entry("b", 0, "/folder2", "m", vec![1.0, 0.0]),
      ])
      .unwrap();

    let scope = SearchScope {
      folder_path: Some("/folder1".to_string()),
      model_id: None,
    };
    let hits = index.search_scoped(&[1.0, 0.0], &scope, 10, 0.0);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].mapping.folder_path, "/folder1");
  }

  #[test]
  fn remove_by_owner_drops_only_matching_entries() {
    let mut index = VectorIndex::new();
    index.build(vec![entry("a", 0, "/f", "m", vec![1.0]), entry("b", 0, "/f", "m", vec![0.5])]).unwrap();

    let removed = index.remove_by_owner("a");
    assert_eq!(removed, 1);
    assert_eq!(index.len(), 1);
    assert_eq!(index.mappings[0].owner_hash, "b");
  }

  #[test]
  fn dimension_mismatch_is_rejected() {
    let mut index = VectorIndex::new();
    index.add(entry("a", 0, "/f", "m", vec![1.0, 0.0])).unwrap();
    let err = index.add(entry("b", 0, "/f", "m", vec![1.0, 0.0, 0.0])).unwrap_err();
    assert!(matches!(err, VectorIndexError::DimensionMismatch { .. }));
  }

  #[test]
  fn persist_then_load_round_trips() {
    let dir = TempDir::new().unwrap();
    let mut index = VectorIndex::new();
    index
      .build(vec![
        entry("a", 0, "/f", "m", vec![1.0, 2.0, 3.0]),
        entry("b", 1, "/f", "m", vec![4.0, 5.0, 6.0]),
      ])
      .unwrap();

    index.persist(dir.path()).unwrap();
    assert!(VectorIndex::binary_path(dir.path()).exists());
    assert!(VectorIndex::mappings_path(dir.path()).exists());

    let loaded = VectorIndex::load(dir.path()).unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.vectors[0], vec![1.0, 2.0, 3.0]);
    assert_eq!(loaded.mappings[1].owner_hash, "b");
  }

  #[test]
  fn load_rejects_mismatched_mapping_length() {
    let dir = TempDir::new().unwrap();
    let mut index = VectorIndex::new();
    index.build(vec![entry("a", 0, "/f", "m", vec![1.0])]).unwrap();
    index.persist(dir.path()).unwrap();

    let mappings = vec![
      IndexMapping {
        internal_id: 0,
        owner_hash: "a".to_string(),
        chunk_index: 0,
        folder_path: "/f".to_string(),
        model_id: "m".to_string(),
      },
      IndexMapping {
        internal_id: 1,
        owner_hash: "b".to_string(),
        chunk_index: 0,
        folder_path: "/f".to_string(),
        model_id: "m".to_string(),
      },
    ];
    fs::write(dir.path().join("mappings.json"), serde_json::to_vec(&mappings).unwrap()).unwrap();

    let err = VectorIndex::load(dir.path()).unwrap_err();
    assert!(matches!(err, VectorIndexError::LengthMismatch { .. }));
  }

  #[test]
  fn group_by_document_dedups_adjacent_chunk_indices() {
    let hits = vec![
      SearchHit {
        mapping: IndexMapping {
          internal_id: 0,
          owner_hash: "doc1".to_string(),
          chunk_index: 5,
          folder_path: "/f".to_string(),
          model_id: "m".to_string(),
        },
        score: 0.9,
      },
      SearchHit {
        mapping: IndexMapping {
          internal_id: 1,
          owner_hash: "doc1".to_string(),
          chunk_index: 6,
          folder_path: "/f".to_string(),
          model_id: "m".to_string(),
        },
        score: 0.8,
      },
      SearchHit {
        mapping: IndexMapping {
          internal_id: 2,
          owner_hash: "doc1".to_string(),
          chunk_index: 20,
          folder_path: "/f".to_string(),
          model_id: "m".to_string(),
        },
        score: 0.7,
      },
    ];

    let groups = VectorIndex::group_by_document(hits);
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].len(), 2);
    assert_eq!(groups[0][0].mapping.chunk_index, 5);
    assert_eq!(groups[0][1].mapping.chunk_index, 20);
  }

  #[test]
  fn group_by_document_caps_hits_per_document() {
    let hits: Vec<SearchHit> = (0..10)
      .map(|i| SearchHit {
        mapping: IndexMapping {
          internal_id: i,
          owner_hash: "doc1".to_string(),
          chunk_index: i as usize * 10,
          folder_path: "/f".to_string(),
          model_id: "m".to_string(),
        },
        score: 1.0 - (i as f32 * 0.01),
      })
      .collect();

    let groups = VectorIndex::group_by_document(hits);
    assert_eq!(groups[0].len(), MAX_HITS_PER_DOCUMENT);
  }

  #[test]
  fn expand_context_recovers_surrounding_paragraphs() {
    let text = "first paragraph here.\n\nMIDDLE CHUNK\n\nthird paragraph follows.";
    let chunk_start = text.find("MIDDLE CHUNK").unwrap();
    let chunk_end = chunk_start + "MIDDLE CHUNK".len();

    let (prev, next) = expand_context(text, chunk_start, chunk_end);
    assert_eq!(prev.as_deref(), Some("first paragraph here."));
    assert_eq!(next.as_deref(), Some("third paragraph follows."));
  }

  #[test]
  fn normalised_score_is_clamped() {
    let hit = SearchHit {
      mapping: IndexMapping {
        internal_id: 0,
        owner_hash: "a".to_string(),
        chunk_index: 0,
        folder_path: "/f".to_string(),
        model_id: "m".to_string(),
      },
      score: -1.0,
    };
    assert!((hit.normalised_score() - 0.0).abs() < 1e-6);
  }
}
