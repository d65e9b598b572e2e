//! Key-phrase extraction: n-gram candidates filtered by quality heuristics,
//! then re-ranked by Maximal Marginal Relevance against an embedding model
//! when one is available, falling back to frequency ranking otherwise.

use std::collections::{HashMap, HashSet};

const MIN_NGRAM: usize = 2;
const MAX_NGRAM: usize = 4;
const MIN_PHRASE_LEN: usize = 3;
const DEFAULT_TOP_K: usize = 10;
const DEFAULT_LAMBDA: f32 = 0.5;
const DEFAULT_TAU: f32 = 0.3;
const CPU_CANDIDATE_CAP: usize = 15;
const BATCH_CANDIDATE_CAP: usize = 50;

const STOPWORDS: &[&str] = &[
  "a", "an", "the", "and", "or", "but", "if", "then", "else", "of", "to", "in", "on", "at", "for", "with", "by",
  "from", "as", "is", "are", "was", "were", "be", "been", "being", "this", "that", "these", "those", "it", "its",
  "we", "you", "they", "he", "she", "their", "our", "your", "his", "her", "not", "no", "so", "do", "does", "did",
  "can", "will", "would", "should", "could", "may", "might", "have", "has", "had", "into", "about", "over", "than",
];

#[derive(Debug, Clone, Copy)]
pub struct KeyphraseConfig {
  pub min_ngram: usize,
  pub max_ngram: usize,
  pub top_k: usize,
  pub lambda: f32,
  pub tau: f32,
}

impl Default for KeyphraseConfig {
  fn default() -> Self {
    Self {
      min_ngram: MIN_NGRAM,
      max_ngram: MAX_NGRAM,
      top_k: DEFAULT_TOP_K,
      lambda: DEFAULT_LAMBDA,
      tau: DEFAULT_TAU,
    }
  }
}

/// Result of extraction: the ranked phrases plus the observability ratio of
/// multiword (n>1) phrases among those returned.
#[derive(Debug, Clone, Default)]
pub struct KeyphraseResult {
  pub phrases: Vec<String>,
  pub multiword_ratio: f64,
}

/// Whether the caller has an embedding model on hand, and which capacity
/// class it falls in for candidate pre-capping (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelAvailability {
  Unavailable,
  CpuOnly,
  BatchCapable,
}

/// Extract candidate n-grams, filter by quality, then rank.
///
/// `embed` is a closure that embeds a candidate phrase; when `availability`
/// is [`ModelAvailability::Unavailable`] it is never called and ranking
/// falls back to raw frequency.
pub fn extract_key_phrases<E>(
  text: &str,
  config: &KeyphraseConfig,
  availability: ModelAvailability,
  document_embedding: Option<&[f32]>,
  mut embed: E,
) -> KeyphraseResult
where
  E: FnMut(&str) -> Option<Vec<f32>>,
{
  let mut candidates = candidate_ngrams(text, config.min_ngram, config.max_ngram);
  if candidates.is_empty() {
    return KeyphraseResult::default();
  }

  let cap = match availability {
    ModelAvailability::Unavailable => usize::MAX,
    ModelAvailability::CpuOnly => CPU_CANDIDATE_CAP,
    ModelAvailability::BatchCapable => BATCH_CANDIDATE_CAP,
  };
  if candidates.len() > cap {
    candidates.truncate(cap);
  }

  let phrases = match (availability, document_embedding) {
    (ModelAvailability::Unavailable, _) | (_, None) => frequency_rank(&candidates, config.top_k),
    (_, Some(doc_vec)) => mmr_rank(&candidates, doc_vec, config, &mut embed),
  };

  let multiword = phrases.iter().filter(|p| p.split_whitespace().count() > 1).count();
  let multiword_ratio = if phrases.is_empty() { 0.0 } else { multiword as f64 / phrases.len() as f64 };

  KeyphraseResult { phrases, multiword_ratio }
}

/// Candidate phrases in descending order of first occurrence, deduplicated,
/// ranked by frequency then n-gram length (longer phrases favoured on ties).
fn frequency_rank(candidates: &[String], top_k: usize) -> Vec<String> {
  let mut counts: HashMap<&str, usize> = HashMap::new();
  for c in candidates {
    *counts.entry(c.as_str()).or_insert(0) += 1;
  }

  let mut seen = HashSet::new();
  let mut unique: Vec<&String> = candidates.iter().filter(|c| seen.insert(c.as_str())).collect();

  unique.sort_by(|a, b| {
    let count_a = counts[a.as_str()];
    let count_b = counts[b.as_str()];
    count_b.cmp(&count_a).then_with(|| b.split_whitespace().count().cmp(&a.split_whitespace().count()))
  });

  unique.into_iter().take(top_k).cloned().collect()
}

/// Maximal Marginal Relevance re-ranking: greedily pick the candidate that
/// maximises `lambda * relevance - (1 - lambda) * max_similarity_to_selected`,
/// skipping candidates whose relevance falls below `tau`.
fn mmr_rank<E>(candidates: &[String], document_embedding: &[f32], config: &KeyphraseConfig, embed: &mut E) -> Vec<String>
where
  E: FnMut(&str) -> Option<Vec<f32>>,
{
  let mut seen = HashSet::new();
  let unique: Vec<&String> = candidates.iter().filter(|c| seen.insert(c.as_str())).collect();

  let mut embedded: Vec<(String, Vec<f32>, f32)> = Vec::new();
  for phrase in unique {
    let Some(vec) = embed(phrase) else { continue };
    let relevance = fmcore::cosine_similarity(&vec, document_embedding);
    if relevance < config.tau {
      continue;
    }
    embedded.push((phrase.clone(), vec, relevance));
  }

  if embedded.is_empty() {
    return Vec::new();
  }

  let mut selected: Vec<(String, Vec<f32>)> = Vec::new();
  let mut remaining = embedded;

  while selected.len() < config.top_k && !remaining.is_empty() {
    let mut best_idx = 0;
    let mut best_score = f32::MIN;

    for (idx, (_, vec, relevance)) in remaining.iter().enumerate() {
      let max_sim_to_selected =
        selected.iter().map(|(_, sv)| fmcore::cosine_similarity(vec, sv)).fold(0.0f32, f32::max);
      let score = config.lambda * relevance - (1.0 - config.lambda) * max_sim_to_selected;
      if score > best_score {
        best_score = score;
        best_idx = idx;
      }
    }

    let (phrase, vec, _) = remaining.remove(best_idx);
    selected.push((phrase, vec));
  }

  selected.into_iter().map(|(p, _)| p).collect()
}

/// Generate n-gram candidates (n in `[min_n, max_n]`) from whitespace/
/// punctuation tokenisation, filtered by stopword ratio, length bounds, and
/// pure-numeric exclusion.
pub fn candidate_ngrams(text: &str, min_n: usize, max_n: usize) -> Vec<String> {
  let tokens: Vec<String> =
    text.split(|c: char| !c.is_alphanumeric() && c != '-').filter(|t| !t.is_empty()).map(|t| t.to_lowercase()).collect();

  let mut candidates = Vec::new();
  for n in min_n..=max_n {
    if tokens.len() < n {
      continue;
    }
    for window in tokens.windows(n) {
      if !passes_quality(window) {
        continue;
      }
      candidates.push(window.join(" "));
    }
  }
  candidates
}

fn passes_quality(window: &[String]) -> bool {
  let joined_len: usize = window.iter().map(|w| w.len()).sum();
  if joined_len < MIN_PHRASE_LEN {
    return false;
  }
  if window.iter().all(|w| w.chars().all(|c| c.is_ascii_digit())) {
    return false;
  }
  let stopword_count = window.iter().filter(|w| STOPWORDS.contains(&w.as_str())) .count();
  // Reject windows that are entirely stopwords, and require the first/last
  // token not be a stopword so phrases don't straddle clause boundaries.
  if stopword_count == window.len() {
    return false;
  }
  let first_is_stop = STOPWORDS.contains(&window[0].as_str());
  let last_is_stop = STOPWORDS.contains(&window[window.len() - 1].as_str());
  !first_is_stop && !last_is_stop
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn frequency_fallback_ranks_by_count() {
    let text = "graph database graph database graph database vector search engine";
    let result = extract_key_phrases(text, &KeyphraseConfig::default(), ModelAvailability::Unavailable, None, |_| None);
    assert!(!result.phrases.is_empty());
    assert_eq!(result.phrases[0], "graph database");
  }

  #[test]
  fn multiword_ratio_is_one_when_all_phrases_are_ngrams() {
    let text = "semantic vector search semantic vector search indexing pipeline";
    let result = extract_key_phrases(text, &KeyphraseConfig::default(), ModelAvailability::Unavailable, None, |_| None);
    assert!((result.multiword_ratio - 1.0).abs() < 1e-9);
  }

  #[test]
  fn empty_text_yields_no_phrases() {
    let result = extract_key_phrases("", &KeyphraseConfig::default(), ModelAvailability::Unavailable, None, |_| None);
    assert!(result.phrases.is_empty());
    assert_eq!(result.multiword_ratio, 0.0);
  }

  #[test]
  fn stopword_only_windows_are_filtered() {
    let candidates = candidate_ngrams("of the and but", 2, 2);
    assert!(candidates.is_empty());
  }

  #[test]
  fn mmr_respects_tau_threshold() {
    let doc_vec = vec![1.0, 0.0, 0.0];
    let config = KeyphraseConfig {
      tau: 0.9,
      ..KeyphraseConfig::default()
    };
    let result = extract_key_phrases(
      "alpha beta gamma delta epsilon zeta",
      &config,
      ModelAvailability::BatchCapable,
      Some(&doc_vec),
      |phrase| if phrase.contains("alpha") { Some(vec![1.0, 0.0, 0.0]) } else { Some(vec![0.0, 1.0, 0.0]) },
    );
    assert!(result.phrases.iter().all(|p| p.contains("alpha")));
  }

  #[test]
  fn mmr_caps_at_top_k() {
    let doc_vec = vec![1.0, 0.0];
    let config = KeyphraseConfig {
      top_k: 2,
      tau: 0.0,
      ..KeyphraseConfig::default()
    };
    let text = "one two three four five six seven eight nine ten eleven twelve";
    let result =
      extract_key_phrases(text, &config, ModelAvailability::BatchCapable, Some(&doc_vec), |_| Some(vec![1.0, 0.0]));
    assert!(result.phrases.len() <= 2);
  }

  #[test]
  fn candidate_cap_applies_for_cpu_only_models() {
    let long_text = (0..100).map(|i| format!("token{i}")).collect::<Vec<_>>().join(" ");
    let doc_vec = vec![1.0];
    let mut embed_calls = 0usize;
    let _ = extract_key_phrases(
      &long_text,
      &KeyphraseConfig::default(),
      ModelAvailability::CpuOnly,
      Some(&doc_vec),
      |_| {
        embed_calls += 1;
        Some(vec![1.0])
      },
    );
    assert!(embed_calls <= CPU_CANDIDATE_CAP);
  }
}
