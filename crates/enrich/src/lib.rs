//! Semantic enrichment: key-phrase extraction and readability scoring,
//! producing the `SemanticMetadata` attached to each chunk.

pub mod keyphrase;
pub mod readability;

pub use keyphrase::{KeyphraseConfig, KeyphraseResult, ModelAvailability, extract_key_phrases};
pub use readability::coleman_liau;

use fmcore::SemanticMetadata;

/// Run both key-phrase extraction and readability scoring over a chunk's
/// content, producing the metadata attached to it.
pub fn enrich<E>(
  text: &str,
  config: &KeyphraseConfig,
  availability: ModelAvailability,
  document_embedding: Option<&[f32]>,
  embed: E,
) -> SemanticMetadata
where
  E: FnMut(&str) -> Option<Vec<f32>>,
{
  let keyphrases = extract_key_phrases(text, config, availability, document_embedding, embed);
  let readability_score = coleman_liau(text);

  SemanticMetadata {
    key_phrases: keyphrases.phrases,
    topics: Vec::new(),
    readability_score,
    multiword_ratio: keyphrases.multiword_ratio,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn enrich_populates_readability_even_without_a_model() {
    let metadata = enrich(
      "The graph database indexes documents. Search returns ranked results.",
      &KeyphraseConfig::default(),
      ModelAvailability::Unavailable,
      None,
      |_| None,
    );
    assert!((40.0..=60.0).contains(&metadata.readability_score));
  }

  #[test]
  fn enrich_leaves_topics_empty() {
    let metadata = enrich("some text here", &KeyphraseConfig::default(), ModelAvailability::Unavailable, None, |_| None);
    assert!(metadata.topics.is_empty());
  }
}
