//! Coleman-Liau readability, calibrated to a 40-60 band for technical prose.

const FALLBACK_SCORE: f64 = 50.0;

/// `raw = 0.0588*L - 0.296*S - 15.8`, `final = clamp(round(40 + raw*0.5), 40, 60)`
/// where `L` is letters per 100 words and `S` is sentences per 100 words.
/// Empty text or zero sentences fall back to 50.
pub fn coleman_liau(text: &str) -> f64 {
  let words = count_words(text);
  let sentences = count_sentences(text);
  let letters = count_letters(text);

  if words == 0 || sentences == 0 {
    return FALLBACK_SCORE;
  }

  let letters_per_100 = (letters as f64 / words as f64) * 100.0;
  let sentences_per_100 = (sentences as f64 / words as f64) * 100.0;
  let raw = 0.0588 * letters_per_100 - 0.296 * sentences_per_100 - 15.8;

  (40.0 + raw * 0.5).round().clamp(40.0, 60.0)
}

fn count_words(text: &str) -> usize {
  text.split_whitespace().filter(|w| w.chars().any(|c| c.is_alphanumeric())).count()
}

fn count_sentences(text: &str) -> usize {
  text.chars().filter(|&c| c == '.' || c == '!' || c == '?').count()
}

fn count_letters(text: &str) -> usize {
  text.chars().filter(|c| c.is_alphabetic()).count()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_text_falls_back_to_fifty() {
    assert_eq!(coleman_liau(""), 50.0);
  }

  #[test]
  fn whitespace_only_falls_back_to_fifty() {
    assert_eq!(coleman_liau("   \n\t "), 50.0);
  }

  #[test]
  fn score_is_clamped_to_forty_sixty_band() {
    let short = "Go. Run. Stop.";
    let score = coleman_liau(short);
    assert!((40.0..=60.0).contains(&score));
  }

  #[test]
  fn longer_words_push_score_toward_harder_end() {
    let simple = "The cat sat on the mat. It was a good day.";
    let complex = "Notwithstanding jurisdictional heterogeneity, the aforementioned stipulations necessitate comprehensive reconsideration.";
    assert!(coleman_liau(complex) >= coleman_liau(simple));
  }

  #[test]
  fn text_with_no_terminator_falls_back_to_fifty() {
    let text = "a sentence with no terminal punctuation at all just trailing off";
    assert_eq!(coleman_liau(text), 50.0);
  }

  #[test]
  fn one_word_falls_back_to_fifty() {
    assert_eq!(coleman_liau("hello"), 50.0);
  }
}
