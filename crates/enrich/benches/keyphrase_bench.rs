//! Benchmarks for key-phrase extraction and readability scoring.
//!
//! Run with: cargo bench -p enrich --bench keyphrase_bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use enrich::{KeyphraseConfig, ModelAvailability, coleman_liau, extract_key_phrases};

fn generate_prose(paragraphs: usize) -> String {
  let mut text = String::new();
  for i in 0..paragraphs {
    text.push_str(&format!(
      "Vector search engines index semantic embeddings and retrieve similar documents for query number {i}. \
       Graph databases and relational databases differ in how they model connected entities. "
    ));
  }
  text
}

fn bench_frequency_fallback(c: &mut Criterion) {
  let mut group = c.benchmark_group("keyphrase_frequency_fallback");
  let config = KeyphraseConfig::default();

  for size in [1, 10, 50].iter() {
    let text = generate_prose(*size);
    group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
      b.iter(|| extract_key_phrases(black_box(text), &config, ModelAvailability::Unavailable, None, |_| None));
    });
  }

  group.finish();
}

fn bench_mmr_ranking(c: &mut Criterion) {
  let mut group = c.benchmark_group("keyphrase_mmr");
  let config = KeyphraseConfig::default();
  let doc_vec = vec![0.5f32; 16];

  for size in [1, 10, 50].iter() {
    let text = generate_prose(*size);
    group.bench_with_input(BenchmarkId::from_parameter(size), &text, |b, text| {
      b.iter(|| {
        extract_key_phrases(black_box(text), &config, ModelAvailability::BatchCapable, Some(&doc_vec), |phrase| {
          let seed = phrase.len() as f32;
          Some(vec![seed % 7.0; 16])
        })
      });
    });
  }

  group.finish();
}

fn bench_readability(c: &mut Criterion) {
  let mut group = c.benchmark_group("coleman_liau");
  let text = generate_prose(100);

  group.bench_function("100_paragraphs", |b| {
    b.iter(|| coleman_liau(black_box(&text)));
  });

  group.finish();
}

criterion_group!(benches, bench_frequency_fallback, bench_mmr_ranking, bench_readability);
criterion_main!(benches);
