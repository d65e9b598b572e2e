//! Benchmarks for document chunking operations
//!
//! Run with: cargo bench -p index --bench chunker_bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use index::chunker::{Chunker, ChunkerConfig};
use index::parser::{DocumentStructure, HeadingNode, ParsedDocument};
use fmcore::ChunkParams;

fn generate_flat_prose(paragraphs: usize) -> String {
  let mut text = String::new();
  for i in 0..paragraphs {
    text.push_str(&format!(
      "Paragraph {i} discusses a topic at some length, with enough filler words to approximate realistic prose for benchmarking the chunker's token-bounded splitting logic.\n\n"
    ));
  }
  text
}

fn generate_markdown_with_headings(sections: usize) -> (String, Vec<HeadingNode>) {
  let mut text = String::new();
  let mut headings = Vec::new();

  for i in 0..sections {
    let heading_line = format!("## Section {i}\n\n");
    headings.push(HeadingNode {
      level: 2,
      title: format!("Section {i}"),
      start_offset: text.len(),
    });
    text.push_str(&heading_line);
    for j in 0..5 {
      text.push_str(&format!(
        "This is paragraph {j} of section {i}, padded with filler words to resemble real document prose.\n\n"
      ));
    }
  }

  (text, headings)
}

fn bench_chunk_flat_prose(c: &mut Criterion) {
  let mut group = c.benchmark_group("chunk_flat_prose");
  let chunker = Chunker::default();

  for size in [50, 200, 1000, 2000].iter() {
    let text = generate_flat_prose(*size);
    let doc = ParsedDocument {
      text: text.clone(),
      structure: DocumentStructure::Flat,
    };
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_with_input(BenchmarkId::from_parameter(size), &doc, |b, doc| {
      b.iter(|| chunker.chunk(black_box(doc), "checksum123"));
    });
  }

  group.finish();
}

fn bench_chunk_headings(c: &mut Criterion) {
  let mut group = c.benchmark_group("chunk_headings");
  let chunker = Chunker::default();

  for sections in [10, 50, 100].iter() {
    let (text, headings) = generate_markdown_with_headings(*sections);
    let doc = ParsedDocument {
      text: text.clone(),
      structure: DocumentStructure::Headings(headings),
    };
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_with_input(BenchmarkId::from_parameter(sections), &doc, |b, doc| {
      b.iter(|| chunker.chunk(black_box(doc), "checksum456"));
    });
  }

  group.finish();
}

fn bench_chunk_with_small_token_budget(c: &mut Criterion) {
  let mut group = c.benchmark_group("chunk_small_token_budget");
  let chunker = Chunker::new(ChunkerConfig {
    params: ChunkParams {
      max_tokens: 64,
      min_tokens: 1,
    },
  });

  let text = generate_flat_prose(1000);
  let doc = ParsedDocument {
    text,
    structure: DocumentStructure::Flat,
  };

  group.bench_function("1000_paragraphs", |b| {
    b.iter(|| {
      let chunks = chunker.chunk(black_box(&doc), "checksum789");
      black_box(chunks.len())
    });
  });

  group.finish();
}

criterion_group!(
  benches,
  bench_chunk_flat_prose,
  bench_chunk_headings,
  bench_chunk_with_small_token_budget
);
criterion_main!(benches);
