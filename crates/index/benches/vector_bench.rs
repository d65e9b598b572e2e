//! Benchmarks for vector index search.
//!
//! Run with: cargo bench -p index --bench vector_bench

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use index::vector::{IndexEntry, VectorIndex};

const DIM: usize = 384;

fn pseudo_vector(seed: usize) -> Vec<f32> {
  (0..DIM).map(|i| ((seed * 31 + i) % 97) as f32 / 97.0).collect()
}

fn build_index(count: usize) -> VectorIndex {
  let mut index = VectorIndex::new();
  let entries: Vec<IndexEntry> = (0..count)
    .map(|i| IndexEntry {
      owner_hash: format!("owner{i}"),
      chunk_index: 0,
      folder_path: "/bench/folder".to_string(),
      model_id: "nomic-embed-text".to_string(),
      vector: pseudo_vector(i),
    })
    .collect();
  index.build(entries).unwrap();
  index
}

fn bench_search(c: &mut Criterion) {
  let mut group = c.benchmark_group("vector_search");

  for size in [100, 1_000, 10_000].iter() {
    let index = build_index(*size);
    let query = pseudo_vector(0);
    group.bench_with_input(BenchmarkId::from_parameter(size), &index, |b, index| {
      b.iter(|| index.search(black_box(&query), 10, 0.0));
    });
  }

  group.finish();
}

fn bench_persist_and_load(c: &mut Criterion) {
  let mut group = c.benchmark_group("vector_persist_load");
  let index = build_index(1_000);

  group.bench_function("persist_1000", |b| {
    b.iter(|| {
      let dir = tempfile::TempDir::new().unwrap();
      index.persist(black_box(dir.path())).unwrap();
    });
  });

  let dir = tempfile::TempDir::new().unwrap();
  index.persist(dir.path()).unwrap();
  group.bench_function("load_1000", |b| {
    b.iter(|| VectorIndex::load(black_box(dir.path())).unwrap());
  });

  group.finish();
}

criterion_group!(benches, bench_search, bench_persist_and_load);
criterion_main!(benches);
