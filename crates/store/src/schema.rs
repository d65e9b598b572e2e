use arrow_schema::{DataType, Field, Schema};
use std::sync::Arc;

/// Schema for the `chunks` table: one row per `Chunk`, including the
/// semantic-enrichment columns attached once enrichment runs.
pub fn chunks_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("owner_hash", DataType::Utf8, false),
    Field::new("chunk_index", DataType::UInt32, false),
    Field::new("total_chunks", DataType::UInt32, false),
    Field::new("content", DataType::Utf8, false),
    Field::new("start_offset", DataType::UInt32, false),
    Field::new("end_offset", DataType::UInt32, false),
    Field::new("token_count", DataType::UInt32, false),
    Field::new("extraction_json", DataType::Utf8, false),
    Field::new("key_phrases", DataType::Utf8, true), // JSON array
    Field::new("topics", DataType::Utf8, true),      // JSON array
    Field::new("readability_score", DataType::Float64, true),
    Field::new("multiword_ratio", DataType::Float64, true),
    Field::new("semantic_processed", DataType::Boolean, false),
  ]))
}

/// Schema for the `embeddings` table, keyed by `(owner_hash, chunk_index)`.
pub fn embeddings_schema(vector_dim: usize) -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("owner_hash", DataType::Utf8, false),
    Field::new("chunk_index", DataType::UInt32, false),
    Field::new("model_id", DataType::Utf8, false),
    Field::new("created_at", DataType::Int64, false),
    Field::new(
      "vector",
      DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), vector_dim as i32),
      true,
    ),
  ]))
}

/// Schema for the `fingerprints` table: one row per indexed file, keyed by
/// relative path within the owning folder.
pub fn fingerprints_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("relative_path", DataType::Utf8, false),
    Field::new("content_hash", DataType::Utf8, false),
    Field::new("size", DataType::UInt64, false),
    Field::new("mtime", DataType::Int64, false),
  ]))
}

/// Default vector dimensions, matching the default embedding model.
pub const DEFAULT_VECTOR_DIM: usize = 768;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chunks_schema_has_semantic_columns() {
    let schema = chunks_schema();
    assert!(schema.field_with_name("key_phrases").is_ok());
    assert!(schema.field_with_name("readability_score").is_ok());
    assert!(schema.field_with_name("semantic_processed").is_ok());
  }

  #[test]
  fn embeddings_schema_has_vector_column() {
    let schema = embeddings_schema(768);
    assert!(schema.field_with_name("vector").is_ok());
    assert!(schema.field_with_name("owner_hash").is_ok());
  }

  #[test]
  fn fingerprints_schema_has_content_hash() {
    let schema = fingerprints_schema();
    assert!(schema.field_with_name("content_hash").is_ok());
  }
}
