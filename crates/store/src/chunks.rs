//! Chunk and embedding persistence: content-addressed by `(owner_hash,
//! chunk_index)`, re-extractable from the stored `extraction_json` without
//! re-parsing the source file.

use arrow_array::{Array, BooleanArray, FixedSizeListArray, Float32Array, Float64Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt32Array};
use fmcore::{Chunk, EmbeddingRecord, ExtractionCoords, SemanticMetadata};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use crate::connection::{DbError, FolderDb, Result};
use crate::schema::{chunks_schema, embeddings_schema};

impl FolderDb {
  pub async fn add_chunk(&self, chunk: &Chunk) -> Result<()> {
    let table = self.chunks_table().await?;
    let batch = chunk_to_batch(chunk)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], chunks_schema());
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn add_chunks(&self, chunks: &[Chunk]) -> Result<()> {
    if chunks.is_empty() {
      return Ok(());
    }
    let table = self.chunks_table().await?;
    let batches: Vec<RecordBatch> = chunks.iter().map(chunk_to_batch).collect::<Result<Vec<_>>>()?;
    let iter = RecordBatchIterator::new(batches.into_iter().map(Ok), chunks_schema());
    table.add(Box::new(iter)).execute().await?;
    Ok(())
  }

  /// All chunks sharing `owner_hash`, ordered by `chunk_index`.
  pub async fn get_chunks(&self, owner_hash: &str) -> Result<Vec<Chunk>> {
    let table = self.chunks_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("owner_hash = '{}'", owner_hash))
      .execute()
      .await?
      .try_collect()
      .await?;

    let mut chunks = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        chunks.push(batch_to_chunk(batch, i)?);
      }
    }
    chunks.sort_by_key(|c| c.chunk_index);
    Ok(chunks)
  }

  /// Drop every chunk (and its embedding) owned by `owner_hash` — used when
  /// a file's content hash changes or the file is removed.
  pub async fn delete_chunks(&self, owner_hash: &str) -> Result<()> {
    let chunks = self.chunks_table().await?;
    chunks.delete(&format!("owner_hash = '{}'", owner_hash)).await?;
    let embeddings = self.embeddings_table().await?;
    embeddings.delete(&format!("owner_hash = '{}'", owner_hash)).await?;
    Ok(())
  }

  pub async fn count_chunks(&self, filter: Option<&str>) -> Result<usize> {
    let table = self.chunks_table().await?;
    Ok(table.count_rows(filter.map(String::from)).await?)
  }

  pub async fn add_embedding(&self, record: &EmbeddingRecord) -> Result<()> {
    let table = self.embeddings_table().await?;
    let batch = embedding_to_batch(record, self.vector_dim)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], embeddings_schema(self.vector_dim));
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn add_embeddings(&self, records: &[EmbeddingRecord]) -> Result<()> {
    if records.is_empty() {
      return Ok(());
    }
    let table = self.embeddings_table().await?;
    let schema = embeddings_schema(self.vector_dim);
    let batches: Vec<RecordBatch> = records
      .iter()
      .map(|r| embedding_to_batch(r, self.vector_dim))
      .collect::<Result<Vec<_>>>()?;
    let iter = RecordBatchIterator::new(batches.into_iter().map(Ok), schema);
    table.add(Box::new(iter)).execute().await?;
    Ok(())
  }

  /// Top `limit` nearest embeddings to `query_vector`, with LanceDB's raw
  /// `_distance` column returned alongside each `(owner_hash, chunk_index)`.
  pub async fn search_embeddings(&self, query_vector: &[f32], limit: usize) -> Result<Vec<(String, usize, f32)>> {
    let table = self.embeddings_table().await?;
    let results: Vec<RecordBatch> = table.vector_search(query_vector.to_vec())?.limit(limit).execute().await?.try_collect().await?;

    let mut hits = Vec::new();
    for batch in &results {
      let owner_hashes = batch
        .column_by_name("owner_hash")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| DbError::NotFound("owner_hash column".to_string()))?;
      let chunk_indices = batch
        .column_by_name("chunk_index")
        .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
        .ok_or_else(|| DbError::NotFound("chunk_index column".to_string()))?;
      let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

      for i in 0..batch.num_rows() {
        let distance = distances.map(|arr| arr.value(i)).unwrap_or(0.0);
        hits.push((owner_hashes.value(i).to_string(), chunk_indices.value(i) as usize, distance));
      }
    }
    Ok(hits)
  }
}

fn chunk_to_batch(chunk: &Chunk) -> Result<RecordBatch> {
  let extraction_json = serde_json::to_string(&chunk.extraction)?;
  let (key_phrases, topics, readability, multiword) = match &chunk.semantic {
    Some(s) => (
      Some(serde_json::to_string(&s.key_phrases)?),
      Some(serde_json::to_string(&s.topics)?),
      Some(s.readability_score),
      Some(s.multiword_ratio),
    ),
    None => (None, None, None, None),
  };

  let batch = RecordBatch::try_new(
    chunks_schema(),
    vec![
      Arc::new(StringArray::from(vec![chunk.owner_hash.clone()])),
      Arc::new(UInt32Array::from(vec![chunk.chunk_index as u32])),
      Arc::new(UInt32Array::from(vec![chunk.total_chunks as u32])),
      Arc::new(StringArray::from(vec![chunk.content.clone()])),
      Arc::new(UInt32Array::from(vec![chunk.start_offset as u32])),
      Arc::new(UInt32Array::from(vec![chunk.end_offset as u32])),
      Arc::new(UInt32Array::from(vec![chunk.token_count as u32])),
      Arc::new(StringArray::from(vec![extraction_json])),
      Arc::new(StringArray::from(vec![key_phrases])),
      Arc::new(StringArray::from(vec![topics])),
      Arc::new(Float64Array::from(vec![readability])),
      Arc::new(Float64Array::from(vec![multiword])),
      Arc::new(BooleanArray::from(vec![chunk.semantic.is_some()])),
    ],
  )?;
  Ok(batch)
}

fn batch_to_chunk(batch: &RecordBatch, row: usize) -> Result<Chunk> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };
  let get_u32 = |name: &str| -> Result<u32> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<UInt32Array>())
      .map(|a| a.value(row))
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };

  let extraction: ExtractionCoords = serde_json::from_str(&get_string("extraction_json")?)?;
  let semantic_processed = batch
    .column_by_name("semantic_processed")
    .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
    .map(|a| a.value(row))
    .unwrap_or(false);

  let semantic = if semantic_processed {
    let key_phrases_col = batch.column_by_name("key_phrases").and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let topics_col = batch.column_by_name("topics").and_then(|c| c.as_any().downcast_ref::<StringArray>());
    let readability_col = batch.column_by_name("readability_score").and_then(|c| c.as_any().downcast_ref::<Float64Array>());
    let multiword_col = batch.column_by_name("multiword_ratio").and_then(|c| c.as_any().downcast_ref::<Float64Array>());

    Some(SemanticMetadata {
      key_phrases: key_phrases_col
        .filter(|a| !a.is_null(row))
        .map(|a| serde_json::from_str(a.value(row)).unwrap_or_default())
        .unwrap_or_default(),
      topics: topics_col
        .filter(|a| !a.is_null(row))
        .map(|a| serde_json::from_str(a.value(row)).unwrap_or_default())
        .unwrap_or_default(),
      readability_score: readability_col.filter(|a| !a.is_null(row)).map(|a| a.value(row)).unwrap_or(0.0),
      multiword_ratio: multiword_col.filter(|a| !a.is_null(row)).map(|a| a.value(row)).unwrap_or(0.0),
    })
  } else {
    None
  };

  Ok(Chunk {
    owner_hash: get_string("owner_hash")?,
    chunk_index: get_u32("chunk_index")? as usize,
    total_chunks: get_u32("total_chunks")? as usize,
    content: get_string("content")?,
    start_offset: get_u32("start_offset")? as usize,
    end_offset: get_u32("end_offset")? as usize,
    token_count: get_u32("token_count")? as usize,
    extraction,
    semantic,
  })
}

fn embedding_to_batch(record: &EmbeddingRecord, vector_dim: usize) -> Result<RecordBatch> {
  let mut vec_padded = record.vector.clone();
  vec_padded.resize(vector_dim, 0.0);
  let field = Arc::new(arrow_schema::Field::new("item", arrow_schema::DataType::Float32, true));
  let vector_list = FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(Float32Array::from(vec_padded)), None)?;

  let batch = RecordBatch::try_new(
    embeddings_schema(vector_dim),
    vec![
      Arc::new(StringArray::from(vec![record.owner_hash.clone()])),
      Arc::new(UInt32Array::from(vec![record.chunk_index as u32])),
      Arc::new(StringArray::from(vec![record.model_id.clone()])),
      Arc::new(Int64Array::from(vec![record.created_at.timestamp_millis()])),
      Arc::new(vector_list),
    ],
  )?;
  Ok(batch)
}
