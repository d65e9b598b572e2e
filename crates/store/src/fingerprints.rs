//! Fingerprint persistence: one row per indexed file, keyed by relative
//! path, used by the scan phase's two sweeps to diagnose Create/Update/
//! Remove without re-reading file content.

use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray, UInt64Array};
use fmcore::Fingerprint;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use std::sync::Arc;

use crate::connection::{DbError, FolderDb, Result};
use crate::schema::fingerprints_schema;

impl FolderDb {
  pub async fn upsert_fingerprint(&self, fp: &Fingerprint) -> Result<()> {
    self.delete_fingerprint(&fp.relative_path).await?;
    let table = self.fingerprints_table().await?;
    let batch = fingerprint_to_batch(fp)?;
    let batches = RecordBatchIterator::new(vec![Ok(batch)], fingerprints_schema());
    table.add(Box::new(batches)).execute().await?;
    Ok(())
  }

  pub async fn get_fingerprint(&self, relative_path: &str) -> Result<Option<Fingerprint>> {
    let table = self.fingerprints_table().await?;
    let results: Vec<RecordBatch> = table
      .query()
      .only_if(format!("relative_path = '{}'", escape(relative_path)))
      .limit(1)
      .execute()
      .await?
      .try_collect()
      .await?;

    for batch in &results {
      if batch.num_rows() > 0 {
        return Ok(Some(batch_to_fingerprint(batch, 0)?));
      }
    }
    Ok(None)
  }

  pub async fn delete_fingerprint(&self, relative_path: &str) -> Result<()> {
    let table = self.fingerprints_table().await?;
    table.delete(&format!("relative_path = '{}'", escape(relative_path))).await?;
    Ok(())
  }

  /// All fingerprints currently on record for this folder, used by sweep 2
  /// (db→folder) to find entries no longer present on disk.
  pub async fn list_fingerprints(&self) -> Result<Vec<Fingerprint>> {
    let table = self.fingerprints_table().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;

    let mut out = Vec::new();
    for batch in &results {
      for i in 0..batch.num_rows() {
        out.push(batch_to_fingerprint(batch, i)?);
      }
    }
    Ok(out)
  }
}

fn escape(s: &str) -> String {
  s.replace('\'', "''")
}

fn fingerprint_to_batch(fp: &Fingerprint) -> Result<RecordBatch> {
  let batch = RecordBatch::try_new(
    fingerprints_schema(),
    vec![
      Arc::new(StringArray::from(vec![fp.relative_path.clone()])),
      Arc::new(StringArray::from(vec![fp.content_hash.clone()])),
      Arc::new(UInt64Array::from(vec![fp.size])),
      Arc::new(Int64Array::from(vec![fp.mtime])),
    ],
  )?;
  Ok(batch)
}

fn batch_to_fingerprint(batch: &RecordBatch, row: usize) -> Result<Fingerprint> {
  let get_string = |name: &str| -> Result<String> {
    batch
      .column_by_name(name)
      .and_then(|c| c.as_any().downcast_ref::<StringArray>())
      .map(|a| a.value(row).to_string())
      .ok_or_else(|| DbError::NotFound(format!("column {name}")))
  };
  let size = batch
    .column_by_name("size")
    .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
    .map(|a| a.value(row))
    .ok_or_else(|| DbError::NotFound("column size".to_string()))?;
  let mtime = batch
    .column_by_name("mtime")
    .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
    .map(|a| a.value(row))
    .ok_or_else(|| DbError::NotFound("column mtime".to_string()))?;

  Ok(Fingerprint {
    relative_path: get_string("relative_path")?,
    content_hash: get_string("content_hash")?,
    size,
    mtime,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  async fn test_db() -> (TempDir, FolderDb) {
    let temp = TempDir::new().unwrap();
    let db = FolderDb::open_at_path(temp.path().join("test.lancedb"), 4).await.unwrap();
    (temp, db)
  }

  #[tokio::test]
  async fn upsert_then_get_round_trips() {
    let (_t, db) = test_db().await;
    let fp = Fingerprint::new("a.md", b"hello", 100);
    db.upsert_fingerprint(&fp).await.unwrap();

    let got = db.get_fingerprint("a.md").await.unwrap().unwrap();
    assert_eq!(got.content_hash, fp.content_hash);
  }

  #[tokio::test]
  async fn upsert_replaces_existing_entry() {
    let (_t, db) = test_db().await;
    db.upsert_fingerprint(&Fingerprint::new("a.md", b"v1", 100)).await.unwrap();
    db.upsert_fingerprint(&Fingerprint::new("a.md", b"v2", 200)).await.unwrap();

    let all = db.list_fingerprints().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].content_hash, Fingerprint::new("a.md", b"v2", 200).content_hash);
  }

  #[tokio::test]
  async fn delete_removes_entry() {
    let (_t, db) = test_db().await;
    db.upsert_fingerprint(&Fingerprint::new("a.md", b"hello", 100)).await.unwrap();
    db.delete_fingerprint("a.md").await.unwrap();
    assert!(db.get_fingerprint("a.md").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn missing_fingerprint_is_none() {
    let (_t, db) = test_db().await;
    assert!(db.get_fingerprint("missing.md").await.unwrap().is_none());
  }
}
