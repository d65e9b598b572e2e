//! Forward-only schema evolution for the folder store, version-tracked in a
//! `_migrations` metadata table.

use crate::connection::{DbError, FolderDb, Result};
use crate::schema::*;
use arrow_array::{Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::ExecutableQuery;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

fn migrations_schema() -> Arc<Schema> {
  Arc::new(Schema::new(vec![
    Field::new("version", DataType::Int64, false),
    Field::new("name", DataType::Utf8, false),
    Field::new("applied_at", DataType::Int64, false),
  ]))
}

#[derive(Debug, Clone)]
pub struct Migration {
  pub version: i64,
  pub name: &'static str,
  pub description: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[Migration {
  version: 1,
  name: "initial_schema",
  description: "chunks, embeddings and fingerprints tables",
}];

#[derive(Debug, Clone)]
pub struct MigrationRecord {
  pub version: i64,
  pub name: String,
  pub applied_at: i64,
}

impl FolderDb {
  pub async fn run_migrations(&self) -> Result<Vec<MigrationRecord>> {
    self.ensure_migrations_table().await?;

    let current_version = self.get_current_version().await?;
    info!(current_version, target = CURRENT_SCHEMA_VERSION, "checking folder store schema version");

    let pending: Vec<_> = MIGRATIONS.iter().filter(|m| m.version > current_version).collect();
    if pending.is_empty() {
      debug!("no pending migrations");
      return Ok(Vec::new());
    }

    let mut applied = Vec::new();
    for migration in pending {
      info!(version = migration.version, name = migration.name, "applying migration");
      self.apply_migration(migration).await?;
      applied.push(self.record_migration(migration).await?);
    }

    Ok(applied)
  }

  async fn ensure_migrations_table(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;
    if !table_names.contains(&"_migrations".to_string()) {
      self
        .connection
        .create_empty_table("_migrations", migrations_schema())
        .execute()
        .await?;
    }
    Ok(())
  }

  pub async fn get_current_version(&self) -> Result<i64> {
    let table = match self.connection.open_table("_migrations").execute().await {
      Ok(t) => t,
      Err(_) => return Ok(0),
    };

    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;

    let mut max_version = 0i64;
    for batch in results {
      if batch.num_rows() == 0 {
        continue;
      }
      let versions = batch
        .column_by_name("version")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| DbError::NotFound("version column".to_string()))?;
      for i in 0..versions.len() {
        max_version = max_version.max(versions.value(i));
      }
    }

    Ok(max_version)
  }

  async fn apply_migration(&self, migration: &Migration) -> Result<()> {
    match migration.version {
      1 => self.migrate_v1_initial_schema().await,
      v => {
        warn!(version = v, "unknown migration version, skipping");
        Ok(())
      }
    }
  }

  async fn record_migration(&self, migration: &Migration) -> Result<MigrationRecord> {
    let table = self.connection.open_table("_migrations").execute().await?;
    let applied_at = Utc::now().timestamp_millis();

    let batch = RecordBatch::try_new(
      migrations_schema(),
      vec![
        Arc::new(Int64Array::from(vec![migration.version])),
        Arc::new(StringArray::from(vec![migration.name])),
        Arc::new(Int64Array::from(vec![applied_at])),
      ],
    )?;

    let batches = RecordBatchIterator::new(vec![Ok(batch)], migrations_schema());
    table.add(Box::new(batches)).execute().await?;

    Ok(MigrationRecord {
      version: migration.version,
      name: migration.name.to_string(),
      applied_at,
    })
  }

  pub async fn get_migration_history(&self) -> Result<Vec<MigrationRecord>> {
    self.ensure_migrations_table().await?;
    let table = self.connection.open_table("_migrations").execute().await?;
    let results: Vec<RecordBatch> = table.query().execute().await?.try_collect().await?;

    let mut records = Vec::new();
    for batch in results {
      if batch.num_rows() == 0 {
        continue;
      }
      let versions = batch
        .column_by_name("version")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| DbError::NotFound("version column".to_string()))?;
      let names = batch
        .column_by_name("name")
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| DbError::NotFound("name column".to_string()))?;
      let applied_ats = batch
        .column_by_name("applied_at")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
        .ok_or_else(|| DbError::NotFound("applied_at column".to_string()))?;

      for i in 0..batch.num_rows() {
        records.push(MigrationRecord {
          version: versions.value(i),
          name: names.value(i).to_string(),
          applied_at: applied_ats.value(i),
        });
      }
    }

    records.sort_by_key(|r| r.version);
    Ok(records)
  }

  async fn migrate_v1_initial_schema(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;

    if !table_names.contains(&"chunks".to_string()) {
      self.connection.create_empty_table("chunks", chunks_schema()).execute().await?;
    }
    if !table_names.contains(&"embeddings".to_string()) {
      self
        .connection
        .create_empty_table("embeddings", embeddings_schema(self.vector_dim))
        .execute()
        .await?;
    }
    if !table_names.contains(&"fingerprints".to_string()) {
      self
        .connection
        .create_empty_table("fingerprints", fingerprints_schema())
        .execute()
        .await?;
    }

    Ok(())
  }

  pub async fn needs_migration(&self) -> Result<bool> {
    Ok(self.get_current_version().await? < CURRENT_SCHEMA_VERSION)
  }

  pub async fn pending_migrations(&self) -> Result<Vec<&'static Migration>> {
    let current = self.get_current_version().await?;
    Ok(MIGRATIONS.iter().filter(|m| m.version > current).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn migrations_run_on_new_store() {
    let temp = TempDir::new().unwrap();
    let db = FolderDb::open_at_path(temp.path().join("test.lancedb"), 768).await.unwrap();

    let applied = db.run_migrations().await.unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(db.get_current_version().await.unwrap(), 1);
  }

  #[tokio::test]
  async fn migrations_are_idempotent() {
    let temp = TempDir::new().unwrap();
    let db = FolderDb::open_at_path(temp.path().join("test.lancedb"), 768).await.unwrap();

    let first = db.run_migrations().await.unwrap();
    let second = db.run_migrations().await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 0);
  }

  #[test]
  fn migrations_have_unique_ascending_versions() {
    let mut versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
    let original_len = versions.len();
    versions.sort();
    versions.dedup();
    assert_eq!(versions.len(), original_len);
    for i in 1..MIGRATIONS.len() {
      assert!(MIGRATIONS[i].version > MIGRATIONS[i - 1].version);
    }
  }
}
