use crate::schema::{DEFAULT_VECTOR_DIM, chunks_schema, embeddings_schema, fingerprints_schema};
use lancedb::{Connection, connect};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum DbError {
  #[error("LanceDB error: {0}")]
  Lance(#[from] lancedb::Error),
  #[error("Arrow error: {0}")]
  Arrow(#[from] arrow::error::ArrowError),
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("Not found: {0}")]
  NotFound(String),
  #[error("Serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// One folder's structured store: `embeddings.db` under its hidden
/// `.folder-mcp-cache` directory, holding the chunk, embedding, and
/// fingerprint tables.
pub struct FolderDb {
  pub path: PathBuf,
  pub connection: Connection,
  pub vector_dim: usize,
}

impl FolderDb {
  /// Open or create the store for a folder rooted at `folder_path`.
  pub async fn open(folder_path: &std::path::Path, vector_dim: usize) -> Result<Self> {
    let db_path = folder_path.join(".folder-mcp-cache").join("embeddings.db");
    Self::open_at_path(db_path, vector_dim).await
  }

  pub async fn open_at_path(db_path: PathBuf, vector_dim: usize) -> Result<Self> {
    if let Some(parent) = db_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    info!(path = %db_path.display(), "opening folder store");
    let connection = connect(db_path.to_string_lossy().as_ref()).execute().await?;

    let db = Self {
      path: db_path,
      connection,
      vector_dim,
    };

    db.ensure_tables().await?;
    Ok(db)
  }

  async fn ensure_tables(&self) -> Result<()> {
    let table_names = self.connection.table_names().execute().await?;

    if !table_names.contains(&"chunks".to_string()) {
      debug!("creating chunks table");
      self.connection.create_empty_table("chunks", chunks_schema()).execute().await?;
    }

    if !table_names.contains(&"embeddings".to_string()) {
      debug!("creating embeddings table");
      self
        .connection
        .create_empty_table("embeddings", embeddings_schema(self.vector_dim))
        .execute()
        .await?;
    }

    if !table_names.contains(&"fingerprints".to_string()) {
      debug!("creating fingerprints table");
      self
        .connection
        .create_empty_table("fingerprints", fingerprints_schema())
        .execute()
        .await?;
    }

    Ok(())
  }

  pub async fn chunks_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("chunks").execute().await?)
  }

  pub async fn embeddings_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("embeddings").execute().await?)
  }

  pub async fn fingerprints_table(&self) -> Result<lancedb::Table> {
    Ok(self.connection.open_table("fingerprints").execute().await?)
  }
}

pub fn default_vector_dim() -> usize {
  DEFAULT_VECTOR_DIM
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[tokio::test]
  async fn opens_and_creates_tables() {
    let temp = TempDir::new().unwrap();
    let db = FolderDb::open_at_path(temp.path().join("test.lancedb"), 768).await.unwrap();
    let tables = db.connection.table_names().execute().await.unwrap();
    assert!(tables.contains(&"chunks".to_string()));
    assert!(tables.contains(&"embeddings".to_string()));
    assert!(tables.contains(&"fingerprints".to_string()));
  }
}
