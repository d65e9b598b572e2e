//! Owns every active folder's lifecycle manager (§4.8): validates folders
//! on add, starts/stops their managers, and mirrors model-download progress
//! across folders that share a model.

use crate::fmdm_broadcaster::FmdmBroadcaster;
use crate::folder_lifecycle::{FolderEvent, FolderLifecycleManager, ManagerCommand};
use embedding::EmbeddingPool;
use fmcore::{FolderConfig, FolderLifecycleState, LifecycleStatus, Notification, NotificationSeverity, is_ancestor_or_descendant, is_system_directory};
use index::{VectorIndex, VectorIndexError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum OrchestratorError {
  #[error("folder not found: {0}")]
  NotFound(PathBuf),
  #[error("folder does not exist or is not a directory: {0}")]
  InvalidPath(PathBuf),
  #[error("refusing to index a system directory: {0}")]
  SystemDirectory(PathBuf),
  #[error("{0} overlaps already-configured folder {1}")]
  Overlap(PathBuf, PathBuf),
  #[error("a folder named {0:?} is already configured")]
  DuplicateName(String),
  #[error("store error: {0}")]
  Store(#[from] store::DbError),
  #[error("vector index error: {0}")]
  VectorIndex(#[from] VectorIndexError),
}

struct FolderHandle {
  commands: mpsc::Sender<ManagerCommand>,
  manager_task: tokio::task::JoinHandle<()>,
  vector_index: Arc<RwLock<VectorIndex>>,
  db: Arc<store::FolderDb>,
}

/// `{folderPath → FolderLifecycleManager}`, the single point that adds,
/// validates, and removes folders for the running daemon.
pub struct Orchestrator {
  broadcaster: Arc<FmdmBroadcaster>,
  pool: Arc<EmbeddingPool>,
  vector_dim: usize,
  events: mpsc::UnboundedSender<FolderEvent>,
  folders: RwLock<HashMap<PathBuf, FolderHandle>>,
}

impl Orchestrator {
  pub fn new(broadcaster: Arc<FmdmBroadcaster>, pool: Arc<EmbeddingPool>, vector_dim: usize, events: mpsc::UnboundedSender<FolderEvent>) -> Arc<Self> {
    Arc::new(Self {
      broadcaster,
      pool,
      vector_dim,
      events,
      folders: RwLock::new(HashMap::new()),
    })
  }

  /// Check `config` against every add-time invariant: the path exists and
  /// is a directory, isn't a forbidden system directory, doesn't overlap an
  /// already-configured folder, and its name is unique among configured
  /// folders.
  pub async fn validate(&self, config: &FolderConfig) -> Result<(), OrchestratorError> {
    if !config.path.is_dir() {
      return Err(OrchestratorError::InvalidPath(config.path.clone()));
    }
    if is_system_directory(&config.path) {
      return Err(OrchestratorError::SystemDirectory(config.path.clone()));
    }

    let folders = self.folders.read().await;
    for existing in folders.keys() {
      if is_ancestor_or_descendant(&config.path, existing) {
        return Err(OrchestratorError::Overlap(config.path.clone(), existing.clone()));
      }
    }
    drop(folders);

    let snapshot = self.broadcaster.snapshot();
    if snapshot.folders.iter().any(|f| f.config.name == config.name && f.config.path != config.path) {
      return Err(OrchestratorError::DuplicateName(config.name.clone()));
    }
    Ok(())
  }

  /// Validate, open the folder's store and vector index, publish it to the
  /// FMDM, and spawn its lifecycle manager.
  pub async fn add_folder(self: &Arc<Self>, mut config: FolderConfig) -> Result<(), OrchestratorError> {
    config.clamp();
    self.validate(&config).await?;

    let db = Arc::new(store::FolderDb::open(&config.path, self.vector_dim).await?);
    let index_dir = vector_index_dir(&config.path);
    let vector_index = Arc::new(RwLock::new(if index_dir.exists() {
      VectorIndex::load(&index_dir)?
    } else {
      VectorIndex::new()
    }));

    self.broadcaster.upsert_folder(config.clone(), FolderLifecycleState::new());

    let (tx, rx) = mpsc::channel(64);
    let manager = Arc::new(FolderLifecycleManager::new(
      config.clone(),
      Arc::clone(&self.broadcaster),
      Arc::clone(&db),
      Arc::clone(&vector_index),
      Arc::clone(&self.pool),
      self.events.clone(),
    ));
    let task = tokio::spawn(manager.run(rx));

    self.folders.write().await.insert(
      config.path.clone(),
      FolderHandle {
        commands: tx,
        manager_task: task,
        vector_index,
        db,
      },
    );

    info!(folder = %config.path.display(), "folder added");
    Ok(())
  }

  /// Stop the folder's manager, persist its vector index, and drop it from
  /// the FMDM. The folder's `.folder-mcp-cache` store is left on disk so
  /// re-adding the same path later skips re-embedding unchanged files.
  pub async fn remove_folder(&self, path: &Path) -> Result<(), OrchestratorError> {
    let handle = {
      let mut folders = self.folders.write().await;
      folders.remove(path).ok_or_else(|| OrchestratorError::NotFound(path.to_path_buf()))?
    };

    let _ = handle.commands.send(ManagerCommand::Stop).await;
    handle.manager_task.abort();

    let index_dir = vector_index_dir(path);
    if let Err(e) = handle.vector_index.read().await.persist(&index_dir) {
      warn!(folder = %path.display(), error = %e, "failed to persist vector index on removal");
    }

    self.broadcaster.remove_folder(path);
    info!(folder = %path.display(), "folder removed");
    Ok(())
  }

  pub async fn folder_paths(&self) -> Vec<PathBuf> {
    self.folders.read().await.keys().cloned().collect()
  }

  pub async fn is_configured(&self, path: &Path) -> bool {
    self.folders.read().await.contains_key(path)
  }

  /// The folder's open document store, for REST document listing/content.
  pub async fn folder_db(&self, path: &Path) -> Option<Arc<store::FolderDb>> {
    self.folders.read().await.get(path).map(|h| Arc::clone(&h.db))
  }

  /// The folder's vector index, for REST search.
  pub async fn folder_vector_index(&self, path: &Path) -> Option<Arc<RwLock<VectorIndex>>> {
    self.folders.read().await.get(path).map(|h| Arc::clone(&h.vector_index))
  }

  /// The shared embedding pool, for embedding REST search queries.
  pub fn pool(&self) -> Arc<EmbeddingPool> {
    Arc::clone(&self.pool)
  }

  pub fn broadcaster(&self) -> Arc<FmdmBroadcaster> {
    Arc::clone(&self.broadcaster)
  }

  /// Flush the folder's in-memory vector index to its on-disk snapshot,
  /// for the CLI's `build-index` subcommand. The index is already kept
  /// current incrementally as files are scanned/indexed; this forces the
  /// write-temp-then-rename persistence path on demand rather than waiting
  /// for folder removal.
  pub async fn persist_index(&self, path: &Path) -> Result<(), OrchestratorError> {
    let handle = {
      let folders = self.folders.read().await;
      folders.get(path).map(|h| Arc::clone(&h.vector_index))
    };
    let vector_index = handle.ok_or_else(|| OrchestratorError::NotFound(path.to_path_buf()))?;
    let index_dir = vector_index_dir(path);
    vector_index.read().await.persist(&index_dir)?;
    Ok(())
  }

  /// Mirror a model-download status change across every configured folder
  /// using `model_id`, so one download updates all of them instead of only
  /// the folder that triggered it. A folder's own in-flight progress fields
  /// (`tasks`/`scanningProgress`) are untouched; only `status` and the
  /// notification move.
  pub async fn mirror_model_download(&self, model_id: &str, status: LifecycleStatus, message: Option<String>) {
    let folders = self.folders.read().await;
    let snapshot = self.broadcaster.snapshot();
    for path in folders.keys() {
      let Some(entry) = snapshot.folders.iter().find(|f| &f.config.path == path) else {
        continue;
      };
      if entry.config.embedding_model != model_id {
        continue;
      }
      self.broadcaster.update_folder_state(path, |s| {
        s.status = status;
        if let Some(ref msg) = message {
          s.notification = Some(Notification {
            message: msg.clone(),
            severity: NotificationSeverity::Info,
          });
        }
      });
    }
  }
}

fn vector_index_dir(folder_path: &Path) -> PathBuf {
  folder_path.join(".folder-mcp-cache").join("vector-index")
}
