//! Per-folder state machine (§4.7): `pending → scanning → ready → indexing
//! → active`, with `error` reachable from any phase and `active` re-entering
//! `indexing` incrementally as the watcher reports changes.
//!
//! ```text
//! pending ──startScanning──▶ scanning ──scanComplete──▶ ready
//!    ▲                          │ error                    │ startIndexing
//!    │                          ▼                           ▼
//!    └──────────reset────── error ◀──fatal── indexing ──allTasksDone──▶ active
//!                                              ▲                          │
//!                                              └─────nonFatal             │
//!                                                                          │
//!                                              indexing ◀──fileChange──────┘
//! ```
//!
//! `downloading-model` is a parallel sub-state of `pending`, driven by the
//! orchestrator rather than this manager (a folder can sit in `pending` with
//! a model download in progress before its first scan ever starts).

use crate::fmdm_broadcaster::FmdmBroadcaster;
use embedding::EmbeddingPool;
use enrich::{KeyphraseConfig, ModelAvailability};
use fmcore::{EmbeddingRecord, FileEmbeddingTask, Fingerprint, FolderConfig, LifecycleStatus, Notification, NotificationSeverity, Progress, ScanPhase, ScanningProgress, TaskKind, TaskStatus};
use futures::stream::{self, StreamExt};
use index::{ChangeKind, Chunker, DebounceConfig, DebouncedWatcher, FileChange, IndexEntry, ParseError, ScanError, Scanner, VectorIndex, VectorIndexError};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("scan error: {0}")]
  Scan(#[from] ScanError),
  #[error("parse error: {0}")]
  Parse(#[from] ParseError),
  #[error("store error: {0}")]
  Store(#[from] store::DbError),
  #[error("embedding error: {0}")]
  Embedding(#[from] embedding::EmbeddingError),
  #[error("vector index error: {0}")]
  VectorIndex(#[from] VectorIndexError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Event emitted alongside every FMDM state publish, for consumers (REST,
/// duplex push) that want to react to transitions rather than poll state.
#[derive(Debug, Clone)]
pub enum FolderEvent {
  StateChange { folder: PathBuf, status: LifecycleStatus },
  ScanComplete { folder: PathBuf, tasks_created: usize },
  IndexComplete { folder: PathBuf, progress: Progress },
  ChangesDetected { folder: PathBuf, count: usize },
  Error { folder: PathBuf, message: String },
}

pub enum ManagerCommand {
  FileChanged(FileChange),
  Stop,
}

/// Drives one folder's scan/index/watch lifecycle. Owns no long-lived lock
/// on the FMDM beyond what `FmdmBroadcaster` already serialises internally.
pub struct FolderLifecycleManager {
  root: PathBuf,
  config: FolderConfig,
  broadcaster: Arc<FmdmBroadcaster>,
  db: Arc<store::FolderDb>,
  vector_index: Arc<RwLock<VectorIndex>>,
  pool: Arc<EmbeddingPool>,
  events: mpsc::UnboundedSender<FolderEvent>,
  chunker: Chunker,
}

impl FolderLifecycleManager {
  pub fn new(
    config: FolderConfig,
    broadcaster: Arc<FmdmBroadcaster>,
    db: Arc<store::FolderDb>,
    vector_index: Arc<RwLock<VectorIndex>>,
    pool: Arc<EmbeddingPool>,
    events: mpsc::UnboundedSender<FolderEvent>,
  ) -> Self {
    let root = config.path.clone();
    Self {
      root,
      config,
      broadcaster,
      db,
      vector_index,
      pool,
      events,
      chunker: Chunker::default(),
    }
  }

  fn emit(&self, event: FolderEvent) {
    let _ = self.events.send(event);
  }

  fn set_status(&self, status: LifecycleStatus) {
    self.broadcaster.update_folder_state(&self.root, |s| s.status = status);
    self.emit(FolderEvent::StateChange {
      folder: self.root.clone(),
      status,
    });
  }

  fn set_error(&self, message: String) {
    self.broadcaster.update_folder_state(&self.root, |s| {
      s.status = LifecycleStatus::Error;
      s.consecutive_errors += 1;
      s.notification = Some(Notification {
        message: message.clone(),
        severity: NotificationSeverity::Error,
      });
    });
    self.emit(FolderEvent::Error {
      folder: self.root.clone(),
      message,
    });
  }

  /// Drive `pending → ... → active`, then service incremental file-change
  /// commands (from the watcher, or forced externally) until told to stop.
  pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<ManagerCommand>) {
    if let Err(e) = self.initial_pass().await {
      self.set_error(e.to_string());
      return;
    }

    let stop_flag = Arc::new(AtomicBool::new(false));
    let (watch_tx, watch_rx) = mpsc::channel(256);
    spawn_watch_loop(self.root.clone(), watch_tx, stop_flag.clone());
    let forward_handle = tokio::spawn(forward_watch_events(watch_rx, self.clone()));

    while let Some(cmd) = commands.recv().await {
      match cmd {
        ManagerCommand::Stop => break,
        ManagerCommand::FileChanged(change) => {
          if let Err(e) = self.handle_change(change).await {
            self.set_error(e.to_string());
          }
        }
      }
    }

    stop_flag.store(true, Ordering::Relaxed);
    forward_handle.abort();
  }

  async fn initial_pass(&self) -> Result<(), LifecycleError> {
    self.set_status(LifecycleStatus::Scanning);
    let tasks = self.scan_phase().await?;
    self.broadcaster.update_folder_state(&self.root, |s| s.scanning_progress = None);
    self.emit(FolderEvent::ScanComplete {
      folder: self.root.clone(),
      tasks_created: tasks.len(),
    });
    self.set_status(LifecycleStatus::Ready);

    if tasks.is_empty() {
      self.set_status(LifecycleStatus::Active);
      return Ok(());
    }

    self.set_status(LifecycleStatus::Indexing);
    let progress = self.index_phase(tasks).await;
    self.emit(FolderEvent::IndexComplete {
      folder: self.root.clone(),
      progress,
    });
    self.set_status(LifecycleStatus::Active);
    Ok(())
  }

  /// Two-sweep scan: sweep 1 (folder→db) compares each file on disk against
  /// its stored fingerprint and emits Create/Update; sweep 2 (db→folder)
  /// compares stored fingerprints against what's on disk and emits Remove.
  async fn scan_phase(&self) -> Result<Vec<FileEmbeddingTask>, LifecycleError> {
    let root = self.root.clone();
    let scanner = Scanner::new();
    let scan_result = tokio::task::spawn_blocking(move || scanner.scan(&root, |_| {}))
      .await
      .map_err(|e| LifecycleError::Io(std::io::Error::other(e)))?;

    let mut tasks = Vec::new();
    let total_sweep1 = scan_result.files.len();
    for (i, file) in scan_result.files.iter().enumerate() {
      self.broadcaster.update_folder_state(&self.root, |s| {
        s.scanning_progress = Some(ScanningProgress {
          phase: ScanPhase::FolderToDb,
          processed: i + 1,
          total: total_sweep1,
        });
      });

      match self.db.get_fingerprint(&file.fingerprint.relative_path).await? {
        None => tasks.push(FileEmbeddingTask::new(file.fingerprint.relative_path.clone(), TaskKind::Create)),
        Some(prev) if prev.content_hash != file.fingerprint.content_hash => {
          tasks.push(FileEmbeddingTask::new(file.fingerprint.relative_path.clone(), TaskKind::Update))
        }
        Some(_) => {}
      }
    }

    let on_disk: HashSet<String> = scan_result.files.iter().map(|f| f.fingerprint.relative_path.clone()).collect();
    let stored = self.db.list_fingerprints().await?;
    let total_sweep2 = stored.len();
    for (i, fp) in stored.iter().enumerate() {
      self.broadcaster.update_folder_state(&self.root, |s| {
        s.scanning_progress = Some(ScanningProgress {
          phase: ScanPhase::DbToFolder,
          processed: i + 1,
          total: total_sweep2,
        });
      });
      if !on_disk.contains(&fp.relative_path) {
        tasks.push(FileEmbeddingTask::new(fp.relative_path.clone(), TaskKind::Remove));
      }
    }

    Ok(tasks)
  }

  async fn handle_change(&self, change: FileChange) -> Result<(), LifecycleError> {
    let relative = fmcore::normalise_relative_path(change.path.strip_prefix(&self.root).unwrap_or(&change.path));
    let kind = match change.kind {
      ChangeKind::Created => TaskKind::Create,
      ChangeKind::Modified | ChangeKind::Renamed => TaskKind::Update,
      ChangeKind::Deleted => TaskKind::Remove,
    };

    self.emit(FolderEvent::ChangesDetected {
      folder: self.root.clone(),
      count: 1,
    });
    self.set_status(LifecycleStatus::Indexing);
    let progress = self.index_phase(vec![FileEmbeddingTask::new(relative, kind)]).await;
    self.emit(FolderEvent::IndexComplete {
      folder: self.root.clone(),
      progress,
    });
    self.set_status(LifecycleStatus::Active);
    Ok(())
  }

  /// Bounded-concurrency consumption of `tasks`, each retried up to
  /// `max_retries` (3, per `FileEmbeddingTask::new`) before it's recorded as
  /// failed and the queue moves on to the next task.
  async fn index_phase(&self, tasks: Vec<FileEmbeddingTask>) -> Progress {
    let total = tasks.len();
    self.broadcaster.update_folder_state(&self.root, |s| {
      s.progress = Progress {
        total,
        completed: 0,
        failed: 0,
        in_progress: 0,
      };
      s.tasks = tasks.clone();
    });

    let max_concurrency = self.config.max_concurrency.max(1);
    stream::iter(tasks)
      .for_each_concurrent(max_concurrency, |task| async move {
        let ok = self.run_task_with_retry(task).await;
        self.broadcaster.update_folder_state(&self.root, |s| {
          if ok {
            s.progress.completed += 1;
          } else {
            s.progress.failed += 1;
          }
        });
      })
      .await;

    self.broadcaster.snapshot().folders.iter().find(|f| f.config.path == self.root).map(|f| f.state.progress).unwrap_or_default()
  }

  async fn run_task_with_retry(&self, mut task: FileEmbeddingTask) -> bool {
    loop {
      task.mark_status(TaskStatus::InProgress);
      match self.run_task(&task).await {
        Ok(()) => {
          task.mark_status(TaskStatus::Success);
          return true;
        }
        Err(e) => {
          warn!(folder = %self.root.display(), path = %task.path, error = %e, "indexing task failed");
          if task.retries_exhausted() {
            task.mark_status(TaskStatus::Error);
            return false;
          }
          task.mark_retry();
        }
      }
    }
  }

  async fn run_task(&self, task: &FileEmbeddingTask) -> Result<(), LifecycleError> {
    match task.kind {
      TaskKind::Remove => self.remove_file(&task.path).await,
      TaskKind::Create | TaskKind::Update => self.index_file(&task.path).await,
    }
  }

  async fn remove_file(&self, relative_path: &str) -> Result<(), LifecycleError> {
    if let Some(old) = self.db.get_fingerprint(relative_path).await? {
      self.db.delete_chunks(&old.content_hash).await?;
      self.vector_index.write().await.remove_by_owner(&old.content_hash);
    }
    self.db.delete_fingerprint(relative_path).await?;
    Ok(())
  }

  async fn index_file(&self, relative_path: &str) -> Result<(), LifecycleError> {
    let full_path = self.root.join(relative_path);
    let content = tokio::fs::read(&full_path).await?;
    let mtime = full_path
      .metadata()
      .and_then(|m| m.modified())
      .ok()
      .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
      .map(|d| d.as_secs() as i64)
      .unwrap_or(0);
    let fingerprint = Fingerprint::new(relative_path, &content, mtime);

    if let Some(old) = self.db.get_fingerprint(relative_path).await? {
      if old.content_hash == fingerprint.content_hash {
        return Ok(());
      }
      self.db.delete_chunks(&old.content_hash).await?;
      self.vector_index.write().await.remove_by_owner(&old.content_hash);
    }

    let parsed = index::parse(&full_path)?;
    let mut chunks = self.chunker.chunk(&parsed, &fingerprint.content_hash);

    if chunks.is_empty() {
      self.db.upsert_fingerprint(&fingerprint).await?;
      return Ok(());
    }

    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
    let vectors = self.pool.embed_batch(texts).await?;

    // MMR-ranked keyphrases: candidate n-grams across all chunks are
    // batch-embedded through the pool up front, so `enrich`'s per-candidate
    // closure is a synchronous cache lookup rather than a call into the
    // async pool. Each chunk ranks against its own embedding (already
    // computed above as `vectors`), so no extra document-embedding pass is
    // needed.
    let keyphrase_config = KeyphraseConfig::default();
    let mut candidate_set: HashSet<String> = HashSet::new();
    for chunk in &chunks {
      candidate_set.extend(enrich::keyphrase::candidate_ngrams(&chunk.content, keyphrase_config.min_ngram, keyphrase_config.max_ngram));
    }
    let candidate_list: Vec<String> = candidate_set.into_iter().collect();
    let candidate_cache: HashMap<String, Vec<f32>> = if candidate_list.is_empty() {
      HashMap::new()
    } else {
      match self.pool.embed_batch(candidate_list.clone()).await {
        Ok(embeddings) => candidate_list.into_iter().zip(embeddings).collect(),
        Err(e) => {
          warn!(folder = %self.root.display(), error = %e, "keyphrase candidate embedding failed, falling back to frequency ranking");
          HashMap::new()
        }
      }
    };
    let availability = if candidate_cache.is_empty() { ModelAvailability::Unavailable } else { ModelAvailability::BatchCapable };

    for (chunk, vector) in chunks.iter_mut().zip(vectors.iter()) {
      let document_embedding = if availability == ModelAvailability::Unavailable { None } else { Some(vector.as_slice()) };
      chunk.semantic = Some(enrich::enrich(&chunk.content, &keyphrase_config, availability, document_embedding, |phrase: &str| {
        candidate_cache.get(phrase).cloned()
      }));
    }

    let records: Vec<EmbeddingRecord> = chunks
      .iter()
      .zip(vectors.iter())
      .map(|(c, v)| EmbeddingRecord::new(fingerprint.content_hash.clone(), c.chunk_index, v.clone(), self.config.embedding_model.clone()))
      .collect();

    self.db.add_chunks(&chunks).await?;
    self.db.add_embeddings(&records).await?;
    self.db.upsert_fingerprint(&fingerprint).await?;

    let folder_path = self.root.to_string_lossy().to_string();
    let mut index = self.vector_index.write().await;
    for (chunk, vector) in chunks.iter().zip(vectors.into_iter()) {
      index.add(IndexEntry {
        owner_hash: fingerprint.content_hash.clone(),
        chunk_index: chunk.chunk_index,
        folder_path: folder_path.clone(),
        model_id: self.config.embedding_model.clone(),
        vector,
      })?;
    }

    Ok(())
  }
}

/// Background thread polling a [`DebouncedWatcher`] and forwarding ready
/// changes onto a Tokio channel, since the watcher's own API is blocking.
/// Exits once `stop` is set or the receiving end is dropped.
fn spawn_watch_loop(root: PathBuf, tx: mpsc::Sender<FileChange>, stop: Arc<AtomicBool>) {
  std::thread::spawn(move || {
    let mut watcher = match DebouncedWatcher::new(&root, DebounceConfig::default()) {
      Ok(w) => w,
      Err(e) => {
        error!(folder = %root.display(), error = %e, "failed to start folder watcher");
        return;
      }
    };
    while !stop.load(Ordering::Relaxed) {
      std::thread::sleep(Duration::from_millis(250));
      for change in watcher.collect_ready() {
        if tx.blocking_send(change).is_err() {
          debug!(folder = %root.display(), "watch loop exiting, manager dropped");
          return;
        }
      }
    }
    debug!(folder = %root.display(), "watch loop stopped");
  });
}

async fn forward_watch_events(mut rx: mpsc::Receiver<FileChange>, manager: Arc<FolderLifecycleManager>) {
  while let Some(change) = rx.recv().await {
    if let Err(e) = manager.handle_change(change).await {
      manager.set_error(e.to_string());
    }
  }
  info!(folder = %manager.root.display(), "watch loop ended");
}
