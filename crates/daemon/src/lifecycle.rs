//! Daemon process lifecycle: wires the FMDM broadcaster, orchestrator,
//! embedding pool, router, and Unix socket server together, and handles
//! process signals (§6): SIGINT/SIGTERM request graceful shutdown, SIGHUP
//! and SIGUSR1 reload configuration, SIGQUIT dumps diagnostic state.

use crate::folder_lifecycle::FolderEvent;
use crate::fmdm_broadcaster::FmdmBroadcaster;
use crate::orchestrator::Orchestrator;
use crate::router::Router;
use crate::scheduler::spawn_scheduler;
use crate::server::{Server, ShutdownHandle};
use embedding::{EmbeddingPool, EmbeddingProvider, OllamaProvider, OpenRouterProvider, PoolConfig};
use fmcore::{Config, ConfigEmbeddingProvider, EmbeddingConfig};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("server error: {0}")]
  Server(#[from] crate::server::ServerError),
}

/// Daemon configuration: a loaded [`fmcore::Config`] plus whether the
/// process should detach from its controlling terminal.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
  pub config: Config,
  pub daemonize: bool,
}

impl Default for DaemonConfig {
  fn default() -> Self {
    Self {
      config: Config::default(),
      daemonize: false,
    }
  }
}

fn create_embedding_provider(config: &EmbeddingConfig) -> Arc<dyn EmbeddingProvider> {
  match config.provider {
    ConfigEmbeddingProvider::Ollama => {
      Arc::new(OllamaProvider::new().with_url(&config.ollama_url).with_model(&config.model, config.dimensions))
    }
    ConfigEmbeddingProvider::OpenRouter => {
      let api_key = config
        .openrouter_api_key
        .clone()
        .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
        .unwrap_or_default();

      if api_key.is_empty() {
        warn!("OpenRouter API key not configured, falling back to Ollama");
        Arc::new(OllamaProvider::new().with_url(&config.ollama_url).with_model(&config.model, config.dimensions))
      } else {
        Arc::new(OpenRouterProvider::new(api_key).with_model(&config.model, config.dimensions))
      }
    }
  }
}

/// Owns the running daemon's shared state and its shutdown handle.
pub struct Daemon {
  config: DaemonConfig,
  orchestrator: Option<Arc<Orchestrator>>,
  broadcaster: Option<Arc<FmdmBroadcaster>>,
  shutdown: Option<ShutdownHandle>,
  scheduler_shutdown_tx: Option<broadcast::Sender<()>>,
}

impl Daemon {
  pub fn new(config: DaemonConfig) -> Self {
    Self {
      config,
      orchestrator: None,
      broadcaster: None,
      shutdown: None,
      scheduler_shutdown_tx: None,
    }
  }

  pub async fn run(&mut self) -> Result<(), LifecycleError> {
    info!("starting folder-mcp daemon");
    info!(socket = ?self.config.config.socket_path, data_dir = ?self.config.config.data_dir, "daemon paths");

    let embedding = create_embedding_provider(&self.config.config.embedding);
    info!(provider = embedding.name(), model = embedding.model_id(), dims = embedding.dimensions(), "embedding provider configured");
    if !embedding.is_available().await {
      warn!("embedding provider unavailable at startup; folders will retry during indexing");
    }

    let pool_config = PoolConfig {
      worker_count: self.config.config.pool.worker_count,
      cache_capacity: 500,
      shutdown_timeout: std::time::Duration::from_secs(5),
    };
    let pool = EmbeddingPool::new(pool_config, move || Arc::clone(&embedding) as Arc<dyn EmbeddingProvider>);
    pool.start().await;

    let broadcaster = Arc::new(FmdmBroadcaster::new(std::process::id()));
    let (events_tx, events_rx) = mpsc::unbounded_channel::<FolderEvent>();
    tokio::spawn(log_folder_events(events_rx));

    let orchestrator = Orchestrator::new(
      Arc::clone(&broadcaster),
      Arc::clone(&pool),
      self.config.config.embedding.dimensions,
      events_tx,
    );

    for folder in self.config.config.folders.clone() {
      if let Err(e) = orchestrator.add_folder(folder.clone()).await {
        warn!(folder = %folder.path.display(), error = %e, "failed to restore configured folder");
      }
    }

    self.orchestrator = Some(Arc::clone(&orchestrator));
    self.broadcaster = Some(Arc::clone(&broadcaster));

    let router = Arc::new(Router::new(Arc::clone(&broadcaster), Arc::clone(&orchestrator), self.config.config.default_embedding_model.clone()));
    let server = Server::with_socket_path(router, Arc::clone(&broadcaster), self.config.config.socket_path.clone());
    let shutdown = server.shutdown_handle();
    self.shutdown = Some(shutdown.clone());

    let (scheduler_shutdown_tx, scheduler_shutdown_rx) = broadcast::channel(1);
    self.scheduler_shutdown_tx = Some(scheduler_shutdown_tx.clone());
    let _scheduler_handle = spawn_scheduler(Arc::clone(&broadcaster), scheduler_shutdown_rx);
    info!("started background scheduler");

    self.install_signal_handlers(shutdown.clone(), scheduler_shutdown_tx);

    let rest_app = crate::rest::router(Arc::clone(&orchestrator));
    let rest_addr = std::net::SocketAddr::from(([127, 0, 0, 1], self.config.config.http_port));
    let mut rest_shutdown_rx = shutdown.subscribe();
    let rest_handle = tokio::spawn(async move {
      let listener = match tokio::net::TcpListener::bind(rest_addr).await {
        Ok(listener) => listener,
        Err(e) => {
          warn!(addr = %rest_addr, error = %e, "failed to bind REST surface");
          return;
        }
      };
      info!(addr = %rest_addr, "REST surface listening");
      let shutdown_signal = async move {
        let _ = rest_shutdown_rx.recv().await;
      };
      if let Err(e) = axum::serve(listener, rest_app).with_graceful_shutdown(shutdown_signal).await {
        warn!(error = %e, "REST surface exited with error");
      }
    });

    server.run().await?;
    rest_handle.abort();

    if let Some(ref tx) = self.scheduler_shutdown_tx {
      let _ = tx.send(());
    }
    for path in orchestrator.folder_paths().await {
      if let Err(e) = orchestrator.remove_folder(&path).await {
        warn!(folder = %path.display(), error = %e, "failed to cleanly stop folder during shutdown");
      }
    }
    info!("daemon shutdown complete");
    Ok(())
  }

  /// Spawn one task per signal of interest (§6): SIGINT/SIGTERM ask the
  /// server to stop accepting and unwind; SIGHUP/SIGUSR1 reload config
  /// in-place for folders that don't require a restart; SIGQUIT logs a
  /// diagnostic snapshot without stopping the daemon.
  fn install_signal_handlers(&self, shutdown: ShutdownHandle, scheduler_tx: broadcast::Sender<()>) {
    let broadcaster = self.broadcaster.clone();
    let terminate_shutdown = shutdown.clone();
    let terminate_scheduler = scheduler_tx.clone();
    tokio::spawn(async move {
      let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
          warn!("failed to install SIGTERM handler: {e}");
          return;
        }
      };
      if tokio::signal::ctrl_c().await.is_ok() {
        info!("received SIGINT, shutting down");
      } else if term.recv().await.is_some() {
        info!("received SIGTERM, shutting down");
      }
      let _ = terminate_scheduler.send(());
      terminate_shutdown.shutdown();
    });

    let reload_orchestrator = self.orchestrator.clone();
    let project_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let mut active_config = self.config.config.clone();
    tokio::spawn(async move {
      let Ok(mut hup) = signal(SignalKind::hangup()) else {
        warn!("failed to install SIGHUP handler");
        return;
      };
      let Ok(mut usr1) = signal(SignalKind::user_defined1()) else {
        warn!("failed to install SIGUSR1 handler");
        return;
      };
      loop {
        let sig = tokio::select! {
          _ = hup.recv() => "SIGHUP",
          _ = usr1.recv() => "SIGUSR1",
          else => break,
        };
        info!(signal = sig, "configuration reload requested");
        reload_config(&mut active_config, &project_path, reload_orchestrator.as_ref()).await;
      }
    });

    tokio::spawn(async move {
      let Ok(mut quit) = signal(SignalKind::quit()) else {
        warn!("failed to install SIGQUIT handler");
        return;
      };
      while quit.recv().await.is_some() {
        if let Some(ref b) = broadcaster {
          let snapshot = b.snapshot();
          info!(version = snapshot.version, folders = snapshot.folders.len(), connections = snapshot.connections.count, "SIGQUIT diagnostic snapshot");
        }
      }
    });
  }

  pub fn shutdown(&self) {
    if let Some(ref shutdown) = self.shutdown {
      shutdown.shutdown();
    }
  }

  pub fn orchestrator(&self) -> Option<Arc<Orchestrator>> {
    self.orchestrator.clone()
  }
}

/// Reload `<configDir>/config.toml` and `<project>/.folder-mcp/config.toml`
/// and apply the result in-place: folders added or removed between reloads
/// are reconciled against the orchestrator the same way startup restores
/// them; changes that touch the socket path, HTTP port, or worker pool size
/// can't be applied to a running process, so those are logged and the rest
/// of the reload is skipped until the next restart.
async fn reload_config(active: &mut Config, project_path: &std::path::Path, orchestrator: Option<&Arc<Orchestrator>>) {
  let resolved = match Config::load(project_path) {
    Ok(resolved) => resolved,
    Err(e) => {
      warn!(error = %e, "configuration reload failed, keeping active configuration");
      return;
    }
  };

  if Config::needs_restart(active, &resolved.config) {
    warn!("configuration change requires a daemon restart; not applying until then");
    return;
  }

  let Some(orchestrator) = orchestrator else {
    return;
  };

  let old_paths: std::collections::HashSet<_> = active.folders.iter().map(|f| f.path.clone()).collect();
  let new_paths: std::collections::HashSet<_> = resolved.config.folders.iter().map(|f| f.path.clone()).collect();

  for path in old_paths.difference(&new_paths) {
    if let Err(e) = orchestrator.remove_folder(path).await {
      warn!(folder = %path.display(), error = %e, "failed to remove folder during configuration reload");
    }
  }
  for folder in &resolved.config.folders {
    if !old_paths.contains(&folder.path) {
      if let Err(e) = orchestrator.add_folder(folder.clone()).await {
        warn!(folder = %folder.path.display(), error = %e, "failed to add folder during configuration reload");
      }
    }
  }

  info!(folders = resolved.config.folders.len(), "configuration reload applied");
  *active = resolved.config;
}

async fn log_folder_events(mut rx: mpsc::UnboundedReceiver<FolderEvent>) {
  while let Some(event) = rx.recv().await {
    match event {
      FolderEvent::StateChange { folder, status } => info!(folder = %folder.display(), ?status, "folder state change"),
      FolderEvent::ScanComplete { folder, tasks_created } => info!(folder = %folder.display(), tasks_created, "scan complete"),
      FolderEvent::IndexComplete { folder, progress } => info!(folder = %folder.display(), completed = progress.completed, total = progress.total, "index phase complete"),
      FolderEvent::ChangesDetected { folder, count } => info!(folder = %folder.display(), count, "watcher detected changes"),
      FolderEvent::Error { folder, message } => warn!(folder = %folder.display(), message, "folder lifecycle error"),
    }
  }
}

/// True if a daemon is already listening on `socket_path`.
pub fn is_running(socket_path: &std::path::Path) -> bool {
  std::os::unix::net::UnixStream::connect(socket_path).is_ok()
}

pub fn pid_file_path(data_dir: &std::path::Path) -> PathBuf {
  data_dir.join("daemon.pid")
}

pub fn write_pid_file(data_dir: &std::path::Path) -> Result<(), std::io::Error> {
  std::fs::create_dir_all(data_dir)?;
  std::fs::write(pid_file_path(data_dir), std::process::id().to_string())
}

pub fn remove_pid_file(data_dir: &std::path::Path) {
  let _ = std::fs::remove_file(pid_file_path(data_dir));
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn default_config_has_nonempty_socket_path() {
    let config = DaemonConfig::default();
    assert!(!config.config.socket_path.as_os_str().is_empty());
  }

  #[test]
  fn is_running_false_without_socket() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("nonexistent.sock");
    assert!(!is_running(&socket_path));
  }

  #[test]
  fn pid_file_round_trips() {
    let dir = TempDir::new().unwrap();
    write_pid_file(dir.path()).unwrap();
    assert!(pid_file_path(dir.path()).exists());
    remove_pid_file(dir.path());
    assert!(!pid_file_path(dir.path()).exists());
  }

  fn test_orchestrator() -> Arc<Orchestrator> {
    let broadcaster = Arc::new(FmdmBroadcaster::new(std::process::id()));
    let pool = EmbeddingPool::new(PoolConfig::default(), || Arc::new(OllamaProvider::new()) as Arc<dyn EmbeddingProvider>);
    let (tx, _rx) = mpsc::unbounded_channel();
    Orchestrator::new(broadcaster, pool, 4, tx)
  }

  #[tokio::test]
  async fn reload_config_adds_folders_newly_present_on_disk() {
    let project = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();
    let mut overlay = Config::default();
    overlay.folders.push(fmcore::FolderConfig::new(watched.path().to_string_lossy(), "docs", "nomic-embed-text"));
    std::fs::create_dir_all(project.path().join(".folder-mcp")).unwrap();
    std::fs::write(project.path().join(".folder-mcp").join("config.toml"), toml::to_string_pretty(&overlay).unwrap()).unwrap();

    let orchestrator = test_orchestrator();
    let mut active = Config::default();
    reload_config(&mut active, project.path(), Some(&orchestrator)).await;

    assert_eq!(active.folders.len(), 1);
    assert!(orchestrator.is_configured(watched.path()).await);
  }

  #[tokio::test]
  async fn reload_config_removes_folders_no_longer_present() {
    let project = TempDir::new().unwrap();
    let watched = TempDir::new().unwrap();

    let orchestrator = test_orchestrator();
    let config = fmcore::FolderConfig::new(watched.path().to_string_lossy(), "docs", "nomic-embed-text");
    orchestrator.add_folder(config.clone()).await.unwrap();

    let mut active = Config::default();
    active.folders.push(config);
    reload_config(&mut active, project.path(), Some(&orchestrator)).await;

    assert!(active.folders.is_empty());
    assert!(!orchestrator.is_configured(watched.path()).await);
  }

  #[tokio::test]
  async fn reload_config_skips_apply_when_restart_required() {
    let project = TempDir::new().unwrap();
    let mut overlay = Config::default();
    overlay.http_port = 9999;
    std::fs::create_dir_all(project.path().join(".folder-mcp")).unwrap();
    std::fs::write(project.path().join(".folder-mcp").join("config.toml"), toml::to_string_pretty(&overlay).unwrap()).unwrap();

    let orchestrator = test_orchestrator();
    let mut active = Config::default();
    let original_port = active.http_port;
    reload_config(&mut active, project.path(), Some(&orchestrator)).await;

    assert_eq!(active.http_port, original_port);
  }
}
