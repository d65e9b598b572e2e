use crate::fmdm_broadcaster::FmdmBroadcaster;
use crate::router::{Request, Response, Router};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Server shutdown")]
  Shutdown,
}

/// Default Unix socket path, matching `fmcore::Config`'s `<dataDir>/daemon.sock`.
pub fn default_socket_path() -> PathBuf {
  fmcore::config::default_data_dir().join("daemon.sock")
}

/// Unix socket server for the daemon: one task per client connection,
/// each multiplexing request/response traffic with unsolicited `fmdm.update`
/// pushes from the [`FmdmBroadcaster`] over the same newline-delimited JSON
/// stream.
pub struct Server {
  socket_path: PathBuf,
  router: Arc<Router>,
  broadcaster: Arc<FmdmBroadcaster>,
  shutdown_tx: broadcast::Sender<()>,
}

impl Server {
  pub fn new(router: Arc<Router>, broadcaster: Arc<FmdmBroadcaster>) -> Self {
    Self::with_socket_path(router, broadcaster, default_socket_path())
  }

  pub fn with_socket_path(router: Arc<Router>, broadcaster: Arc<FmdmBroadcaster>, socket_path: PathBuf) -> Self {
    let (shutdown_tx, _) = broadcast::channel(1);
    Self {
      socket_path,
      router,
      broadcaster,
      shutdown_tx,
    }
  }

  /// Get a shutdown handle to signal server shutdown
  pub fn shutdown_handle(&self) -> ShutdownHandle {
    ShutdownHandle {
      tx: self.shutdown_tx.clone(),
    }
  }

  /// Get the socket path
  pub fn socket_path(&self) -> &Path {
    &self.socket_path
  }

  /// Run the server
  pub async fn run(&self) -> Result<(), ServerError> {
    // Remove stale socket file
    if self.socket_path.exists() {
      std::fs::remove_file(&self.socket_path)?;
    }

    // Create parent directory if needed
    if let Some(parent) = self.socket_path.parent() {
      std::fs::create_dir_all(parent)?;
    }

    let listener = UnixListener::bind(&self.socket_path)?;
    info!("Daemon listening on {:?}", self.socket_path);

    let mut shutdown_rx = self.shutdown_tx.subscribe();

    loop {
      tokio::select! {
          result = listener.accept() => {
              match result {
                  Ok((stream, _)) => {
                      let router = Arc::clone(&self.router);
                      let broadcaster = Arc::clone(&self.broadcaster);
                      tokio::spawn(async move {
                          if let Err(e) = handle_connection(stream, router, broadcaster).await {
                              error!("Connection error: {}", e);
                          }
                      });
                  }
                  Err(e) => {
                      error!("Accept error: {}", e);
                  }
              }
          }
          _ = shutdown_rx.recv() => {
              info!("Shutdown signal received");
              break;
          }
      }
    }

    // Cleanup socket file
    if self.socket_path.exists() {
      std::fs::remove_file(&self.socket_path)?;
    }

    Ok(())
  }
}

/// Handle to signal server shutdown
#[derive(Clone)]
pub struct ShutdownHandle {
  tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
  pub fn shutdown(&self) {
    let _ = self.tx.send(());
  }

  /// Subscribe to the same shutdown broadcast the Unix socket server listens
  /// on, so other listeners (e.g. the REST surface) unwind together.
  pub fn subscribe(&self) -> broadcast::Receiver<()> {
    self.tx.subscribe()
  }
}

/// Handle a single client connection. A dedicated writer task serialises
/// every outbound line — request responses and broadcaster pushes alike —
/// so the two sources never interleave a partial line.
async fn handle_connection(stream: UnixStream, router: Arc<Router>, broadcaster: Arc<FmdmBroadcaster>) -> Result<(), ServerError> {
  let (reader, writer) = stream.into_split();
  let mut reader = BufReader::new(reader);
  let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

  let writer_task = tokio::spawn(async move {
    let mut writer = writer;
    while let Some(line) = out_rx.recv().await {
      if writer.write_all(line.as_bytes()).await.is_err() {
        break;
      }
      if writer.write_all(b"\n").await.is_err() {
        break;
      }
      if writer.flush().await.is_err() {
        break;
      }
    }
  });

  let push_tx = out_tx.clone();
  let mut push_rx = broadcaster.subscribe();
  let push_task = tokio::spawn(async move {
    loop {
      match push_rx.recv().await {
        Ok(fmdm) => {
          let message = serde_json::json!({ "type": "fmdm.update", "fmdm": fmdm });
          match serde_json::to_string(&message) {
            Ok(json) => {
              if push_tx.send(json).is_err() {
                break;
              }
            }
            Err(e) => warn!("failed to serialise fmdm.update: {e}"),
          }
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          warn!(skipped, "client missed fmdm.update broadcasts, catching up with latest");
          continue;
        }
        Err(broadcast::error::RecvError::Closed) => break,
      }
    }
  });

  let mut line = String::new();
  let result = loop {
    line.clear();
    let n = match reader.read_line(&mut line).await {
      Ok(n) => n,
      Err(e) => break Err(e.into()),
    };

    if n == 0 {
      debug!("client disconnected");
      break Ok(());
    }

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    let request: Request = match serde_json::from_str(trimmed) {
      Ok(r) => r,
      Err(e) => {
        warn!("invalid request JSON: {e}");
        if let Ok(json) = serde_json::to_string(&Response::error(None, -32700, format!("parse error: {e}"))) {
          let _ = out_tx.send(json);
        }
        continue;
      }
    };

    debug!(method = %request.method, id = ?request.id, "request");
    let response = router.handle(request).await;
    match serde_json::to_string(&response) {
      Ok(json) => {
        if out_tx.send(json).is_err() {
          break Ok(());
        }
      }
      Err(e) => break Err(e.into()),
    }
  };

  push_task.abort();
  drop(out_tx);
  let _ = writer_task.await;
  result
}

/// Client for connecting to the daemon
pub struct Client {
  stream: UnixStream,
}

impl Client {
  /// Connect to daemon at the default socket path
  pub async fn connect() -> Result<Self, ServerError> {
    Self::connect_to(&default_socket_path()).await
  }

  /// Connect to daemon at a specific socket path
  pub async fn connect_to(socket_path: &Path) -> Result<Self, ServerError> {
    let stream = UnixStream::connect(socket_path).await?;
    Ok(Self { stream })
  }

  /// Send a request and receive its response, skipping over any unsolicited
  /// `fmdm.update`/`model_download_*` pushes that interleave on the wire.
  pub async fn request(&mut self, request: Request) -> Result<Response, ServerError> {
    let (reader, mut writer) = self.stream.split();

    let json = serde_json::to_string(&request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
      line.clear();
      reader.read_line(&mut line).await?;
      let value: serde_json::Value = serde_json::from_str(&line)?;
      if value.get("type").is_some() {
        continue;
      }
      return Ok(serde_json::from_value(value)?);
    }
  }

  /// Write a request without waiting for its response, for callers (the CLI's
  /// `watch` subcommand) that need to keep reading the raw frame stream
  /// afterwards instead of letting [`Client::request`] silently discard
  /// interleaved `fmdm.update` pushes while it waits.
  pub async fn send(&mut self, request: &Request) -> Result<(), ServerError> {
    let (_, mut writer) = self.stream.split();
    let json = serde_json::to_string(request)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
  }

  /// Read the next newline-delimited JSON frame off the wire verbatim,
  /// whether it's a `Response` or an unsolicited `{"type": ...}` push.
  pub async fn read_frame(&mut self) -> Result<serde_json::Value, ServerError> {
    let (reader, _) = self.stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.is_empty() {
      return Err(ServerError::Shutdown);
    }
    Ok(serde_json::from_str(&line)?)
  }

  /// Send a request with a method and params
  pub async fn call(&mut self, method: &str, params: serde_json::Value) -> Result<Response, ServerError> {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);
    let id = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let request = Request {
      id: Some(serde_json::Value::Number(id.into())),
      method: method.to_string(),
      params,
    };

    self.request(request).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::folder_lifecycle::FolderEvent;
  use crate::orchestrator::Orchestrator;
  use embedding::EmbeddingPool;
  use tempfile::TempDir;
  use tokio::sync::mpsc;

  #[test]
  fn test_default_socket_path() {
    let path = default_socket_path();
    assert!(path.to_string_lossy().ends_with("daemon.sock"));
  }

  fn test_router_and_broadcaster() -> (Arc<Router>, Arc<FmdmBroadcaster>) {
    let broadcaster = Arc::new(FmdmBroadcaster::new(std::process::id()));
    let pool = EmbeddingPool::new(embedding::PoolConfig::default(), || {
      Arc::new(embedding::OllamaProvider::new()) as Arc<dyn embedding::EmbeddingProvider>
    });
    let (tx, _rx): (mpsc::UnboundedSender<FolderEvent>, _) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(Arc::clone(&broadcaster), pool, 4, tx);
    (Arc::new(Router::new(Arc::clone(&broadcaster), orchestrator, "nomic-embed-text".to_string())), broadcaster)
  }

  #[tokio::test]
  async fn test_server_client_roundtrip() {
    let dir = TempDir::new().unwrap();
    let socket_path = dir.path().join("test.sock");

    let (router, broadcaster) = test_router_and_broadcaster();
    let server = Server::with_socket_path(router, broadcaster, socket_path.clone());
    let shutdown = server.shutdown_handle();

    // Start server in background
    let server_handle = tokio::spawn(async move { server.run().await });

    // Give server time to start
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

    // Connect client
    let mut client = Client::connect_to(&socket_path).await.unwrap();

    // Send a ping request
    let response = client.call("ping", serde_json::json!({})).await.unwrap();

    // ping returns "pong"
    assert!(response.result.is_some() || response.error.is_some());

    // Shutdown server
    shutdown.shutdown();
    let _ = server_handle.await;
  }
}
