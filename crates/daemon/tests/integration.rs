//! End-to-end tests exercising the daemon's Unix socket server, router, and
//! orchestrator wired together exactly as `Daemon::run` assembles them, over
//! a real socket rather than calling `Router::handle` directly.
//!
//! These don't require a running Ollama: nothing here reaches the point of
//! actually embedding text (folder scanning happens on a background task and
//! its failures are logged, not surfaced to the client; `folder.search`'s
//! embed step is exercised separately in `daemon::rest`'s own unit tests).

use daemon::{Client, FmdmBroadcaster, Orchestrator, Request, Router, Server};
use embedding::{EmbeddingPool, EmbeddingProvider, OllamaProvider, PoolConfig};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn test_orchestrator() -> Arc<Orchestrator> {
  let broadcaster = Arc::new(FmdmBroadcaster::new(std::process::id()));
  let pool = EmbeddingPool::new(PoolConfig::default(), || Arc::new(OllamaProvider::new()) as Arc<dyn EmbeddingProvider>);
  let (tx, _rx) = mpsc::unbounded_channel();
  Orchestrator::new(broadcaster, pool, 4, tx)
}

async fn start_server() -> (TempDir, std::path::PathBuf, tokio::task::JoinHandle<()>, daemon::ShutdownHandle) {
  let socket_dir = TempDir::new().unwrap();
  let socket_path = socket_dir.path().join("daemon.sock");

  let orchestrator = test_orchestrator();
  let broadcaster = orchestrator.broadcaster();
  let router = Arc::new(Router::new(Arc::clone(&broadcaster), orchestrator, "nomic-embed-text".to_string()));
  let server = Server::with_socket_path(router, broadcaster, socket_path.clone());
  let shutdown = server.shutdown_handle();

  let handle = tokio::spawn(async move {
    let _ = server.run().await;
  });
  tokio::time::sleep(std::time::Duration::from_millis(50)).await;

  (socket_dir, socket_path, handle, shutdown)
}

#[tokio::test]
async fn connection_lifecycle_over_real_socket() {
  let (_dir, socket_path, handle, shutdown) = start_server().await;
  let mut client = Client::connect_to(&socket_path).await.unwrap();

  let ack = client.call("connection.init", serde_json::json!({ "clientType": "cli" })).await.unwrap();
  assert_eq!(ack.result.unwrap()["type"], "connection.ack");

  let pong = client.call("ping", serde_json::json!({})).await.unwrap();
  assert_eq!(pong.result.unwrap(), serde_json::json!("pong"));

  shutdown.shutdown();
  let _ = handle.await;
}

#[tokio::test]
async fn folder_add_validate_remove_round_trip_over_socket() {
  let (_dir, socket_path, handle, shutdown) = start_server().await;
  let mut client = Client::connect_to(&socket_path).await.unwrap();
  let folder = TempDir::new().unwrap();
  std::fs::write(folder.path().join("notes.md"), "# hello\nsome content here").unwrap();

  let validate = client.call("folder.validate", serde_json::json!({ "path": folder.path().to_string_lossy() })).await.unwrap();
  assert_eq!(validate.result.unwrap()["valid"], true);

  let add = client.call("folder.add", serde_json::json!({ "path": folder.path().to_string_lossy() })).await.unwrap();
  assert_eq!(add.result.unwrap()["success"], true);

  let info = client.call("get_folder_info", serde_json::json!({ "folderPath": folder.path().to_string_lossy() })).await.unwrap();
  assert!(info.result.is_some());

  let remove = client.call("folder.remove", serde_json::json!({ "path": folder.path().to_string_lossy() })).await.unwrap();
  assert_eq!(remove.result.unwrap()["success"], true);

  shutdown.shutdown();
  let _ = handle.await;
}

#[tokio::test]
async fn rebuild_index_persists_without_embeddings() {
  let (_dir, socket_path, handle, shutdown) = start_server().await;
  let mut client = Client::connect_to(&socket_path).await.unwrap();
  let folder = TempDir::new().unwrap();

  client.call("folder.add", serde_json::json!({ "path": folder.path().to_string_lossy() })).await.unwrap();
  let rebuilt = client.call("folder.rebuild_index", serde_json::json!({ "path": folder.path().to_string_lossy() })).await.unwrap();
  assert_eq!(rebuilt.result.unwrap()["success"], true);
  assert!(folder.path().join(".folder-mcp-cache").join("vector-index").exists());

  shutdown.shutdown();
  let _ = handle.await;
}

#[tokio::test]
async fn unconfigured_folder_search_errors_cleanly() {
  let (_dir, socket_path, handle, shutdown) = start_server().await;
  let mut client = Client::connect_to(&socket_path).await.unwrap();

  let response = client.call("folder.search", serde_json::json!({ "path": "/never/added", "query": "hello" })).await.unwrap();
  assert!(response.error.is_some());

  shutdown.shutdown();
  let _ = handle.await;
}

#[tokio::test]
async fn fmdm_update_pushes_on_folder_add() {
  let (_dir, socket_path, handle, shutdown) = start_server().await;
  let mut client = Client::connect_to(&socket_path).await.unwrap();
  let folder = TempDir::new().unwrap();

  let add_request = Request {
    id: Some(serde_json::json!(1)),
    method: "folder.add".to_string(),
    params: serde_json::json!({ "path": folder.path().to_string_lossy() }),
  };
  client.send(&add_request).await.unwrap();

  let mut saw_push = false;
  for _ in 0..20 {
    let frame = client.read_frame().await.unwrap();
    if frame.get("type").and_then(|v| v.as_str()) == Some("fmdm.update") {
      saw_push = true;
      break;
    }
  }
  assert!(saw_push, "expected at least one fmdm.update push after folder.add");

  shutdown.shutdown();
  let _ = handle.await;
}
