//! Duplex Message Server's request router (§4.11): validates the envelope,
//! dispatches by `type`, and always replies with a well-formed response even
//! on malformed input — no exception-for-control-flow.

use crate::fmdm_broadcaster::FmdmBroadcaster;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use fmcore::{FolderConfig, normalise_relative_path, is_ancestor_or_descendant, is_system_directory};
use index::{ExtractionCoords, SearchScope};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// A client→daemon request envelope. `id` is required for request-style
/// messages (absent on fire-and-forget messages like `ping`, though this
/// router always echoes whatever was supplied).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
  #[serde(default)]
  pub id: Option<serde_json::Value>,
  #[serde(rename = "type")]
  pub method: String,
  #[serde(default)]
  pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub id: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub result: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<RpcError>,
}

/// `{code, message, supportedTypes}` — the structured error shape §4.11
/// requires for malformed input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
  pub code: i32,
  pub message: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub supported_types: Option<Vec<&'static str>>,
}

const SUPPORTED_TYPES: &[&str] = &[
  "connection.init",
  "folder.validate",
  "folder.add",
  "folder.remove",
  "folder.search",
  "folder.rebuild_index",
  "ping",
  "models.list",
  "models.recommend",
  "get_server_info",
  "get_folder_info",
  "getFoldersConfig",
];

impl Response {
  pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
    Self { id, result: Some(result), error: None }
  }

  pub fn error(id: Option<serde_json::Value>, code: i32, message: impl Into<String>) -> Self {
    Self {
      id,
      result: None,
      error: Some(RpcError {
        code,
        message: message.into(),
        supported_types: None,
      }),
    }
  }

  fn unknown_type(id: Option<serde_json::Value>, ty: &str) -> Self {
    Self {
      id,
      result: None,
      error: Some(RpcError {
        code: -32601,
        message: format!("unsupported message type: {ty}"),
        supported_types: Some(SUPPORTED_TYPES.to_vec()),
      }),
    }
  }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
  Tui,
  Cli,
  Web,
}

/// Dispatches every request type named in §4.11 onto the orchestrator and
/// FMDM broadcaster shared with the rest of the daemon.
pub struct Router {
  broadcaster: Arc<FmdmBroadcaster>,
  orchestrator: Arc<Orchestrator>,
  default_embedding_model: String,
}

impl Router {
  pub fn new(broadcaster: Arc<FmdmBroadcaster>, orchestrator: Arc<Orchestrator>, default_embedding_model: String) -> Self {
    Self {
      broadcaster,
      orchestrator,
      default_embedding_model,
    }
  }

  pub async fn handle(&self, request: Request) -> Response {
    debug!(ty = %request.method, "handling duplex request");

    match request.method.as_str() {
      "ping" => Response::success(request.id, serde_json::json!("pong")),
      "connection.init" => self.handle_connection_init(request).await,
      "folder.validate" => self.handle_folder_validate(request).await,
      "folder.add" => self.handle_folder_add(request).await,
      "folder.remove" => self.handle_folder_remove(request).await,
      "folder.search" => self.handle_folder_search(request).await,
      "folder.rebuild_index" => self.handle_folder_rebuild_index(request).await,
      "models.list" => self.handle_models_list(request),
      "models.recommend" => self.handle_models_recommend(request),
      "get_server_info" => self.handle_server_info(request),
      "get_folder_info" => self.handle_folder_info(request).await,
      "getFoldersConfig" => self.handle_folders_config(request).await,
      other => {
        warn!(ty = other, "unsupported duplex message type");
        Response::unknown_type(request.id, other)
      }
    }
  }

  async fn handle_connection_init(&self, request: Request) -> Response {
    let client_type: Option<ClientType> = request.params.get("clientType").and_then(|v| serde_json::from_value(v.clone()).ok());
    if client_type.is_none() {
      return Response::error(request.id, -32602, "connection.init requires clientType in {tui, cli, web}");
    }
    let client_id = uuid::Uuid::now_v7().to_string();
    let fmdm = self.broadcaster.client_join(fmcore::ConnectedClient {
      id: client_id.clone(),
      connected_at: chrono::Utc::now(),
    });
    Response::success(
      request.id,
      serde_json::json!({
        "type": "connection.ack",
        "clientId": client_id,
        "fmdm": fmdm,
      }),
    )
  }

  /// `folder.validate {path}` → `{valid, errors[], warnings[]}`, with error
  /// kinds {not_exists, not_directory, duplicate, subfolder,
  /// permission_denied} and warning kind {ancestor}.
  async fn handle_folder_validate(&self, request: Request) -> Response {
    let Some(path_str) = request.params.get("path").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "folder.validate requires a string `path`");
    };
    let path = PathBuf::from(path_str);

    let mut errors: Vec<&str> = Vec::new();
    let mut warnings: Vec<&str> = Vec::new();

    if !path.exists() {
      errors.push("not_exists");
    } else if !path.is_dir() {
      errors.push("not_directory");
    } else {
      match std::fs::read_dir(&path) {
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => errors.push("permission_denied"),
        _ => {}
      }
    }

    if is_system_directory(&path) {
      errors.push("permission_denied");
    }

    let configured = self.orchestrator.folder_paths().await;
    for existing in &configured {
      if existing == &path {
        errors.push("duplicate");
      } else if path.starts_with(existing) {
        errors.push("subfolder");
      } else if existing.starts_with(&path) {
        warnings.push("ancestor");
      } else if is_ancestor_or_descendant(&path, existing) {
        errors.push("subfolder");
      }
    }

    errors.dedup();
    warnings.dedup();
    let valid = errors.is_empty();

    Response::success(
      request.id,
      serde_json::json!({ "valid": valid, "errors": errors, "warnings": warnings }),
    )
  }

  async fn handle_folder_add(&self, request: Request) -> Response {
    let Some(path_str) = request.params.get("path").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "folder.add requires a string `path`");
    };
    let model = request
      .params
      .get("model")
      .and_then(|v| v.as_str())
      .unwrap_or(&self.default_embedding_model);
    let name = PathBuf::from(path_str)
      .file_name()
      .map(|n| n.to_string_lossy().to_string())
      .unwrap_or_else(|| path_str.to_string());

    let mut config = FolderConfig::new(path_str, name, model);
    if let Some(batch_size) = request.params.get("batchSize").and_then(|v| v.as_u64()) {
      config.batch_size = batch_size as usize;
    }
    if let Some(max_concurrency) = request.params.get("maxConcurrency").and_then(|v| v.as_u64()) {
      config.max_concurrency = max_concurrency as usize;
    }
    match self.orchestrator.add_folder(config).await {
      Ok(()) => Response::success(request.id, serde_json::json!({ "success": true })),
      Err(e) => Response::success(request.id, serde_json::json!({ "success": false, "error": orchestrator_error_message(&e) })),
    }
  }

  async fn handle_folder_remove(&self, request: Request) -> Response {
    let Some(path_str) = request.params.get("path").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "folder.remove requires a string `path`");
    };
    match self.orchestrator.remove_folder(std::path::Path::new(path_str)).await {
      Ok(()) => Response::success(request.id, serde_json::json!({ "success": true })),
      Err(e) => Response::success(request.id, serde_json::json!({ "success": false, "error": orchestrator_error_message(&e) })),
    }
  }

  /// `folder.search {path, query, limit?, threshold?, includeContent?}` —
  /// the duplex-socket counterpart to the REST search endpoint, for the CLI's
  /// `search` subcommand, which talks to the daemon only over the socket.
  async fn handle_folder_search(&self, request: Request) -> Response {
    let Some(path_str) = request.params.get("path").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "folder.search requires a string `path`");
    };
    let Some(query) = request.params.get("query").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "folder.search requires a string `query`");
    };
    let limit = request.params.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
    let threshold = request.params.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
    let include_content = request.params.get("includeContent").and_then(|v| v.as_bool()).unwrap_or(false);

    let folder_path = PathBuf::from(path_str);
    let Some(db) = self.orchestrator.folder_db(&folder_path).await else {
      return Response::error(request.id, -32000, format!("folder not found: {path_str}"));
    };
    let Some(vector_index) = self.orchestrator.folder_vector_index(&folder_path).await else {
      return Response::error(request.id, -32000, format!("folder not found: {path_str}"));
    };

    let mut vectors = match self.orchestrator.pool().embed_batch(vec![query.to_string()]).await {
      Ok(v) => v,
      Err(e) => return Response::error(request.id, -32000, format!("embedding failed: {e}")),
    };
    let query_vector = vectors.pop().unwrap_or_default();

    let scope = SearchScope {
      folder_path: Some(path_str.to_string()),
      model_id: None,
    };
    let hits = vector_index.read().await.search_scoped(&query_vector, &scope, limit, threshold);

    let fingerprints = match db.list_fingerprints().await {
      Ok(f) => f,
      Err(e) => return Response::error(request.id, -32000, format!("store error: {e}")),
    };

    let mut results = Vec::with_capacity(hits.len());
    for hit in &hits {
      let Some(fp) = fingerprints.iter().find(|f| f.content_hash == hit.mapping.owner_hash) else {
        continue;
      };
      let rel_path = std::path::Path::new(&fp.relative_path);
      let chunks = match db.get_chunks(&hit.mapping.owner_hash).await {
        Ok(c) => c,
        Err(e) => return Response::error(request.id, -32000, format!("store error: {e}")),
      };
      let chunk = chunks.iter().find(|c| c.chunk_index == hit.mapping.chunk_index);
      let snippet = match (chunk, include_content) {
        (Some(c), true) => c.content.clone(),
        (Some(c), false) => c.content.chars().take(240).collect(),
        (None, _) => String::new(),
      };
      let page_number = chunk.and_then(|c| match c.extraction {
        ExtractionCoords::Page { page_number } => Some(page_number),
        _ => None,
      });

      results.push(serde_json::json!({
        "documentId": normalise_relative_path(rel_path),
        "documentPath": fp.relative_path,
        "pageNumber": page_number,
        "snippet": snippet,
        "relevance": hit.normalised_score(),
      }));
    }

    Response::success(request.id, serde_json::json!({ "results": results }))
  }

  /// `folder.rebuild_index {path}` — flush the folder's current in-memory
  /// vector index to disk, for the CLI's `build-index` subcommand.
  async fn handle_folder_rebuild_index(&self, request: Request) -> Response {
    let Some(path_str) = request.params.get("path").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "folder.rebuild_index requires a string `path`");
    };
    match self.orchestrator.persist_index(std::path::Path::new(path_str)).await {
      Ok(()) => Response::success(request.id, serde_json::json!({ "success": true })),
      Err(e) => Response::success(request.id, serde_json::json!({ "success": false, "error": orchestrator_error_message(&e) })),
    }
  }

  fn handle_models_list(&self, request: Request) -> Response {
    let fmdm = self.broadcaster.snapshot();
    Response::success(request.id, serde_json::json!({ "models": fmdm.models, "curatedModels": fmdm.curated_models }))
  }

  fn handle_models_recommend(&self, request: Request) -> Response {
    let fmdm = self.broadcaster.snapshot();
    // No language-specific model catalogue is in scope; the curated list is
    // the same for every request regardless of `languages`/`mode`.
    Response::success(request.id, serde_json::json!({ "recommended": fmdm.curated_models }))
  }

  fn handle_server_info(&self, request: Request) -> Response {
    let fmdm = self.broadcaster.snapshot();
    Response::success(
      request.id,
      serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "pid": fmdm.daemon.pid,
        "uptimeSeconds": fmdm.daemon.uptime_seconds,
        "connections": fmdm.connections.count,
        "folders": fmdm.folders.len(),
      }),
    )
  }

  async fn handle_folder_info(&self, request: Request) -> Response {
    let Some(path_str) = request.params.get("folderPath").and_then(|v| v.as_str()) else {
      return Response::error(request.id, -32602, "get_folder_info requires a string `folderPath`");
    };
    let fmdm = self.broadcaster.snapshot();
    match fmdm.folders.into_iter().find(|f| f.config.path == PathBuf::from(path_str)) {
      Some(entry) => Response::success(request.id, serde_json::json!(entry)),
      None => Response::error(request.id, -32000, format!("folder not found: {path_str}")),
    }
  }

  async fn handle_folders_config(&self, request: Request) -> Response {
    let fmdm = self.broadcaster.snapshot();
    let configs: Vec<_> = fmdm.folders.into_iter().map(|f| f.config).collect();
    Response::success(request.id, serde_json::json!(configs))
  }
}

fn orchestrator_error_message(e: &OrchestratorError) -> String {
  e.to_string()
}
