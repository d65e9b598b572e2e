//! REST Surface (§4.12): request-scoped HTTP endpoints over the same
//! Orchestrator-owned state and index the duplex server reads, for clients
//! that want one-shot calls instead of a persistent connection.

use crate::orchestrator::Orchestrator;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use fmcore::normalise_relative_path;
use index::{DocumentStructure, ExtractionCoords, SearchScope};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct AppState {
  orchestrator: Arc<Orchestrator>,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> AxumRouter {
  AxumRouter::new()
    .route("/folders/{folder_id}/documents", get(list_documents))
    .route("/folders/{folder_id}/documents/{doc_id}", get(get_document))
    .route("/folders/{folder_id}/documents/{doc_id}/outline", get(get_outline))
    .route("/folders/{folder_id}/search", post(search_folder))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(AppState { orchestrator })
}

#[derive(Error, Debug)]
enum AppError {
  #[error("folder not configured: {0}")]
  FolderNotFound(String),
  #[error("document not found: {0}")]
  DocumentNotFound(String),
  #[error("store error: {0}")]
  Store(#[from] store::DbError),
  #[error("parse error: {0}")]
  Parse(#[from] index::ParseError),
  #[error("embedding error: {0}")]
  Embedding(#[from] embedding::EmbeddingError),
  #[error("vector index error: {0}")]
  VectorIndex(#[from] index::VectorIndexError),
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
  fn into_response(self) -> AxumResponse {
    let status = match &self {
      AppError::FolderNotFound(_) | AppError::DocumentNotFound(_) => StatusCode::NOT_FOUND,
      _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let details = match &self {
      AppError::FolderNotFound(id) | AppError::DocumentNotFound(id) => Some(id.clone()),
      _ => None,
    };
    (status, Json(serde_json::json!({ "error": self.to_string(), "details": details }))).into_response()
  }
}

fn document_type_label(path: &Path) -> Option<String> {
  index::detect_document_type(path).map(|t| format!("{t:?}").to_lowercase())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentSummary {
  id: String,
  name: String,
  relative_path: String,
  #[serde(rename = "type")]
  doc_type: Option<String>,
  size: u64,
  modified: i64,
  indexed: bool,
  metadata: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsQuery {
  limit: Option<usize>,
  offset: Option<usize>,
  sort: Option<String>,
  order: Option<String>,
  #[serde(rename = "type")]
  doc_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct DocumentsResponse {
  documents: Vec<DocumentSummary>,
  total: usize,
}

async fn list_documents(State(state): State<AppState>, AxumPath(folder_id): AxumPath<String>, Query(params): Query<DocumentsQuery>) -> Result<Json<DocumentsResponse>, AppError> {
  let folder_path = PathBuf::from(&folder_id);
  let db = state.orchestrator.folder_db(&folder_path).await.ok_or_else(|| AppError::FolderNotFound(folder_id.clone()))?;

  let mut documents = Vec::new();
  for fp in db.list_fingerprints().await? {
    let rel_path = Path::new(&fp.relative_path);
    let doc_type = document_type_label(rel_path);
    if let Some(ref wanted) = params.doc_type
      && doc_type.as_deref() != Some(wanted.as_str())
    {
      continue;
    }

    let indexed = db.count_chunks(Some(&format!("owner_hash = '{}'", fp.content_hash))).await? > 0;
    let word_count: usize = db.get_chunks(&fp.content_hash).await?.iter().map(|c| c.content.split_whitespace().count()).sum();

    documents.push(DocumentSummary {
      id: normalise_relative_path(rel_path),
      name: rel_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
      relative_path: fp.relative_path.clone(),
      doc_type,
      size: fp.size,
      modified: fp.mtime,
      indexed,
      metadata: serde_json::json!({ "wordCount": word_count }),
    });
  }

  let total = documents.len();
  sort_documents(&mut documents, params.sort.as_deref(), params.order.as_deref());

  let offset = params.offset.unwrap_or(0);
  let limit = params.limit.unwrap_or(total.max(1));
  let page = documents.into_iter().skip(offset).take(limit).collect();

  Ok(Json(DocumentsResponse { documents: page, total }))
}

fn sort_documents(documents: &mut [DocumentSummary], sort: Option<&str>, order: Option<&str>) {
  match sort.unwrap_or("name") {
    "modified" => documents.sort_by_key(|d| d.modified),
    "size" => documents.sort_by_key(|d| d.size),
    "type" => documents.sort_by(|a, b| a.doc_type.cmp(&b.doc_type)),
    _ => documents.sort_by(|a, b| a.name.cmp(&b.name)),
  }
  if order == Some("desc") {
    documents.reverse();
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentDetail {
  id: String,
  name: String,
  relative_path: String,
  #[serde(rename = "type")]
  doc_type: Option<String>,
  content: String,
  metadata: serde_json::Value,
}

async fn get_document(State(state): State<AppState>, AxumPath((folder_id, doc_id)): AxumPath<(String, String)>) -> Result<Json<DocumentDetail>, AppError> {
  let folder_path = PathBuf::from(&folder_id);
  if !state.orchestrator.is_configured(&folder_path).await {
    return Err(AppError::FolderNotFound(folder_id));
  }

  let full_path = folder_path.join(&doc_id);
  if !full_path.exists() {
    return Err(AppError::DocumentNotFound(doc_id));
  }
  let parsed = index::parse(&full_path)?;
  let metadata = structure_metadata(&parsed.structure, &parsed.text);

  Ok(Json(DocumentDetail {
    id: normalise_relative_path(Path::new(&doc_id)),
    name: Path::new(&doc_id).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
    relative_path: doc_id,
    doc_type: document_type_label(&full_path),
    content: parsed.text,
    metadata,
  }))
}

fn structure_metadata(structure: &DocumentStructure, text: &str) -> serde_json::Value {
  let word_count = text.split_whitespace().count();
  match structure {
    DocumentStructure::Headings(h) => serde_json::json!({ "wordCount": word_count, "headingCount": h.len() }),
    DocumentStructure::Pages(p) => serde_json::json!({ "wordCount": word_count, "pageCount": p.len() }),
    DocumentStructure::Sheets(s) => serde_json::json!({ "wordCount": word_count, "sheetCount": s.len() }),
    DocumentStructure::Slides(s) => serde_json::json!({ "wordCount": word_count, "slideCount": s.len() }),
    DocumentStructure::Flat => serde_json::json!({ "wordCount": word_count }),
  }
}

async fn get_outline(State(state): State<AppState>, AxumPath((folder_id, doc_id)): AxumPath<(String, String)>) -> Result<Json<serde_json::Value>, AppError> {
  let folder_path = PathBuf::from(&folder_id);
  if !state.orchestrator.is_configured(&folder_path).await {
    return Err(AppError::FolderNotFound(folder_id));
  }
  let full_path = folder_path.join(&doc_id);
  if !full_path.exists() {
    return Err(AppError::DocumentNotFound(doc_id));
  }
  let parsed = index::parse(&full_path)?;

  let outline = match parsed.structure {
    DocumentStructure::Headings(headings) => serde_json::json!({
      "type": "headings",
      "entries": headings.iter().map(|h| serde_json::json!({ "level": h.level, "title": h.title, "offset": h.start_offset })).collect::<Vec<_>>(),
    }),
    DocumentStructure::Pages(pages) => serde_json::json!({
      "type": "pages",
      "entries": pages.iter().map(|p| serde_json::json!({ "pageNumber": p.page_number, "startOffset": p.start_offset, "endOffset": p.end_offset })).collect::<Vec<_>>(),
    }),
    DocumentStructure::Sheets(sheets) => serde_json::json!({
      "type": "sheets",
      "entries": sheets.iter().map(|s| serde_json::json!({ "sheetName": s.sheet_name, "cellRange": s.cell_range, "startOffset": s.start_offset, "endOffset": s.end_offset })).collect::<Vec<_>>(),
    }),
    DocumentStructure::Slides(slides) => serde_json::json!({
      "type": "slides",
      "entries": slides.iter().map(|s| serde_json::json!({ "slideNumber": s.slide_number, "includeNotes": s.include_notes, "startOffset": s.start_offset, "endOffset": s.end_offset })).collect::<Vec<_>>(),
    }),
    DocumentStructure::Flat => serde_json::json!({
      "type": "sections",
      "entries": [{ "title": "Document", "startOffset": 0, "endOffset": parsed.text.len() }],
    }),
  };

  Ok(Json(outline))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
  query: String,
  #[serde(default = "default_search_limit")]
  limit: usize,
  #[serde(default)]
  threshold: f32,
  #[serde(default)]
  include_content: bool,
}

fn default_search_limit() -> usize {
  10
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResultItem {
  document_id: String,
  document_name: String,
  document_path: String,
  document_type: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  page_number: Option<u32>,
  snippet: String,
  relevance: f32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchPerformance {
  search_time: f64,
  model_load_time: f64,
  documents_searched: usize,
  total_results: usize,
  model_used: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
  folder: String,
  results: Vec<SearchResultItem>,
  performance: SearchPerformance,
}

const SNIPPET_CHARS: usize = 240;

async fn search_folder(State(state): State<AppState>, AxumPath(folder_id): AxumPath<String>, Json(request): Json<SearchRequest>) -> Result<Json<SearchResponse>, AppError> {
  let started = Instant::now();
  let folder_path = PathBuf::from(&folder_id);
  let db = state.orchestrator.folder_db(&folder_path).await.ok_or_else(|| AppError::FolderNotFound(folder_id.clone()))?;
  let vector_index = state.orchestrator.folder_vector_index(&folder_path).await.ok_or_else(|| AppError::FolderNotFound(folder_id.clone()))?;

  let model_load_started = Instant::now();
  let mut vectors = state.orchestrator.pool().embed_batch(vec![request.query.clone()]).await?;
  let model_load_time = model_load_started.elapsed().as_secs_f64();
  let query_vector = vectors.pop().unwrap_or_default();

  let scope = SearchScope {
    folder_path: Some(folder_id.clone()),
    model_id: None,
  };
  let hits = vector_index.read().await.search_scoped(&query_vector, &scope, request.limit, request.threshold);

  let fingerprints = db.list_fingerprints().await?;
  let documents_searched = fingerprints.len();

  let mut results = Vec::with_capacity(hits.len());
  for hit in &hits {
    let Some(fp) = fingerprints.iter().find(|f| f.content_hash == hit.mapping.owner_hash) else {
      continue;
    };
    let rel_path = Path::new(&fp.relative_path);
    let chunks = db.get_chunks(&hit.mapping.owner_hash).await?;
    let chunk = chunks.iter().find(|c| c.chunk_index == hit.mapping.chunk_index);

    let snippet = match (chunk, request.include_content) {
      (Some(c), true) => c.content.clone(),
      (Some(c), false) => c.content.chars().take(SNIPPET_CHARS).collect(),
      (None, _) => String::new(),
    };
    let page_number = chunk.and_then(|c| match c.extraction {
      ExtractionCoords::Page { page_number } => Some(page_number),
      _ => None,
    });

    results.push(SearchResultItem {
      document_id: normalise_relative_path(rel_path),
      document_name: rel_path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
      document_path: fp.relative_path.clone(),
      document_type: document_type_label(rel_path),
      page_number,
      snippet,
      relevance: hit.normalised_score(),
    });
  }

  let total_results = results.len();
  Ok(Json(SearchResponse {
    folder: folder_id,
    results,
    performance: SearchPerformance {
      search_time: started.elapsed().as_secs_f64(),
      model_load_time,
      documents_searched,
      total_results,
      model_used: hits.first().map(|h| h.mapping.model_id.clone()).unwrap_or_default(),
    },
  }))
}
