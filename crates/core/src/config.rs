//! The Daemon configuration document: layered TOML load/merge with
//! per-field provenance tracking, plus annotated template generation.
//!
//! Load priority (highest wins): project-local (`<cwd>/.folder-mcp/config.toml`)
//! > user (`<configDir>/config.toml`) > built-in defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
  #[default]
  Ollama,
  OpenRouter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  pub provider: EmbeddingProvider,
  pub model: String,
  pub dimensions: usize,
  pub ollama_url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub openrouter_api_key: Option<String>,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      provider: EmbeddingProvider::Ollama,
      model: "nomic-embed-text".to_string(),
      dimensions: 768,
      ollama_url: "http://localhost:11434".to_string(),
      openrouter_api_key: None,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  pub debounce_ms: u64,
  pub gitignore_debounce_ms: u64,
  pub max_pending_events: usize,
  pub write_stability_ms: u64,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      debounce_ms: 1000,
      gitignore_debounce_ms: 1000,
      max_pending_events: 10_000,
      write_stability_ms: 500,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
  pub worker_count: usize,
  pub intra_op_threads: usize,
  pub max_batch_size: usize,
  pub queue_soft_limit: usize,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      worker_count: 2,
      intra_op_threads: 2,
      max_batch_size: 32,
      queue_soft_limit: 5,
    }
  }
}

/// `{dataDir, cacheDir, configDir, socketPath, httpPort, defaultEmbeddingModel,
/// folders, embedding, watcher, pool}` — the full Daemon configuration
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub data_dir: PathBuf,
  pub cache_dir: PathBuf,
  pub config_dir: PathBuf,
  pub socket_path: PathBuf,
  pub http_port: u16,
  pub default_embedding_model: String,
  #[serde(skip_serializing_if = "Vec::is_empty")]
  pub folders: Vec<crate::folder::FolderConfig>,
  pub embedding: EmbeddingConfig,
  pub watcher: WatcherConfig,
  pub pool: PoolConfig,
}

impl Default for Config {
  fn default() -> Self {
    let data_dir = default_data_dir();
    let cache_dir = default_cache_dir();
    let config_dir = default_config_dir();
    let socket_path = data_dir.join("daemon.sock");
    Self {
      data_dir,
      cache_dir,
      config_dir,
      socket_path,
      http_port: default_http_port(),
      default_embedding_model: "nomic-embed-text".to_string(),
      folders: Vec::new(),
      embedding: EmbeddingConfig::default(),
      watcher: WatcherConfig::default(),
      pool: PoolConfig::default(),
    }
  }
}

pub fn default_data_dir() -> PathBuf {
  if let Ok(p) = std::env::var("DATA_DIR") {
    return PathBuf::from(p);
  }
  if let Ok(p) = std::env::var("XDG_DATA_HOME") {
    return PathBuf::from(p).join("folder-mcp");
  }
  dirs::data_dir().map(|p| p.join("folder-mcp")).unwrap_or_else(|| PathBuf::from(".folder-mcp/data"))
}

pub fn default_cache_dir() -> PathBuf {
  if let Ok(p) = std::env::var("XDG_CACHE_HOME") {
    return PathBuf::from(p).join("folder-mcp");
  }
  dirs::cache_dir().map(|p| p.join("folder-mcp")).unwrap_or_else(|| PathBuf::from(".folder-mcp/cache"))
}

pub fn default_config_dir() -> PathBuf {
  if let Ok(p) = std::env::var("CONFIG_DIR") {
    return PathBuf::from(p);
  }
  if let Ok(p) = std::env::var("XDG_CONFIG_HOME") {
    return PathBuf::from(p).join("folder-mcp");
  }
  dirs::config_dir().map(|p| p.join("folder-mcp")).unwrap_or_else(|| PathBuf::from(".folder-mcp/config"))
}

pub fn default_http_port() -> u16 {
  std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8642)
}

/// Where a resolved top-level field's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  Default,
  User,
  Project,
}

/// A loaded `Config` paired with the provenance of each dotted field path
/// that was actually present in a layer (defaults are implicit and never
/// appear in this map).
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
  pub config: Config,
  pub provenance: std::collections::HashMap<String, Provenance>,
}

impl Config {
  pub fn user_config_path(config_dir: &Path) -> PathBuf {
    config_dir.join("config.toml")
  }

  pub fn project_config_path(project_path: &Path) -> PathBuf {
    project_path.join(".folder-mcp").join("config.toml")
  }

  /// Load the layered configuration: defaults < user < project. Each layer
  /// is merged as a sparse `toml::Value` table, so a layer that sets only
  /// `[embedding]` leaves every other key — including siblings inside
  /// `[embedding]` it didn't mention — untouched rather than being reset to
  /// the built-in default.
  pub fn load(project_path: &Path) -> crate::error::Result<ResolvedConfig> {
    let defaults = Config::default();
    let mut merged = config_to_value(&defaults)?;
    let mut provenance = std::collections::HashMap::new();

    let user_path = Self::user_config_path(&defaults.config_dir);
    if user_path.exists() {
      let content = std::fs::read_to_string(&user_path)?;
      let overlay: toml::Value = toml::from_str(&content).map_err(|e| crate::error::Error::validation(e.to_string()))?;
      mark_provenance(&mut provenance, &overlay, Provenance::User);
      merged = merge_value(merged, overlay);
    }

    let project_path_toml = Self::project_config_path(project_path);
    if project_path_toml.exists() {
      let content = std::fs::read_to_string(&project_path_toml)?;
      let overlay: toml::Value = toml::from_str(&content).map_err(|e| crate::error::Error::validation(e.to_string()))?;
      mark_provenance(&mut provenance, &overlay, Provenance::Project);
      merged = merge_value(merged, overlay);
    }

    let text = toml::to_string(&merged).map_err(|e| crate::error::Error::validation(e.to_string()))?;
    let config: Config = toml::from_str(&text).map_err(|e| crate::error::Error::validation(e.to_string()))?;
    Ok(ResolvedConfig { config, provenance })
  }

  /// True if switching from `old` to `new` requires a daemon restart rather
  /// than a hot apply (socket path, HTTP port, or worker pool shape changed).
  pub fn needs_restart(old: &Config, new: &Config) -> bool {
    old.socket_path != new.socket_path || old.http_port != new.http_port || old.pool.worker_count != new.pool.worker_count
  }

  pub fn generate_template(preset: &str) -> String {
    format!(
      r#"# folder-mcp daemon configuration
# Place in <configDir>/config.toml (user) or <project>/.folder-mcp/config.toml (project override)
# preset: {preset}

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dimensions = 768
ollama_url = "http://localhost:11434"
# openrouter_api_key = "sk-or-..."

[watcher]
debounce_ms = 1000
gitignore_debounce_ms = 1000
max_pending_events = 10000
write_stability_ms = 500

[pool]
worker_count = 2
intra_op_threads = 2
max_batch_size = 32
queue_soft_limit = 5

http_port = 8642
default_embedding_model = "nomic-embed-text"
"#
    )
  }
}

/// Record provenance for every dotted field path a layer's TOML document
/// actually contains (both the section, e.g. `embedding`, and its leaves,
/// e.g. `embedding.model`), so a project file setting only `http_port`
/// doesn't also claim `embedding`/`watcher`/`pool` as project-provenanced.
fn mark_provenance(map: &mut std::collections::HashMap<String, Provenance>, layer: &toml::Value, p: Provenance) {
  mark_provenance_at(map, layer, "", p);
}

fn mark_provenance_at(map: &mut std::collections::HashMap<String, Provenance>, value: &toml::Value, prefix: &str, p: Provenance) {
  if let toml::Value::Table(table) = value {
    for (key, child) in table {
      let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
      map.insert(path.clone(), p);
      mark_provenance_at(map, child, &path, p);
    }
  }
}

fn config_to_value(config: &Config) -> crate::error::Result<toml::Value> {
  let text = toml::to_string(config).map_err(|e| crate::error::Error::validation(e.to_string()))?;
  toml::from_str(&text).map_err(|e| crate::error::Error::validation(e.to_string()))
}

/// Deep-merge `overlay` into `base`: tables merge key by key (recursively),
/// any other value present in `overlay` replaces `base`'s outright. A key
/// absent from `overlay` leaves `base`'s value — including nested table
/// fields the overlay layer never mentioned — untouched.
fn merge_value(base: toml::Value, overlay: toml::Value) -> toml::Value {
  match (base, overlay) {
    (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
      for (key, value) in overlay_table {
        let merged = match base_table.remove(&key) {
          Some(base_value) => merge_value(base_value, value),
          None => value,
        };
        base_table.insert(key, merged);
      }
      toml::Value::Table(base_table)
    }
    (_, overlay) => overlay,
  }
}
