use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use daemon::{Client, Daemon, DaemonConfig, Request, default_socket_path, is_running};
use fmcore::Config;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "folder-mcp")]
#[command(about = "Local document-indexing daemon: folder watching, semantic search, MCP surface")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the daemon in the foreground (Orchestrator, Broadcaster, duplex
  /// server, REST surface, signal handling) until a shutdown signal arrives.
  Daemon,
  /// Add a folder and let the daemon scan and embed it.
  Index {
    folder: String,
    /// Accepted for forward compatibility; the daemon does not yet support
    /// a scan-only mode, so embeddings still run.
    #[arg(long)]
    skip_embeddings: bool,
  },
  /// Ensure a folder's embeddings are up to date.
  Embeddings {
    folder: String,
    #[arg(long)]
    batch_size: Option<usize>,
    /// Remove and re-add the folder to force a fresh scan and re-embed.
    #[arg(long)]
    force: bool,
  },
  /// Flush a folder's in-memory vector index to its on-disk snapshot.
  BuildIndex { folder: String },
  /// Run a semantic search query against a folder.
  Search {
    folder: String,
    query: String,
    #[arg(short = 'k', long)]
    limit: Option<usize>,
    /// Persist the index before searching.
    #[arg(long)]
    rebuild_index: bool,
  },
  /// Add a folder and stream its lifecycle status until active or error.
  Watch {
    folder: String,
    /// Print the folder's current status once and exit, without adding it.
    #[arg(long)]
    status: bool,
  },
  /// Get or set configuration.
  Config {
    /// Dotted key to read, or write when `value` is also given.
    key: Option<String>,
    value: Option<String>,
    /// Write an annotated configuration template and exit.
    #[arg(long)]
    init: bool,
    #[arg(long, default_value = "standard")]
    preset: String,
    /// Print the effective merged configuration with field provenance.
    #[arg(long)]
    show: bool,
  },
  /// Report whether the daemon is reachable and its basic vitals.
  Health,
}

fn init_cli_logging() {
  tracing_subscriber::fmt().with_env_filter(env_filter()).init();
}

/// Returns the guard that must be kept alive for the duration of the program.
fn init_daemon_logging(data_dir: &Path) -> Option<WorkerGuard> {
  if std::fs::create_dir_all(data_dir).is_err() {
    init_cli_logging();
    return None;
  }

  let file_appender = tracing_appender::rolling::daily(data_dir, "folder-mcp.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let console_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(true);
  let file_layer = tracing_subscriber::fmt::layer().with_target(true).with_ansi(false).with_writer(file_writer);

  tracing_subscriber::registry().with(env_filter()).with(console_layer).with(file_layer).init();

  Some(guard)
}

fn env_filter() -> tracing_subscriber::EnvFilter {
  let directive = std::env::var("FOLDER_MCP_LOG").or_else(|_| std::env::var("RUST_LOG")).unwrap_or_else(|_| "info".to_string());
  tracing_subscriber::EnvFilter::try_new(directive).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

fn resolve_socket_path() -> PathBuf {
  std::env::var("FOLDER_MCP_SOCKET").map(PathBuf::from).unwrap_or_else(|_| default_socket_path())
}

/// Resolve `folder` relative to the current directory into an absolute path,
/// matching how the daemon keys folders by their canonical `PathBuf`.
fn resolve_folder(folder: &str) -> PathBuf {
  std::fs::canonicalize(folder).unwrap_or_else(|_| PathBuf::from(folder))
}

/// Connect to a running daemon, starting one in the background on first use
/// (§4.14) if none is reachable at `socket_path`.
async fn ensure_daemon_running(socket_path: &Path) -> Result<()> {
  if is_running(socket_path) {
    return Ok(());
  }

  info!(socket = ?socket_path, "no daemon reachable, starting one in the background");
  let exe = std::env::current_exe().context("resolving current executable")?;
  std::process::Command::new(exe)
    .arg("daemon")
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null())
    .spawn()
    .context("spawning background daemon")?;

  for _ in 0..50 {
    if is_running(socket_path) {
      return Ok(());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
  }
  bail!("daemon did not become reachable within 5s of starting")
}

async fn connect(socket_path: &Path) -> Result<Client> {
  Client::connect_to(socket_path).await.context("connecting to daemon")
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let data_dir = fmcore::config::default_data_dir();

  let _guard = match &cli.command {
    Commands::Daemon => init_daemon_logging(&data_dir),
    _ => {
      init_cli_logging();
      None
    }
  };

  let code = match cli.command {
    Commands::Daemon => cmd_daemon().await,
    Commands::Index { folder, skip_embeddings } => cmd_index(&folder, skip_embeddings).await,
    Commands::Embeddings { folder, batch_size, force } => cmd_embeddings(&folder, batch_size, force).await,
    Commands::BuildIndex { folder } => cmd_build_index(&folder).await,
    Commands::Search { folder, query, limit, rebuild_index } => cmd_search(&folder, &query, limit, rebuild_index).await,
    Commands::Watch { folder, status } => cmd_watch(&folder, status).await,
    Commands::Config { key, value, init, preset, show } => cmd_config(key, value, init, &preset, show).await,
    Commands::Health => cmd_health().await,
  };

  match code {
    Ok(code) => std::process::exit(code),
    Err(e) => {
      eprintln!("error: {e:#}");
      std::process::exit(1);
    }
  }
}

async fn cmd_daemon() -> Result<i32> {
  let resolved = Config::load(&std::env::current_dir()?).context("loading configuration")?;
  let mut daemon = Daemon::new(DaemonConfig { config: resolved.config, daemonize: false });
  daemon.run().await.context("running daemon")?;
  Ok(0)
}

fn print_call_result(method: &str, response: &daemon::Response) -> Result<i32> {
  if let Some(ref error) = response.error {
    eprintln!("{method} failed: {} (code {})", error.message, error.code);
    return Ok(1);
  }
  let result = response.result.clone().unwrap_or_default();
  if result.get("success") == Some(&serde_json::json!(false)) {
    eprintln!("{method} failed: {}", result.get("error").and_then(|v| v.as_str()).unwrap_or("unknown error"));
    return Ok(1);
  }
  println!("{}", serde_json::to_string_pretty(&result)?);
  Ok(0)
}

async fn cmd_index(folder: &str, skip_embeddings: bool) -> Result<i32> {
  if skip_embeddings {
    warn!("--skip-embeddings is accepted but not yet enforced; the folder will still be embedded");
  }
  let socket_path = resolve_socket_path();
  ensure_daemon_running(&socket_path).await?;
  let mut client = connect(&socket_path).await?;
  let path = resolve_folder(folder);
  let response = client.call("folder.add", serde_json::json!({ "path": path.to_string_lossy() })).await?;
  print_call_result("folder.add", &response)
}

async fn cmd_embeddings(folder: &str, batch_size: Option<usize>, force: bool) -> Result<i32> {
  let socket_path = resolve_socket_path();
  ensure_daemon_running(&socket_path).await?;
  let mut client = connect(&socket_path).await?;
  let path = resolve_folder(folder);

  let existing = client.call("get_folder_info", serde_json::json!({ "folderPath": path.to_string_lossy() })).await?;
  let configured = existing.error.is_none();

  if configured && force {
    client.call("folder.remove", serde_json::json!({ "path": path.to_string_lossy() })).await?;
  } else if configured {
    println!("{} is already configured; embeddings are kept current incrementally as files change", folder);
    return Ok(0);
  }

  let mut params = serde_json::json!({ "path": path.to_string_lossy() });
  if let Some(batch_size) = batch_size {
    params["batchSize"] = serde_json::json!(batch_size);
  }
  let response = client.call("folder.add", params).await?;
  print_call_result("folder.add", &response)
}

async fn cmd_build_index(folder: &str) -> Result<i32> {
  let socket_path = resolve_socket_path();
  ensure_daemon_running(&socket_path).await?;
  let mut client = connect(&socket_path).await?;
  let path = resolve_folder(folder);
  let response = client.call("folder.rebuild_index", serde_json::json!({ "path": path.to_string_lossy() })).await?;
  print_call_result("folder.rebuild_index", &response)
}

async fn cmd_search(folder: &str, query: &str, limit: Option<usize>, rebuild_index: bool) -> Result<i32> {
  let socket_path = resolve_socket_path();
  ensure_daemon_running(&socket_path).await?;
  let mut client = connect(&socket_path).await?;
  let path = resolve_folder(folder);

  if rebuild_index {
    client.call("folder.rebuild_index", serde_json::json!({ "path": path.to_string_lossy() })).await?;
  }

  let response = client
    .call(
      "folder.search",
      serde_json::json!({ "path": path.to_string_lossy(), "query": query, "limit": limit.unwrap_or(10) }),
    )
    .await?;
  if let Some(ref error) = response.error {
    eprintln!("search failed: {} (code {})", error.message, error.code);
    return Ok(1);
  }
  let result = response.result.unwrap_or_default();
  let results = result.get("results").and_then(|r| r.as_array()).cloned().unwrap_or_default();
  if results.is_empty() {
    println!("no results");
    return Ok(0);
  }
  for (rank, hit) in results.iter().enumerate() {
    let doc = hit.get("documentPath").and_then(|v| v.as_str()).unwrap_or("?");
    let relevance = hit.get("relevance").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let snippet = hit.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
    println!("{}. {doc} ({relevance:.3})\n   {snippet}", rank + 1);
  }
  Ok(0)
}

async fn cmd_watch(folder: &str, status_only: bool) -> Result<i32> {
  let socket_path = resolve_socket_path();
  ensure_daemon_running(&socket_path).await?;
  let mut client = connect(&socket_path).await?;
  let path = resolve_folder(folder);
  let path_str = path.to_string_lossy().to_string();

  if status_only {
    let response = client.call("get_folder_info", serde_json::json!({ "folderPath": &path_str })).await?;
    return print_call_result("get_folder_info", &response);
  }

  let add_request = Request {
    id: Some(serde_json::json!(1)),
    method: "folder.add".to_string(),
    params: serde_json::json!({ "path": &path_str }),
  };
  client.send(&add_request).await.context("sending folder.add")?;

  loop {
    let frame = client.read_frame().await.context("reading daemon frame")?;

    if frame.get("type").is_none() {
      if let Some(error) = frame.get("error").filter(|e| !e.is_null()) {
        eprintln!("folder.add failed: {error}");
        return Ok(1);
      }
      continue;
    }

    if frame.get("type").and_then(|v| v.as_str()) != Some("fmdm.update") {
      continue;
    }

    let Some(entry) = frame["fmdm"]["folders"].as_array().and_then(|fs| fs.iter().find(|f| f["config"]["path"].as_str() == Some(path_str.as_str()))) else {
      continue;
    };
    let status = entry["state"]["status"].as_str().unwrap_or("").to_string();
    println!("{folder}: {status}");

    match status.as_str() {
      "active" => return Ok(0),
      "error" => return Ok(1),
      _ => continue,
    }
  }
}

async fn cmd_config(key: Option<String>, value: Option<String>, init: bool, preset: &str, show: bool) -> Result<i32> {
  let project_path = std::env::current_dir()?;

  if init {
    let template = Config::generate_template(preset);
    let target = Config::project_config_path(&project_path);
    if let Some(parent) = target.parent() {
      std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&target, template)?;
    println!("wrote {}", target.display());
    return Ok(0);
  }

  let resolved = Config::load(&project_path).context("loading configuration")?;

  if show {
    println!("{}", toml::to_string_pretty(&resolved.config)?);
    for (field, provenance) in &resolved.provenance {
      println!("# {field} <- {provenance:?}");
    }
    return Ok(0);
  }

  let Some(key) = key else {
    bail!("config requires a key, or --init/--show");
  };

  let mut doc = serde_json::to_value(&resolved.config)?;
  match value {
    None => {
      let Some(found) = dotted_get(&doc, &key) else {
        bail!("unknown configuration key: {key}");
      };
      println!("{found}");
      Ok(0)
    }
    Some(raw) => {
      let parsed = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
      if !dotted_set(&mut doc, &key, parsed) {
        bail!("unknown configuration key: {key}");
      }
      let updated: Config = serde_json::from_value(doc)?;
      let target = Config::project_config_path(&project_path);
      if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
      }
      std::fs::write(&target, toml::to_string_pretty(&updated)?)?;
      println!("set {key} in {}", target.display());
      Ok(0)
    }
  }
}

fn dotted_get<'a>(doc: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
  key.split('.').try_fold(doc, |v, segment| v.get(segment))
}

fn dotted_set(doc: &mut serde_json::Value, key: &str, value: serde_json::Value) -> bool {
  let mut segments: Vec<&str> = key.split('.').collect();
  let Some(last) = segments.pop() else { return false };
  let mut cursor = doc;
  for segment in segments {
    let Some(next) = cursor.get_mut(segment) else { return false };
    cursor = next;
  }
  let Some(slot) = cursor.get_mut(last) else { return false };
  *slot = value;
  true
}

async fn cmd_health() -> Result<i32> {
  let socket_path = resolve_socket_path();
  if !is_running(&socket_path) {
    println!("daemon not running ({})", socket_path.display());
    return Ok(1);
  }
  let mut client = connect(&socket_path).await?;
  let response = client.call("get_server_info", serde_json::json!({})).await?;
  print_call_result("get_server_info", &response)
}
