//! Folder configuration and lifecycle state data model.

use crate::task::{FileEmbeddingTask, Progress, ScanningProgress};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// How a folder's include/exclude globs are merged with the fleet defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
  Replace,
  #[default]
  Append,
  Union,
}

impl MergePolicy {
  pub fn merge(&self, defaults: &[String], overrides: &[String]) -> Vec<String> {
    match self {
      MergePolicy::Replace => overrides.to_vec(),
      MergePolicy::Append => defaults.iter().cloned().chain(overrides.iter().cloned()).collect(),
      MergePolicy::Union => {
        let mut out = defaults.to_vec();
        for o in overrides {
          if !out.contains(o) {
            out.push(o.clone());
          }
        }
        out
      }
    }
  }
}

/// Where a resolved field's value came from — mirrors the same provenance
/// idea used by the layered daemon configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  Default,
  User,
}

/// Folder configuration, identified by its resolved absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderConfig {
  pub path: PathBuf,
  pub name: String,
  pub embedding_model: String,
  pub include: Vec<String>,
  pub exclude: Vec<String>,
  pub merge_policy: MergePolicy,
  pub batch_size: usize,
  pub max_concurrency: usize,
  pub enabled: bool,
  #[serde(default)]
  pub provenance: HashMap<String, Provenance>,
}

pub const DEFAULT_EXCLUDE: &[&str] = &["node_modules", ".git", ".folder-mcp", ".folder-mcp-cache"];

impl FolderConfig {
  pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, embedding_model: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      name: name.into(),
      embedding_model: embedding_model.into(),
      include: Vec::new(),
      exclude: DEFAULT_EXCLUDE.iter().map(|s| s.to_string()).collect(),
      merge_policy: MergePolicy::default(),
      batch_size: 32,
      max_concurrency: 4,
      enabled: true,
      provenance: HashMap::new(),
    }
  }

  /// Clamp performance knobs into their documented bounds (batch size 1-128,
  /// concurrency 1-16).
  pub fn clamp(&mut self) {
    self.batch_size = self.batch_size.clamp(1, 128);
    self.max_concurrency = self.max_concurrency.clamp(1, 16);
  }
}

/// System directories a folder must never resolve to.
pub fn is_system_directory(path: &Path) -> bool {
  const FORBIDDEN: &[&str] = &["/", "/bin", "/boot", "/dev", "/etc", "/proc", "/root", "/sys", "/usr", "/var"];
  FORBIDDEN.iter().any(|f| path == Path::new(f))
}

/// True if `candidate` is an ancestor or descendant of `other` (not equal).
pub fn is_ancestor_or_descendant(candidate: &Path, other: &Path) -> bool {
  if candidate == other {
    return false;
  }
  candidate.starts_with(other) || other.starts_with(candidate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStatus {
  Pending,
  Scanning,
  Ready,
  Indexing,
  Active,
  Error,
  DownloadingModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSeverity {
  Info,
  Warning,
  Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
  pub message: String,
  pub severity: NotificationSeverity,
}

/// Full per-folder lifecycle state (§3 "Folder lifecycle state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderLifecycleState {
  pub status: LifecycleStatus,
  pub tasks: Vec<FileEmbeddingTask>,
  pub progress: Progress,
  pub scanning_progress: Option<ScanningProgress>,
  pub consecutive_errors: u32,
  pub notification: Option<Notification>,
}

impl FolderLifecycleState {
  pub fn new() -> Self {
    Self {
      status: LifecycleStatus::Pending,
      tasks: Vec::new(),
      progress: Progress::default(),
      scanning_progress: None,
      consecutive_errors: 0,
      notification: None,
    }
  }

  /// Invariant: `fileEmbeddingTasks` contains no duplicate paths.
  pub fn has_duplicate_task_paths(&self) -> bool {
    let mut seen = std::collections::HashSet::new();
    for t in &self.tasks {
      if !seen.insert(t.path.as_str()) {
        return true;
      }
    }
    false
  }
}

impl Default for FolderLifecycleState {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn merge_policy_replace_drops_defaults() {
    let defaults = vec!["*.md".to_string()];
    let overrides = vec!["*.txt".to_string()];
    assert_eq!(MergePolicy::Replace.merge(&defaults, &overrides), vec!["*.txt"]);
  }

  #[test]
  fn merge_policy_append_keeps_both() {
    let defaults = vec!["*.md".to_string()];
    let overrides = vec!["*.txt".to_string()];
    assert_eq!(MergePolicy::Append.merge(&defaults, &overrides), vec!["*.md", "*.txt"]);
  }

  #[test]
  fn merge_policy_union_dedupes() {
    let defaults = vec!["*.md".to_string()];
    let overrides = vec!["*.md".to_string(), "*.txt".to_string()];
    assert_eq!(MergePolicy::Union.merge(&defaults, &overrides), vec!["*.md", "*.txt"]);
  }

  #[test]
  fn detects_system_directory() {
    assert!(is_system_directory(Path::new("/etc")));
    assert!(!is_system_directory(Path::new("/home/user/docs")));
  }

  #[test]
  fn detects_ancestor_descendant() {
    assert!(is_ancestor_or_descendant(Path::new("/x/A"), Path::new("/x/A/sub")));
    assert!(!is_ancestor_or_descendant(Path::new("/x/A"), Path::new("/x/B")));
    assert!(!is_ancestor_or_descendant(Path::new("/x/A"), Path::new("/x/A")));
  }

  #[test]
  fn clamp_bounds_performance_knobs() {
    let mut f = FolderConfig::new("/x", "docs", "model");
    f.batch_size = 9999;
    f.max_concurrency = 0;
    f.clamp();
    assert_eq!(f.batch_size, 128);
    assert_eq!(f.max_concurrency, 1);
  }

  #[test]
  fn no_duplicate_task_paths_by_default() {
    let mut state = FolderLifecycleState::new();
    state.tasks.push(FileEmbeddingTask::new("a.md", crate::task::TaskKind::Create));
    assert!(!state.has_duplicate_task_paths());
    state.tasks.push(FileEmbeddingTask::new("a.md", crate::task::TaskKind::Update));
    assert!(state.has_duplicate_task_paths());
  }
}
