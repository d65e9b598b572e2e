//! Per-folder embedding task queue items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
  Create,
  Update,
  Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
  Pending,
  InProgress,
  Success,
  Error,
}

/// One entry of a folder's `fileEmbeddingTasks` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEmbeddingTask {
  pub id: Uuid,
  pub path: String,
  pub kind: TaskKind,
  pub status: TaskStatus,
  pub retry_count: u32,
  pub max_retries: u32,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl FileEmbeddingTask {
  pub fn new(path: impl Into<String>, kind: TaskKind) -> Self {
    let now = Utc::now();
    Self {
      id: Uuid::now_v7(),
      path: path.into(),
      kind,
      status: TaskStatus::Pending,
      retry_count: 0,
      max_retries: 3,
      created_at: now,
      updated_at: now,
    }
  }

  /// True once `retry_count` has exhausted `max_retries` on a failing task.
  pub fn retries_exhausted(&self) -> bool {
    self.retry_count >= self.max_retries
  }

  pub fn mark_retry(&mut self) {
    self.retry_count += 1;
    self.updated_at = Utc::now();
  }

  pub fn mark_status(&mut self, status: TaskStatus) {
    self.status = status;
    self.updated_at = Utc::now();
  }
}

/// `{total, completed, failed, inProgress, percentage}` — per-folder indexing
/// progress. Percentage is monotonic within a single indexing pass.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Progress {
  pub total: usize,
  pub completed: usize,
  pub failed: usize,
  pub in_progress: usize,
}

impl Progress {
  pub fn percentage(&self) -> f64 {
    if self.total == 0 {
      return 100.0;
    }
    ((self.completed + self.failed) as f64 / self.total as f64) * 100.0
  }

  /// Invariant from the testable-properties section: a folder in `active`
  /// has `completed + failed == total` with `total > 0`, or `total == 0`.
  pub fn is_drained(&self) -> bool {
    self.total == 0 || self.completed + self.failed == self.total
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
  FolderToDb,
  DbToFolder,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScanningProgress {
  pub phase: ScanPhase,
  pub processed: usize,
  pub total: usize,
}

impl ScanningProgress {
  pub fn percentage(&self) -> f64 {
    if self.total == 0 {
      return 100.0;
    }
    (self.processed as f64 / self.total as f64) * 100.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn progress_drained_when_total_zero() {
    let p = Progress::default();
    assert!(p.is_drained());
    assert_eq!(p.percentage(), 100.0);
  }

  #[test]
  fn progress_drained_when_completed_plus_failed_equals_total() {
    let p = Progress {
      total: 5,
      completed: 3,
      failed: 2,
      in_progress: 0,
    };
    assert!(p.is_drained());
  }

  #[test]
  fn progress_not_drained_mid_pass() {
    let p = Progress {
      total: 5,
      completed: 2,
      failed: 0,
      in_progress: 1,
    };
    assert!(!p.is_drained());
  }

  #[test]
  fn retries_exhausted_at_max() {
    let mut t = FileEmbeddingTask::new("a.md", TaskKind::Create);
    assert!(!t.retries_exhausted());
    for _ in 0..3 {
      t.mark_retry();
    }
    assert!(t.retries_exhausted());
  }
}
