//! The FMDM (Folder MCP Daemon Model) snapshot document broadcast to every
//! connected client whenever daemon-wide state changes.

use crate::folder::{FolderConfig, FolderLifecycleState};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInfo {
  pub pid: u32,
  pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedClient {
  pub id: String,
  pub connected_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connections {
  pub count: usize,
  pub clients: Vec<ConnectedClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
  pub id: String,
  pub dimensions: usize,
  pub installed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelCheckStatus {
  Checking,
  Complete,
  Failed,
}

/// One entry of `folders[]`: a folder's configuration joined with its current
/// lifecycle state, as broadcast to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
  pub config: FolderConfig,
  pub state: FolderLifecycleState,
}

/// `{version, folders[], daemon, connections, models[], curatedModels[],
/// modelCheckStatus?}`. `version` strictly increases with every broadcast —
/// clients use it to detect and discard stale snapshots that arrive
/// out-of-order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fmdm {
  pub version: u64,
  pub folders: Vec<FolderEntry>,
  pub daemon: DaemonInfo,
  pub connections: Connections,
  pub models: Vec<ModelInfo>,
  pub curated_models: Vec<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub model_check_status: Option<ModelCheckStatus>,
}

impl Fmdm {
  pub fn empty(pid: u32) -> Self {
    Self {
      version: 0,
      folders: Vec::new(),
      daemon: DaemonInfo { pid, uptime_seconds: 0 },
      connections: Connections::default(),
      models: Vec::new(),
      curated_models: Vec::new(),
      model_check_status: None,
    }
  }

  /// Build the next snapshot from `self`, incrementing `version`. The caller
  /// supplies the updated folder/connection data; `version` can never be
  /// supplied by the caller, guaranteeing monotonicity.
  pub fn next(&self, folders: Vec<FolderEntry>, connections: Connections, uptime_seconds: u64) -> Self {
    Self {
      version: self.version + 1,
      folders,
      daemon: DaemonInfo {
        pid: self.daemon.pid,
        uptime_seconds,
      },
      connections,
      models: self.models.clone(),
      curated_models: self.curated_models.clone(),
      model_check_status: self.model_check_status,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn version_strictly_increases() {
    let snap0 = Fmdm::empty(1234);
    let snap1 = snap0.next(Vec::new(), Connections::default(), 10);
    let snap2 = snap1.next(Vec::new(), Connections::default(), 20);
    assert_eq!(snap0.version, 0);
    assert_eq!(snap1.version, 1);
    assert_eq!(snap2.version, 2);
  }

  #[test]
  fn pid_is_stable_across_snapshots() {
    let snap0 = Fmdm::empty(42);
    let snap1 = snap0.next(Vec::new(), Connections::default(), 5);
    assert_eq!(snap1.daemon.pid, 42);
  }
}
