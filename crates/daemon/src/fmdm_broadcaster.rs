//! Single-writer owner of the authoritative FMDM snapshot (§4.10).
//!
//! Every mutation goes through [`FmdmBroadcaster::mutate`], which bumps
//! `version` and broadcasts the resulting snapshot to every subscriber.
//! Mutual exclusion is a plain `Mutex` rather than a mailbox/actor task —
//! both model the same single-writer guarantee the spec asks for, and a
//! mutex needs no extra task or channel plumbing for a state document this
//! small.

use fmcore::{ConnectedClient, FolderConfig, FolderEntry, FolderLifecycleState, Fmdm, ModelInfo};
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

const BROADCAST_CAPACITY: usize = 64;

pub struct FmdmBroadcaster {
  state: Mutex<Fmdm>,
  tx: broadcast::Sender<Fmdm>,
}

impl FmdmBroadcaster {
  pub fn new(pid: u32) -> Self {
    let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);
    Self {
      state: Mutex::new(Fmdm::empty(pid)),
      tx,
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Fmdm> {
    self.tx.subscribe()
  }

  /// Defensive copy: callers can never observe or mutate the live document.
  pub fn snapshot(&self) -> Fmdm {
    self.state.lock().unwrap().clone()
  }

  /// Bump `version` and apply `f` to the resulting snapshot, then broadcast
  /// it. `f` sees a document whose `folders`/`connections`/`daemon` already
  /// carry forward the prior values, so it only needs to touch what it's
  /// actually changing.
  fn mutate<F: FnOnce(&mut Fmdm)>(&self, f: F) -> Fmdm {
    let mut guard = self.state.lock().unwrap();
    let mut next = guard.next(guard.folders.clone(), guard.connections.clone(), guard.daemon.uptime_seconds);
    f(&mut next);
    *guard = next.clone();
    drop(guard);
    if self.tx.send(next.clone()).is_err() {
      debug!("fmdm broadcast: no subscribers");
    }
    next
  }

  /// Insert or replace a folder entry. Preserves the prior notification
  /// unless `state.notification` is explicitly set (§4.10's preservation
  /// rule).
  pub fn upsert_folder(&self, config: FolderConfig, mut state: FolderLifecycleState) -> Fmdm {
    self.mutate(|fmdm| {
      if state.notification.is_none()
        && let Some(existing) = fmdm.folders.iter().find(|f| f.config.path == config.path)
      {
        state.notification = existing.state.notification.clone();
      }
      fmdm.folders.retain(|f| f.config.path != config.path);
      fmdm.folders.push(FolderEntry { config, state });
    })
  }

  pub fn remove_folder(&self, path: &Path) -> Fmdm {
    let path = path.to_path_buf();
    self.mutate(|fmdm| fmdm.folders.retain(|f| f.config.path != path))
  }

  /// Apply `f` to the lifecycle state of the folder at `path`, if present.
  pub fn update_folder_state<F: FnOnce(&mut FolderLifecycleState)>(&self, path: &Path, f: F) -> Option<Fmdm> {
    let current = self.snapshot();
    if !current.folders.iter().any(|e| e.config.path == path) {
      return None;
    }
    let path = path.to_path_buf();
    Some(self.mutate(|fmdm| {
      if let Some(entry) = fmdm.folders.iter_mut().find(|e| e.config.path == path) {
        f(&mut entry.state);
      }
    }))
  }

  pub fn client_join(&self, client: ConnectedClient) -> Fmdm {
    self.mutate(|fmdm| {
      fmdm.connections.clients.push(client);
      fmdm.connections.count = fmdm.connections.clients.len();
    })
  }

  pub fn client_leave(&self, client_id: &str) -> Fmdm {
    let client_id = client_id.to_string();
    self.mutate(|fmdm| {
      fmdm.connections.clients.retain(|c| c.id != client_id);
      fmdm.connections.count = fmdm.connections.clients.len();
    })
  }

  pub fn set_models(&self, models: Vec<ModelInfo>) -> Fmdm {
    self.mutate(|fmdm| fmdm.models = models)
  }

  pub fn tick_uptime(&self, uptime_seconds: u64) -> Fmdm {
    self.mutate(|fmdm| fmdm.daemon.uptime_seconds = uptime_seconds)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use fmcore::{FolderConfig, FolderLifecycleState, Notification, NotificationSeverity};

  #[test]
  fn version_strictly_increases_on_every_mutation() {
    let b = FmdmBroadcaster::new(1);
    let v0 = b.snapshot().version;
    let v1 = b
      .upsert_folder(FolderConfig::new("/x/A", "docs", "nomic-embed-text"), FolderLifecycleState::new())
      .version;
    let v2 = b.remove_folder(Path::new("/x/A")).version;
    assert!(v1 > v0);
    assert!(v2 > v1);
  }

  #[test]
  fn notification_is_preserved_across_replace_unless_overwritten() {
    let b = FmdmBroadcaster::new(1);
    let config = FolderConfig::new("/x/A", "docs", "nomic-embed-text");
    let mut first_state = FolderLifecycleState::new();
    first_state.notification = Some(Notification {
      message: "scanning".to_string(),
      severity: NotificationSeverity::Info,
    });
    b.upsert_folder(config.clone(), first_state);

    let snap = b.upsert_folder(config, FolderLifecycleState::new());
    let entry = snap.folders.iter().find(|f| f.config.path == Path::new("/x/A")).unwrap();
    assert!(entry.state.notification.is_some());
  }

  #[test]
  fn notification_can_be_explicitly_cleared() {
    let b = FmdmBroadcaster::new(1);
    let config = FolderConfig::new("/x/A", "docs", "nomic-embed-text");
    let mut first_state = FolderLifecycleState::new();
    first_state.notification = Some(Notification {
      message: "scanning".to_string(),
      severity: NotificationSeverity::Info,
    });
    b.upsert_folder(config.clone(), first_state);

    let mut cleared = FolderLifecycleState::new();
    cleared.notification = None;
    // Explicitly overwriting with a state whose notification we force to None
    // via update_folder_state rather than upsert, since upsert only inherits
    // on `None` (an upsert here behaves the same as the prior test by design;
    // this test documents update_folder_state instead).
    b.update_folder_state(Path::new("/x/A"), |s| s.notification = None);
    let snap = b.snapshot();
    let entry = snap.folders.iter().find(|f| f.config.path == Path::new("/x/A")).unwrap();
    assert!(entry.state.notification.is_none());
  }

  #[test]
  fn subscribers_see_every_broadcast_snapshot() {
    let b = FmdmBroadcaster::new(1);
    let mut rx = b.subscribe();
    b.tick_uptime(5);
    b.tick_uptime(10);
    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!(first.daemon.uptime_seconds, 5);
    assert_eq!(second.daemon.uptime_seconds, 10);
    assert!(second.version > first.version);
  }

  #[test]
  fn client_join_and_leave_update_connection_count() {
    let b = FmdmBroadcaster::new(1);
    let snap = b.client_join(ConnectedClient {
      id: "c1".to_string(),
      connected_at: chrono::Utc::now(),
    });
    assert_eq!(snap.connections.count, 1);
    let snap = b.client_leave("c1");
    assert_eq!(snap.connections.count, 0);
  }
}
