//! Single-instance coordination for the daemon process.
//!
//! A CLI subcommand that needs the daemon checks this lock before spawning
//! one in the background (§4.14): lock files at
//! `<dataDir>/daemon.lock`, with stale-lock detection via a liveness check
//! on the recorded pid.

use fmcore::config::default_data_dir;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CoordinationError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("lock held by process {0}")]
  LockHeld(u32),
  #[error("lock file corrupted")]
  CorruptedLock,
}

/// Lock file contents: enough for a CLI subcommand to find the running
/// daemon without re-deriving its socket path from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonLock {
  pub pid: u32,
  pub socket_path: String,
  pub http_port: u16,
  pub started_at: u64,
  pub last_activity: u64,
}

impl DaemonLock {
  pub fn new(socket_path: &str, http_port: u16) -> Self {
    let now = now_secs();
    Self {
      pid: std::process::id(),
      socket_path: socket_path.to_string(),
      http_port,
      started_at: now,
      last_activity: now,
    }
  }
}

fn now_secs() -> u64 {
  SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Owns the daemon's single-instance lock file.
pub struct DaemonCoordinator {
  lock_path: PathBuf,
}

impl Default for DaemonCoordinator {
  fn default() -> Self {
    Self::new()
  }
}

impl DaemonCoordinator {
  pub fn new() -> Self {
    Self {
      lock_path: default_data_dir().join("daemon.lock"),
    }
  }

  pub fn with_lock_path(lock_path: PathBuf) -> Self {
    Self { lock_path }
  }

  /// Try to become the one running daemon. `Ok(true)` means the lock was
  /// acquired (no live daemon was found); `Ok(false)` means one is already
  /// running and its lock is returned via [`DaemonCoordinator::get_lock`].
  pub fn try_acquire(&self, socket_path: &str, http_port: u16) -> Result<bool, CoordinationError> {
    if let Some(parent) = self.lock_path.parent() {
      fs::create_dir_all(parent)?;
    }

    if self.lock_path.exists() {
      match self.read_lock() {
        Ok(existing) => {
          if is_process_running(existing.pid) {
            debug!(pid = existing.pid, "daemon lock held by live process");
            return Ok(false);
          }
          info!(pid = existing.pid, "cleaning up stale daemon lock");
          fs::remove_file(&self.lock_path)?;
        }
        Err(e) => {
          warn!(error = %e, "corrupted daemon lock, removing");
          fs::remove_file(&self.lock_path)?;
        }
      }
    }

    let lock = DaemonLock::new(socket_path, http_port);
    self.write_lock(&lock)?;
    info!(pid = lock.pid, "acquired daemon lock");
    Ok(true)
  }

  pub fn release(&self) -> Result<(), CoordinationError> {
    if !self.lock_path.exists() {
      return Ok(());
    }
    if let Ok(lock) = self.read_lock()
      && lock.pid == std::process::id()
    {
      fs::remove_file(&self.lock_path)?;
      info!("released daemon lock");
    }
    Ok(())
  }

  pub fn update_activity(&self) -> Result<(), CoordinationError> {
    if !self.lock_path.exists() {
      return Ok(());
    }
    let mut lock = self.read_lock()?;
    if lock.pid != std::process::id() {
      return Ok(());
    }
    lock.last_activity = now_secs();
    self.write_lock(&lock)
  }

  /// Returns the lock iff it belongs to a currently-running process.
  pub fn get_lock(&self) -> Result<Option<DaemonLock>, CoordinationError> {
    if !self.lock_path.exists() {
      return Ok(None);
    }
    let lock = self.read_lock()?;
    if is_process_running(lock.pid) {
      Ok(Some(lock))
    } else {
      Ok(None)
    }
  }

  pub fn is_running(&self) -> Result<bool, CoordinationError> {
    Ok(self.get_lock()?.is_some())
  }

  fn read_lock(&self) -> Result<DaemonLock, CoordinationError> {
    let mut file = File::open(&self.lock_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
  }

  fn write_lock(&self, lock: &DaemonLock) -> Result<(), CoordinationError> {
    let mut file = OpenOptions::new()
      .write(true)
      .create(true)
      .truncate(true)
      .open(&self.lock_path)?;
    let contents = serde_json::to_string_pretty(lock)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    Ok(())
  }
}

#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
  unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(windows)]
fn is_process_running(pid: u32) -> bool {
  use windows_sys::Win32::Foundation::CloseHandle;
  use windows_sys::Win32::System::Threading::{GetExitCodeProcess, OpenProcess, PROCESS_QUERY_INFORMATION};

  unsafe {
    let handle = OpenProcess(PROCESS_QUERY_INFORMATION, 0, pid);
    if handle.is_null() {
      return false;
    }
    let mut exit_code = 0;
    let result = GetExitCodeProcess(handle, &mut exit_code);
    CloseHandle(handle);
    result != 0 && exit_code == STILL_ACTIVE
  }
}

#[cfg(not(any(unix, windows)))]
fn is_process_running(_pid: u32) -> bool {
  true
}

#[allow(unused)]
#[cfg(windows)]
const STILL_ACTIVE: u32 = 259;

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn acquire_then_release() {
    let temp = TempDir::new().unwrap();
    let coordinator = DaemonCoordinator::with_lock_path(temp.path().join("daemon.lock"));

    assert!(coordinator.try_acquire("/tmp/d.sock", 8642).unwrap());
    assert!(coordinator.is_running().unwrap());
    // Already held by us: re-acquire reports "not newly acquired".
    assert!(!coordinator.try_acquire("/tmp/d.sock", 8642).unwrap());

    coordinator.release().unwrap();
    assert!(!coordinator.is_running().unwrap());
  }

  #[test]
  fn update_activity_bumps_timestamp() {
    let temp = TempDir::new().unwrap();
    let coordinator = DaemonCoordinator::with_lock_path(temp.path().join("daemon.lock"));
    coordinator.try_acquire("/tmp/d.sock", 8642).unwrap();

    let before = coordinator.get_lock().unwrap().unwrap().last_activity;
    std::thread::sleep(std::time::Duration::from_millis(1100));
    coordinator.update_activity().unwrap();
    let after = coordinator.get_lock().unwrap().unwrap().last_activity;

    assert!(after >= before);
    coordinator.release().unwrap();
  }

  #[test]
  fn corrupted_lock_is_cleaned_up() {
    let temp = TempDir::new().unwrap();
    let lock_path = temp.path().join("daemon.lock");
    fs::create_dir_all(temp.path()).unwrap();
    fs::write(&lock_path, b"not json").unwrap();

    let coordinator = DaemonCoordinator::with_lock_path(lock_path);
    assert!(coordinator.try_acquire("/tmp/d.sock", 8642).unwrap());
    coordinator.release().unwrap();
  }

  #[test]
  fn is_process_running_detects_current_process() {
    assert!(is_process_running(std::process::id()));
  }
}
