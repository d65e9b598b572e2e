//! Background task scheduler for daemon operations.
//!
//! The only periodic daemon-wide task the spec names is the uptime tick that
//! keeps `Fmdm.daemon.uptime_seconds` current for connected clients (§4.10,
//! §5). There is no decay or session-cleanup concept in this domain.

use crate::fmdm_broadcaster::FmdmBroadcaster;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
  pub uptime_tick_interval: Duration,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      uptime_tick_interval: Duration::from_secs(1),
    }
  }
}

pub struct Scheduler {
  config: SchedulerConfig,
  broadcaster: Arc<FmdmBroadcaster>,
  shutdown_rx: broadcast::Receiver<()>,
}

impl Scheduler {
  pub fn new(broadcaster: Arc<FmdmBroadcaster>, shutdown_rx: broadcast::Receiver<()>) -> Self {
    Self {
      config: SchedulerConfig::default(),
      broadcaster,
      shutdown_rx,
    }
  }

  pub fn with_config(broadcaster: Arc<FmdmBroadcaster>, shutdown_rx: broadcast::Receiver<()>, config: SchedulerConfig) -> Self {
    Self {
      config,
      broadcaster,
      shutdown_rx,
    }
  }

  pub async fn run(mut self) {
    let start = Instant::now();
    let mut tick = interval(self.config.uptime_tick_interval);
    tick.tick().await;

    loop {
      tokio::select! {
        _ = tick.tick() => {
          self.broadcaster.tick_uptime(start.elapsed().as_secs());
        }
        _ = self.shutdown_rx.recv() => {
          debug!("scheduler received shutdown signal");
          break;
        }
      }
    }
  }
}

pub fn spawn_scheduler(broadcaster: Arc<FmdmBroadcaster>, shutdown_rx: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
  let scheduler = Scheduler::new(broadcaster, shutdown_rx);
  tokio::spawn(async move {
    scheduler.run().await;
  })
}

pub fn spawn_scheduler_with_config(broadcaster: Arc<FmdmBroadcaster>, shutdown_rx: broadcast::Receiver<()>, config: SchedulerConfig) -> tokio::task::JoinHandle<()> {
  let scheduler = Scheduler::with_config(broadcaster, shutdown_rx, config);
  tokio::spawn(async move {
    scheduler.run().await;
  })
}
