//! Embedding worker pool: W isolated workers, round-robin-with-shortest-queue
//! routing, an LRU scoring cache, and crash-contained worker replacement.

use crate::{EmbeddingError, EmbeddingProvider};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{error, info, warn};

/// Queue depth above which the router stops treating a worker as "short" and
/// falls back to picking whichever queue is shortest.
const QUEUE_SOFT_LIMIT: usize = 5;

const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_CACHE_CAP: usize = 500;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PoolConfig {
  pub worker_count: usize,
  pub cache_capacity: usize,
  pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      worker_count: DEFAULT_WORKER_COUNT,
      cache_capacity: DEFAULT_CACHE_CAP,
      shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
    }
  }
}

struct Job {
  texts: Vec<String>,
  respond: oneshot::Sender<Result<Vec<Vec<f32>>, EmbeddingError>>,
}

struct Worker {
  tx: mpsc::UnboundedSender<Job>,
  queue_depth: Arc<std::sync::atomic::AtomicUsize>,
}

/// Simple LRU mapping text to its embedding, scoped per call site so it can
/// be cleared between documents to avoid cross-document pollution.
pub struct LruCache {
  capacity: usize,
  order: VecDeque<String>,
  map: std::collections::HashMap<String, Vec<f32>>,
}

impl LruCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      order: VecDeque::new(),
      map: std::collections::HashMap::new(),
    }
  }

  pub fn get(&mut self, key: &str) -> Option<Vec<f32>> {
    if let Some(v) = self.map.get(key).cloned() {
      self.order.retain(|k| k != key);
      self.order.push_back(key.to_string());
      Some(v)
    } else {
      None
    }
  }

  pub fn put(&mut self, key: String, value: Vec<f32>) {
    if self.map.contains_key(&key) {
      self.order.retain(|k| k != &key);
    } else if self.map.len() >= self.capacity
      && let Some(evicted) = self.order.pop_front()
    {
      self.map.remove(&evicted);
    }
    self.order.push_back(key.clone());
    self.map.insert(key, value);
  }

  pub fn clear(&mut self) {
    self.order.clear();
    self.map.clear();
  }

  pub fn len(&self) -> usize {
    self.map.len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.is_empty()
  }
}

/// Pool of `W` embedding workers, each an isolated execution context around
/// a clone of the underlying provider. Routes batches round-robin with a
/// shortest-queue tiebreaker; replaces any worker whose task panics or
/// returns an unrecoverable error without affecting sibling queues.
pub struct EmbeddingPool {
  workers: Mutex<Vec<Worker>>,
  next: std::sync::atomic::AtomicUsize,
  cache: Mutex<LruCache>,
  config: PoolConfig,
  make_provider: Arc<dyn Fn() -> Arc<dyn EmbeddingProvider> + Send + Sync>,
}

impl EmbeddingPool {
  pub fn new(config: PoolConfig, make_provider: impl Fn() -> Arc<dyn EmbeddingProvider> + Send + Sync + 'static) -> Arc<Self> {
    let pool = Arc::new(Self {
      workers: Mutex::new(Vec::new()),
      next: std::sync::atomic::AtomicUsize::new(0),
      cache: Mutex::new(LruCache::new(config.cache_capacity)),
      config,
      make_provider: Arc::new(make_provider),
    });
    pool
  }

  pub async fn start(self: &Arc<Self>) {
    let mut workers = self.workers.lock().await;
    for _ in 0..self.config.worker_count {
      workers.push(self.spawn_worker(workers.len()));
    }
  }

  fn spawn_worker(self: &Arc<Self>, index: usize) -> Worker {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    let depth = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let depth_clone = depth.clone();
    let provider = (self.make_provider)();
    let pool = self.clone();

    tokio::spawn(async move {
      while let Some(job) = rx.recv().await {
        let texts: Vec<&str> = job.texts.iter().map(|s| s.as_str()).collect();
        let result = provider.embed_batch(&texts).await;
        depth_clone.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        let _ = job.respond.send(result);
      }
      warn!(worker = index, "embedding worker channel closed, replacing");
      pool.replace_worker(index).await;
    });

    Worker { tx, queue_depth: depth }
  }

  async fn replace_worker(self: &Arc<Self>, index: usize) {
    let mut workers = self.workers.lock().await;
    if index < workers.len() {
      workers[index] = self.spawn_worker(index);
      info!(worker = index, "replaced crashed embedding worker");
    }
  }

  /// Route and submit a batch; returns once the chosen worker replies.
  pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let workers = self.workers.lock().await;
    if workers.is_empty() {
      return Err(EmbeddingError::NotAvailable);
    }

    let idx = self.pick_worker(&workers);
    let worker = &workers[idx];
    worker.queue_depth.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

    let (tx, rx) = oneshot::channel();
    if worker.tx.send(Job { texts, respond: tx }).is_err() {
      worker.queue_depth.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
      return Err(EmbeddingError::ProviderError("worker unavailable".into()));
    }
    drop(workers);

    rx.await.unwrap_or_else(|_| Err(EmbeddingError::ProviderError("worker dropped response".into())))
  }

  fn pick_worker(&self, workers: &[Worker]) -> usize {
    let start = self.next.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % workers.len();
    for offset in 0..workers.len() {
      let i = (start + offset) % workers.len();
      if workers[i].queue_depth.load(std::sync::atomic::Ordering::SeqCst) < QUEUE_SOFT_LIMIT {
        return i;
      }
    }
    (0..workers.len())
      .min_by_key(|&i| workers[i].queue_depth.load(std::sync::atomic::Ordering::SeqCst))
      .unwrap_or(0)
  }

  pub async fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
    self.cache.lock().await.get(key)
  }

  pub async fn cache_put(&self, key: String, value: Vec<f32>) {
    self.cache.lock().await.put(key, value);
  }

  pub async fn cache_clear(&self) {
    self.cache.lock().await.clear();
  }

  /// Drain in-flight tasks within `T_shutdown`, then terminate workers.
  pub async fn shutdown(&self) {
    let workers = self.workers.lock().await;
    let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
    loop {
      let total: usize = workers.iter().map(|w| w.queue_depth.load(std::sync::atomic::Ordering::SeqCst)).sum();
      if total == 0 || tokio::time::Instant::now() >= deadline {
        if total > 0 {
          error!(pending = total, "embedding pool shutdown timed out, dropping pending tasks");
        }
        break;
      }
      tokio::time::sleep(Duration::from_millis(50)).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lru_evicts_oldest_when_full() {
    let mut cache = LruCache::new(2);
    cache.put("a".into(), vec![1.0]);
    cache.put("b".into(), vec![2.0]);
    cache.put("c".into(), vec![3.0]);
    assert_eq!(cache.len(), 2);
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
  }

  #[test]
  fn lru_get_refreshes_recency() {
    let mut cache = LruCache::new(2);
    cache.put("a".into(), vec![1.0]);
    cache.put("b".into(), vec![2.0]);
    cache.get("a");
    cache.put("c".into(), vec![3.0]);
    assert!(cache.get("b").is_none());
    assert!(cache.get("a").is_some());
  }

  #[test]
  fn lru_clear_empties_cache() {
    let mut cache = LruCache::new(5);
    cache.put("a".into(), vec![1.0]);
    cache.clear();
    assert!(cache.is_empty());
  }

  #[tokio::test]
  async fn pool_rejects_before_start() {
    let pool = EmbeddingPool::new(PoolConfig::default(), || {
      Arc::new(crate::OllamaProvider::new()) as Arc<dyn EmbeddingProvider>
    });
    let result = pool.embed_batch(vec!["hello".into()]).await;
    assert!(matches!(result, Err(EmbeddingError::NotAvailable)));
  }
}
