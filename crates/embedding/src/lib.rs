pub mod ollama;
pub mod openrouter;
pub mod pool;
pub mod provider;
pub mod resilient;

pub use ollama::{OllamaHealthStatus, OllamaProvider};
pub use openrouter::OpenRouterProvider;
pub use pool::{EmbeddingPool, LruCache, PoolConfig};
pub use provider::{EmbeddingError, EmbeddingProvider};
pub use resilient::{ResilientProvider, RetryConfig, is_retryable_error, wrap_resilient, wrap_resilient_arc};
