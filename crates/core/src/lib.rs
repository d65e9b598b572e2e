pub mod chunk;
pub mod config;
pub mod embedding_record;
pub mod error;
pub mod fingerprint;
pub mod fmdm;
pub mod folder;
pub mod task;
pub mod validation;

pub use chunk::{Chunk, ChunkParams, ExtractionCoords, SemanticMetadata, approx_tokens, indices_contiguous};
pub use config::{Config, EmbeddingConfig, EmbeddingProvider as ConfigEmbeddingProvider, PoolConfig, ResolvedConfig, WatcherConfig};
pub use embedding_record::{EmbeddingRecord, cosine_similarity, normalise_similarity};
pub use error::{Error, ErrorClass, Result};
pub use fingerprint::{Fingerprint, hash_content, normalise_relative_path};
pub use fmdm::{ConnectedClient, Connections, DaemonInfo, Fmdm, FolderEntry, ModelCheckStatus, ModelInfo};
pub use folder::{
  FolderConfig, FolderLifecycleState, LifecycleStatus, MergePolicy, Notification, NotificationSeverity,
  is_ancestor_or_descendant, is_system_directory,
};
pub use task::{FileEmbeddingTask, Progress, ScanPhase, ScanningProgress, TaskKind, TaskStatus};
pub use validation::{
  ValidationError, ValidationResult, optional_array, optional_bool, optional_enum, optional_f64, optional_f64_range,
  optional_i64, optional_i64_range, optional_string, optional_string_array, optional_string_min, optional_u64,
  require_array, require_bool, require_enum, require_f64, require_f64_range, require_i64, require_i64_range,
  require_string, require_string_array, require_string_min, require_string_range, require_u64,
};
