pub mod chunker;
pub mod coordination;
pub mod debounce;
pub mod gitignore;
pub mod parser;
pub mod scanner;
pub mod vector;
pub mod watcher;

pub use chunker::{Chunker, ChunkerConfig};
pub use coordination::{CoordinationError, DaemonCoordinator, DaemonLock};
pub use debounce::{BatchProcessor, DebounceConfig, DebouncedWatcher};
pub use gitignore::{GitignoreState, compute_gitignore_hash, should_ignore};
pub use parser::{
  DocumentStructure, DocumentType, HeadingNode, PageSpan, ParseError, ParsedDocument, SheetSpan, SlideSpan,
  detect_document_type, is_indexable, parse, supported_extensions,
};
pub use scanner::{ScanError, ScanProgress, ScanResult, ScannedFile, Scanner};
pub use vector::{IndexEntry, IndexMapping, SearchHit, SearchScope, VectorIndex, VectorIndexError, expand_context};
pub use watcher::{ChangeKind, FileChange, FileWatcher, WatchError};
