//! Indexing: repository walking, the orchestrator, and the file watcher.

pub mod indexer;
pub mod walker;
pub mod watcher;

pub use indexer::{IndexOptions, Indexer};
pub use watcher::{WatchHandle, WatchOptions, watch};
