//! pampax — local, git-friendly semantic code memory.
//!
//! Turns a source repository into a searchable index of small, meaningful
//! code fragments. The indexer walks the repo, parses each supported
//! language with tree-sitter, emits size-aware chunks, embeds them through a
//! pluggable provider, and persists vectors, metadata, content-addressed
//! bodies, a git-committed codemap, and a per-file hash manifest. Retrieval
//! fuses vector similarity, BM25, learned intentions, symbol boosts, and
//! optional cross-encoder reranking.

pub mod chunking;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexing;
pub mod parsing;
pub mod search;
pub mod service;
pub mod storage;
pub mod types;

pub use config::Settings;
pub use embedding::EmbeddingProvider;
pub use error::{
    DbError, EmbeddingError, IndexError, IndexResult, RerankError, StoreError, WatchError,
};
pub use indexing::{IndexOptions, Indexer, WatchHandle};
pub use search::{
    FailureCode, RerankMode, SearchEngine, SearchFailure, SearchResponse, SearchResultItem,
    SearchScope,
};
pub use storage::{ChunkStore, Codemap, EncryptMode, MerkleManifest, MetadataDb, ProjectLayout};
pub use types::{Chunk, ChunkingStats, IndexReport};
