//! Chunk production: size analysis, the hierarchical chunker, and metadata
//! extraction.

pub mod annotations;
pub mod chunker;
pub mod size;
pub mod symbols;

pub use chunker::{Chunker, ChunkerOutput, STREAMING_THRESHOLD};
pub use size::{ChunkLimits, SizeAnalyzer, SizeDecision, SizeMethod, TokenCounter};
