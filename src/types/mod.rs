//! Core data types: chunks, their metadata, and indexing reports.

use serde::{Deserialize, Serialize};

/// Build a chunk identity from its coordinates: `<file>:<symbol>:<sha[0..8]>`.
///
/// File paths are repo-relative and forward-slash normalized before they get
/// here, so the same chunk produces the same id on every platform.
pub fn chunk_id(file_path: &str, symbol: &str, sha: &str) -> String {
    format!("{file_path}:{symbol}:{}", &sha[..8.min(sha.len())])
}

/// Positional and flag metadata stored alongside each chunk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextInfo {
    pub start_line: usize,
    pub end_line: usize,
    pub code_length: usize,
    #[serde(default)]
    pub has_pampa_tags: bool,
    #[serde(default)]
    pub has_intent: bool,
    #[serde(default)]
    pub has_documentation: bool,
    #[serde(default)]
    pub variable_count: usize,
}

/// A function parameter extracted from a declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// Declared shape of a chunk's symbol: signature, parameters, return type,
/// and first-degree call edges. Consumed by the symbol boost at search time
/// and persisted in the codemap as the symbol graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
}

/// Descriptive metadata extracted from a chunk's source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Preceding block comment, if any.
    pub doc_comment: Option<String>,
    /// Tags: explicit `@pampa-tags:` plus auto-derived ones, top 10.
    pub tags: Vec<String>,
    /// Explicit `@pampa-intent:` annotation.
    pub intent: Option<String>,
    /// Explicit `@pampa-description:` annotation.
    pub description: Option<String>,
    /// Config/API/constant declarations matched by the variable heuristics.
    pub variables: Vec<String>,
    pub context: ContextInfo,
}

/// The fundamental indexing unit: one extracted fragment of source code.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// `<file_path>:<symbol>:<sha[0..8]>`
    pub id: String,
    /// Repo-relative, forward-slash normalized.
    pub file_path: String,
    pub symbol: String,
    /// SHA-1 of `code` bytes, lowercase hex.
    pub sha: String,
    pub lang: String,
    /// `function` | `method` | `class` | `file` | `<nodeType>_merged` | `<nodeType>_part<N>`
    pub chunk_type: String,
    pub code: String,
    pub metadata: ChunkMetadata,
    pub symbol_info: Option<SymbolInfo>,
}

impl Chunk {
    /// Embedding input: doc comment, code, then trailer lines for intent,
    /// description, tags and variables when present.
    pub fn embedding_text(&self) -> String {
        let mut text = String::new();
        if let Some(doc) = &self.metadata.doc_comment {
            text.push_str(doc);
            text.push('\n');
        }
        text.push_str(&self.code);
        if let Some(intent) = &self.metadata.intent {
            text.push_str(&format!("\n// Intent: {intent}"));
        }
        if let Some(desc) = &self.metadata.description {
            text.push_str(&format!("\n// Description: {desc}"));
        }
        if !self.metadata.tags.is_empty() {
            text.push_str(&format!("\n// Tags: {}", self.metadata.tags.join(", ")));
        }
        if !self.metadata.variables.is_empty() {
            text.push_str(&format!(
                "\n// Uses variables: {}",
                self.metadata.variables.join(", ")
            ));
        }
        text
    }
}

/// Per-run tallies of chunking decisions.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkingStats {
    pub total_nodes: usize,
    pub normal_chunks: usize,
    pub subdivided: usize,
    pub merged_small: usize,
    pub statement_fallback: usize,
    pub skipped_small: usize,
}

impl ChunkingStats {
    pub fn absorb(&mut self, other: &ChunkingStats) {
        self.total_nodes += other.total_nodes;
        self.normal_chunks += other.normal_chunks;
        self.subdivided += other.subdivided;
        self.merged_small += other.merged_small;
        self.statement_fallback += other.statement_fallback;
        self.skipped_small += other.skipped_small;
    }
}

/// One file-level failure recorded during an indexing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileError {
    pub file: String,
    pub message: String,
}

/// Outcome of an indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    /// Chunks newly embedded and written this run.
    pub processed_chunks: usize,
    /// Chunks now present for the processed files (new + retained).
    pub total_chunks: usize,
    pub provider: String,
    pub errors: Vec<FileError>,
    pub chunking_stats: ChunkingStats,
}
