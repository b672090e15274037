//! Search scope filters and user-authored context packs.

use crate::search::rerank::RerankMode;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PackError {
    #[error(
        "No context pack named '{name}' at '{path}'\nSuggestion: Create it, or list available packs first"
    )]
    NotFound { name: String, path: PathBuf },

    #[error("Context pack '{name}' is not valid JSON: {reason}")]
    Invalid { name: String, reason: String },
}

fn default_true() -> bool {
    true
}

/// Filters and toggles applied to one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchScope {
    /// Glob filters matched against repo-relative file paths.
    #[serde(default)]
    pub path_glob: Vec<String>,
    /// Keep chunks carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Exact language tags.
    #[serde(default)]
    pub lang: Vec<String>,
    #[serde(default = "default_true")]
    pub hybrid: bool,
    #[serde(default = "default_true")]
    pub bm25: bool,
    /// `None` falls back to the configured default mode.
    #[serde(default)]
    pub reranker: Option<RerankMode>,
    #[serde(default = "default_true")]
    pub symbol_boost: bool,
}

impl Default for SearchScope {
    fn default() -> Self {
        Self {
            path_glob: Vec::new(),
            tags: Vec::new(),
            lang: Vec::new(),
            hybrid: true,
            bm25: true,
            reranker: None,
            symbol_boost: true,
        }
    }
}

impl SearchScope {
    /// Compile the path globs once per search.
    pub fn glob_set(&self) -> Option<GlobSet> {
        if self.path_glob.is_empty() {
            return None;
        }
        let mut builder = GlobSetBuilder::new();
        for pattern in &self.path_glob {
            if let Ok(glob) = Glob::new(pattern) {
                builder.add(glob);
            } else {
                tracing::warn!(pattern, "ignoring invalid path glob");
            }
        }
        builder.build().ok()
    }

    /// Whether a chunk row passes the scope filters.
    pub fn matches(&self, file_path: &str, tags: &[String], lang: &str, globs: Option<&GlobSet>) -> bool {
        if let Some(set) = globs
            && !set.is_match(file_path)
        {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|wanted| tags.contains(wanted)) {
            return false;
        }
        if !self.lang.is_empty() && !self.lang.iter().any(|l| l == lang) {
            return false;
        }
        true
    }
}

/// A reusable scope preset stored at `.pampa/contextpacks/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPack {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub path_glob: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub lang: Vec<String>,
    #[serde(default)]
    pub reranker: Option<RerankMode>,
    #[serde(default)]
    pub hybrid: Option<bool>,
    #[serde(default)]
    pub bm25: Option<bool>,
    #[serde(default)]
    pub symbol_boost: Option<bool>,
}

impl ContextPack {
    /// Expand into a scope; unset toggles keep their defaults.
    pub fn to_scope(&self) -> SearchScope {
        let defaults = SearchScope::default();
        SearchScope {
            path_glob: self.path_glob.clone(),
            tags: self.tags.clone(),
            lang: self.lang.clone(),
            hybrid: self.hybrid.unwrap_or(defaults.hybrid),
            bm25: self.bm25.unwrap_or(defaults.bm25),
            reranker: self.reranker,
            symbol_boost: self.symbol_boost.unwrap_or(defaults.symbol_boost),
        }
    }
}

/// Load one named pack from the packs directory.
pub fn load_context_pack(packs_dir: &Path, name: &str) -> Result<ContextPack, PackError> {
    let path = packs_dir.join(format!("{name}.json"));
    let bytes = std::fs::read(&path).map_err(|_| PackError::NotFound {
        name: name.to_string(),
        path,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| PackError::Invalid {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

/// List every parseable pack in the packs directory.
pub fn list_context_packs(packs_dir: &Path) -> Vec<ContextPack> {
    let Ok(entries) = std::fs::read_dir(packs_dir) else {
        return Vec::new();
    };
    let mut packs: Vec<ContextPack> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|ext| ext == "json")
        })
        .filter_map(|entry| {
            std::fs::read(entry.path())
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        })
        .collect();
    packs.sort_by(|a: &ContextPack, b: &ContextPack| a.name.cmp(&b.name));
    packs
}
