//! Git-committed codemap: a lightweight JSON mirror of chunk metadata plus
//! the symbol graph.
//!
//! Serialized to `pampax.codemap.json` as pretty-printed JSON with stable
//! key order so diffs stay reviewable. User-authored fields on an entry
//! (`synonyms`, `weights`, anything unknown) survive re-indexing: a rewrite
//! merges into the previous entry instead of clobbering it.

use crate::types::{Chunk, ParamInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryFlags {
    #[serde(default)]
    pub has_pampa_tags: bool,
    #[serde(default)]
    pub has_intent: bool,
    #[serde(default)]
    pub has_documentation: bool,
    #[serde(default)]
    pub variable_count: usize,
    #[serde(default)]
    pub encrypted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodemapEntry {
    pub file: String,
    pub symbol: String,
    pub sha: String,
    pub lang: String,
    pub chunk_type: String,
    pub provider: String,
    pub dimensions: usize,
    #[serde(default)]
    pub flags: EntryFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParamInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    /// Forward call edges only; back-edges are never materialized.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls: Vec<String>,
    /// User-authored fields (e.g. `synonyms`, `weights`) preserved verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CodemapEntry {
    pub fn from_chunk(chunk: &Chunk, provider: &str, dimensions: usize, encrypted: bool) -> Self {
        let info = chunk.symbol_info.clone().unwrap_or_default();
        Self {
            file: chunk.file_path.clone(),
            symbol: chunk.symbol.clone(),
            sha: chunk.sha.clone(),
            lang: chunk.lang.clone(),
            chunk_type: chunk.chunk_type.clone(),
            provider: provider.to_string(),
            dimensions,
            flags: EntryFlags {
                has_pampa_tags: !chunk.metadata.tags.is_empty(),
                has_intent: chunk.metadata.intent.is_some(),
                has_documentation: chunk.metadata.doc_comment.is_some(),
                variable_count: chunk.metadata.variables.len(),
                encrypted,
            },
            signature: info.signature,
            parameters: info.parameters,
            return_type: info.return_type,
            calls: info.calls,
            extra: Map::new(),
        }
    }
}

/// The full codemap: `chunk_id → entry`. BTreeMap keeps serialization
/// stable-sorted by key.
#[derive(Debug, Clone, Default)]
pub struct Codemap {
    path: PathBuf,
    entries: BTreeMap<String, CodemapEntry>,
}

impl Codemap {
    /// Load from `path`; a missing or unreadable file yields an empty map.
    pub fn load(path: &Path) -> Self {
        let entries = std::fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, chunk_id: &str) -> Option<&CodemapEntry> {
        self.entries.get(chunk_id)
    }

    /// Whether the stored SHA for `chunk_id` equals `sha` (chunk unchanged).
    pub fn is_current(&self, chunk_id: &str, sha: &str) -> bool {
        self.get(chunk_id).is_some_and(|e| e.sha == sha)
    }

    /// Insert an entry, preserving user-authored fields from any previous
    /// entry under the same id.
    pub fn upsert(&mut self, chunk_id: String, mut entry: CodemapEntry) {
        if let Some(previous) = self.entries.get(&chunk_id) {
            for (key, value) in &previous.extra {
                entry.extra.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        self.entries.insert(chunk_id, entry);
    }

    pub fn remove(&mut self, chunk_id: &str) -> bool {
        self.entries.remove(chunk_id).is_some()
    }

    /// Drop every entry whose `file` matches.
    pub fn remove_file(&mut self, file_path: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.file != file_path);
        before - self.entries.len()
    }

    pub fn ids_for_file<'a>(&'a self, file_path: &'a str) -> impl Iterator<Item = &'a str> {
        self.entries
            .iter()
            .filter(move |(_, e)| e.file == file_path)
            .map(|(id, _)| id.as_str())
    }

    /// Attach call edges to an entry (the symbol graph lives inline).
    pub fn set_calls(&mut self, chunk_id: &str, calls: Vec<String>) {
        if let Some(entry) = self.entries.get_mut(chunk_id) {
            entry.calls = calls;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist as pretty-printed sorted JSON, atomically replacing the old
    /// file.
    pub fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        super::atomic_write(&self.path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn entry(file: &str, symbol: &str, sha: &str) -> CodemapEntry {
        let chunk = Chunk {
            id: format!("{file}:{symbol}:{}", &sha[..4]),
            file_path: file.to_string(),
            symbol: symbol.to_string(),
            sha: sha.to_string(),
            lang: "python".to_string(),
            chunk_type: "function".to_string(),
            code: String::new(),
            metadata: ChunkMetadata::default(),
            symbol_info: None,
        };
        CodemapEntry::from_chunk(&chunk, "mock", 64, false)
    }

    #[test]
    fn keys_serialize_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pampax.codemap.json");
        let mut map = Codemap::load(&path);
        map.upsert("z:last:0000".to_string(), entry("z.py", "last", "00001111"));
        map.upsert("a:first:0000".to_string(), entry("a.py", "first", "00002222"));
        map.save().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let a_pos = text.find("a:first").unwrap();
        let z_pos = text.find("z:last").unwrap();
        assert!(a_pos < z_pos);
    }

    #[test]
    fn upsert_preserves_user_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pampax.codemap.json");
        let mut map = Codemap::load(&path);

        let mut first = entry("a.py", "f", "00001111");
        first
            .extra
            .insert("synonyms".to_string(), serde_json::json!(["alias"]));
        map.upsert("a:f:0000".to_string(), first);

        // Re-index replaces the entry; synonyms must survive.
        map.upsert("a:f:0000".to_string(), entry("a.py", "f", "00003333"));
        let merged = map.get("a:f:0000").unwrap();
        assert_eq!(merged.sha, "00003333");
        assert_eq!(merged.extra["synonyms"], serde_json::json!(["alias"]));
    }

    #[test]
    fn roundtrip_through_disk_keeps_extra() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pampax.codemap.json");
        let mut map = Codemap::load(&path);
        let mut e = entry("a.py", "f", "00001111");
        e.extra
            .insert("weights".to_string(), serde_json::json!({"boost": 2}));
        map.upsert("a:f:0000".to_string(), e);
        map.save().unwrap();

        let reloaded = Codemap::load(&path);
        assert_eq!(
            reloaded.get("a:f:0000").unwrap().extra["weights"]["boost"],
            serde_json::json!(2)
        );
    }

    #[test]
    fn remove_file_drops_all_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = Codemap::load(&dir.path().join("x.json"));
        map.upsert("a:f:0000".to_string(), entry("a.py", "f", "00001111"));
        map.upsert("a:g:0000".to_string(), entry("a.py", "g", "00002222"));
        map.upsert("b:h:0000".to_string(), entry("b.py", "h", "00003333"));
        assert_eq!(map.remove_file("a.py"), 2);
        assert_eq!(map.len(), 1);
    }
}
