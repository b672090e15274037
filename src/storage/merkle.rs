//! Per-file hash manifest enabling incremental re-indexing.
//!
//! Persisted at `.pampa/merkle.json` as `{ <file_path>: { shaFile, chunkShas } }`.
//! The indexer compares each file's current content hash against the stored
//! `shaFile` and skips unchanged files entirely. Entries are rewritten in a
//! working copy during a run and persisted once at the end.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileManifestEntry {
    /// SHA-1 of the file's UTF-8 bytes.
    pub sha_file: String,
    /// SHAs of every chunk emitted from the file's last successful pass.
    pub chunk_shas: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MerkleManifest {
    path: PathBuf,
    entries: BTreeMap<String, FileManifestEntry>,
}

impl MerkleManifest {
    /// Load the manifest at `path`, treating a missing file as empty.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let entries = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub fn get(&self, file_path: &str) -> Option<&FileManifestEntry> {
        self.entries.get(file_path)
    }

    /// True when the stored hash for `file_path` equals `sha_file`.
    pub fn is_unchanged(&self, file_path: &str, sha_file: &str) -> bool {
        self.get(file_path).is_some_and(|e| e.sha_file == sha_file)
    }

    pub fn insert(&mut self, file_path: String, entry: FileManifestEntry) {
        self.entries.insert(file_path, entry);
    }

    /// Remove an entry; returns whether the manifest was mutated.
    pub fn remove(&mut self, file_path: &str) -> bool {
        self.entries.remove(file_path).is_some()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist the manifest atomically.
    pub fn save(&self) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        super::atomic_write(&self.path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_manifest_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = MerkleManifest::load(&dir.path().join("merkle.json")).unwrap();
        assert!(manifest.is_empty());
    }

    #[test]
    fn roundtrip_preserves_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merkle.json");
        let mut manifest = MerkleManifest::load(&path).unwrap();
        manifest.insert(
            "src/auth.js".to_string(),
            FileManifestEntry {
                sha_file: "abc".to_string(),
                chunk_shas: vec!["c1".to_string(), "c2".to_string()],
            },
        );
        manifest.save().unwrap();

        let reloaded = MerkleManifest::load(&path).unwrap();
        assert!(reloaded.is_unchanged("src/auth.js", "abc"));
        assert!(!reloaded.is_unchanged("src/auth.js", "def"));
        assert_eq!(reloaded.get("src/auth.js").unwrap().chunk_shas.len(), 2);
    }

    #[test]
    fn remove_reports_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = MerkleManifest::load(&dir.path().join("merkle.json")).unwrap();
        manifest.insert(
            "a.py".to_string(),
            FileManifestEntry {
                sha_file: "x".to_string(),
                chunk_shas: vec![],
            },
        );
        assert!(manifest.remove("a.py"));
        assert!(!manifest.remove("a.py"));
    }

    #[test]
    fn serializes_camel_case_keys() {
        let entry = FileManifestEntry {
            sha_file: "h".to_string(),
            chunk_shas: vec!["s".to_string()],
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"shaFile\""));
        assert!(json.contains("\"chunkShas\""));
    }
}
