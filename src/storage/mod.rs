//! Persistent state: chunk blobs, the file manifest, the metadata database,
//! and the git-committed codemap.

pub mod chunk_store;
pub mod codemap;
pub mod database;
pub mod merkle;

pub use chunk_store::{ChunkStore, EncryptMode};
pub use codemap::{Codemap, CodemapEntry};
pub use database::{ChunkRecord, MetadataDb};
pub use merkle::{FileManifestEntry, MerkleManifest};

use sha1::{Digest, Sha1};
use std::path::{Path, PathBuf};

/// On-disk layout of one indexed project.
///
/// Only the codemap lives at the repo root (it is committed to git); all
/// machine state sits under `.pampa/`.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pampa_dir(&self) -> PathBuf {
        self.root.join(".pampa")
    }

    pub fn db_path(&self) -> PathBuf {
        self.pampa_dir().join("pampa.db")
    }

    pub fn chunks_dir(&self) -> PathBuf {
        self.pampa_dir().join("chunks")
    }

    pub fn merkle_path(&self) -> PathBuf {
        self.pampa_dir().join("merkle.json")
    }

    pub fn codemap_path(&self) -> PathBuf {
        self.root.join("pampax.codemap.json")
    }

    pub fn contextpacks_dir(&self) -> PathBuf {
        self.pampa_dir().join("contextpacks")
    }
}

/// Lowercase hex SHA-1 of the given bytes. Content addressing for chunk
/// bodies and the per-file fast hash both use this.
pub fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Write `bytes` to `path` atomically: write a sibling temp file, then rename
/// over the destination. Readers never observe a half-written file.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_matches_known_vector() {
        // `echo -n "hello" | sha1sum`
        assert_eq!(sha1_hex(b"hello"), "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
    }

    #[test]
    fn atomic_write_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"one").unwrap();
        atomic_write(&path, b"two").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("tmp").exists());
    }
}
