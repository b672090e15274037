//! Content-addressed chunk blob store.
//!
//! One file per chunk under the chunks directory: `<sha>.gz` for plaintext
//! gzip, `<sha>.gz.enc` for AES-256-GCM over the gzip stream. At most one
//! form exists per SHA; a write produces the preferred form and removes the
//! other.
//!
//! Ciphertext layout: `magic(4) || version(1) || nonce(12) || ciphertext+tag`.

use crate::error::{StoreError, StoreResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rand::RngCore;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"PMPX";
const FORMAT_VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 4 + 1 + NONCE_LEN;

/// Encryption policy, resolved at store construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptMode {
    On,
    Off,
    /// Encrypt iff a key is configured.
    #[default]
    Auto,
}

impl EncryptMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

/// Decode a configured key as base64 or hex into exactly 32 bytes.
///
/// Decode errors are fatal at startup, not per-write.
fn decode_key(raw: &str) -> StoreResult<[u8; 32]> {
    let trimmed = raw.trim();
    let bytes = if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(trimmed).map_err(|e| StoreError::InvalidKey {
            reason: format!("hex decode failed: {e}"),
        })?
    } else {
        BASE64_STANDARD
            .decode(trimmed)
            .map_err(|e| StoreError::InvalidKey {
                reason: format!("base64 decode failed: {e}"),
            })?
    };
    let len = bytes.len();
    bytes.try_into().map_err(|_| StoreError::InvalidKey {
        reason: format!("expected 32 bytes, got {len}"),
    })
}

/// Content-addressed gzip (optionally AES-256-GCM) blob store.
pub struct ChunkStore {
    dir: PathBuf,
    cipher: Option<Aes256Gcm>,
    mode: EncryptMode,
}

impl ChunkStore {
    /// Open a store rooted at `dir` (created lazily on first write).
    ///
    /// A present-but-undecodable key is an error here, never later.
    pub fn new(dir: PathBuf, mode: EncryptMode, key: Option<&str>) -> StoreResult<Self> {
        let cipher = match key {
            Some(raw) => {
                let key_bytes = decode_key(raw)?;
                Some(Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)))
            }
            None => None,
        };
        if mode == EncryptMode::On && cipher.is_none() {
            return Err(StoreError::InvalidKey {
                reason: "encryption mode is 'on' but no key is configured".to_string(),
            });
        }
        Ok(Self { dir, cipher, mode })
    }

    /// Whether writes will produce encrypted blobs.
    pub fn encrypts(&self) -> bool {
        match self.mode {
            EncryptMode::On => true,
            EncryptMode::Off => false,
            EncryptMode::Auto => self.cipher.is_some(),
        }
    }

    fn plain_path(&self, sha: &str) -> PathBuf {
        self.dir.join(format!("{sha}.gz"))
    }

    fn enc_path(&self, sha: &str) -> PathBuf {
        self.dir.join(format!("{sha}.gz.enc"))
    }

    /// Write a chunk body. Returns whether the stored form is encrypted.
    pub fn write(&self, sha: &str, bytes: &[u8]) -> StoreResult<bool> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::Io {
            sha: sha.to_string(),
            source: e,
        })?;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).map_err(|e| StoreError::Io {
            sha: sha.to_string(),
            source: e,
        })?;
        let gz = encoder.finish().map_err(|e| StoreError::Io {
            sha: sha.to_string(),
            source: e,
        })?;

        let encrypted = self.encrypts();
        if encrypted {
            let cipher = self.cipher.as_ref().expect("encrypts() implies a cipher");
            let mut nonce_bytes = [0u8; NONCE_LEN];
            rand::rng().fill_bytes(&mut nonce_bytes);
            let nonce = Nonce::from_slice(&nonce_bytes);
            let ciphertext =
                cipher
                    .encrypt(nonce, gz.as_slice())
                    .map_err(|_| StoreError::CorruptBlob {
                        sha: sha.to_string(),
                        reason: "encryption failed".to_string(),
                    })?;

            let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
            out.extend_from_slice(MAGIC);
            out.push(FORMAT_VERSION);
            out.extend_from_slice(&nonce_bytes);
            out.extend_from_slice(&ciphertext);

            super::atomic_write(&self.enc_path(sha), &out).map_err(|e| StoreError::Io {
                sha: sha.to_string(),
                source: e,
            })?;
            let _ = std::fs::remove_file(self.plain_path(sha));
        } else {
            super::atomic_write(&self.plain_path(sha), &gz).map_err(|e| StoreError::Io {
                sha: sha.to_string(),
                source: e,
            })?;
            let _ = std::fs::remove_file(self.enc_path(sha));
        }
        Ok(encrypted)
    }

    /// Read a chunk body, trying the plaintext form then the encrypted form.
    ///
    /// The decompressed bytes are re-hashed and must match `sha`; a mismatch
    /// surfaces as a corrupt blob, never as silently wrong content.
    pub fn read(&self, sha: &str) -> StoreResult<Vec<u8>> {
        let plain = self.plain_path(sha);
        let gz = if plain.exists() {
            std::fs::read(&plain).map_err(|e| StoreError::Io {
                sha: sha.to_string(),
                source: e,
            })?
        } else {
            let enc = self.enc_path(sha);
            if !enc.exists() {
                return Err(StoreError::NotFound {
                    sha: sha.to_string(),
                    dir: self.dir.clone(),
                });
            }
            let Some(cipher) = self.cipher.as_ref() else {
                return Err(StoreError::EncryptionKeyRequired {
                    sha: sha.to_string(),
                });
            };
            let raw = std::fs::read(&enc).map_err(|e| StoreError::Io {
                sha: sha.to_string(),
                source: e,
            })?;
            self.decrypt(sha, cipher, &raw)?
        };

        let mut decoder = GzDecoder::new(gz.as_slice());
        let mut bytes = Vec::new();
        decoder
            .read_to_end(&mut bytes)
            .map_err(|e| StoreError::CorruptBlob {
                sha: sha.to_string(),
                reason: format!("gzip decode failed: {e}"),
            })?;

        let actual = super::sha1_hex(&bytes);
        if actual != sha {
            return Err(StoreError::CorruptBlob {
                sha: sha.to_string(),
                reason: format!("content hash mismatch (got {actual})"),
            });
        }
        Ok(bytes)
    }

    fn decrypt(&self, sha: &str, cipher: &Aes256Gcm, raw: &[u8]) -> StoreResult<Vec<u8>> {
        if raw.len() < HEADER_LEN || &raw[..4] != MAGIC {
            return Err(StoreError::CorruptBlob {
                sha: sha.to_string(),
                reason: "bad encrypted header".to_string(),
            });
        }
        if raw[4] != FORMAT_VERSION {
            return Err(StoreError::CorruptBlob {
                sha: sha.to_string(),
                reason: format!("unsupported format version {}", raw[4]),
            });
        }
        let nonce = Nonce::from_slice(&raw[5..5 + NONCE_LEN]);
        cipher
            .decrypt(nonce, &raw[HEADER_LEN..])
            .map_err(|_| StoreError::DecryptFailed {
                sha: sha.to_string(),
            })
    }

    /// Remove both forms of a chunk, ignoring absence.
    pub fn remove(&self, sha: &str) -> StoreResult<()> {
        for path in [self.plain_path(sha), self.enc_path(sha)] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::Io {
                        sha: sha.to_string(),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether either form exists for `sha`.
    pub fn contains(&self, sha: &str) -> bool {
        self.plain_path(sha).exists() || self.enc_path(sha).exists()
    }
}
