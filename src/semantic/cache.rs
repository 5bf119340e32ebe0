//! Content-addressed cache for bulk image embeddings.
//!
//! One file per cache key: `embeddings_<key>.bin`
//!
//! Header (19 bytes):
//! - version: u8 (1)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - body_checksum: u32 (CRC32 of the entry bytes)
//! - header_checksum: u32 (CRC32 of header fields before it)
//!
//! Entries (repeated entry_count times, in sorted source order):
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Any failure to read is a cache miss. Any failure to write is logged and
//! dropped.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + dimensions(2) + entry_count(8) + body_checksum(4) + header_checksum(4)
const HEADER_SIZE: usize = 19;

/// Errors raised while reading or writing a cache file.
///
/// Never leaves this module: `get` turns them into misses and `put` logs them.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Entry count mismatch: expected {expected}, file has {got}")]
    CountMismatch { expected: usize, got: usize },

    #[error("Invalid embeddings: {0}")]
    InvalidFormat(String),
}

/// Hex-encoded SHA256 over the model id and the sorted source identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// On-disk embedding cache rooted at a directory.
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Compute the cache key for a model and a list of source identifiers.
    ///
    /// Sources are sorted first, so the key does not depend on scan order.
    /// Callers store entries in that same sorted order.
    pub fn key(model_id: &str, sources: &[String]) -> CacheKey {
        let mut sorted: Vec<&str> = sources.iter().map(String::as_str).collect();
        sorted.sort_unstable();

        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(b"_");
        // Length-prefixed so no separator can be forged by a file name.
        for source in sorted {
            hasher.update((source.len() as u64).to_le_bytes());
            hasher.update(source.as_bytes());
        }
        let digest: [u8; 32] = hasher.finalize().into();

        CacheKey(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Path of the file holding a key's entry.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("embeddings_{key}.bin"))
    }

    /// Load cached vectors, only if exactly `expected_count` are stored.
    pub fn get(&self, key: &CacheKey, expected_count: usize) -> Option<Vec<Vec<f32>>> {
        let path = self.path_for(key);
        if !path.exists() {
            log::debug!("embedding cache miss for key {key}");
            return None;
        }

        match Self::read_file(&path, expected_count) {
            Ok(vectors) => {
                log::info!("Loaded {} embeddings from cache", vectors.len());
                Some(vectors)
            }
            Err(err) => {
                log::warn!("Ignoring embedding cache {}: {err}", path.display());
                None
            }
        }
    }

    /// Persist vectors under `key`, replacing any previous entry.
    pub fn put(&self, key: &CacheKey, vectors: &[Vec<f32>]) {
        let path = self.path_for(key);
        match self.save(&path, vectors) {
            Ok(()) => log::info!("Saved {} embeddings to cache", vectors.len()),
            Err(err) => log::warn!("Failed to write embedding cache {}: {err}", path.display()),
        }
    }

    /// Uses atomic write: temp file -> fsync -> rename
    fn save(&self, path: &Path, vectors: &[Vec<f32>]) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir)?;

        let temp_path = path.with_extension("tmp");
        let result = Self::write_file(&temp_path, vectors);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    fn write_file(path: &Path, vectors: &[Vec<f32>]) -> Result<(), CacheError> {
        let dimensions = vectors.first().map(Vec::len).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dimensions) {
            return Err(CacheError::InvalidFormat("vectors have mixed dimensions".into()));
        }
        let dimensions = u16::try_from(dimensions)
            .map_err(|_| CacheError::InvalidFormat(format!("{dimensions} dimensions")))?;

        let mut body = Vec::with_capacity(vectors.len() * dimensions as usize * 4);
        for value in vectors.iter().flatten() {
            body.extend_from_slice(&value.to_le_bytes());
        }

        let mut header = [0u8; HEADER_SIZE];
        header[0] = FORMAT_VERSION;
        header[1..3].copy_from_slice(&dimensions.to_le_bytes());
        header[3..11].copy_from_slice(&(vectors.len() as u64).to_le_bytes());
        header[11..15].copy_from_slice(&crc32fast::hash(&body).to_le_bytes());
        let header_checksum = crc32fast::hash(&header[0..15]);
        header[15..19].copy_from_slice(&header_checksum.to_le_bytes());

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        writer.write_all(&body)?;

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Ok(())
    }

    fn read_file(path: &Path, expected_count: usize) -> Result<Vec<Vec<f32>>, CacheError> {
        let mut reader = BufReader::new(File::open(path)?);

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header)?;

        let stored_header_checksum = u32::from_le_bytes([header[15], header[16], header[17], header[18]]);
        if crc32fast::hash(&header[0..15]) != stored_header_checksum {
            return Err(CacheError::ChecksumMismatch);
        }

        let version = header[0];
        if version != FORMAT_VERSION {
            return Err(CacheError::VersionMismatch(version, FORMAT_VERSION));
        }

        let dimensions = u16::from_le_bytes([header[1], header[2]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[3..11]);
        let count = u64::from_le_bytes(count_bytes) as usize;
        let body_checksum = u32::from_le_bytes([header[11], header[12], header[13], header[14]]);

        if count != expected_count {
            return Err(CacheError::CountMismatch {
                expected: expected_count,
                got: count,
            });
        }

        let mut body = Vec::with_capacity(count * dimensions * 4);
        reader.read_to_end(&mut body)?;

        if body.len() != count * dimensions * 4 {
            return Err(CacheError::InvalidFormat(format!(
                "expected {} body bytes, found {}",
                count * dimensions * 4,
                body.len()
            )));
        }
        if crc32fast::hash(&body) != body_checksum {
            return Err(CacheError::ChecksumMismatch);
        }

        let floats: Vec<f32> = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        if dimensions == 0 {
            return Ok(vec![Vec::new(); count]);
        }

        Ok(floats.chunks_exact(dimensions).map(<[f32]>::to_vec).collect())
    }
}
