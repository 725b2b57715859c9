//! Snapshot of the semantic index's embedding matrix.
//!
//! Re-embedding every descriptor at startup is the slow part of a rebuild,
//! so the matrix is cached on disk and reused while the descriptors and the
//! embedding model are unchanged.

use crate::error::{AppError, Result};
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Snapshot file format version. Increment when format changes.
const SNAPSHOT_VERSION: u32 = 1;

/// Magic bytes to identify valid snapshot files.
const SNAPSHOT_MAGIC: &[u8; 8] = b"TOOLIDX\0";

/// One indexed document: operation name plus the canonical text that was embedded.
pub struct SnapshotKey<'a> {
    pub name: &'a str,
    pub text: &'a str,
}

pub struct IndexSnapshot {
    pub version: u32,
    /// SHA256 over model id and every (name, text) pair
    pub content_hash: [u8; 32],
    pub num_points: usize,
    pub embedding_dim: usize,
    /// Matrix of shape (num_points, embedding_dim), row order = key order
    pub embeddings: Array2<f32>,
}

impl IndexSnapshot {
    pub fn compute_hash(model_id: &str, keys: &[SnapshotKey<'_>]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(b"\n");

        for key in keys {
            hasher.update(key.name.as_bytes());
            hasher.update(b"|");
            hasher.update(key.text.as_bytes());
            hasher.update(b"\n");
        }

        hasher.finalize().into()
    }

    pub fn new(model_id: &str, keys: &[SnapshotKey<'_>], embeddings: Array2<f32>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            content_hash: Self::compute_hash(model_id, keys),
            num_points: keys.len(),
            embedding_dim: embeddings.ncols(),
            embeddings,
        }
    }

    /// Save snapshot to a binary file, replacing any previous one atomically.
    ///
    /// File format:
    /// - 8 bytes: magic "TOOLIDX\0"
    /// - 4 bytes: version (u32 LE)
    /// - 32 bytes: content_hash
    /// - 8 bytes: num_points (u64 LE)
    /// - 8 bytes: embedding_dim (u64 LE)
    /// - N bytes: embeddings data (f32 LE, row-major)
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::StorageError(format!("Failed to create snapshot directory: {}", e))
            })?;
        }

        let tmp_path = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let file = File::create(&tmp_path).map_err(|e| {
            AppError::StorageError(format!("Failed to create snapshot file: {}", e))
        })?;
        let mut writer = BufWriter::new(file);

        let write_err = |e: std::io::Error| {
            AppError::StorageError(format!("Failed to write index snapshot: {}", e))
        };

        writer.write_all(SNAPSHOT_MAGIC).map_err(write_err)?;
        writer
            .write_all(&self.version.to_le_bytes())
            .map_err(write_err)?;
        writer.write_all(&self.content_hash).map_err(write_err)?;
        writer
            .write_all(&(self.num_points as u64).to_le_bytes())
            .map_err(write_err)?;
        writer
            .write_all(&(self.embedding_dim as u64).to_le_bytes())
            .map_err(write_err)?;

        for &val in self.embeddings.iter() {
            writer.write_all(&val.to_le_bytes()).map_err(write_err)?;
        }

        writer.flush().map_err(write_err)?;
        drop(writer);

        fs::rename(&tmp_path, path).map_err(|e| {
            AppError::StorageError(format!("Failed to move snapshot into place: {}", e))
        })?;

        tracing::info!(
            path = %path.display(),
            num_points = self.num_points,
            embedding_dim = self.embedding_dim,
            size_bytes = 8 + 4 + 32 + 8 + 8 + (self.num_points * self.embedding_dim * 4),
            "Index snapshot saved"
        );

        Ok(())
    }

    /// Load a snapshot of `expected_points` rows of `expected_dim` floats.
    ///
    /// Returns None if the file is missing, not a valid snapshot, or holds a
    /// matrix of another shape. The header is checked before any allocation.
    pub fn load(path: &Path, expected_points: usize, expected_dim: usize) -> Result<Option<Self>> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Snapshot file does not exist");
            return Ok(None);
        }

        let file = File::open(path).map_err(|e| {
            AppError::StorageError(format!("Failed to open snapshot file: {}", e))
        })?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 8];
        if reader.read_exact(&mut magic).is_err() || &magic != SNAPSHOT_MAGIC {
            tracing::warn!(path = %path.display(), "Invalid snapshot magic, ignoring");
            return Ok(None);
        }

        let read_err =
            |e: std::io::Error| AppError::StorageError(format!("Failed to read index snapshot: {}", e));

        let mut version_bytes = [0u8; 4];
        reader.read_exact(&mut version_bytes).map_err(read_err)?;
        let version = u32::from_le_bytes(version_bytes);

        if version != SNAPSHOT_VERSION {
            tracing::warn!(
                path = %path.display(),
                snapshot_version = version,
                expected_version = SNAPSHOT_VERSION,
                "Snapshot version mismatch, ignoring"
            );
            return Ok(None);
        }

        let mut content_hash = [0u8; 32];
        reader.read_exact(&mut content_hash).map_err(read_err)?;

        let mut num_points_bytes = [0u8; 8];
        reader.read_exact(&mut num_points_bytes).map_err(read_err)?;
        let num_points = u64::from_le_bytes(num_points_bytes) as usize;

        let mut embedding_dim_bytes = [0u8; 8];
        reader.read_exact(&mut embedding_dim_bytes).map_err(read_err)?;
        let embedding_dim = u64::from_le_bytes(embedding_dim_bytes) as usize;

        if num_points != expected_points || embedding_dim != expected_dim {
            tracing::info!(
                path = %path.display(),
                num_points,
                embedding_dim,
                expected_points,
                expected_dim,
                "Snapshot shape mismatch, ignoring"
            );
            return Ok(None);
        }
        let Some(total_floats) = num_points.checked_mul(embedding_dim) else {
            tracing::warn!(path = %path.display(), "Snapshot header overflows, ignoring");
            return Ok(None);
        };
        let mut data = vec![0f32; total_floats];
        for val in &mut data {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes).map_err(read_err)?;
            *val = f32::from_le_bytes(bytes);
        }

        let embeddings = Array2::from_shape_vec((num_points, embedding_dim), data).map_err(|e| {
            AppError::StorageError(format!("Failed to reshape snapshot embeddings: {}", e))
        })?;

        tracing::info!(path = %path.display(), num_points, embedding_dim, "Index snapshot loaded");

        Ok(Some(Self {
            version,
            content_hash,
            num_points,
            embedding_dim,
            embeddings,
        }))
    }

    pub fn is_valid_for(&self, model_id: &str, keys: &[SnapshotKey<'_>], dimension: usize) -> bool {
        self.content_hash == Self::compute_hash(model_id, keys)
            && self.num_points == keys.len()
            && self.embedding_dim == dimension
    }
}

/// Load the cached matrix if it was produced for exactly these keys and model.
///
/// A corrupt or unreadable snapshot is treated as a miss.
pub fn try_load_snapshot(
    path: &Path,
    model_id: &str,
    keys: &[SnapshotKey<'_>],
    dimension: usize,
) -> Option<Array2<f32>> {
    match IndexSnapshot::load(path, keys.len(), dimension) {
        Ok(Some(snapshot)) if snapshot.is_valid_for(model_id, keys, dimension) => {
            tracing::info!("Using cached embeddings (snapshot hit)");
            Some(snapshot.embeddings)
        }
        Ok(Some(_)) => {
            tracing::info!("Snapshot stale (descriptors or model changed), recomputing");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable snapshot, recomputing");
            None
        }
    }
}
