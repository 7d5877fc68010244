//! Binary persistence for the vector index.
//!
//! File layout:
//!
//! Header (15 bytes):
//! - version: u8 (1)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of the header fields before the checksum)
//!
//! Entries (repeated):
//! - id_len: u16 (little-endian)
//! - id: UTF-8 bytes
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Embeddings round-trip bit-exactly; the per-entry payload is the same
//! little-endian f32 layout as the record store's cached blobs.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::index::VectorIndex;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    #[error("version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Reads and writes the persisted id -> embedding map.
pub struct IndexStorage {
    path: PathBuf,
}

impl IndexStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is the expected first-run state; callers check this
    /// rather than treating the load error as meaningful.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index, validating checksum, version and dimensions.
    pub fn load(&self, expected_dimensions: usize) -> Result<VectorIndex, StorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;

        if header.dimensions as usize != expected_dimensions {
            return Err(StorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut index =
            VectorIndex::with_capacity(expected_dimensions, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let (id, embedding) = read_entry(&mut reader, expected_dimensions)?;
            index
                .insert(id, embedding)
                .map_err(|e| StorageError::InvalidFormat(e.to_string()))?;
        }

        Ok(index)
    }

    /// Save the index atomically: temp file, fsync, rename.
    ///
    /// A concurrent `load` observes either the old file or the new one,
    /// never a partial write.
    pub fn save(&self, index: &VectorIndex) -> Result<(), StorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, index);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Delete the persisted file if it exists.
    pub fn delete(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

struct Header {
    dimensions: u16,
    entry_count: u64,
}

fn write_to_file(path: &Path, index: &VectorIndex) -> Result<(), StorageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let mut header_bytes = [0u8; HEADER_SIZE];
    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..3].copy_from_slice(&(index.dimensions() as u16).to_le_bytes());
    header_bytes[3..11].copy_from_slice(&(index.len() as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header_bytes[0..11]);
    header_bytes[11..15].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header_bytes)?;

    for (id, embedding) in index.iter() {
        let id_bytes = id.as_bytes();
        if id_bytes.len() > u16::MAX as usize {
            return Err(StorageError::InvalidFormat(format!(
                "id too long for format: {} bytes",
                id_bytes.len()
            )));
        }
        writer.write_all(&(id_bytes.len() as u16).to_le_bytes())?;
        writer.write_all(id_bytes)?;
        for &value in embedding {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut BufReader<File>) -> Result<Header, StorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(StorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[11],
        header_bytes[12],
        header_bytes[13],
        header_bytes[14],
    ]);
    let computed_checksum = crc32fast::hash(&header_bytes[0..11]);
    if stored_checksum != computed_checksum {
        return Err(StorageError::ChecksumMismatch);
    }

    let dimensions = u16::from_le_bytes([header_bytes[1], header_bytes[2]]);
    let entry_count = u64::from_le_bytes([
        header_bytes[3],
        header_bytes[4],
        header_bytes[5],
        header_bytes[6],
        header_bytes[7],
        header_bytes[8],
        header_bytes[9],
        header_bytes[10],
    ]);

    Ok(Header {
        dimensions,
        entry_count,
    })
}

fn read_entry(
    reader: &mut BufReader<File>,
    dimensions: usize,
) -> Result<(String, Vec<f32>), StorageError> {
    let mut len_bytes = [0u8; 2];
    reader.read_exact(&mut len_bytes)?;
    let id_len = u16::from_le_bytes(len_bytes) as usize;

    let mut id_bytes = vec![0u8; id_len];
    reader.read_exact(&mut id_bytes)?;
    let id = String::from_utf8(id_bytes)
        .map_err(|e| StorageError::InvalidFormat(format!("entry id is not UTF-8: {e}")))?;

    let mut embedding = Vec::with_capacity(dimensions);
    for _ in 0..dimensions {
        let mut float_bytes = [0u8; 4];
        reader.read_exact(&mut float_bytes)?;
        embedding.push(f32::from_le_bytes(float_bytes));
    }

    Ok((id, embedding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path() -> PathBuf {
        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "problib-index-test-{}-{}.bin",
            std::process::id(),
            counter
        ))
    }

    #[test]
    fn test_save_and_load_empty() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let index = VectorIndex::new(128);
        storage.save(&index).unwrap();
        assert!(storage.exists());

        let loaded = storage.load(128).unwrap();
        assert_eq!(loaded.len(), 0);
        assert_eq!(loaded.dimensions(), 128);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_round_trip_is_bit_exact() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let mut index = VectorIndex::new(3);
        index
            .insert("alpha".to_string(), vec![0.1, 0.2, 0.3])
            .unwrap();
        index
            .insert("beta".to_string(), vec![-1.5, 0.0, f32::MIN_POSITIVE])
            .unwrap();
        index.insert("测试".to_string(), vec![0.0, 0.0, 0.0]).unwrap();

        storage.save(&index).unwrap();
        let loaded = storage.load(3).unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get("alpha").unwrap(), &[0.1, 0.2, 0.3]);
        assert_eq!(
            loaded.get("beta").unwrap(),
            &[-1.5, 0.0, f32::MIN_POSITIVE]
        );
        assert_eq!(loaded.get("测试").unwrap(), &[0.0, 0.0, 0.0]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let storage = IndexStorage::new(temp_path());
        assert!(!storage.exists());
        assert!(matches!(storage.load(128), Err(StorageError::Io(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let index = VectorIndex::new(3);
        storage.save(&index).unwrap();

        let result = storage.load(128);
        assert!(matches!(
            result,
            Err(StorageError::DimensionMismatch {
                expected: 128,
                got: 3
            })
        ));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_version_mismatch() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let index = VectorIndex::new(3);
        storage.save(&index).unwrap();

        // Bump the version byte
        let mut data = std::fs::read(&path).unwrap();
        data[0] = 9;
        std::fs::write(&path, &data).unwrap();

        let result = storage.load(3);
        assert!(matches!(result, Err(StorageError::VersionMismatch(9, 1))));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let mut index = VectorIndex::new(3);
        index.insert("a".to_string(), vec![1.0, 0.0, 0.0]).unwrap();
        storage.save(&index).unwrap();

        // Flip a bit inside the header's entry_count field
        let mut data = std::fs::read(&path).unwrap();
        data[5] ^= 0xFF;
        std::fs::write(&path, &data).unwrap();

        let result = storage.load(3);
        assert!(matches!(result, Err(StorageError::ChecksumMismatch)));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_truncated_file_fails_to_load() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let mut index = VectorIndex::new(3);
        index.insert("a".to_string(), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert("b".to_string(), vec![0.0, 1.0, 0.0]).unwrap();
        storage.save(&index).unwrap();

        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 4]).unwrap();

        assert!(matches!(storage.load(3), Err(StorageError::Io(_))));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_failed_save_cleans_up_temp_file() {
        let path = PathBuf::from("/nonexistent/directory/index.bin");
        let storage = IndexStorage::new(path.clone());

        let index = VectorIndex::new(3);
        assert!(storage.save(&index).is_err());
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_save_overwrites_previous_file() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        let mut index = VectorIndex::new(2);
        index.insert("a".to_string(), vec![1.0, 0.0]).unwrap();
        storage.save(&index).unwrap();

        index.remove("a");
        index.insert("b".to_string(), vec![0.0, 1.0]).unwrap();
        storage.save(&index).unwrap();

        let loaded = storage.load(2).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains("b"));
        assert!(!loaded.contains("a"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_delete() {
        let path = temp_path();
        let storage = IndexStorage::new(path.clone());

        storage.save(&VectorIndex::new(2)).unwrap();
        assert!(storage.exists());

        storage.delete().unwrap();
        assert!(!storage.exists());

        // Deleting again is a no-op
        storage.delete().unwrap();
    }
}
