//! Inverted Index Files
//!
//! Each `(index, value)` pair maps to at most one bitmap file at
//! `<index>/%06d/%06d/%06d/<value>.idx`, using the same three-level digest
//! tree as segments (here over the first 24 bytes of SHA-224 of the value).
//! The payload is a ZSTD-compressed 64-bit roaring bitmap of compound keys
//! in the portable roaring serialization, so other runtimes can read the
//! files directly.
//!
//! A missing file reads as an empty bitmap - "no block carries this value"
//! and "this value was never indexed" are deliberately indistinguishable.
//!
//! The per-index watermark lives next to the bitmaps at `<index>/indexed` as
//! an 8-byte big-endian block number.

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use roaring::RoaringTreemap;
use sha2::{Digest, Sha224};

use chainlog_core::ZSTD_LEVEL;

use crate::compound::{IndexName, IndexedValue};
use crate::error::{Error, Result};

/// Children per directory level, matching the segment tree.
const DIRS_PER_LEVEL: u64 = 1000;

/// Index-relative path of a value's bitmap file.
pub fn index_path(name: &IndexName, value: &IndexedValue) -> Path {
    let digest = Sha224::digest(value.as_str().as_bytes());

    let level = |range: std::ops::Range<usize>| -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&digest[range]);
        u64::from_be_bytes(word) % DIRS_PER_LEVEL
    };

    Path::from(format!(
        "{}/{:06}/{:06}/{:06}/{}.idx",
        name,
        level(0..8),
        level(8..16),
        level(16..24),
        value
    ))
}

/// Path of an index's watermark file.
pub fn watermark_path(name: &IndexName) -> Path {
    Path::from(format!("{name}/indexed"))
}

/// One value's bitmap file.
pub struct IndexFile {
    fs: Arc<dyn ObjectStore>,
    path: Path,
}

impl IndexFile {
    pub fn new(fs: Arc<dyn ObjectStore>, name: &IndexName, value: &IndexedValue) -> Self {
        Self {
            fs,
            path: index_path(name, value),
        }
    }

    /// Read the bitmap; a missing file is an empty bitmap.
    pub async fn read(&self) -> Result<RoaringTreemap> {
        let compressed = match self.fs.get(&self.path).await {
            Ok(result) => result.bytes().await?,
            Err(object_store::Error::NotFound { .. }) => return Ok(RoaringTreemap::new()),
            Err(err) => return Err(err.into()),
        };

        let raw = zstd::stream::decode_all(compressed.as_ref())
            .map_err(|e| Error::Corrupt(format!("bitmap at {}: {e}", self.path)))?;
        RoaringTreemap::deserialize_from(&raw[..])
            .map_err(|e| Error::Corrupt(format!("bitmap at {}: {e}", self.path)))
    }

    pub async fn write(&self, bitmap: &RoaringTreemap) -> Result<()> {
        let mut raw = Vec::with_capacity(bitmap.serialized_size());
        bitmap.serialize_into(&mut raw)?;
        let compressed = zstd::stream::encode_all(&raw[..], ZSTD_LEVEL)?;
        self.fs.put(&self.path, Bytes::from(compressed)).await?;
        Ok(())
    }
}

/// Read an index's durable watermark (0 if absent).
pub async fn read_watermark(fs: &Arc<dyn ObjectStore>, name: &IndexName) -> Result<u64> {
    let bytes = match fs.get(&watermark_path(name)).await {
        Ok(result) => result.bytes().await?,
        Err(object_store::Error::NotFound { .. }) => return Ok(0),
        Err(err) => return Err(err.into()),
    };

    let raw: [u8; 8] = bytes
        .as_ref()
        .try_into()
        .map_err(|_| Error::Corrupt(format!("watermark of index {name} is not 8 bytes")))?;
    Ok(u64::from_be_bytes(raw))
}

/// Persist an index's watermark.
pub async fn write_watermark(
    fs: &Arc<dyn ObjectStore>,
    name: &IndexName,
    block_num: u64,
) -> Result<()> {
    fs.put(
        &watermark_path(name),
        Bytes::copy_from_slice(&block_num.to_be_bytes()),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory() -> Arc<dyn ObjectStore> {
        Arc::new(InMemory::new())
    }

    #[test]
    fn test_index_path_shape() {
        let path = index_path(&IndexName::new("erc20"), &IndexedValue::new("0xabc")).to_string();
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "erc20");
        for dir in &parts[1..4] {
            assert_eq!(dir.len(), 6);
            assert!(dir.parse::<u64>().unwrap() < DIRS_PER_LEVEL);
        }
        assert_eq!(parts[4], "0xabc.idx");
    }

    #[test]
    fn test_index_path_deterministic_per_value() {
        let name = IndexName::new("idx");
        let a = index_path(&name, &IndexedValue::new("one"));
        let b = index_path(&name, &IndexedValue::new("one"));
        let c = index_path(&name, &IndexedValue::new("two"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_missing_bitmap_is_empty() {
        let file = IndexFile::new(memory(), &IndexName::new("idx"), &IndexedValue::new("v"));
        assert!(file.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bitmap_roundtrip() {
        let file = IndexFile::new(memory(), &IndexName::new("idx"), &IndexedValue::new("v"));

        let mut bitmap = RoaringTreemap::new();
        bitmap.insert(1);
        bitmap.insert(1 << 40);
        bitmap.insert(u64::MAX);
        file.write(&bitmap).await.unwrap();

        assert_eq!(file.read().await.unwrap(), bitmap);
    }

    #[tokio::test]
    async fn test_corrupt_bitmap_is_error() {
        let fs = memory();
        let name = IndexName::new("idx");
        let value = IndexedValue::new("v");
        fs.put(&index_path(&name, &value), Bytes::from_static(b"junk"))
            .await
            .unwrap();

        let file = IndexFile::new(fs, &name, &value);
        assert!(matches!(file.read().await.unwrap_err(), Error::Corrupt(_)));
    }

    #[tokio::test]
    async fn test_watermark_roundtrip() {
        let fs = memory();
        let name = IndexName::new("idx");
        assert_eq!(read_watermark(&fs, &name).await.unwrap(), 0);

        write_watermark(&fs, &name, 123_456).await.unwrap();
        assert_eq!(read_watermark(&fs, &name).await.unwrap(), 123_456);
    }

    #[tokio::test]
    async fn test_watermark_wrong_size_is_corrupt() {
        let fs = memory();
        let name = IndexName::new("idx");
        fs.put(&watermark_path(&name), Bytes::from_static(b"xy"))
            .await
            .unwrap();
        assert!(matches!(
            read_watermark(&fs, &name).await.unwrap_err(),
            Error::Corrupt(_)
        ));
    }
}
