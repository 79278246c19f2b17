//! Segment Files
//!
//! A segment is one sealed, immutable range of blocks stored as a single
//! object. Its on-disk path is content-addressed from the block range: the
//! pair `(first, last)` is encoded big-endian into 16 bytes and hashed with
//! SHA-256; the path is a three-level directory tree where each level is an
//! 8-byte slice of the digest reduced modulo 1000, and the filename is the
//! full digest hex. Each directory tops out at 1000 children, which keeps
//! listings fast on local disks while distributing segments evenly -
//! a ceiling of 10^9 segments per dataset.
//!
//! Datasets written by earlier versions used flat `<first>_<last>.wal` names
//! at the dataset root; those are still readable (never written).
//!
//! ## Prefetch
//!
//! A reader streaming segments in order wants the next segment's bytes in
//! memory before it finishes the current one. `prefetch` downloads the whole
//! segment into a buffer; concurrent prefetches of the same file deduplicate
//! by waiting on the in-flight fetch. The buffer is handed out exactly once
//! (`open` consumes it) - a second open after the buffer has been taken reads
//! from the filesystem again.

use std::sync::Arc;

use bytes::Bytes;
use object_store::path::Path;
use object_store::ObjectStore;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Children per directory level of the content-addressed tree.
pub const DIRS_PER_LEVEL: u64 = 1000;

/// One sealed segment covering blocks `first_block..=last_block`.
#[derive(Debug)]
pub struct SegmentFile {
    first_block: u64,
    last_block: u64,
    // whole-segment read-ahead buffer; the mutex doubles as the in-flight
    // fetch guard (a second prefetch waits here until the first completes)
    prefetch: Mutex<Option<Bytes>>,
}

impl SegmentFile {
    pub fn new(first_block: u64, last_block: u64) -> Self {
        Self {
            first_block,
            last_block,
            prefetch: Mutex::new(None),
        }
    }

    pub fn first_block(&self) -> u64 {
        self.first_block
    }

    pub fn last_block(&self) -> u64 {
        self.last_block
    }

    /// The content-addressed path. Pure function of `(first, last)`.
    pub fn path(&self) -> Path {
        let mut pair = [0u8; 16];
        pair[..8].copy_from_slice(&self.first_block.to_be_bytes());
        pair[8..].copy_from_slice(&self.last_block.to_be_bytes());
        let digest = Sha256::digest(pair);

        let level = |range: std::ops::Range<usize>| -> u64 {
            let mut word = [0u8; 8];
            word.copy_from_slice(&digest[range]);
            u64::from_be_bytes(word) % DIRS_PER_LEVEL
        };

        Path::from(format!(
            "{:06}/{:06}/{:06}/{}",
            level(0..8),
            level(8..16),
            level(16..24),
            hex::encode(digest)
        ))
    }

    /// The legacy flat path. Recognized read-only for old datasets.
    pub fn legacy_path(&self) -> Path {
        Path::from(format!("{}_{}.wal", self.first_block, self.last_block))
    }

    /// Parse a legacy `<first>_<last>.wal` filename.
    pub fn parse_legacy_name(name: &str) -> Option<(u64, u64)> {
        let stem = name.strip_suffix(".wal")?;
        let (first, last) = stem.split_once('_')?;
        Some((first.parse().ok()?, last.parse().ok()?))
    }

    /// Whether the segment exists on disk, at either path.
    pub async fn exists(&self, fs: &Arc<dyn ObjectStore>) -> Result<bool> {
        match fs.head(&self.path()).await {
            Ok(_) => return Ok(true),
            Err(object_store::Error::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        match fs.head(&self.legacy_path()).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Read the segment bytes, preferring a held prefetch buffer. The buffer
    /// is consumed by the first open; later opens hit the filesystem.
    pub async fn open(&self, fs: &Arc<dyn ObjectStore>) -> Result<Bytes> {
        if let Some(buffered) = self.prefetch.lock().await.take() {
            return Ok(buffered);
        }
        self.read_from(fs).await
    }

    /// Write the sealed segment bytes at the content-addressed path.
    pub async fn write(&self, fs: &Arc<dyn ObjectStore>, bytes: Bytes) -> Result<()> {
        fs.put(&self.path(), bytes).await?;
        Ok(())
    }

    /// Read the whole segment into the prefetch buffer. Concurrent calls on
    /// the same file collapse into one fetch.
    pub async fn prefetch(&self, fs: &Arc<dyn ObjectStore>) -> Result<()> {
        let mut slot = self.prefetch.lock().await;
        if slot.is_some() {
            return Ok(());
        }
        let bytes = self.read_from(fs).await?;
        tracing::debug!(
            first = self.first_block,
            last = self.last_block,
            bytes = bytes.len(),
            "prefetched segment"
        );
        *slot = Some(bytes);
        Ok(())
    }

    /// Drop any prefetched bytes. Idempotent.
    pub async fn prefetch_clear(&self) {
        self.prefetch.lock().await.take();
    }

    async fn read_from(&self, fs: &Arc<dyn ObjectStore>) -> Result<Bytes> {
        match fs.get(&self.path()).await {
            Ok(result) => return Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        match fs.get(&self.legacy_path()).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(err @ object_store::Error::NotFound { .. }) => Err(Error::Store(err)),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::collections::HashSet;

    fn memory() -> Arc<dyn ObjectStore> {
        Arc::new(InMemory::new())
    }

    // ---------------------------------------------------------------
    // Path derivation
    // ---------------------------------------------------------------

    #[test]
    fn test_path_is_deterministic() {
        let a = SegmentFile::new(1, 50);
        let b = SegmentFile::new(1, 50);
        assert_eq!(a.path(), b.path());
    }

    #[test]
    fn test_path_depends_on_range() {
        assert_ne!(SegmentFile::new(1, 50).path(), SegmentFile::new(1, 51).path());
        assert_ne!(SegmentFile::new(1, 50).path(), SegmentFile::new(2, 50).path());
    }

    #[test]
    fn test_path_shape() {
        let path = SegmentFile::new(1, 50).path().to_string();
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 4);
        for dir in &parts[..3] {
            assert_eq!(dir.len(), 6);
            assert!(dir.parse::<u64>().unwrap() < DIRS_PER_LEVEL);
        }
        assert_eq!(parts[3].len(), 64);
    }

    #[test]
    fn test_no_path_collisions_at_scale() {
        let paths: HashSet<String> = (1..=1000u64)
            .map(|n| SegmentFile::new(50 * n, 50 * n + 49).path().to_string())
            .collect();
        assert_eq!(paths.len(), 1000);
    }

    #[test]
    fn test_legacy_name_roundtrip() {
        let file = SegmentFile::new(17, 42);
        assert_eq!(file.legacy_path().to_string(), "17_42.wal");
        assert_eq!(SegmentFile::parse_legacy_name("17_42.wal"), Some((17, 42)));
        assert_eq!(SegmentFile::parse_legacy_name("17-42.wal"), None);
        assert_eq!(SegmentFile::parse_legacy_name("17_42.seg"), None);
        assert_eq!(SegmentFile::parse_legacy_name("x_y.wal"), None);
    }

    // ---------------------------------------------------------------
    // Existence and open fallback
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_exists_and_open_content_addressed() {
        let fs = memory();
        let file = SegmentFile::new(1, 4);
        assert!(!file.exists(&fs).await.unwrap());

        file.write(&fs, Bytes::from_static(b"segment")).await.unwrap();
        assert!(file.exists(&fs).await.unwrap());
        assert_eq!(file.open(&fs).await.unwrap(), Bytes::from_static(b"segment"));
    }

    #[tokio::test]
    async fn test_open_falls_back_to_legacy() {
        let fs = memory();
        let file = SegmentFile::new(5, 8);
        fs.put(&file.legacy_path(), Bytes::from_static(b"old"))
            .await
            .unwrap();

        assert!(file.exists(&fs).await.unwrap());
        assert_eq!(file.open(&fs).await.unwrap(), Bytes::from_static(b"old"));
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let fs = memory();
        let err = SegmentFile::new(9, 12).open(&fs).await.unwrap_err();
        assert!(err.is_not_found());
    }

    // ---------------------------------------------------------------
    // Prefetch
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_prefetch_consumed_once() {
        let fs = memory();
        let file = SegmentFile::new(1, 2);
        file.write(&fs, Bytes::from_static(b"data")).await.unwrap();

        file.prefetch(&fs).await.unwrap();
        // delete behind the buffer: first open must still succeed
        fs.delete(&file.path()).await.unwrap();
        assert_eq!(file.open(&fs).await.unwrap(), Bytes::from_static(b"data"));
        // buffer consumed; second open goes back to the (now empty) store
        assert!(file.open(&fs).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_prefetch_clear_is_idempotent() {
        let fs = memory();
        let file = SegmentFile::new(1, 2);
        file.write(&fs, Bytes::from_static(b"data")).await.unwrap();
        file.prefetch(&fs).await.unwrap();
        file.prefetch_clear().await;
        file.prefetch_clear().await;
        // buffer gone, open re-reads from the store
        assert_eq!(file.open(&fs).await.unwrap(), Bytes::from_static(b"data"));
    }

    #[tokio::test]
    async fn test_concurrent_prefetch_deduplicates() {
        let fs = memory();
        let file = Arc::new(SegmentFile::new(1, 2));
        file.write(&fs, Bytes::from_static(b"data")).await.unwrap();

        let (a, b) = tokio::join!(file.prefetch(&fs), file.prefetch(&fs));
        a.unwrap();
        b.unwrap();
        assert_eq!(file.open(&fs).await.unwrap(), Bytes::from_static(b"data"));
    }
}
