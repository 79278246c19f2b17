//! The Segment Catalog
//!
//! `FileIndex` is the ordered catalog of a dataset's segments, persisted at
//! the dataset-relative path `.fileIndex` as a ZSTD-compressed stream of CBOR
//! maps `{0: first_block, 1: last_block}`. Lookups by block number are a
//! binary search over the (disjoint, strictly ascending) ranges.
//!
//! ## Crash consistency
//!
//! The writer saves the catalog *before* writing the segment bytes, so a
//! crash between the two leaves a trailing catalog entry with no segment
//! behind it. `load` heals this: if the last entry does not exist on disk it
//! is dropped in memory (the file itself is rewritten on the next save).
//! Only the last entry can be a phantom; earlier entries were sealed by
//! earlier, completed rolls.
//!
//! ## Legacy datasets
//!
//! Datasets that predate the catalog hold flat `<first>_<last>.wal` files at
//! the root. The first load against such a dataset enumerates them, sorts by
//! `first_block` and writes a fresh `.fileIndex`.

use std::sync::Arc;

use bytes::Bytes;
use ciborium::value::Value;
use futures::TryStreamExt;
use object_store::path::Path;
use object_store::ObjectStore;

use chainlog_core::ZSTD_LEVEL;

use crate::error::{Error, Result};
use crate::file::SegmentFile;

/// Dataset-relative location of the catalog.
pub const FILE_INDEX_PATH: &str = ".fileIndex";

pub struct FileIndex {
    fs: Arc<dyn ObjectStore>,
    files: Vec<Arc<SegmentFile>>,
}

impl FileIndex {
    /// An empty catalog over the given filesystem.
    pub fn new(fs: Arc<dyn ObjectStore>) -> Self {
        Self {
            fs,
            files: Vec::new(),
        }
    }

    /// Load the catalog, migrating legacy datasets and healing a phantom
    /// trailing entry left by a crash between catalog save and segment write.
    pub async fn load(fs: Arc<dyn ObjectStore>) -> Result<Self> {
        let mut index = match fs.get(&Path::from(FILE_INDEX_PATH)).await {
            Ok(result) => {
                let compressed = result.bytes().await?;
                let files = decode_catalog(&compressed)?;
                Self { fs, files }
            }
            Err(object_store::Error::NotFound { .. }) => Self::migrate_legacy(fs).await?,
            Err(err) => return Err(err.into()),
        };

        if let Some(last) = index.files.last() {
            if !last.exists(&index.fs).await? {
                tracing::warn!(
                    first = last.first_block(),
                    last = last.last_block(),
                    "dropping catalog entry with no segment on disk"
                );
                index.files.pop();
            }
        }

        Ok(index)
    }

    /// Enumerate root-level legacy `*.wal` files and build a fresh catalog.
    async fn migrate_legacy(fs: Arc<dyn ObjectStore>) -> Result<Self> {
        let mut ranges = Vec::new();
        let mut listing = fs.list(None);
        while let Some(meta) = listing.try_next().await? {
            if meta.location.parts().count() != 1 {
                continue;
            }
            let Some(name) = meta.location.filename() else {
                continue;
            };
            if let Some((first, last)) = SegmentFile::parse_legacy_name(name) {
                ranges.push((first, last));
            }
        }
        drop(listing);

        ranges.sort_by_key(|&(first, _)| first);
        let files: Vec<Arc<SegmentFile>> = ranges
            .into_iter()
            .map(|(first, last)| Arc::new(SegmentFile::new(first, last)))
            .collect();

        let index = Self { fs, files };
        if !index.files.is_empty() {
            tracing::info!(files = index.files.len(), "migrated legacy dataset layout");
            index.save().await?;
        }
        Ok(index)
    }

    pub fn files(&self) -> &[Arc<SegmentFile>] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Last persisted block number, 0 for an empty dataset.
    pub fn last_block(&self) -> u64 {
        self.files.last().map(|f| f.last_block()).unwrap_or(0)
    }

    /// Catalog position of the segment containing the first block `>= block`.
    pub fn position_for(&self, block: u64) -> Option<usize> {
        let i = self.files.partition_point(|f| f.last_block() < block);
        (i < self.files.len()).then_some(i)
    }

    /// The segment holding `block` (or the next one after a gap).
    pub fn find_file(&self, block: u64) -> Result<&Arc<SegmentFile>> {
        self.position_for(block)
            .map(|i| &self.files[i])
            .ok_or(Error::BlockNotFound(block))
    }

    /// Append a sealed segment. Ranges must stay disjoint and ascending.
    pub fn add_file(&mut self, file: Arc<SegmentFile>) -> Result<()> {
        if let Some(last) = self.files.last() {
            if file.first_block() <= last.last_block() {
                return Err(Error::FileAlreadyExists(file.first_block()));
            }
        }
        self.files.push(file);
        Ok(())
    }

    /// Persist the full catalog.
    pub async fn save(&self) -> Result<()> {
        let mut raw = Vec::new();
        for file in &self.files {
            encode_entry(&mut raw, file.first_block(), file.last_block())?;
        }
        let compressed = zstd::stream::encode_all(&raw[..], ZSTD_LEVEL)?;
        self.fs
            .put(&Path::from(FILE_INDEX_PATH), Bytes::from(compressed))
            .await?;
        Ok(())
    }

    pub(crate) fn file_system(&self) -> &Arc<dyn ObjectStore> {
        &self.fs
    }
}

fn encode_entry(buf: &mut Vec<u8>, first: u64, last: u64) -> Result<()> {
    let entry = Value::Map(vec![
        (Value::Integer(0u8.into()), Value::Integer(first.into())),
        (Value::Integer(1u8.into()), Value::Integer(last.into())),
    ]);
    ciborium::into_writer(&entry, buf)
        .map_err(|e| Error::Corrupt(format!("failed to encode catalog entry: {e}")))
}

fn decode_catalog(compressed: &[u8]) -> Result<Vec<Arc<SegmentFile>>> {
    let raw = zstd::stream::decode_all(compressed)
        .map_err(|e| Error::Corrupt(format!("failed to decompress catalog: {e}")))?;

    let mut files = Vec::new();
    let mut cursor = &raw[..];
    while !cursor.is_empty() {
        let value: Value = ciborium::from_reader(&mut cursor)
            .map_err(|e| Error::Corrupt(format!("failed to decode catalog entry: {e}")))?;
        let (first, last) = decode_entry(&value)?;
        files.push(Arc::new(SegmentFile::new(first, last)));
    }
    Ok(files)
}

fn decode_entry(value: &Value) -> Result<(u64, u64)> {
    let entries = value
        .as_map()
        .ok_or_else(|| Error::Corrupt("catalog entry is not a map".to_string()))?;

    let mut first = None;
    let mut last = None;
    for (key, val) in entries {
        let (Value::Integer(key), Value::Integer(val)) = (key, val) else {
            continue;
        };
        let val = u64::try_from(*val)
            .map_err(|_| Error::Corrupt("catalog block number out of range".to_string()))?;
        match u8::try_from(*key) {
            Ok(0) => first = Some(val),
            Ok(1) => last = Some(val),
            _ => {} // unknown fields tolerated
        }
    }

    match (first, last) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(Error::Corrupt(
            "catalog entry missing block range".to_string(),
        )),
    }
}
