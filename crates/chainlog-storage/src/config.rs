//! Dataset Configuration
//!
//! A dataset is addressed by `<path>/<name>/<version>`; name and version are
//! optional sub-segments. [`Options`] bundles everything a writer or reader
//! needs: the dataset, the filesystem, codec and compression factories, the
//! roll policy and a couple of behavioral flags. Construction is
//! builder-style:
//!
//! ```ignore
//! let options = Options::new(Dataset::new("./data").with_name("blocks"))
//!     .with_compression(Compression::Zstd)
//!     .with_roll_policy(Arc::new(BlockIntervalRollPolicy::new(1000)))
//!     .with_roll_on_close(true);
//! let mut writer = Writer::open(options).await?;
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use object_store::ObjectStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use chainlog_core::{CborCodec, Codec, Compression};

use crate::error::Result;
use crate::fs::{local_store, CachedStore, Prefixed};
use crate::policy::{RollPolicy, SizeRollPolicy};

/// Default segment size cap: 8 MiB.
pub const DEFAULT_MAX_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;

/// Default timeout for a background segment prefetch.
pub const DEFAULT_PREFETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a dataset lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Root path. Required.
    pub path: String,

    /// Optional dataset name sub-segment.
    #[serde(default)]
    pub name: String,

    /// Optional version sub-segment.
    #[serde(default)]
    pub version: String,

    /// When set and a remote filesystem is supplied, reads go through a
    /// two-tier cache rooted here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Dataset {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    /// `<path>/<name>/<version>` with empty segments skipped.
    pub fn full_path(&self) -> String {
        [&self.path, &self.name, &self.version]
            .iter()
            .filter(|s| !s.is_empty())
            .map(|s| s.trim_matches('/'))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Writer/reader configuration.
pub struct Options<T> {
    pub dataset: Dataset,

    /// Filesystem holding the dataset. Defaults to the local filesystem
    /// rooted at the dataset path.
    pub store: Option<Arc<dyn ObjectStore>>,

    /// Block codec. Defaults to self-describing binary (CBOR).
    pub codec: Arc<dyn Codec<T>>,

    /// Segment compression. Defaults to none.
    pub compression: Compression,

    /// Segment roll policy. Defaults to a size policy at 8 MiB.
    pub roll_policy: Arc<dyn RollPolicy>,

    /// Seal buffered blocks into a final segment on `close`.
    pub roll_on_close: bool,

    /// Per-segment prefetch deadline.
    pub prefetch_timeout: Duration,
}

impl<T> Options<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            store: None,
            codec: Arc::new(CborCodec),
            compression: Compression::None,
            roll_policy: Arc::new(SizeRollPolicy::new(DEFAULT_MAX_SEGMENT_SIZE)),
            roll_on_close: false,
            prefetch_timeout: DEFAULT_PREFETCH_TIMEOUT,
        }
    }
}

impl<T> Options<T> {
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec<T>>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_roll_policy(mut self, policy: Arc<dyn RollPolicy>) -> Self {
        self.roll_policy = policy;
        self
    }

    pub fn with_roll_on_close(mut self, roll_on_close: bool) -> Self {
        self.roll_on_close = roll_on_close;
        self
    }

    pub fn with_prefetch_timeout(mut self, timeout: Duration) -> Self {
        self.prefetch_timeout = timeout;
        self
    }

    /// Resolve the dataset filesystem: the supplied store behind cache and
    /// prefix wrappers, or a local store rooted at the dataset path.
    pub(crate) fn build_store(&self) -> Result<Arc<dyn ObjectStore>> {
        match &self.store {
            Some(store) => {
                let mut base = Arc::clone(store);
                if let Some(cache_dir) = &self.dataset.cache_dir {
                    let cache = local_store(cache_dir)?;
                    base = Arc::new(CachedStore::new(base, cache));
                }
                let prefix = self.dataset.full_path();
                if prefix.is_empty() {
                    Ok(base)
                } else {
                    Ok(Arc::new(Prefixed::new(base, prefix)) as Arc<dyn ObjectStore>)
                }
            }
            None => {
                let mut root = PathBuf::from(&self.dataset.path);
                if !self.dataset.name.is_empty() {
                    root.push(&self.dataset.name);
                }
                if !self.dataset.version.is_empty() {
                    root.push(&self.dataset.version);
                }
                local_store(&root)
            }
        }
    }
}

impl<T> Clone for Options<T> {
    fn clone(&self) -> Self {
        Self {
            dataset: self.dataset.clone(),
            store: self.store.clone(),
            codec: Arc::clone(&self.codec),
            compression: self.compression,
            roll_policy: Arc::clone(&self.roll_policy),
            roll_on_close: self.roll_on_close,
            prefetch_timeout: self.prefetch_timeout,
        }
    }
}

impl<T> fmt::Debug for Options<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("dataset", &self.dataset)
            .field("compression", &self.compression)
            .field("roll_on_close", &self.roll_on_close)
            .field("prefetch_timeout", &self.prefetch_timeout)
            .finish_non_exhaustive()
    }
}
