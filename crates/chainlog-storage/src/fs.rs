//! Filesystem Wrappers
//!
//! The store consumes an abstract filesystem through `Arc<dyn ObjectStore>`;
//! anything the `object_store` crate can speak (local disk, S3/GCS-style
//! stores, in-memory for tests) can hold a dataset. This module adds the two
//! wrappers the engine needs on top:
//!
//! - [`Prefixed`]: composes a dataset prefix onto every path, so writer,
//!   reader and indexes all see dataset-relative names.
//! - [`CachedStore`]: a two-tier read cache. Reads are served from a local
//!   cache store and fall back to the remote, populating the cache on the way
//!   out; writes go through to both. Useful when the dataset lives in an
//!   object store with per-request latency.
//!
//! Cache population and eviction are best-effort: a cache write failure is
//! logged and the remote result still returned.

use std::fmt;
use std::ops::Range;
use std::path::Path as StdPath;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::{
    GetOptions, GetResult, GetResultPayload, ListResult, MultipartId, ObjectMeta, ObjectStore,
    PutOptions, PutResult,
};
use tokio::io::AsyncWrite;

use crate::error::Result;

/// Open a local filesystem store rooted at `root`, creating the directory
/// tree if it does not exist yet.
pub fn local_store(root: &StdPath) -> Result<Arc<dyn ObjectStore>> {
    std::fs::create_dir_all(root)?;
    Ok(Arc::new(LocalFileSystem::new_with_prefix(root)?))
}

// ---------------------------------------------------------------------------
// Prefixed
// ---------------------------------------------------------------------------

/// An [`ObjectStore`] view that prepends a fixed prefix to every path.
#[derive(Debug)]
pub struct Prefixed {
    inner: Arc<dyn ObjectStore>,
    prefix: Path,
}

impl Prefixed {
    pub fn new(inner: Arc<dyn ObjectStore>, prefix: impl Into<Path>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    fn full_path(&self, location: &Path) -> Path {
        Path::from_iter(self.prefix.parts().chain(location.parts()))
    }

    fn strip_prefix(&self, path: Path) -> Path {
        if let Some(parts) = path.prefix_match(&self.prefix) {
            return Path::from_iter(parts);
        }
        path
    }

    fn strip_meta(&self, mut meta: ObjectMeta) -> ObjectMeta {
        meta.location = self.strip_prefix(meta.location);
        meta
    }
}

impl fmt::Display for Prefixed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefixed({}, {})", self.prefix, self.inner)
    }
}

#[async_trait]
impl ObjectStore for Prefixed {
    async fn put_opts(
        &self,
        location: &Path,
        bytes: Bytes,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        self.inner.put_opts(&self.full_path(location), bytes, opts).await
    }

    async fn put_multipart(
        &self,
        location: &Path,
    ) -> object_store::Result<(MultipartId, Box<dyn AsyncWrite + Unpin + Send>)> {
        self.inner.put_multipart(&self.full_path(location)).await
    }

    async fn abort_multipart(
        &self,
        location: &Path,
        multipart_id: &MultipartId,
    ) -> object_store::Result<()> {
        self.inner
            .abort_multipart(&self.full_path(location), multipart_id)
            .await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        let mut result = self.inner.get_opts(&self.full_path(location), options).await?;
        result.meta = self.strip_meta(result.meta);
        Ok(result)
    }

    async fn head(&self, location: &Path) -> object_store::Result<ObjectMeta> {
        let meta = self.inner.head(&self.full_path(location)).await?;
        Ok(self.strip_meta(meta))
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.inner.delete(&self.full_path(location)).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        let full = match prefix {
            Some(p) => self.full_path(p),
            None => self.prefix.clone(),
        };
        self.inner
            .list(Some(&full))
            .map_ok(|meta| self.strip_meta(meta))
            .boxed()
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&Path>,
    ) -> object_store::Result<ListResult> {
        let full = match prefix {
            Some(p) => self.full_path(p),
            None => self.prefix.clone(),
        };
        let mut result = self.inner.list_with_delimiter(Some(&full)).await?;
        result.common_prefixes = result
            .common_prefixes
            .into_iter()
            .map(|p| self.strip_prefix(p))
            .collect();
        result.objects = result
            .objects
            .into_iter()
            .map(|meta| self.strip_meta(meta))
            .collect();
        Ok(result)
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner
            .copy(&self.full_path(from), &self.full_path(to))
            .await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.inner
            .copy_if_not_exists(&self.full_path(from), &self.full_path(to))
            .await
    }
}

// ---------------------------------------------------------------------------
// CachedStore
// ---------------------------------------------------------------------------

/// A two-tier store: reads prefer `cache` and fall back to `remote`,
/// populating the cache; writes go through to both.
#[derive(Debug)]
pub struct CachedStore {
    remote: Arc<dyn ObjectStore>,
    cache: Arc<dyn ObjectStore>,
}

impl CachedStore {
    pub fn new(remote: Arc<dyn ObjectStore>, cache: Arc<dyn ObjectStore>) -> Self {
        Self { remote, cache }
    }

    async fn populate_cache(&self, location: &Path, bytes: &Bytes) {
        if let Err(err) = self.cache.put(location, bytes.clone()).await {
            tracing::warn!(path = %location, error = %err, "failed to populate read cache");
        }
    }
}

impl fmt::Display for CachedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CachedStore({} over {})", self.cache, self.remote)
    }
}

fn is_plain_get(options: &GetOptions) -> bool {
    options.if_match.is_none()
        && options.if_none_match.is_none()
        && options.if_modified_since.is_none()
        && options.if_unmodified_since.is_none()
        && options.range.is_none()
        && options.version.is_none()
        && !options.head
}

#[async_trait]
impl ObjectStore for CachedStore {
    async fn put_opts(
        &self,
        location: &Path,
        bytes: Bytes,
        opts: PutOptions,
    ) -> object_store::Result<PutResult> {
        let result = self
            .remote
            .put_opts(location, bytes.clone(), opts)
            .await?;
        self.populate_cache(location, &bytes).await;
        Ok(result)
    }

    async fn put_multipart(
        &self,
        location: &Path,
    ) -> object_store::Result<(MultipartId, Box<dyn AsyncWrite + Unpin + Send>)> {
        self.remote.put_multipart(location).await
    }

    async fn abort_multipart(
        &self,
        location: &Path,
        multipart_id: &MultipartId,
    ) -> object_store::Result<()> {
        self.remote.abort_multipart(location, multipart_id).await
    }

    async fn get_opts(
        &self,
        location: &Path,
        options: GetOptions,
    ) -> object_store::Result<GetResult> {
        // Conditional or ranged reads bypass the cache.
        if !is_plain_get(&options) {
            return self.remote.get_opts(location, options).await;
        }

        match self.cache.get(location).await {
            Ok(hit) => {
                tracing::debug!(path = %location, "segment cache hit");
                return Ok(hit);
            }
            Err(object_store::Error::NotFound { .. }) => {}
            Err(err) => {
                tracing::warn!(path = %location, error = %err, "cache read failed, going remote");
            }
        }

        let result = self.remote.get_opts(location, options).await?;
        let meta = result.meta.clone();
        let range: Range<usize> = result.range.clone();
        let bytes = result.bytes().await?;
        self.populate_cache(location, &bytes).await;

        Ok(GetResult {
            payload: GetResultPayload::Stream(
                futures::stream::once(async move { Ok(bytes) }).boxed(),
            ),
            meta,
            range,
        })
    }

    async fn head(&self, location: &Path) -> object_store::Result<ObjectMeta> {
        self.remote.head(location).await
    }

    async fn delete(&self, location: &Path) -> object_store::Result<()> {
        self.remote.delete(location).await?;
        if let Err(err) = self.cache.delete(location).await {
            if !matches!(err, object_store::Error::NotFound { .. }) {
                tracing::warn!(path = %location, error = %err, "failed to evict cached object");
            }
        }
        Ok(())
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
        self.remote.list(prefix)
    }

    async fn list_with_delimiter(
        &self,
        prefix: Option<&Path>,
    ) -> object_store::Result<ListResult> {
        self.remote.list_with_delimiter(prefix).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.remote.copy(from, to).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
        self.remote.copy_if_not_exists(from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn memory() -> Arc<dyn ObjectStore> {
        Arc::new(InMemory::new())
    }

    #[tokio::test]
    async fn test_prefixed_roundtrip() {
        let base = memory();
        let prefixed = Prefixed::new(Arc::clone(&base), "data/v1");

        prefixed
            .put(&Path::from("a/b.bin"), Bytes::from_static(b"hello"))
            .await
            .unwrap();

        // visible at the composed path on the base store
        let raw = base
            .get(&Path::from("data/v1/a/b.bin"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(raw, Bytes::from_static(b"hello"));

        // and at the relative path through the wrapper
        let through = prefixed
            .get(&Path::from("a/b.bin"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(through, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn test_prefixed_list_strips_prefix() {
        let base = memory();
        let prefixed = Prefixed::new(Arc::clone(&base), "ds");
        prefixed
            .put(&Path::from("one.bin"), Bytes::from_static(b"1"))
            .await
            .unwrap();
        prefixed
            .put(&Path::from("sub/two.bin"), Bytes::from_static(b"2"))
            .await
            .unwrap();

        let mut names: Vec<String> = prefixed
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["one.bin".to_string(), "sub/two.bin".to_string()]);
    }

    #[tokio::test]
    async fn test_prefixed_not_found_is_typed() {
        let prefixed = Prefixed::new(memory(), "ds");
        let err = prefixed.get(&Path::from("missing")).await.unwrap_err();
        assert!(matches!(err, object_store::Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_cached_store_populates_on_read() {
        let remote = memory();
        let cache = memory();
        let store = CachedStore::new(Arc::clone(&remote), Arc::clone(&cache));

        remote
            .put(&Path::from("seg"), Bytes::from_static(b"payload"))
            .await
            .unwrap();

        let got = store
            .get(&Path::from("seg"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(got, Bytes::from_static(b"payload"));

        // the cache tier now holds a copy
        let cached = cache
            .get(&Path::from("seg"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(cached, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn test_cached_store_serves_from_cache_after_remote_delete() {
        let remote = memory();
        let cache = memory();
        let store = CachedStore::new(Arc::clone(&remote), Arc::clone(&cache));

        store
            .put(&Path::from("seg"), Bytes::from_static(b"x"))
            .await
            .unwrap();
        // drop the remote copy behind the wrapper's back
        remote.delete(&Path::from("seg")).await.unwrap();

        let got = store
            .get(&Path::from("seg"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(got, Bytes::from_static(b"x"));
    }
}
