//! In-memory object store.
//!
//! [`InMemoryObjectStore`] implements [`ObjectStore`] on top of a [`DashMap`]
//! bucket table, each bucket holding a `parking_lot::RwLock`-guarded ordered
//! map of keys to their version history. It backs the engine's tests and
//! local dry runs, and can inject failures on chosen keys to exercise the
//! best-effort paths.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use md5::{Digest, Md5};
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::credentials::AssumedCredentials;
use crate::error::StoreError;
use crate::store::{
    DeleteFailure, ListPage, ObjectBody, ObjectInfo, ObjectStore, PutResult, StoreFactory,
};
use crate::types::AccountId;

/// Default number of keys returned per listing page.
const DEFAULT_PAGE_SIZE: usize = 1000;

/// One stored version of an object.
#[derive(Debug, Clone)]
pub struct StoredObject {
    /// Version ID.
    pub version_id: String,
    /// Object content.
    pub data: Bytes,
    /// Content type recorded at write time.
    pub content_type: String,
    /// Quoted hex MD5.
    pub etag: String,
}

#[derive(Debug, Default)]
struct MemoryBucket {
    /// Version history per key, oldest first.
    objects: RwLock<BTreeMap<String, Vec<StoredObject>>>,
}

/// Thread-safe in-memory object store.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use zipdrop_core::memory::InMemoryObjectStore;
/// use zipdrop_core::store::{ObjectBody, ObjectStore};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryObjectStore::new();
/// store.create_bucket("site");
/// store
///     .put_object("site", "index.html", ObjectBody::Full(Bytes::from("<h1>hi</h1>")), "text/html")
///     .await
///     .unwrap();
/// assert_eq!(store.keys("site"), vec!["index.html".to_owned()]);
/// # });
/// ```
#[derive(Debug)]
pub struct InMemoryObjectStore {
    buckets: DashMap<String, Arc<MemoryBucket>>,
    page_size: usize,
    failing_puts: DashSet<(String, String)>,
    failing_deletes: DashSet<(String, String)>,
    unreachable_buckets: DashSet<String>,
    range_reads: AtomicUsize,
    largest_range: AtomicUsize,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Create an empty store that lists at most `page_size` keys per page.
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            buckets: DashMap::new(),
            page_size: page_size.max(1),
            failing_puts: DashSet::new(),
            failing_deletes: DashSet::new(),
            unreachable_buckets: DashSet::new(),
            range_reads: AtomicUsize::new(0),
            largest_range: AtomicUsize::new(0),
        }
    }

    /// Create a bucket if it does not exist yet.
    pub fn create_bucket(&self, bucket: &str) {
        self.buckets.entry(bucket.to_owned()).or_default();
    }

    /// Store `data` under `key` and return the new version ID.
    ///
    /// Creates the bucket on demand. Test fixtures use this to seed sources
    /// and stale destination content.
    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> String {
        self.create_bucket(bucket);
        self.store(bucket, key, data.into(), "application/octet-stream")
    }

    /// Make every write of `key` in `bucket` fail.
    pub fn fail_puts_for(&self, bucket: &str, key: &str) {
        self.failing_puts.insert((bucket.to_owned(), key.to_owned()));
    }

    /// Make every deletion of `key` in `bucket` fail.
    pub fn fail_deletes_for(&self, bucket: &str, key: &str) {
        self.failing_deletes
            .insert((bucket.to_owned(), key.to_owned()));
    }

    /// Make `head_bucket` fail for `bucket` until [`Self::restore_bucket`].
    pub fn make_unreachable(&self, bucket: &str) {
        self.unreachable_buckets.insert(bucket.to_owned());
    }

    /// Undo [`Self::make_unreachable`].
    pub fn restore_bucket(&self, bucket: &str) {
        self.unreachable_buckets.remove(bucket);
    }

    /// Sorted live keys of a bucket (empty when the bucket does not exist).
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.buckets
            .get(bucket)
            .map(|b| b.objects.read().keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest version of an object.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        let bucket = self.buckets.get(bucket)?;
        let objects = bucket.objects.read();
        objects.get(key).and_then(|versions| versions.last().cloned())
    }

    /// Number of ranged reads served so far.
    #[must_use]
    pub fn range_reads(&self) -> usize {
        self.range_reads.load(Ordering::SeqCst)
    }

    /// Largest single ranged read served so far, in bytes.
    #[must_use]
    pub fn largest_range(&self) -> usize {
        self.largest_range.load(Ordering::SeqCst)
    }

    fn bucket(&self, bucket: &str) -> Result<Arc<MemoryBucket>, StoreError> {
        self.buckets
            .get(bucket)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| StoreError::NoSuchBucket {
                bucket: bucket.to_owned(),
            })
    }

    fn store(&self, bucket: &str, key: &str, data: Bytes, content_type: &str) -> String {
        let version_id = uuid::Uuid::new_v4().simple().to_string();
        let etag = format!("\"{}\"", hex::encode(Md5::digest(&data)));
        let object = StoredObject {
            version_id: version_id.clone(),
            data,
            content_type: content_type.to_owned(),
            etag,
        };
        if let Some(b) = self.buckets.get(bucket) {
            b.objects
                .write()
                .entry(key.to_owned())
                .or_default()
                .push(object);
        }
        version_id
    }

    fn find(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<StoredObject, StoreError> {
        let b = self.bucket(bucket)?;
        let objects = b.objects.read();
        let versions = objects.get(key).ok_or_else(|| StoreError::NoSuchKey {
            bucket: bucket.to_owned(),
            key: key.to_owned(),
        })?;
        match version_id {
            None => versions.last().cloned().ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.to_owned(),
                key: key.to_owned(),
            }),
            Some(v) => versions
                .iter()
                .find(|o| o.version_id == v)
                .cloned()
                .ok_or_else(|| StoreError::NoSuchVersion {
                    bucket: bucket.to_owned(),
                    key: key.to_owned(),
                    version_id: v.to_owned(),
                }),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        if self.unreachable_buckets.contains(bucket) {
            return Err(StoreError::AccessDenied {
                message: format!("bucket {bucket} is not reachable"),
            });
        }
        self.bucket(bucket).map(|_| ())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, StoreError> {
        let object = self.find(bucket, key, version_id)?;
        Ok(ObjectInfo {
            size: object.data.len() as u64,
            version_id: Some(object.version_id),
        })
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        range: Range<u64>,
    ) -> Result<Bytes, StoreError> {
        let object = self.find(bucket, key, version_id)?;
        let len = object.data.len();
        let start = usize::try_from(range.start).unwrap_or(usize::MAX).min(len);
        let end = usize::try_from(range.end).unwrap_or(usize::MAX).min(len);
        if start > end {
            return Err(StoreError::Internal(anyhow::anyhow!(
                "invalid range {}..{} for object of {len} bytes",
                range.start,
                range.end
            )));
        }
        self.range_reads.fetch_add(1, Ordering::SeqCst);
        self.largest_range.fetch_max(end - start, Ordering::SeqCst);
        trace!(bucket, key, start, end, "served ranged read");
        Ok(object.data.slice(start..end))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<PutResult, StoreError> {
        self.bucket(bucket)?;
        if self
            .failing_puts
            .contains(&(bucket.to_owned(), key.to_owned()))
        {
            return Err(StoreError::AccessDenied {
                message: format!("writes to {key} are denied"),
            });
        }

        let data = body
            .collect()
            .await
            .map_err(|e| StoreError::Internal(anyhow::anyhow!("failed to read body: {e}")))?;
        let size = data.len() as u64;
        self.store(bucket, key, data, content_type);
        let etag = self.object(bucket, key).map(|o| o.etag);

        trace!(bucket, key, size, "stored object");
        Ok(PutResult { etag, size })
    }

    async fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let b = self.bucket(bucket)?;
        let objects = b.objects.read();
        let prefix = prefix.unwrap_or("");

        let mut keys: Vec<String> = objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .filter(|k| continuation_token.is_none_or(|after| k.as_str() > after))
            .take(self.page_size + 1)
            .cloned()
            .collect();

        let next_continuation_token = if keys.len() > self.page_size {
            keys.truncate(self.page_size);
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys,
            next_continuation_token,
        })
    }

    async fn delete_keys(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, StoreError> {
        let b = self.bucket(bucket)?;
        let mut objects = b.objects.write();
        let mut failures = Vec::new();
        for key in keys {
            if self
                .failing_deletes
                .contains(&(bucket.to_owned(), key.clone()))
            {
                failures.push(DeleteFailure {
                    key: key.clone(),
                    message: "AccessDenied".to_owned(),
                });
                continue;
            }
            objects.remove(key);
        }
        Ok(failures)
    }
}

/// [`StoreFactory`] handing out one shared [`InMemoryObjectStore`].
///
/// Records the account of every credential set it was asked to bind, so
/// tests can check which accounts a run acted as.
#[derive(Debug)]
pub struct SharedStoreFactory {
    store: Arc<InMemoryObjectStore>,
    bound_accounts: Mutex<Vec<AccountId>>,
}

impl SharedStoreFactory {
    /// Wrap `store`.
    #[must_use]
    pub fn new(store: Arc<InMemoryObjectStore>) -> Self {
        Self {
            store,
            bound_accounts: Mutex::new(Vec::new()),
        }
    }

    /// Accounts of all credentials passed to [`StoreFactory::target_store`].
    #[must_use]
    pub fn bound_accounts(&self) -> Vec<AccountId> {
        self.bound_accounts.lock().clone()
    }
}

impl StoreFactory for SharedStoreFactory {
    fn target_store(&self, credentials: &AssumedCredentials) -> Arc<dyn ObjectStore> {
        self.bound_accounts
            .lock()
            .push(credentials.account_id().clone());
        Arc::clone(&self.store) as Arc<dyn ObjectStore>
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_should_put_and_read_range() {
        let store = InMemoryObjectStore::new();
        store.create_bucket("b");
        store
            .put_object("b", "k", ObjectBody::Full(Bytes::from("0123456789")), "text/plain")
            .await
            .unwrap();

        let data = store.get_range("b", "k", None, 2..6).await.unwrap();
        assert_eq!(data.as_ref(), b"2345");
        assert_eq!(store.range_reads(), 1);
        assert_eq!(store.largest_range(), 4);
        assert_eq!(store.object("b", "k").unwrap().content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_should_read_pinned_version() {
        let store = InMemoryObjectStore::new();
        let v1 = store.insert("b", "k", "first");
        store.insert("b", "k", "second");

        let latest = store.head_object("b", "k", None).await.unwrap();
        assert_eq!(latest.size, 6);
        let pinned = store.get_range("b", "k", Some(&v1), 0..5).await.unwrap();
        assert_eq!(pinned.as_ref(), b"first");

        let err = store.head_object("b", "k", Some("nope")).await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchVersion { .. }));
    }

    #[tokio::test]
    async fn test_should_report_missing_bucket_and_key() {
        let store = InMemoryObjectStore::new();
        assert!(matches!(
            store.head_object("nope", "k", None).await,
            Err(StoreError::NoSuchBucket { .. })
        ));
        store.create_bucket("b");
        assert!(matches!(
            store.head_object("b", "k", None).await,
            Err(StoreError::NoSuchKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_should_paginate_listing() {
        let store = InMemoryObjectStore::with_page_size(2);
        for key in ["a", "b", "c", "d", "e"] {
            store.insert("b", key, "x");
        }

        let mut token: Option<String> = None;
        let mut all = Vec::new();
        let mut pages = 0;
        loop {
            let page = store.list_keys("b", None, token.as_deref()).await.unwrap();
            pages += 1;
            all.extend(page.keys);
            match page.next_continuation_token {
                Some(t) => token = Some(t),
                None => break,
            }
        }
        assert_eq!(all, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(pages, 3);
    }

    #[tokio::test]
    async fn test_should_filter_listing_by_prefix() {
        let store = InMemoryObjectStore::new();
        store.insert("b", "site/a", "x");
        store.insert("b", "site/b", "x");
        store.insert("b", "other", "x");

        let page = store.list_keys("b", Some("site/"), None).await.unwrap();
        assert_eq!(page.keys, vec!["site/a", "site/b"]);
        assert!(page.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn test_should_inject_failures() {
        let store = InMemoryObjectStore::new();
        store.insert("b", "keep", "x");
        store.insert("b", "gone", "x");
        store.fail_puts_for("b", "blocked");
        store.fail_deletes_for("b", "keep");

        let put = store
            .put_object("b", "blocked", ObjectBody::Full(Bytes::new()), "text/plain")
            .await;
        assert!(matches!(put, Err(StoreError::AccessDenied { .. })));

        let failures = store
            .delete_keys("b", &["keep".to_owned(), "gone".to_owned()])
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key, "keep");
        assert_eq!(store.keys("b"), vec!["keep"]);

        store.make_unreachable("b");
        assert!(store.head_bucket("b").await.is_err());
        store.restore_bucket("b");
        assert!(store.head_bucket("b").await.is_ok());
    }
}
