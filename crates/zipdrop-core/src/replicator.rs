//! Writes archive entries to the destination bucket.

use std::sync::Arc;

use tracing::debug;

use crate::archive::ArchiveEntry;
use crate::error::StoreError;
use crate::store::{ObjectStore, PutResult};
use crate::utils::content_type_for;

/// Writes one entry per call, overwriting whatever lives at the key.
#[derive(Debug, Clone)]
pub struct ObjectReplicator {
    store: Arc<dyn ObjectStore>,
}

impl ObjectReplicator {
    /// Create a replicator writing through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Write `entry` to `s3://bucket/key`.
    ///
    /// The content type is derived from the entry path. Streamed entries are
    /// uploaded while the archive decoder is still producing them.
    pub async fn write(
        &self,
        bucket: &str,
        key: &str,
        entry: ArchiveEntry,
    ) -> Result<PutResult, StoreError> {
        let content_type = content_type_for(&entry.path);
        let body = entry.into_body();
        let result = self
            .store
            .put_object(bucket, key, body, content_type)
            .await?;
        debug!(bucket, key, size = result.size, content_type, "wrote object");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::mpsc;

    use super::*;
    use crate::archive::EntryContent;
    use crate::memory::InMemoryObjectStore;

    fn inline(path: &str, data: &'static [u8]) -> ArchiveEntry {
        ArchiveEntry {
            path: path.to_owned(),
            size: data.len() as u64,
            is_dir: false,
            content: EntryContent::Inline(Bytes::from_static(data)),
        }
    }

    #[tokio::test]
    async fn test_should_write_with_content_type() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("site");
        let replicator = ObjectReplicator::new(Arc::clone(&store) as Arc<dyn ObjectStore>);

        let result = replicator
            .write("site", "css/app.css", inline("css/app.css", b"body{}"))
            .await
            .unwrap();
        assert_eq!(result.size, 6);

        let object = store.object("site", "css/app.css").unwrap();
        assert_eq!(object.data.as_ref(), b"body{}");
        assert_eq!(object.content_type, "text/css");
    }

    #[tokio::test]
    async fn test_should_overwrite_existing_object() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.insert("site", "index.html", "old");
        let replicator = ObjectReplicator::new(Arc::clone(&store) as Arc<dyn ObjectStore>);

        replicator
            .write("site", "index.html", inline("index.html", b"new"))
            .await
            .unwrap();
        assert_eq!(store.object("site", "index.html").unwrap().data.as_ref(), b"new");
    }

    #[tokio::test]
    async fn test_should_write_streamed_entry() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("site");
        let replicator = ObjectReplicator::new(Arc::clone(&store) as Arc<dyn ObjectStore>);

        let (tx, rx) = mpsc::channel(2);
        let producer = tokio::spawn(async move {
            for chunk in [&b"ab"[..], b"cd", b"ef"] {
                tx.send(Ok(Bytes::from_static(chunk))).await.unwrap();
            }
        });
        let entry = ArchiveEntry {
            path: "blob.bin".to_owned(),
            size: 6,
            is_dir: false,
            content: EntryContent::Streamed(rx),
        };
        replicator.write("site", "blob.bin", entry).await.unwrap();
        producer.await.unwrap();

        let object = store.object("site", "blob.bin").unwrap();
        assert_eq!(object.data.as_ref(), b"abcdef");
        assert_eq!(object.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_should_surface_store_failure() {
        let store = Arc::new(InMemoryObjectStore::new());
        store.create_bucket("site");
        store.fail_puts_for("site", "a.txt");
        let replicator = ObjectReplicator::new(Arc::clone(&store) as Arc<dyn ObjectStore>);

        let err = replicator
            .write("site", "a.txt", inline("a.txt", b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied { .. }));
        assert!(store.object("site", "a.txt").is_none());
    }
}
