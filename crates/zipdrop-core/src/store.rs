//! Object store abstraction.
//!
//! The engine never talks to a storage service directly. Source archives are
//! read through the [`ObjectStore`] handed to the orchestrator at start-up,
//! and every destination store is minted by a [`StoreFactory`] from an
//! explicit [`AssumedCredentials`] value. There is no ambient credential
//! state anywhere in the engine.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::credentials::AssumedCredentials;
use crate::error::StoreError;

/// Metadata of an existing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object size in bytes.
    pub size: u64,
    /// Version ID, when the bucket is versioned.
    pub version_id: Option<String>,
}

/// Result of a successful object write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    /// ETag reported by the store.
    pub etag: Option<String>,
    /// Number of bytes written.
    pub size: u64,
}

/// One page of a key listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in this page.
    pub keys: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next_continuation_token: Option<String>,
}

/// A key the store refused to delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    /// Key that is still present.
    pub key: String,
    /// Reason reported by the store.
    pub message: String,
}

/// Request body of an object write.
#[derive(Debug)]
pub enum ObjectBody {
    /// Fully buffered content.
    Full(Bytes),
    /// Content produced incrementally with a length known up front.
    Streaming {
        /// Exact number of bytes the stream yields.
        len: u64,
        /// Content chunks, terminated by channel close.
        chunks: mpsc::Receiver<std::io::Result<Bytes>>,
    },
}

impl ObjectBody {
    /// Declared length of the body.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Full(data) => data.len() as u64,
            Self::Streaming { len, .. } => *len,
        }
    }

    /// Whether the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the body into memory, checking it matches the declared length.
    pub async fn collect(self) -> std::io::Result<Bytes> {
        match self {
            Self::Full(data) => Ok(data),
            Self::Streaming { len, mut chunks } => {
                let capacity = usize::try_from(len).unwrap_or(usize::MAX);
                let mut buf = BytesMut::with_capacity(capacity);
                while let Some(chunk) = chunks.recv().await {
                    buf.extend_from_slice(&chunk?);
                }
                if buf.len() as u64 != len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        format!("body ended after {} of {len} bytes", buf.len()),
                    ));
                }
                Ok(buf.freeze())
            }
        }
    }
}

/// Minimal object-store surface the engine needs.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Check that the bucket exists and is reachable with these credentials.
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError>;

    /// Fetch object metadata, optionally for a pinned version.
    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, StoreError>;

    /// Read the half-open byte range `range` of an object.
    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        range: Range<u64>,
    ) -> Result<Bytes, StoreError>;

    /// Create or overwrite an object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<PutResult, StoreError>;

    /// List one page of keys, optionally restricted to `prefix`.
    async fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError>;

    /// Delete up to 1000 keys; returns the keys that could not be deleted.
    async fn delete_keys(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<Vec<DeleteFailure>, StoreError>;
}

/// Builds destination stores bound to assumed credentials.
pub trait StoreFactory: Send + Sync + std::fmt::Debug {
    /// Create a store that acts with exactly `credentials`.
    fn target_store(&self, credentials: &AssumedCredentials) -> Arc<dyn ObjectStore>;
}
