//! [`ObjectStore`] over Amazon S3.

use std::ops::Range;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use bytes::Bytes;
use tracing::{debug, trace};
use zipdrop_core::error::StoreError;
use zipdrop_core::store::{DeleteFailure, ListPage, ObjectBody, ObjectInfo, ObjectStore, PutResult};

use crate::body::EntryBody;

/// S3 client wrapper implementing [`ObjectStore`].
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    /// Wrap an already configured client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Object an S3 call was about.
#[derive(Debug, Clone, Copy)]
struct Subject<'a> {
    bucket: &'a str,
    key: Option<&'a str>,
    version_id: Option<&'a str>,
}

impl<'a> Subject<'a> {
    fn bucket(bucket: &'a str) -> Self {
        Self {
            bucket,
            key: None,
            version_id: None,
        }
    }

    fn object(bucket: &'a str, key: &'a str, version_id: Option<&'a str>) -> Self {
        Self {
            bucket,
            key: Some(key),
            version_id,
        }
    }
}

/// Map an S3 error code and HTTP status onto [`StoreError`].
///
/// HEAD requests carry no error body, so the status code is the only signal
/// there.
fn classify(code: Option<&str>, status: Option<u16>, subject: Subject<'_>, message: String) -> StoreError {
    let not_found = || match (subject.key, subject.version_id) {
        (Some(key), Some(version_id)) => StoreError::NoSuchVersion {
            bucket: subject.bucket.to_owned(),
            key: key.to_owned(),
            version_id: version_id.to_owned(),
        },
        (Some(key), None) => StoreError::NoSuchKey {
            bucket: subject.bucket.to_owned(),
            key: key.to_owned(),
        },
        (None, _) => StoreError::NoSuchBucket {
            bucket: subject.bucket.to_owned(),
        },
    };

    match (code, status) {
        (Some("NoSuchBucket"), _) => StoreError::NoSuchBucket {
            bucket: subject.bucket.to_owned(),
        },
        (Some("NoSuchKey" | "NoSuchVersion" | "NotFound"), _) | (None, Some(404)) => not_found(),
        (Some("AccessDenied" | "Forbidden" | "AllAccessDisabled"), _) | (None, Some(403)) => {
            StoreError::AccessDenied { message }
        }
        _ => StoreError::Internal(anyhow::anyhow!(message)),
    }
}

fn store_error<E>(err: &SdkError<E, HttpResponse>, subject: Subject<'_>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let message = DisplayErrorContext(err).to_string();
    classify(err.code(), status, subject, message)
}

fn to_u64(value: Option<i64>) -> u64 {
    value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn head_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| store_error(&e, Subject::bucket(bucket)))?;
        Ok(())
    }

    async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectInfo, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(ToOwned::to_owned))
            .send()
            .await
            .map_err(|e| store_error(&e, Subject::object(bucket, key, version_id)))?;
        Ok(ObjectInfo {
            size: to_u64(output.content_length()),
            version_id: output.version_id().map(ToOwned::to_owned),
        })
    }

    async fn get_range(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        range: Range<u64>,
    ) -> Result<Bytes, StoreError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let header = format!("bytes={}-{}", range.start, range.end - 1);
        trace!(bucket, key, range = %header, "ranged read");
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .set_version_id(version_id.map(ToOwned::to_owned))
            .range(header)
            .send()
            .await
            .map_err(|e| store_error(&e, Subject::object(bucket, key, version_id)))?;
        let data = output.body.collect().await.map_err(|e| {
            StoreError::Internal(anyhow::anyhow!(
                "failed to read s3://{bucket}/{key} body: {e}"
            ))
        })?;
        Ok(data.into_bytes())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        content_type: &str,
    ) -> Result<PutResult, StoreError> {
        let size = body.len();
        let stream = match body {
            ObjectBody::Full(data) => ByteStream::from(data),
            ObjectBody::Streaming { len, chunks } => {
                ByteStream::from_body_1_x(EntryBody::new(chunks, len))
            }
        };
        let content_length = i64::try_from(size).map_err(|_| {
            StoreError::Internal(anyhow::anyhow!("object of {size} bytes is too large"))
        })?;

        let output = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .content_length(content_length)
            .body(stream)
            .send()
            .await
            .map_err(|e| store_error(&e, Subject::object(bucket, key, None)))?;
        debug!(bucket, key, size, "put object");
        Ok(PutResult {
            etag: output.e_tag().map(ToOwned::to_owned),
            size,
        })
    }

    async fn list_keys(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_prefix(prefix.map(ToOwned::to_owned))
            .set_continuation_token(continuation_token.map(ToOwned::to_owned))
            .send()
            .await
            .map_err(|e| store_error(&e, Subject::bucket(bucket)))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key().map(ToOwned::to_owned))
            .collect();
        let next_continuation_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(ToOwned::to_owned)
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
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let objects = keys
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Internal(e.into()))?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .quiet(true)
            .build()
            .map_err(|e| StoreError::Internal(e.into()))?;

        let output = self
            .client
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| store_error(&e, Subject::bucket(bucket)))?;

        let failures = output
            .errors()
            .iter()
            .map(|error| DeleteFailure {
                key: error.key().unwrap_or_default().to_owned(),
                message: format!(
                    "{}: {}",
                    error.code().unwrap_or("Unknown"),
                    error.message().unwrap_or_default()
                ),
            })
            .collect();
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_classify_missing_objects() {
        let object = Subject::object("b", "k", None);
        assert!(matches!(
            classify(Some("NoSuchKey"), Some(404), object, String::new()),
            StoreError::NoSuchKey { .. }
        ));
        assert!(matches!(
            classify(None, Some(404), object, String::new()),
            StoreError::NoSuchKey { .. }
        ));

        let versioned = Subject::object("b", "k", Some("v1"));
        assert!(matches!(
            classify(None, Some(404), versioned, String::new()),
            StoreError::NoSuchVersion { .. }
        ));
    }

    #[test]
    fn test_should_classify_missing_bucket() {
        let object = Subject::object("b", "k", None);
        assert!(matches!(
            classify(Some("NoSuchBucket"), Some(404), object, String::new()),
            StoreError::NoSuchBucket { .. }
        ));
        assert!(matches!(
            classify(None, Some(404), Subject::bucket("b"), String::new()),
            StoreError::NoSuchBucket { .. }
        ));
    }

    #[test]
    fn test_should_classify_denied_and_unknown_errors() {
        let bucket = Subject::bucket("b");
        assert!(matches!(
            classify(Some("AccessDenied"), Some(403), bucket, "denied".to_owned()),
            StoreError::AccessDenied { .. }
        ));
        assert!(matches!(
            classify(None, Some(403), bucket, String::new()),
            StoreError::AccessDenied { .. }
        ));
        let err = classify(Some("SlowDown"), Some(503), bucket, "slow down".to_owned());
        assert!(matches!(err, StoreError::Internal(_)));
        assert!(!err.is_not_found());
    }
}
