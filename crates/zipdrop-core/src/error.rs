//! Error types for the zipdrop engine.
//!
//! Only [`InvocationError`] ever escapes the orchestrator. Everything else is
//! scoped to a job or an entry and ends up as an
//! [`ErrorRecord`](crate::outcome::ErrorRecord) inside the report.

use crate::types::AccountId;

/// Failures reported by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The bucket does not exist.
    #[error("The specified bucket does not exist: {bucket}")]
    NoSuchBucket {
        /// The bucket name that was not found.
        bucket: String,
    },

    /// The key does not exist.
    #[error("The specified key does not exist: s3://{bucket}/{key}")]
    NoSuchKey {
        /// Bucket that was searched.
        bucket: String,
        /// The key that was not found.
        key: String,
    },

    /// The requested version of the key does not exist.
    #[error("The specified version does not exist: s3://{bucket}/{key}?versionId={version_id}")]
    NoSuchVersion {
        /// Bucket that was searched.
        bucket: String,
        /// The key for the version.
        key: String,
        /// The version ID that was not found.
        version_id: String,
    },

    /// The credentials in use are not allowed to perform the call.
    #[error("Access Denied: {message}")]
    AccessDenied {
        /// Message returned by the store.
        message: String,
    },

    /// Internal error with context.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl StoreError {
    /// Whether the error means the addressed bucket, key or version is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchBucket { .. } | Self::NoSuchKey { .. } | Self::NoSuchVersion { .. }
        )
    }
}

/// Failures opening or walking a source archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The source object (or the pinned version) does not exist.
    #[error("source archive not found: {0}")]
    NotFound(#[source] StoreError),

    /// The source object is not a readable ZIP archive.
    #[error("invalid ZIP archive: {message}")]
    Format {
        /// What the ZIP decoder rejected.
        message: String,
    },

    /// A single entry could not be decoded.
    #[error("corrupted archive entry #{index} ({path}): {message}")]
    Entry {
        /// Position of the entry in the central directory.
        index: usize,
        /// Entry path, when the header could be read.
        path: String,
        /// What the ZIP decoder rejected.
        message: String,
    },

    /// Reading the source object failed for a reason other than absence.
    #[error("failed to read source archive: {0}")]
    Store(#[source] StoreError),

    /// The background reader stopped unexpectedly.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ArchiveError {
    fn from(err: StoreError) -> Self {
        if err.is_not_found() {
            Self::NotFound(err)
        } else {
            Self::Store(err)
        }
    }
}

impl From<zip::result::ZipError> for ArchiveError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Format {
            message: err.to_string(),
        }
    }
}

/// The caller may not obtain credentials for the requested account.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// The invocation alias belongs to a different account than requested.
    #[error("invoked by account '{caller}' but asked to assume a role in account '{requested}'")]
    CallerMismatch {
        /// Account bound to the invocation alias.
        caller: String,
        /// Account named in the payload.
        requested: AccountId,
    },

    /// The identity service refused to issue credentials for the role.
    #[error("not authorized to assume role '{role_arn}': {message}")]
    Denied {
        /// Role that was requested.
        role_arn: String,
        /// Message returned by the identity service.
        message: String,
    },

    /// Credentials issued for one account were about to be used for another.
    #[error("credentials issued for account '{issued_for}' cannot be used for account '{requested}'")]
    ScopeMismatch {
        /// Account the credentials belong to.
        issued_for: AccountId,
        /// Account they were about to be used for.
        requested: AccountId,
    },
}

/// Failure reported by a [`CredentialIssuer`](crate::credentials::CredentialIssuer).
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    /// The request was understood and refused.
    #[error("{0}")]
    Denied(String),

    /// The request may succeed if retried.
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

/// Failure of [`CredentialResolver::resolve`](crate::credentials::CredentialResolver::resolve).
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The caller is not allowed to assume the role.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Credential issuance kept failing for transient reasons.
    #[error("could not assume role '{role_arn}' after {attempts} attempts: {source}")]
    Unavailable {
        /// Role that was requested.
        role_arn: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last failure.
        #[source]
        source: anyhow::Error,
    },
}

/// Invocation-level failure: nothing ran.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// Invalid AWS account ID format.
    #[error("invalid AWS account ID: {0} (must be 12-digit numeric string)")]
    InvalidAccountId(String),

    /// The payload could not be parsed or is missing required values.
    #[error("invalid invocation request: {0}")]
    InvalidRequest(String),

    /// The caller may not act on the requested account.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
}

impl InvocationError {
    /// Stable machine-readable error kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAccountId(_) | Self::InvalidRequest(_) => "invalid_request",
            Self::Authorization(_) => "authorization",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_classify_missing_source_as_not_found() {
        let err = ArchiveError::from(StoreError::NoSuchKey {
            bucket: "src".to_owned(),
            key: "site.zip".to_owned(),
        });
        assert!(matches!(err, ArchiveError::NotFound(_)));
        assert!(err.to_string().contains("s3://src/site.zip"));
    }

    #[test]
    fn test_should_classify_denied_read_as_store_error() {
        let err = ArchiveError::from(StoreError::AccessDenied {
            message: "nope".to_owned(),
        });
        assert!(matches!(err, ArchiveError::Store(_)));
    }

    #[test]
    fn test_should_report_not_found_variants() {
        assert!(
            StoreError::NoSuchBucket {
                bucket: "b".to_owned()
            }
            .is_not_found()
        );
        assert!(
            StoreError::NoSuchVersion {
                bucket: "b".to_owned(),
                key: "k".to_owned(),
                version_id: "v".to_owned(),
            }
            .is_not_found()
        );
        assert!(!StoreError::Internal(anyhow::anyhow!("boom")).is_not_found());
    }

    #[test]
    fn test_should_expose_invocation_error_kind() {
        let err = InvocationError::from(AuthorizationError::CallerMismatch {
            caller: "111111111111".to_owned(),
            requested: AccountId::new("222222222222").unwrap(),
        });
        assert_eq!(err.kind(), "authorization");
        assert!(err.to_string().contains("222222222222"));
        assert_eq!(
            InvocationError::InvalidRequest("x".to_owned()).kind(),
            "invalid_request"
        );
    }
}
