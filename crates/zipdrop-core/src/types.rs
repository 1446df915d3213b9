//! Invocation payload types shared by every engine component.
//!
//! The wire names follow the deployment pipeline's payload
//! (`account_id`, `role_to_assume`, `s3_source_target_pairs`, ...), so
//! [`InvocationRequest`] can be deserialized straight from the caller's JSON.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvocationError;

/// AWS Account ID (12-digit string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Create a new account ID from a string.
    ///
    /// # Errors
    /// Returns an error if the account ID is not a 12-digit numeric string.
    pub fn new(id: impl Into<String>) -> Result<Self, InvocationError> {
        let id = id.into();
        if id.len() != 12 || !id.chars().all(|c| c.is_ascii_digit()) {
            return Err(InvocationError::InvalidAccountId(id));
        }
        Ok(Self(id))
    }

    /// Get the account ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccountId {
    type Error = InvocationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One source-archive-to-destination-bucket unit of work.
///
/// Two jobs are the same job when every field matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicationJob {
    /// Bucket holding the ZIP archive.
    #[serde(rename = "s3_source_bucket")]
    pub source_bucket: String,
    /// Key of the ZIP archive.
    #[serde(rename = "s3_source_key")]
    pub source_key: String,
    /// Pinned archive version; the latest version is read when absent.
    #[serde(
        rename = "s3_source_version",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_version: Option<String>,
    /// Bucket that receives the extracted objects.
    #[serde(rename = "s3_target_bucket")]
    pub target_bucket: String,
    /// Optional key prefix under which entries are written.
    #[serde(
        rename = "s3_target_prefix",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub target_prefix: Option<String>,
    /// Remove destination objects that are not part of the archive.
    #[serde(default = "default_delete_old_objects")]
    pub delete_old_objects: bool,
}

fn default_delete_old_objects() -> bool {
    true
}

impl ReplicationJob {
    /// Create a job that replaces the whole target bucket with the archive.
    #[must_use]
    pub fn new(
        source_bucket: impl Into<String>,
        source_key: impl Into<String>,
        target_bucket: impl Into<String>,
    ) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            source_key: source_key.into(),
            source_version: None,
            target_bucket: target_bucket.into(),
            target_prefix: None,
            delete_old_objects: true,
        }
    }

    /// Pin the source archive to a specific object version.
    #[must_use]
    pub fn with_source_version(mut self, version: impl Into<String>) -> Self {
        self.source_version = Some(version.into());
        self
    }

    /// Write entries below `prefix` instead of the bucket root.
    #[must_use]
    pub fn with_target_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.target_prefix = Some(prefix.into());
        self
    }

    /// Enable or disable removal of stale destination objects.
    #[must_use]
    pub fn with_delete_old_objects(mut self, delete: bool) -> Self {
        self.delete_old_objects = delete;
        self
    }

    /// The target prefix without surrounding separators, `None` when empty.
    #[must_use]
    pub fn normalized_prefix(&self) -> Option<&str> {
        self.target_prefix
            .as_deref()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
    }
}

impl fmt::Display for ReplicationJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s3://{}/{} -> s3://{}",
            self.source_bucket, self.source_key, self.target_bucket
        )
    }
}

/// A single invocation of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Account owning the role to assume.
    pub account_id: AccountId,
    /// Role name, combined with `account_id` into the role ARN.
    pub role_to_assume: String,
    /// Jobs, executed in order.
    #[serde(rename = "s3_source_target_pairs")]
    pub jobs: Vec<ReplicationJob>,
    /// Wall-clock budget for the whole invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl InvocationRequest {
    /// Parse and validate a JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self, InvocationError> {
        let request: Self = serde_json::from_slice(payload)
            .map_err(|e| InvocationError::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Reject requests no job could ever succeed with.
    pub fn validate(&self) -> Result<(), InvocationError> {
        if self.role_to_assume.trim().is_empty() {
            return Err(InvocationError::InvalidRequest(
                "role_to_assume must not be empty".to_owned(),
            ));
        }
        for (index, job) in self.jobs.iter().enumerate() {
            let missing = [
                ("s3_source_bucket", &job.source_bucket),
                ("s3_source_key", &job.source_key),
                ("s3_target_bucket", &job.target_bucket),
            ]
            .into_iter()
            .find(|(_, value)| value.is_empty());
            if let Some((field, _)) = missing {
                return Err(InvocationError::InvalidRequest(format!(
                    "s3_source_target_pairs[{index}].{field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Identity on whose behalf the engine was invoked.
///
/// Multi-tenant deployments give every trusted account its own function
/// alias named `account-<id>`; the alias that received the invocation is the
/// only identity the engine trusts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerIdentity {
    /// Invoked without an alias; no tenant restriction applies.
    Unrestricted,
    /// Invoked through an alias bound to this account.
    Account(String),
}

impl CallerIdentity {
    /// Derive the caller identity from the invoked function ARN.
    ///
    /// `arn:aws:lambda:<region>:<account>:function:<name>:<alias>` has eight
    /// segments; anything else carries no alias. An alias naming no account
    /// (`account-`) carries no restriction either.
    #[must_use]
    pub fn from_invoked_arn(arn: &str) -> Self {
        let segments: Vec<&str> = arn.split(':').collect();
        if segments.len() != 8 || segments[7].is_empty() {
            return Self::Unrestricted;
        }
        let alias = segments[7];
        match alias.rsplit("account-").next() {
            Some("") | None => Self::Unrestricted,
            Some(account) => Self::Account(account.to_owned()),
        }
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrestricted => f.write_str("unrestricted"),
            Self::Account(id) => write!(f, "account {id}"),
        }
    }
}
