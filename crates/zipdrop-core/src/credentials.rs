//! Credential resolution for the target account.
//!
//! [`CredentialResolver`] enforces the tenant boundary and then asks a
//! [`CredentialIssuer`] for short-lived role credentials. The boundary check
//! itself is the pure function [`authorize`], so it can be audited and tested
//! without any identity service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{AuthorizationError, CredentialError, IssueError};
use crate::types::{AccountId, CallerIdentity};

/// Temporary credentials for a role in exactly one account.
///
/// The secret parts never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct AssumedCredentials {
    account_id: AccountId,
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    expiration: DateTime<Utc>,
}

impl AssumedCredentials {
    /// Bundle issued credential material for `account_id`.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: session_token.into(),
            expiration,
        }
    }

    /// Account the credentials were issued for.
    #[must_use]
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Access key ID.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Secret access key.
    #[must_use]
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Session token.
    #[must_use]
    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    /// Moment the credentials stop working.
    #[must_use]
    pub fn expiration(&self) -> DateTime<Utc> {
        self.expiration
    }

    /// Whether the credentials have expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiration
    }

    /// Refuse to act for any account other than the one these were issued for.
    pub fn ensure_scoped_to(&self, account_id: &AccountId) -> Result<(), AuthorizationError> {
        if &self.account_id == account_id {
            Ok(())
        } else {
            Err(AuthorizationError::ScopeMismatch {
                issued_for: self.account_id.clone(),
                requested: account_id.clone(),
            })
        }
    }
}

impl fmt::Debug for AssumedCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssumedCredentials")
            .field("account_id", &self.account_id)
            .field("access_key_id", &self.access_key_id)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

/// Service issuing role credentials (STS in production).
#[async_trait]
pub trait CredentialIssuer: Send + Sync + fmt::Debug {
    /// Assume `role_arn`, which lives in `account_id`.
    async fn assume_role(
        &self,
        account_id: &AccountId,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AssumedCredentials, IssueError>;
}

/// Build the IAM role ARN for `role_name` in `account_id`.
///
/// # Examples
///
/// ```
/// use zipdrop_core::credentials::role_arn;
/// use zipdrop_core::types::AccountId;
///
/// let account = AccountId::new("123456789012").unwrap();
/// assert_eq!(role_arn(&account, "deploy"), "arn:aws:iam::123456789012:role/deploy");
/// ```
#[must_use]
pub fn role_arn(account_id: &AccountId, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

/// Check that `caller` may act on `account_id`.
///
/// An unrestricted caller may act on any account its execution role can
/// reach; an alias-bound caller only on its own account.
pub fn authorize(caller: &CallerIdentity, account_id: &AccountId) -> Result<(), AuthorizationError> {
    match caller {
        CallerIdentity::Unrestricted => Ok(()),
        CallerIdentity::Account(id) if id == account_id.as_str() => Ok(()),
        CallerIdentity::Account(id) => Err(AuthorizationError::CallerMismatch {
            caller: id.clone(),
            requested: account_id.clone(),
        }),
    }
}

/// Resolves target-account credentials for one invocation.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    issuer: Arc<dyn CredentialIssuer>,
    session_name: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CredentialResolver {
    /// Create a resolver on top of `issuer`.
    #[must_use]
    pub fn new(
        issuer: Arc<dyn CredentialIssuer>,
        session_name: impl Into<String>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            issuer,
            session_name: session_name.into(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Obtain credentials for `role_name` in `account_id` on behalf of `caller`.
    ///
    /// Denials are returned at once as [`CredentialError::Authorization`];
    /// transient failures are retried up to the configured attempt count.
    pub async fn resolve(
        &self,
        caller: &CallerIdentity,
        account_id: &AccountId,
        role_name: &str,
    ) -> Result<AssumedCredentials, CredentialError> {
        authorize(caller, account_id)?;

        let role_arn = role_arn(account_id, role_name);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(role_arn = %role_arn, attempt, "assuming role");
            match self
                .issuer
                .assume_role(account_id, &role_arn, &self.session_name)
                .await
            {
                Ok(credentials) => {
                    credentials.ensure_scoped_to(account_id)?;
                    debug!(
                        role_arn = %role_arn,
                        expiration = %credentials.expiration(),
                        "assumed role"
                    );
                    return Ok(credentials);
                }
                Err(IssueError::Denied(message)) => {
                    warn!(role_arn = %role_arn, %message, "role assumption denied");
                    return Err(AuthorizationError::Denied { role_arn, message }.into());
                }
                Err(IssueError::Transient(source)) => {
                    if attempt >= self.max_attempts {
                        return Err(CredentialError::Unavailable {
                            role_arn,
                            attempts: attempt,
                            source,
                        });
                    }
                    warn!(
                        role_arn = %role_arn,
                        attempt,
                        error = %source,
                        retry_in_ms = self.retry_delay.as_millis(),
                        "failed to assume role, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

/// In-memory issuer for tests and local runs.
///
/// Roles are registered up front; unknown roles are denied. A number of
/// transient failures can be queued to exercise retry paths.
#[derive(Debug, Default)]
pub struct StaticCredentialIssuer {
    roles: HashMap<String, (String, String)>,
    transient_failures: AtomicU32,
    calls: AtomicUsize,
}

impl StaticCredentialIssuer {
    /// Create an issuer that knows no roles.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `role_arn`, issuing the given key pair.
    #[must_use]
    pub fn with_role(
        mut self,
        role_arn: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        self.roles.insert(
            role_arn.into(),
            (access_key_id.into(), secret_access_key.into()),
        );
        self
    }

    /// Fail the next `count` calls with a transient error.
    #[must_use]
    pub fn with_transient_failures(self, count: u32) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Number of `assume_role` calls received so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for StaticCredentialIssuer {
    async fn assume_role(
        &self,
        account_id: &AccountId,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AssumedCredentials, IssueError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let pending = self.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.transient_failures.store(pending - 1, Ordering::SeqCst);
            return Err(IssueError::Transient(anyhow::anyhow!(
                "throttled while assuming {role_arn}"
            )));
        }

        let (access_key_id, secret_access_key) = self.roles.get(role_arn).ok_or_else(|| {
            IssueError::Denied(format!("{session_name} is not authorized to assume {role_arn}"))
        })?;

        Ok(AssumedCredentials::new(
            account_id.clone(),
            access_key_id.clone(),
            secret_access_key.clone(),
            format!("session-{}", uuid::Uuid::new_v4().simple()),
            Utc::now() + chrono::Duration::hours(1),
        ))
    }
}
