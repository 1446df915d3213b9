//! [`CredentialIssuer`] over AWS STS.

use async_trait::async_trait;
use aws_sdk_sts::Client;
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata};
use chrono::{DateTime, Utc};
use tracing::debug;
use zipdrop_core::credentials::{AssumedCredentials, CredentialIssuer};
use zipdrop_core::error::IssueError;
use zipdrop_core::types::AccountId;

/// Issues role credentials with `sts:AssumeRole`.
#[derive(Debug, Clone)]
pub struct StsCredentialIssuer {
    client: Client,
}

impl StsCredentialIssuer {
    /// Wrap an already configured client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Whether an STS error means the role may not be assumed at all.
fn is_denial(code: Option<&str>, status: Option<u16>) -> bool {
    matches!(code, Some("AccessDenied" | "AccessDeniedException"))
        || (code.is_none() && status == Some(403))
}

fn to_chrono(value: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait]
impl CredentialIssuer for StsCredentialIssuer {
    async fn assume_role(
        &self,
        account_id: &AccountId,
        role_arn: &str,
        session_name: &str,
    ) -> Result<AssumedCredentials, IssueError> {
        let output = match self
            .client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                let message = DisplayErrorContext(&err).to_string();
                return if is_denial(err.code(), status) {
                    Err(IssueError::Denied(
                        err.message().map_or(message, ToOwned::to_owned),
                    ))
                } else {
                    Err(IssueError::Transient(anyhow::anyhow!(message)))
                };
            }
        };

        let credentials = output.credentials().ok_or_else(|| {
            IssueError::Transient(anyhow::anyhow!("AssumeRole returned no credentials"))
        })?;
        let expiration = to_chrono(credentials.expiration()).ok_or_else(|| {
            IssueError::Transient(anyhow::anyhow!(
                "AssumeRole returned an out-of-range expiration"
            ))
        })?;
        debug!(role_arn, %expiration, "issued role credentials");

        Ok(AssumedCredentials::new(
            account_id.clone(),
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token(),
            expiration,
        ))
    }
}
