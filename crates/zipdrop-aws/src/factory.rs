//! Client construction.

use std::sync::Arc;
use std::time::SystemTime;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use tracing::debug;
use zipdrop_core::config::ZipdropConfig;
use zipdrop_core::credentials::AssumedCredentials;
use zipdrop_core::store::{ObjectStore, StoreFactory};

use crate::s3::S3ObjectStore;
use crate::sts::StsCredentialIssuer;

/// Provider name attached to assumed-role credentials.
const ASSUMED_ROLE_PROVIDER: &str = "zipdrop-assumed-role";

/// Load the shared SDK configuration for the engine's own identity.
pub async fn load_sdk_config(config: &ZipdropConfig) -> SdkConfig {
    let mut loader =
        aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
    if let Some(url) = &config.endpoint_url {
        loader = loader.endpoint_url(url);
    }
    loader.load().await
}

fn s3_config(sdk_config: &SdkConfig, force_path_style: bool) -> aws_sdk_s3::config::Builder {
    aws_sdk_s3::config::Builder::from(sdk_config).force_path_style(force_path_style)
}

/// Store for source archives, acting as the engine itself.
#[must_use]
pub fn source_store(sdk_config: &SdkConfig, force_path_style: bool) -> S3ObjectStore {
    S3ObjectStore::new(aws_sdk_s3::Client::from_conf(
        s3_config(sdk_config, force_path_style).build(),
    ))
}

/// Issuer assuming roles with the engine's own identity.
#[must_use]
pub fn credential_issuer(sdk_config: &SdkConfig) -> StsCredentialIssuer {
    StsCredentialIssuer::new(aws_sdk_sts::Client::new(sdk_config))
}

/// Builds S3 stores that sign every request with assumed credentials.
#[derive(Debug, Clone)]
pub struct S3StoreFactory {
    sdk_config: SdkConfig,
    force_path_style: bool,
}

impl S3StoreFactory {
    /// Create a factory sharing region and endpoint settings with `sdk_config`.
    ///
    /// The credentials provider of `sdk_config` is never used for target
    /// stores.
    #[must_use]
    pub fn new(sdk_config: SdkConfig, force_path_style: bool) -> Self {
        Self {
            sdk_config,
            force_path_style,
        }
    }
}

impl StoreFactory for S3StoreFactory {
    fn target_store(&self, credentials: &AssumedCredentials) -> Arc<dyn ObjectStore> {
        debug!(
            account_id = %credentials.account_id(),
            access_key_id = credentials.access_key_id(),
            "building target store"
        );
        let provider = Credentials::new(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_owned()),
            Some(SystemTime::from(credentials.expiration())),
            ASSUMED_ROLE_PROVIDER,
        );
        let conf = s3_config(&self.sdk_config, self.force_path_style)
            .credentials_provider(provider)
            .build();
        Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::from_conf(conf)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use zipdrop_core::types::AccountId;

    use super::*;

    #[tokio::test]
    async fn test_should_build_target_store_from_assumed_credentials() {
        let config = ZipdropConfig::builder()
            .endpoint_url(Some("http://localhost:4566".to_owned()))
            .build();
        let sdk_config = load_sdk_config(&config).await;
        assert_eq!(
            sdk_config.region().map(ToString::to_string).as_deref(),
            Some("us-east-1")
        );

        let factory = S3StoreFactory::new(sdk_config, true);
        let credentials = AssumedCredentials::new(
            AccountId::new("123456789012").unwrap(),
            "ASIATEST",
            "secret",
            "token",
            Utc::now() + Duration::hours(1),
        );
        let store = factory.target_store(&credentials);
        assert!(format!("{store:?}").contains("S3ObjectStore"));
    }
}
