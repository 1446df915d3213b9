//! End-to-end tests for zipdrop.
//!
//! These tests require an S3/STS-compatible endpoint at `localhost:4566`
//! (override with `ZIPDROP_ENDPOINT_URL`). They are marked `#[ignore]` so
//! they don't run during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p zipdrop-integration -- --ignored
//! ```

use std::io::{Cursor, Write};
use std::sync::{Arc, Once};

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_s3::primitives::ByteStream;
use zip::write::SimpleFileOptions;
use zipdrop_core::{AccountId, InvocationRequest, Orchestrator, ReplicationJob, ZipdropConfig};

static INIT: Once = Once::new();

/// Account the endpoint treats as the caller's own.
pub const ACCOUNT_ID: &str = "000000000000";

/// Role assumed in [`ACCOUNT_ID`].
pub const ROLE_NAME: &str = "zipdrop-deploy";

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the server.
fn endpoint_url() -> String {
    std::env::var("ZIPDROP_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// SDK configuration with static test credentials.
#[must_use]
pub fn sdk_config() -> SdkConfig {
    init_tracing();

    let creds = Credentials::new("test", "test", None, None, "integration-test");
    SdkConfig::builder()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(SharedCredentialsProvider::new(creds))
        .endpoint_url(endpoint_url())
        .build()
}

/// Create a configured S3 client pointing at the local server.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    let config = aws_sdk_s3::config::Builder::from(&sdk_config())
        .force_path_style(true)
        .build();
    aws_sdk_s3::Client::from_conf(config)
}

/// Engine configuration for the local server.
#[must_use]
pub fn engine_config() -> ZipdropConfig {
    ZipdropConfig::builder()
        .endpoint_url(Some(endpoint_url()))
        .force_path_style(true)
        .retry_delay_ms(200)
        .read_chunk_size(64 * 1024)
        .inline_entry_threshold(16 * 1024)
        .build()
}

/// Orchestrator wired to the local server.
#[must_use]
pub fn orchestrator() -> Orchestrator {
    let sdk_config = sdk_config();
    Orchestrator::new(
        engine_config(),
        Arc::new(zipdrop_aws::source_store(&sdk_config, true)),
        Arc::new(zipdrop_aws::credential_issuer(&sdk_config)),
        Arc::new(zipdrop_aws::S3StoreFactory::new(sdk_config, true)),
    )
}

/// Request for [`ACCOUNT_ID`] with the given jobs.
#[must_use]
pub fn request(jobs: Vec<ReplicationJob>) -> InvocationRequest {
    InvocationRequest {
        account_id: AccountId::new(ACCOUNT_ID).unwrap(),
        role_to_assume: ROLE_NAME.to_owned(),
        jobs,
        timeout_seconds: Some(120),
    }
}

/// Generate a unique bucket name for a test.
#[must_use]
pub fn test_bucket_name(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
    format!("test-{prefix}-{id}")
}

/// Create a bucket and return its name. Caller is responsible for cleanup.
pub async fn create_test_bucket(client: &aws_sdk_s3::Client, prefix: &str) -> String {
    let name = test_bucket_name(prefix);
    client
        .create_bucket()
        .bucket(&name)
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to create bucket {name}: {e}"));
    name
}

/// Build a ZIP archive in memory; names ending in `/` become directories.
#[must_use]
pub fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in files {
        if name.ends_with('/') {
            zip.add_directory(*name, options).unwrap();
        } else {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap().into_inner()
}

/// Upload `data` to `s3://bucket/key`.
pub async fn put(client: &aws_sdk_s3::Client, bucket: &str, key: &str, data: Vec<u8>) {
    client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(data))
        .send()
        .await
        .unwrap_or_else(|e| panic!("failed to put s3://{bucket}/{key}: {e}"));
}

/// Sorted keys of a bucket.
pub async fn list_keys(client: &aws_sdk_s3::Client, bucket: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut continuation_token = None;
    loop {
        let resp = client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation_token.take())
            .send()
            .await
            .expect("list_objects_v2");
        keys.extend(resp.contents().iter().filter_map(|o| o.key().map(ToOwned::to_owned)));
        if resp.is_truncated() == Some(true) {
            continuation_token = resp.next_continuation_token().map(ToOwned::to_owned);
        } else {
            break;
        }
    }
    keys.sort();
    keys
}

/// Delete all objects in a bucket, then delete the bucket.
pub async fn cleanup_bucket(client: &aws_sdk_s3::Client, bucket: &str) {
    for key in list_keys(client, bucket).await {
        let _ = client.delete_object().bucket(bucket).key(key).send().await;
    }
    let _ = client.delete_bucket().bucket(bucket).send().await;
}

mod test_replication;
