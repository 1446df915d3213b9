//! Engine configuration.
//!
//! Provides [`ZipdropConfig`]. Values are loaded from environment variables,
//! the way the function's hosting platform hands settings to it.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// zipdrop configuration.
///
/// # Examples
///
/// ```
/// use zipdrop_core::config::ZipdropConfig;
///
/// let config = ZipdropConfig::default();
/// assert_eq!(config.max_concurrent_writes, 8);
/// assert_eq!(config.region, "us-east-1");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ZipdropConfig {
    /// AWS region for all clients.
    #[builder(default = String::from("us-east-1"))]
    pub region: String,

    /// Custom S3/STS endpoint (LocalStack, MinIO, ...).
    #[builder(default)]
    pub endpoint_url: Option<String>,

    /// Whether S3 requests use path-style addressing.
    #[builder(default = false)]
    pub force_path_style: bool,

    /// Upper bound on concurrently running entry writes within a job.
    #[builder(default = 8)]
    pub max_concurrent_writes: usize,

    /// Entries up to this uncompressed size are buffered and uploaded from
    /// memory; larger entries are streamed.
    #[builder(default = 524_288)]
    pub inline_entry_threshold: u64,

    /// Size of each ranged read issued against the source archive.
    #[builder(default = 1_048_576)]
    pub read_chunk_size: u64,

    /// Wall-clock budget used when the payload does not carry one.
    #[builder(default = 840)]
    pub invocation_timeout_secs: u64,

    /// Attempts for transient credential-issuance failures.
    #[builder(default = 5)]
    pub assume_role_max_attempts: u32,

    /// Attempts to reach a target bucket before the job fails.
    #[builder(default = 6)]
    pub target_probe_max_attempts: u32,

    /// Delay between retries, in milliseconds.
    #[builder(default = 5000)]
    pub retry_delay_ms: u64,

    /// Session name passed when assuming the target role.
    #[builder(default = String::from("zipdrop"))]
    pub role_session_name: String,

    /// Log level filter string (e.g. `"info"`, `"debug"`).
    #[builder(default = String::from("info"))]
    pub log_level: String,
}

impl Default for ZipdropConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ZipdropConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `AWS_REGION` (or `DEFAULT_REGION`) | `us-east-1` |
    /// | `ENDPOINT_URL` | *(unset)* |
    /// | `FORCE_PATH_STYLE` | `false` |
    /// | `MAX_CONCURRENT_WRITES` | `8` |
    /// | `INLINE_ENTRY_THRESHOLD` | `524288` |
    /// | `READ_CHUNK_SIZE` | `1048576` |
    /// | `INVOCATION_TIMEOUT_SECS` | `840` |
    /// | `ASSUME_ROLE_MAX_ATTEMPTS` | `5` |
    /// | `TARGET_PROBE_MAX_ATTEMPTS` | `6` |
    /// | `RETRY_DELAY_MS` | `5000` |
    /// | `ROLE_SESSION_NAME` | `zipdrop` |
    /// | `LOG_LEVEL` | `info` |
    ///
    /// Unparsable numbers keep their default.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("AWS_REGION").or_else(|_| std::env::var("DEFAULT_REGION")) {
            config.region = v;
        }
        if let Ok(v) = std::env::var("ENDPOINT_URL") {
            if !v.is_empty() {
                config.endpoint_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("FORCE_PATH_STYLE") {
            config.force_path_style = parse_bool(&v);
        }
        if let Some(n) = parse_env("MAX_CONCURRENT_WRITES") {
            config.max_concurrent_writes = n;
        }
        if let Some(n) = parse_env("INLINE_ENTRY_THRESHOLD") {
            config.inline_entry_threshold = n;
        }
        if let Some(n) = parse_env("READ_CHUNK_SIZE") {
            config.read_chunk_size = n;
        }
        if let Some(n) = parse_env("INVOCATION_TIMEOUT_SECS") {
            config.invocation_timeout_secs = n;
        }
        if let Some(n) = parse_env("ASSUME_ROLE_MAX_ATTEMPTS") {
            config.assume_role_max_attempts = n;
        }
        if let Some(n) = parse_env("TARGET_PROBE_MAX_ATTEMPTS") {
            config.target_probe_max_attempts = n;
        }
        if let Some(n) = parse_env("RETRY_DELAY_MS") {
            config.retry_delay_ms = n;
        }
        if let Ok(v) = std::env::var("ROLE_SESSION_NAME") {
            config.role_session_name = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.log_level = v;
        }

        config
    }

    /// Delay between retries.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Default invocation budget.
    #[must_use]
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Parse a string as a boolean, accepting `"1"` and `"true"` (case-insensitive).
fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
