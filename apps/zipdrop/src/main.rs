//! zipdrop - replicate ZIP archives from S3 into target buckets.
//!
//! Reads one invocation payload, runs it, and prints the JSON report on
//! stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```text
//! zipdrop payload.json
//! zipdrop < payload.json
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `INVOKED_FUNCTION_ARN` | *(unset)* | ARN the invocation arrived on; an alias restricts the target account |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `LOG_FORMAT` | `text` | `json` for one JSON object per log line |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |
//!
//! Engine settings (`MAX_CONCURRENT_WRITES`, `RETRY_DELAY_MS`, ...) are read
//! by [`ZipdropConfig::from_env`].
//!
//! # Exit codes
//!
//! `0` every job succeeded, `1` at least one job failed or recorded an
//! error, `2` nothing ran.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use zipdrop_core::{
    CallerIdentity, InvocationError, InvocationReport, InvocationRequest, Orchestrator,
    ReportStatus, ZipdropConfig,
};

/// Version reported at start-up.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit code when no job ran.
const EXIT_NOT_RUN: u8 = 2;

/// Initialize the tracing subscriber on stderr.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str, json: bool) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}

/// Read the payload from `path`, or from stdin when no path is given.
async fn read_payload(path: Option<&str>) -> Result<Vec<u8>> {
    match path {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read payload from {path}")),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut buf)
                .await
                .context("failed to read payload from stdin")?;
            Ok(buf)
        }
    }
}

fn caller_identity() -> CallerIdentity {
    std::env::var("INVOKED_FUNCTION_ARN").map_or(CallerIdentity::Unrestricted, |arn| {
        CallerIdentity::from_invoked_arn(&arn)
    })
}

/// JSON document and exit code for an invocation result.
fn render(result: &Result<InvocationReport, InvocationError>) -> Result<(Value, u8)> {
    match result {
        Ok(report) => {
            let code = match report.status {
                ReportStatus::Succeeded => 0,
                ReportStatus::PartialFailure => 1,
            };
            let body = serde_json::to_value(report).context("failed to serialize report")?;
            Ok((body, code))
        }
        Err(err) => Ok((
            json!({
                "status": "not_run",
                "error": {
                    "kind": err.kind(),
                    "message": err.to_string(),
                },
            }),
            EXIT_NOT_RUN,
        )),
    }
}

async fn build_orchestrator(config: &ZipdropConfig) -> Orchestrator {
    let sdk_config = zipdrop_aws::load_sdk_config(config).await;
    Orchestrator::new(
        config.clone(),
        Arc::new(zipdrop_aws::source_store(&sdk_config, config.force_path_style)),
        Arc::new(zipdrop_aws::credential_issuer(&sdk_config)),
        Arc::new(zipdrop_aws::S3StoreFactory::new(
            sdk_config,
            config.force_path_style,
        )),
    )
}

async fn run() -> Result<u8> {
    let config = ZipdropConfig::from_env();
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    init_tracing(&config.log_level, json_logs)?;

    let path = std::env::args().nth(1);
    let payload = read_payload(path.as_deref()).await?;
    let caller = caller_identity();
    info!(
        version = VERSION,
        caller = %caller,
        region = %config.region,
        max_concurrent_writes = config.max_concurrent_writes,
        "starting zipdrop",
    );

    let result = match InvocationRequest::from_json(&payload) {
        Ok(request) => {
            let orchestrator = build_orchestrator(&config).await;
            orchestrator.run(&caller, &request).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        warn!(error = %e, kind = e.kind(), "invocation did not run");
    }

    let (body, code) = render(&result)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("failed to serialize output")?
    );
    Ok(code)
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("zipdrop: {e:#}");
            ExitCode::from(EXIT_NOT_RUN)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zipdrop_core::{
        AuthorizationError, ErrorKind, ErrorRecord, JobOutcome, JobStatus, ReplicationJob,
    };

    use super::*;

    #[test]
    fn test_should_exit_zero_for_clean_report() {
        let report = InvocationReport::new(vec![JobOutcome {
            job: ReplicationJob::new("src", "site.zip", "site"),
            status: JobStatus::Succeeded,
            errors: Vec::new(),
            objects_written: 2,
            objects_deleted: 0,
        }]);
        let (body, code) = render(&Ok(report)).unwrap();
        assert_eq!(code, 0);
        assert_eq!(body["status"], "succeeded");
        assert_eq!(body["outcomes"][0]["objects_written"], 2);
    }

    #[test]
    fn test_should_exit_one_for_partial_failure() {
        let report = InvocationReport::new(vec![JobOutcome::failed(
            ReplicationJob::new("src", "missing.zip", "site"),
            ErrorRecord::new(ErrorKind::NotFound, "no such key"),
        )]);
        let (body, code) = render(&Ok(report)).unwrap();
        assert_eq!(code, 1);
        assert_eq!(body["status"], "partial_failure");
        assert_eq!(body["outcomes"][0]["errors"][0]["kind"], "not_found");
    }

    #[test]
    fn test_should_render_not_run_for_invocation_error() {
        let err = InvocationError::from(AuthorizationError::CallerMismatch {
            caller: "111111111111".to_owned(),
            requested: zipdrop_core::AccountId::new("222222222222").unwrap(),
        });
        let (body, code) = render(&Err(err)).unwrap();
        assert_eq!(code, EXIT_NOT_RUN);
        assert_eq!(body["status"], "not_run");
        assert_eq!(body["error"]["kind"], "authorization");
        assert!(body.get("outcomes").is_none());
    }

    #[tokio::test]
    async fn test_should_read_payload_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"account_id":"123456789012"}"#).unwrap();

        let payload = read_payload(file.path().to_str()).await.unwrap();
        assert!(payload.starts_with(b"{\"account_id\""));

        let path = file.into_temp_path();
        let gone = path.to_path_buf();
        path.close().unwrap();
        assert!(read_payload(gone.to_str()).await.is_err());
    }
}
