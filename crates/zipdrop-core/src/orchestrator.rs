//! Invocation driver.
//!
//! [`Orchestrator::run`] resolves target credentials once, then runs each
//! job through the reader, replicator and reconciler in request order:
//!
//! ```text
//! CredentialResolver ──► probe target ──► ArchiveReader::open
//!                                               │ entries (one at a time)
//!                                               ▼
//!                               ObjectReplicator::write × N (bounded pool)
//!                                               │ all writes joined
//!                                               ▼
//!                                DestinationReconciler::reconcile
//! ```
//!
//! Only authorization failures escape as errors. Everything that goes wrong
//! inside a job is recorded in that job's [`JobOutcome`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, trace, warn};

use crate::archive::{ArchiveEntries, ArchiveReader};
use crate::config::ZipdropConfig;
use crate::credentials::{AssumedCredentials, CredentialIssuer, CredentialResolver};
use crate::error::{ArchiveError, CredentialError, InvocationError, StoreError};
use crate::outcome::{ErrorKind, ErrorRecord, InvocationReport, JobOutcome, JobStatus};
use crate::reconciler::DestinationReconciler;
use crate::replicator::ObjectReplicator;
use crate::store::{ObjectStore, PutResult, StoreFactory};
use crate::types::{CallerIdentity, InvocationRequest, ReplicationJob};
use crate::utils::object_key;

/// Runs invocation requests.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    config: ZipdropConfig,
    reader: ArchiveReader,
    resolver: CredentialResolver,
    factory: Arc<dyn StoreFactory>,
}

/// Per-invocation state shared by all jobs.
struct Invocation<'a> {
    caller: &'a CallerIdentity,
    request: &'a InvocationRequest,
    credentials: AssumedCredentials,
    deadline: Instant,
}

/// What happened while writing one job's entries.
#[derive(Debug, Default)]
struct WriteSummary {
    written: u64,
    /// Destination keys a write was started for, successful or not.
    attempted: HashSet<String>,
    errors: Vec<ErrorRecord>,
    /// Some archive entries could not be mapped to a key.
    unmapped_entries: bool,
    timed_out: bool,
}

impl WriteSummary {
    fn record(&mut self, key: String, result: Result<PutResult, StoreError>) {
        match result {
            Ok(_) => self.written += 1,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to write object");
                self.errors
                    .push(ErrorRecord::for_key(ErrorKind::Write, key, e.to_string()));
            }
        }
    }
}

impl Orchestrator {
    /// Create an orchestrator.
    ///
    /// `source` reads archives with the engine's own identity; target stores
    /// are only ever obtained from `factory` with credentials issued by
    /// `issuer`.
    #[must_use]
    pub fn new(
        config: ZipdropConfig,
        source: Arc<dyn ObjectStore>,
        issuer: Arc<dyn CredentialIssuer>,
        factory: Arc<dyn StoreFactory>,
    ) -> Self {
        let reader = ArchiveReader::new(
            source,
            config.read_chunk_size,
            config.inline_entry_threshold,
        );
        let resolver = CredentialResolver::new(
            issuer,
            config.role_session_name.clone(),
            config.assume_role_max_attempts,
            config.retry_delay(),
        );
        Self {
            config,
            reader,
            resolver,
            factory,
        }
    }

    /// Run every job of `request` on behalf of `caller`.
    ///
    /// Returns an error only when nothing could run: the request is invalid
    /// or the caller may not act on the requested account.
    pub async fn run(
        &self,
        caller: &CallerIdentity,
        request: &InvocationRequest,
    ) -> Result<InvocationReport, InvocationError> {
        request.validate()?;
        let budget = request
            .timeout_seconds
            .map_or_else(|| self.config.invocation_timeout(), Duration::from_secs);
        let deadline = Instant::now() + budget;
        info!(
            account_id = %request.account_id,
            role = %request.role_to_assume,
            caller = %caller,
            jobs = request.jobs.len(),
            budget_secs = budget.as_secs(),
            "starting invocation"
        );

        let credentials = match timeout_at(deadline, self.resolve(caller, request)).await {
            Ok(Ok(credentials)) => credentials,
            Ok(Err(CredentialError::Authorization(e))) => {
                warn!(error = %e, "invocation refused");
                return Err(e.into());
            }
            Ok(Err(e)) => {
                warn!(error = %e, "could not obtain target credentials");
                return Ok(fail_all(
                    request,
                    &ErrorRecord::new(ErrorKind::Credentials, e.to_string()),
                ));
            }
            Err(_) => {
                warn!("invocation budget exhausted while resolving target credentials");
                return Ok(fail_all(request, &credentials_deadline()));
            }
        };

        let mut invocation = Invocation {
            caller,
            request,
            credentials,
            deadline,
        };
        let mut outcomes = Vec::with_capacity(request.jobs.len());
        for job in &request.jobs {
            let outcome = if Instant::now() >= deadline {
                warn!(job = %job, "invocation budget exhausted, job not started");
                JobOutcome::failed(
                    job.clone(),
                    ErrorRecord::new(
                        ErrorKind::DeadlineExceeded,
                        "invocation budget exhausted before the job started",
                    ),
                )
            } else {
                self.run_job(&mut invocation, job).await
            };
            outcomes.push(outcome);
        }

        let report = InvocationReport::new(outcomes);
        info!(
            status = ?report.status,
            objects_written = report.objects_written(),
            objects_deleted = report.objects_deleted(),
            "invocation finished"
        );
        Ok(report)
    }

    async fn resolve(
        &self,
        caller: &CallerIdentity,
        request: &InvocationRequest,
    ) -> Result<AssumedCredentials, CredentialError> {
        self.resolver
            .resolve(caller, &request.account_id, &request.role_to_assume)
            .await
    }

    /// Resolve credentials again within the invocation budget.
    async fn refresh(&self, invocation: &Invocation<'_>) -> Result<AssumedCredentials, ErrorRecord> {
        match timeout_at(
            invocation.deadline,
            self.resolve(invocation.caller, invocation.request),
        )
        .await
        {
            Ok(Ok(credentials)) => Ok(credentials),
            Ok(Err(e)) => Err(ErrorRecord::new(ErrorKind::Credentials, e.to_string())),
            Err(_) => Err(credentials_deadline()),
        }
    }

    async fn run_job(&self, invocation: &mut Invocation<'_>, job: &ReplicationJob) -> JobOutcome {
        info!(job = %job, "starting job");

        if invocation.credentials.is_expired_at(Utc::now()) {
            debug!("target credentials expired, resolving again");
            match self.refresh(invocation).await {
                Ok(credentials) => invocation.credentials = credentials,
                Err(record) => return JobOutcome::failed(job.clone(), record),
            }
        }

        let target = match self.probe_target(invocation, job).await {
            Ok(target) => target,
            Err(record) => return JobOutcome::failed(job.clone(), record),
        };

        let opened = timeout_at(
            invocation.deadline,
            self.reader.open(
                &job.source_bucket,
                &job.source_key,
                job.source_version.as_deref(),
            ),
        )
        .await;
        let entries = match opened {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!(job = %job, error = %e, "failed to open archive");
                return JobOutcome::failed(job.clone(), ErrorRecord::from_archive(&e));
            }
            Err(_) => {
                return JobOutcome::failed(
                    job.clone(),
                    ErrorRecord::new(
                        ErrorKind::DeadlineExceeded,
                        "invocation budget exhausted while opening the archive",
                    ),
                );
            }
        };

        let writes = self
            .write_entries(Arc::clone(&target), job, entries, invocation.deadline)
            .await;
        let mut outcome = JobOutcome {
            job: job.clone(),
            status: if writes.timed_out {
                JobStatus::Failed
            } else {
                JobStatus::Succeeded
            },
            errors: writes.errors,
            objects_written: writes.written,
            objects_deleted: 0,
        };

        if !job.delete_old_objects {
            debug!(job = %job, "stale object removal disabled");
        } else if writes.timed_out {
            warn!(job = %job, "archive not fully written, skipping stale object removal");
        } else if writes.unmapped_entries {
            warn!(job = %job, "archive not fully mapped, skipping stale object removal");
            outcome.errors.push(ErrorRecord::new(
                ErrorKind::Reconcile,
                "stale object removal skipped: archive not fully mapped",
            ));
        } else {
            self.reconcile(target, job, &writes.attempted, invocation.deadline, &mut outcome)
                .await;
        }

        info!(
            job = %job,
            status = ?outcome.status,
            written = outcome.objects_written,
            deleted = outcome.objects_deleted,
            errors = outcome.errors.len(),
            "job finished"
        );
        outcome
    }

    /// Check the target bucket is reachable with the current credentials.
    ///
    /// Freshly issued role sessions can take a moment to become usable, so a
    /// failed probe resolves credentials again before the next attempt.
    async fn probe_target(
        &self,
        invocation: &mut Invocation<'_>,
        job: &ReplicationJob,
    ) -> Result<Arc<dyn ObjectStore>, ErrorRecord> {
        let max_attempts = self.config.target_probe_max_attempts.max(1);
        let delay = self.config.retry_delay();
        let mut attempt = 0;
        loop {
            attempt += 1;
            invocation
                .credentials
                .ensure_scoped_to(&invocation.request.account_id)
                .map_err(|e| ErrorRecord::new(ErrorKind::Credentials, e.to_string()))?;
            let target = self.factory.target_store(&invocation.credentials);

            let err = match timeout_at(invocation.deadline, target.head_bucket(&job.target_bucket))
                .await
            {
                Ok(Ok(())) => return Ok(target),
                Ok(Err(e)) => e,
                Err(_) => {
                    return Err(ErrorRecord::new(
                        ErrorKind::DeadlineExceeded,
                        format!(
                            "invocation budget exhausted while probing target bucket '{}'",
                            job.target_bucket
                        ),
                    ));
                }
            };
            if attempt >= max_attempts {
                warn!(bucket = %job.target_bucket, attempts = attempt, error = %err, "target bucket unreachable");
                return Err(ErrorRecord::new(
                    ErrorKind::TargetUnavailable,
                    format!(
                        "target bucket '{}' unreachable after {attempt} attempts: {err}",
                        job.target_bucket
                    ),
                ));
            }
            if Instant::now() + delay >= invocation.deadline {
                return Err(ErrorRecord::new(
                    ErrorKind::DeadlineExceeded,
                    format!(
                        "invocation budget exhausted while waiting for target bucket '{}': {err}",
                        job.target_bucket
                    ),
                ));
            }
            warn!(
                bucket = %job.target_bucket,
                attempt,
                error = %err,
                retry_in_ms = delay.as_millis(),
                "target bucket not reachable yet, retrying"
            );
            tokio::time::sleep(delay).await;
            invocation.credentials = self.refresh(invocation).await?;
        }
    }

    /// Write every file entry, at most `max_concurrent_writes` at a time.
    ///
    /// Returns once every started write has finished. When the deadline
    /// passes no further write is started, but running ones complete.
    async fn write_entries(
        &self,
        target: Arc<dyn ObjectStore>,
        job: &ReplicationJob,
        mut entries: ArchiveEntries,
        deadline: Instant,
    ) -> WriteSummary {
        let replicator = ObjectReplicator::new(target);
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_writes.max(1)));
        let prefix = job.normalized_prefix();
        let mut tasks: JoinSet<(String, Result<PutResult, StoreError>)> = JoinSet::new();
        let mut summary = WriteSummary::default();
        debug!(job = %job, entries = entries.len(), "writing entries");

        loop {
            let next = match timeout_at(deadline, entries.next()).await {
                Ok(next) => next,
                Err(_) => {
                    summary.timed_out = true;
                    break;
                }
            };
            let Some(next) = next else { break };
            let entry = match next {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(job = %job, error = %e, "failed to read archive entry");
                    match &e {
                        ArchiveError::Entry { path, .. } if !path.is_empty() => {
                            summary.attempted.insert(object_key(prefix, path));
                        }
                        _ => summary.unmapped_entries = true,
                    }
                    summary.errors.push(ErrorRecord::from_archive(&e));
                    continue;
                }
            };
            if entry.is_dir {
                trace!(path = %entry.path, "skipping directory entry");
                continue;
            }

            let key = object_key(prefix, &entry.path);
            if summary.attempted.contains(&key) {
                warn!(job = %job, path = %entry.path, key = %key, "entry maps to an already written key, skipping");
                summary.errors.push(ErrorRecord::for_key(
                    ErrorKind::Format,
                    key,
                    format!("duplicate destination key for entry '{}'", entry.path),
                ));
                continue;
            }
            let permit = match timeout_at(deadline, Arc::clone(&permits).acquire_owned()).await {
                Ok(Ok(permit)) => permit,
                Ok(Err(e)) => {
                    summary.unmapped_entries = true;
                    summary
                        .errors
                        .push(ErrorRecord::for_key(ErrorKind::Write, key, e.to_string()));
                    break;
                }
                Err(_) => {
                    summary.timed_out = true;
                    break;
                }
            };
            summary.attempted.insert(key.clone());
            let replicator = replicator.clone();
            let bucket = job.target_bucket.clone();
            tasks.spawn(async move {
                let result = replicator.write(&bucket, &key, entry).await;
                drop(permit);
                (key, result)
            });

            while let Some(joined) = tasks.try_join_next() {
                record_joined(&mut summary, joined);
            }
        }

        drop(entries);
        while let Some(joined) = tasks.join_next().await {
            record_joined(&mut summary, joined);
        }

        if summary.timed_out {
            warn!(job = %job, written = summary.written, "invocation budget exhausted, remaining entries not written");
            summary.errors.push(ErrorRecord::new(
                ErrorKind::DeadlineExceeded,
                "invocation budget exhausted; remaining entries were not written",
            ));
        }
        summary
    }

    async fn reconcile(
        &self,
        target: Arc<dyn ObjectStore>,
        job: &ReplicationJob,
        keep: &HashSet<String>,
        deadline: Instant,
        outcome: &mut JobOutcome,
    ) {
        let reconciler = DestinationReconciler::new(target);
        let reconciled = timeout_at(
            deadline,
            reconciler.reconcile(&job.target_bucket, job.normalized_prefix(), keep),
        )
        .await;
        match reconciled {
            Ok(Ok(summary)) => {
                outcome.objects_deleted = summary.deleted;
                outcome
                    .errors
                    .extend(summary.failures.into_iter().map(|failure| {
                        ErrorRecord::for_key(ErrorKind::Reconcile, failure.key, failure.message)
                    }));
            }
            Ok(Err(e)) => {
                warn!(job = %job, error = %e, "failed to list destination objects");
                outcome
                    .errors
                    .push(ErrorRecord::new(ErrorKind::Reconcile, e.to_string()));
            }
            Err(_) => {
                warn!(job = %job, "invocation budget exhausted during stale object removal");
                outcome.status = JobStatus::Failed;
                outcome.errors.push(ErrorRecord::new(
                    ErrorKind::DeadlineExceeded,
                    "invocation budget exhausted while removing stale objects",
                ));
            }
        }
    }
}

fn fail_all(request: &InvocationRequest, record: &ErrorRecord) -> InvocationReport {
    InvocationReport::new(
        request
            .jobs
            .iter()
            .map(|job| JobOutcome::failed(job.clone(), record.clone()))
            .collect(),
    )
}

fn credentials_deadline() -> ErrorRecord {
    ErrorRecord::new(
        ErrorKind::DeadlineExceeded,
        "invocation budget exhausted while resolving target credentials",
    )
}

fn record_joined(
    summary: &mut WriteSummary,
    joined: Result<(String, Result<PutResult, StoreError>), tokio::task::JoinError>,
) {
    match joined {
        Ok((key, result)) => summary.record(key, result),
        Err(e) => {
            warn!(error = %e, "write task aborted");
            summary.unmapped_entries = true;
            summary.errors.push(ErrorRecord::new(
                ErrorKind::Write,
                format!("write task aborted: {e}"),
            ));
        }
    }
}
