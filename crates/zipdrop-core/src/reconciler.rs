//! Removes destination objects that the current deploy did not produce.
//!
//! The full key listing is taken before the first deletion, so pages never
//! shift underneath the paginator. Deletions are best-effort: a key that
//! cannot be removed is reported and the remaining keys are still processed.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::store::{DeleteFailure, ObjectStore};

/// Maximum number of keys in one batched delete request.
pub const DELETE_BATCH_SIZE: usize = 1000;

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Keys found under the reconciled scope.
    pub listed: u64,
    /// Stale keys removed.
    pub deleted: u64,
    /// Stale keys that are still present.
    pub failures: Vec<DeleteFailure>,
}

/// Deletes every key in scope that is not in the keep set.
#[derive(Debug, Clone)]
pub struct DestinationReconciler {
    store: Arc<dyn ObjectStore>,
}

impl DestinationReconciler {
    /// Create a reconciler acting through `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Reconcile `bucket` against `keep`.
    ///
    /// With a `prefix`, only keys under `{prefix}/` are considered. Returns
    /// an error only when the listing itself fails; in that case nothing has
    /// been deleted.
    pub async fn reconcile(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        keep: &HashSet<String>,
    ) -> Result<ReconcileSummary, StoreError> {
        let scope = prefix.map(|p| format!("{p}/"));
        let existing = self.list_all(bucket, scope.as_deref()).await?;

        let stale: Vec<String> = existing
            .iter()
            .filter(|key| !keep.contains(*key))
            .cloned()
            .collect();
        debug!(
            bucket,
            listed = existing.len(),
            stale = stale.len(),
            "computed stale keys"
        );

        let mut summary = ReconcileSummary {
            listed: existing.len() as u64,
            ..ReconcileSummary::default()
        };
        for batch in stale.chunks(DELETE_BATCH_SIZE) {
            match self.store.delete_keys(bucket, batch).await {
                Ok(failures) => {
                    summary.deleted += (batch.len() - failures.len()) as u64;
                    for failure in &failures {
                        warn!(bucket, key = %failure.key, message = %failure.message, "failed to delete object");
                    }
                    summary.failures.extend(failures);
                }
                Err(e) => {
                    warn!(bucket, keys = batch.len(), error = %e, "delete batch failed");
                    let message = e.to_string();
                    summary
                        .failures
                        .extend(batch.iter().map(|key| DeleteFailure {
                            key: key.clone(),
                            message: message.clone(),
                        }));
                }
            }
        }

        info!(
            bucket,
            deleted = summary.deleted,
            failed = summary.failures.len(),
            "reconciled destination"
        );
        Ok(summary)
    }

    async fn list_all(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = self
                .store
                .list_keys(bucket, prefix, token.as_deref())
                .await?;
            keys.extend(page.keys);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => return Ok(keys),
            }
        }
    }
}
