//! Orphaned storage detection.
//!
//! Storage resources are named `<unit>_<suffix>`. Anything in the
//! executor's inventory that matches this tool's prefix but no longer maps
//! to a persisted identity is an orphan, typically left by a crash or a
//! partial teardown.

use crate::error::Result;
use crate::executor::Executor;
use crate::interaction::Operator;
use crate::state::StateStore;
use std::collections::BTreeSet;

/// Suffixes of the storage resources every instance owns.
pub const STORAGE_SUFFIXES: [&str; 2] = ["data", "temp"];

/// What a reconciliation pass found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub candidates: Vec<String>,
    pub deleted: Vec<String>,
    /// Declined by the operator, or every candidate on a dry run.
    pub skipped: Vec<String>,
    /// Resources whose deletion failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Resources present in `actual` but not in `expected`, sorted.
pub fn find_orphans(expected: &BTreeSet<String>, actual: &BTreeSet<String>) -> Vec<String> {
    actual.difference(expected).cloned().collect()
}

pub struct Reconciler<'a> {
    store: &'a dyn StateStore,
    executor: &'a dyn Executor,
    operator: &'a dyn Operator,
    unit_prefix: &'a str,
    infra_project: &'a str,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        executor: &'a dyn Executor,
        operator: &'a dyn Operator,
        unit_prefix: &'a str,
        infra_project: &'a str,
    ) -> Self {
        Self {
            store,
            executor,
            operator,
            unit_prefix,
            infra_project,
        }
    }

    /// Storage names every persisted identity accounts for.
    pub fn expected_resources(&self) -> Result<BTreeSet<String>> {
        let mut expected = BTreeSet::new();
        for (key, _) in self.store.list()? {
            let unit = key.unit_id(self.unit_prefix);
            for suffix in STORAGE_SUFFIXES {
                expected.insert(format!("{}_{}", unit, suffix));
            }
        }
        Ok(expected)
    }

    async fn actual_resources(&self) -> Result<BTreeSet<String>> {
        let prefix = format!("{}-", self.unit_prefix);
        let infra = format!("{}_", self.infra_project);
        Ok(self
            .executor
            .list_storage_resources(&prefix)
            .await?
            .into_iter()
            .filter(|name| name.starts_with(&prefix) && !name.starts_with(&infra))
            .collect())
    }

    /// Orphan candidates, without touching anything.
    pub async fn detect(&self) -> Result<Vec<String>> {
        let expected = self.expected_resources()?;
        let actual = self.actual_resources().await?;
        Ok(find_orphans(&expected, &actual))
    }

    /// Offer each orphan to the operator and delete the ones confirmed.
    ///
    /// Nothing is deleted without an explicit yes. A failed deletion is
    /// recorded and the pass moves on to the next candidate.
    pub async fn run(&self, dry_run: bool) -> Result<ReconcileReport> {
        let candidates = self.detect().await?;
        let mut report = ReconcileReport {
            candidates: candidates.clone(),
            ..Default::default()
        };

        if candidates.is_empty() {
            tracing::info!("No orphaned storage found");
            return Ok(report);
        }

        for name in candidates {
            if dry_run {
                report.skipped.push(name);
                continue;
            }

            let question = format!("Delete orphaned volume '{}'?", name);
            if !self.operator.confirm(&question)? {
                tracing::debug!("Keeping '{}'", name);
                report.skipped.push(name);
                continue;
            }

            match self.executor.delete_storage_resource(&name).await {
                Ok(()) => {
                    tracing::info!("Deleted orphaned volume '{}'", name);
                    report.deleted.push(name);
                }
                Err(e) => {
                    tracing::warn!("Failed to delete '{}': {}", name, e);
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }
}
