//! Tracking and teardown of temporary RDS resources
//!
//! [`CleanupGuard`] owns the [`TempResourceSet`] of a run. Resources are
//! registered as soon as their create call succeeds and cleared as soon as
//! their delete call succeeds, so calling [`CleanupGuard::cleanup`] any
//! number of times issues each delete at most once.

use crate::aws::{is_not_found, RdsOperations};
use anyhow::{Context, Result};
use mascaras_common::ResourceKind;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Identifiers of the resources a run has created and not yet deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TempResourceSet {
    pub cluster: Option<String>,
    pub instance: Option<String>,
    /// Product of the run, never deleted
    pub snapshot: Option<String>,
    /// Product of the run, never deleted
    pub export_task: Option<String>,
}

impl TempResourceSet {
    /// Resources that still need deleting, in cleanup order
    pub fn pending(&self) -> Vec<(ResourceKind, String)> {
        let mut pending: Vec<(ResourceKind, String)> = [
            (ResourceKind::DbCluster, &self.cluster),
            (ResourceKind::DbInstance, &self.instance),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.clone().map(|id| (kind, id)))
        .collect();
        pending.sort_by_key(|(kind, _)| kind.cleanup_priority());
        pending
    }

    pub fn is_clean(&self) -> bool {
        self.cluster.is_none() && self.instance.is_none()
    }

    fn clear(&mut self, kind: ResourceKind) {
        match kind {
            ResourceKind::DbCluster => self.cluster = None,
            ResourceKind::DbInstance => self.instance = None,
            ResourceKind::ClusterSnapshot => self.snapshot = None,
            ResourceKind::ExportTask => self.export_task = None,
        }
    }
}

/// Guard that releases the temporary cluster and instance.
pub struct CleanupGuard<'a, P: RdsOperations> {
    rds: &'a P,
    resources: TempResourceSet,
}

impl<'a, P: RdsOperations> CleanupGuard<'a, P> {
    pub fn new(rds: &'a P) -> Self {
        Self {
            rds,
            resources: TempResourceSet::default(),
        }
    }

    pub fn register_cluster(&mut self, cluster_id: impl Into<String>) {
        let cluster_id = cluster_id.into();
        debug!(cluster = %cluster_id, "Registered temp cluster for cleanup");
        self.resources.cluster = Some(cluster_id);
    }

    pub fn register_instance(&mut self, instance_id: impl Into<String>) {
        let instance_id = instance_id.into();
        debug!(instance = %instance_id, "Registered temp instance for cleanup");
        self.resources.instance = Some(instance_id);
    }

    pub fn record_snapshot(&mut self, snapshot_id: impl Into<String>) {
        self.resources.snapshot = Some(snapshot_id.into());
    }

    pub fn record_export_task(&mut self, task_id: impl Into<String>) {
        self.resources.export_task = Some(task_id.into());
    }

    pub fn resources(&self) -> &TempResourceSet {
        &self.resources
    }

    /// Delete every tracked instance and cluster, instance first.
    ///
    /// Stops at the first failed delete: a cluster with a live instance
    /// cannot be deleted anyway. Resources that failed stay tracked so a
    /// later call retries them. A "not found" answer counts as deleted.
    pub async fn cleanup(&mut self) -> Result<()> {
        let pending = self.resources.pending();
        if pending.is_empty() {
            debug!("Nothing to clean up");
            return Ok(());
        }

        info!(count = pending.len(), "Starting cleanup");
        for (kind, id) in pending {
            let result = match kind {
                ResourceKind::DbInstance => self.rds.delete_instance(&id).await,
                ResourceKind::DbCluster => self.rds.delete_cluster(&id).await,
                ResourceKind::ClusterSnapshot | ResourceKind::ExportTask => Ok(()),
            };

            match result {
                Ok(()) => info!(kind = %kind, id = %id, "Deleted temp resource"),
                Err(e) if is_not_found(&e) => {
                    debug!(kind = %kind, id = %id, "Temp resource already gone")
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to delete temp {kind} {id}"));
                }
            }
            self.resources.clear(kind);
        }
        info!("Finished cleanup");
        Ok(())
    }
}

impl<P: RdsOperations> Drop for CleanupGuard<'_, P> {
    fn drop(&mut self) {
        if !self.resources.is_clean() {
            warn!(
                cluster = ?self.resources.cluster,
                instance = ?self.resources.instance,
                "Temp resources left behind, delete them manually"
            );
        }
    }
}
